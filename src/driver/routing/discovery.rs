//! Topology rediscovery over one live router connection.

use super::super::config::ServerAddress;
use super::super::error::{DriverError, DriverResult};
use super::cluster_connection::ClusterConnection;

/// Runs the cluster topology query against a candidate router and
/// holds the parsed result.
///
/// A malformed or empty result is a `ServiceUnavailable` condition for
/// that router attempt; the caller must try a different router rather
/// than retry the same one.
#[derive(Debug, Default)]
pub struct ClusterDiscoveryManager {
    database: Option<String>,
    routers: Vec<ServerAddress>,
    readers: Vec<ServerAddress>,
    writers: Vec<ServerAddress>,
    expire_after_seconds: u64,
}

impl ClusterDiscoveryManager {
    pub fn new(database: Option<String>) -> Self {
        Self {
            database,
            ..Default::default()
        }
    }

    /// Run the topology query and parse the result into role lists.
    pub async fn rediscover(&mut self, connection: &mut ClusterConnection) -> DriverResult<()> {
        let info = connection.route(self.database.as_deref()).await?;

        if info.routers.is_empty() {
            return Err(DriverError::service_unavailable(format!(
                "Topology query against {} returned no routers",
                connection.server_address()
            )));
        }

        tracing::debug!(
            router = %connection.server_address(),
            routers = info.routers.len(),
            readers = info.readers.len(),
            writers = info.writers.len(),
            ttl_seconds = info.ttl_seconds,
            "Rediscovered cluster topology"
        );

        self.routers = info.routers;
        self.readers = info.readers;
        self.writers = info.writers;
        self.expire_after_seconds = info.ttl_seconds;
        Ok(())
    }

    pub fn routers(&self) -> &[ServerAddress] {
        &self.routers
    }

    pub fn readers(&self) -> &[ServerAddress] {
        &self.readers
    }

    pub fn writers(&self) -> &[ServerAddress] {
        &self.writers
    }

    pub fn expire_after_seconds(&self) -> u64 {
        self.expire_after_seconds
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::cluster_connection::testing::RecordingHandler;
    use super::super::cluster_connection::{ClusterConnection, ClusterErrorHandler};
    use super::*;
    use crate::driver::config::AccessMode;
    use crate::driver::connection::testing::{addr, FakeConnector};
    use crate::driver::connection::RoutingInfo;
    use crate::driver::pool::{ConnectionPool, PoolConfig};

    async fn router_connection(connector: &Arc<FakeConnector>) -> ClusterConnection {
        let pool = Arc::new(ConnectionPool::new(
            addr("router1"),
            PoolConfig::default(),
            connector.clone() as Arc<dyn crate::driver::connection::Connector>,
        ));
        let conn = pool.acquire().await.unwrap();
        ClusterConnection::new(
            conn,
            addr("router1"),
            AccessMode::Write,
            Arc::new(RecordingHandler::default()) as Arc<dyn ClusterErrorHandler>,
        )
    }

    #[tokio::test]
    async fn test_rediscover_parses_roles_and_ttl() {
        let connector = Arc::new(FakeConnector::with_reachable([addr("router1")]));
        connector.set_routing_info(
            addr("router1"),
            RoutingInfo {
                ttl_seconds: 600,
                routers: vec![addr("router1"), addr("router2")],
                readers: vec![addr("r1"), addr("r2")],
                writers: vec![addr("w1")],
                database: None,
            },
        );

        let mut conn = router_connection(&connector).await;
        let mut discovery = ClusterDiscoveryManager::new(None);
        discovery.rediscover(&mut conn).await.unwrap();

        assert_eq!(discovery.routers().len(), 2);
        assert_eq!(discovery.readers(), &[addr("r1"), addr("r2")]);
        assert_eq!(discovery.writers(), &[addr("w1")]);
        assert_eq!(discovery.expire_after_seconds(), 600);
    }

    #[tokio::test]
    async fn test_rediscover_without_routers_is_service_unavailable() {
        let connector = Arc::new(FakeConnector::with_reachable([addr("router1")]));
        connector.set_routing_info(
            addr("router1"),
            RoutingInfo {
                ttl_seconds: 600,
                routers: Vec::new(),
                readers: vec![addr("r1")],
                writers: vec![addr("w1")],
                database: None,
            },
        );

        let mut conn = router_connection(&connector).await;
        let mut discovery = ClusterDiscoveryManager::new(None);
        let err = discovery.rediscover(&mut conn).await.unwrap_err();

        assert!(matches!(err, DriverError::ServiceUnavailable(_)));
    }
}
