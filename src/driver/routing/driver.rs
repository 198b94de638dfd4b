//! Routing driver facade.
//!
//! Connects to a cluster through the `helix://` scheme and routes every
//! acquisition through the load balancer.

use std::sync::Arc;

use super::super::config::{AccessMode, RoutingConfig, ServerAddress};
use super::super::connection::Connector;
use super::super::error::{DriverError, DriverResult};
use super::cluster_connection::ClusterConnection;
use super::load_balancer::LoadBalancer;

/// Cluster-aware driver.
///
/// URI format: `helix://host1:port1,host2:port2,...`. Read work is
/// routed to follower replicas, write work to the current leader.
pub struct RoutingDriver {
    load_balancer: Arc<LoadBalancer>,
    initial_routers: Vec<ServerAddress>,
}

impl RoutingDriver {
    /// Create a routing driver from a `helix://` URI.
    pub fn new(uri: &str, connector: Arc<dyn Connector>) -> DriverResult<Self> {
        let routers = parse_routing_uri(uri)?;
        Ok(Self::with_config(RoutingConfig::new(routers), connector))
    }

    /// Create a routing driver from an explicit configuration.
    pub fn with_config(config: RoutingConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            initial_routers: config.routers.clone(),
            load_balancer: LoadBalancer::new(config, connector),
        }
    }

    /// Acquire a connection suitable for the given access mode,
    /// refreshing the routing table first when it has gone stale.
    pub async fn acquire(&self, mode: AccessMode) -> DriverResult<ClusterConnection> {
        self.load_balancer.acquire(mode).await
    }

    /// Verify that at least one cluster member is reachable by
    /// acquiring a read connection and probing it.
    pub async fn verify_connectivity(&self) -> DriverResult<()> {
        let mut conn = self.load_balancer.acquire(AccessMode::Read).await?;
        conn.reset().await?;
        conn.close();
        Ok(())
    }

    /// Close the driver. Idempotent; subsequent acquisitions fail with
    /// [`DriverError::Disposed`].
    pub async fn close(&self) {
        self.load_balancer.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.load_balancer.is_disposed()
    }

    pub fn initial_routers(&self) -> &[ServerAddress] {
        &self.initial_routers
    }

    /// Point-in-time driver statistics.
    pub fn metrics(&self) -> RoutingDriverMetrics {
        RoutingDriverMetrics {
            tracked_servers: self.load_balancer.tracked_server_count(),
            in_use_connections: self.load_balancer.in_use_count(),
        }
    }
}

impl std::fmt::Debug for RoutingDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingDriver")
            .field("initial_routers", &self.initial_routers)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Point-in-time driver statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingDriverMetrics {
    /// Cluster members the connection pool currently tracks.
    pub tracked_servers: usize,
    /// Connections currently checked out.
    pub in_use_connections: usize,
}

/// Whether a URI selects the routing driver.
pub fn is_routing_uri(uri: &str) -> bool {
    uri.starts_with("helix://")
}

/// Parse the comma-separated router list out of a `helix://` URI.
pub fn parse_routing_uri(uri: &str) -> DriverResult<Vec<ServerAddress>> {
    let Some(hosts) = uri.strip_prefix("helix://") else {
        return Err(DriverError::configuration(format!(
            "Unsupported URI scheme: {uri}"
        )));
    };

    let mut routers = Vec::new();
    for part in hosts.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        routers.push(ServerAddress::parse(part)?);
    }

    if routers.is_empty() {
        return Err(DriverError::configuration("No routers specified"));
    }
    Ok(routers)
}
