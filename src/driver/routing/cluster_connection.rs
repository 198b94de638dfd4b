//! Connection wrapper that feeds failures back into the load balancer.

use std::sync::Arc;

use async_trait::async_trait;

use super::super::config::{AccessMode, ServerAddress};
use super::super::connection::RoutingInfo;
use super::super::error::{DriverError, DriverResult};
use super::super::pool::PooledConnection;

/// Capability through which connection wrappers report member failures.
///
/// Implemented by the load balancer and injected into every
/// [`ClusterConnection`] at construction, keeping the dependency
/// direction explicit and the wrapper testable with a fake handler.
#[async_trait]
pub trait ClusterErrorHandler: Send + Sync {
    /// The member is unreachable: remove it from every routing role
    /// and purge its sub-pool.
    async fn on_connection_error(&self, address: &ServerAddress, error: &DriverError);

    /// The member rejected a write (leadership change): demote it from
    /// the writer role only.
    async fn on_write_error(&self, address: &ServerAddress);
}

/// A pooled connection bound to one cluster member for one access mode.
///
/// I/O failures observed while using the connection are classified and
/// reported to the error handler before being rethrown as
/// `SessionExpired`, which callers treat as "pick another member".
pub struct ClusterConnection {
    connection: Option<PooledConnection>,
    address: ServerAddress,
    mode: AccessMode,
    handler: Arc<dyn ClusterErrorHandler>,
}

impl ClusterConnection {
    pub fn new(
        connection: PooledConnection,
        address: ServerAddress,
        mode: AccessMode,
        handler: Arc<dyn ClusterErrorHandler>,
    ) -> Self {
        Self {
            connection: Some(connection),
            address,
            mode,
            handler,
        }
    }

    pub fn server_address(&self) -> &ServerAddress {
        &self.address
    }

    pub fn access_mode(&self) -> AccessMode {
        self.mode
    }

    /// Run the topology discovery query on this connection.
    pub async fn route(&mut self, database: Option<&str>) -> DriverResult<RoutingInfo> {
        let result = match self.connection.as_mut().and_then(|c| c.connection_mut()) {
            Some(conn) => conn.route(database).await,
            None => return Err(DriverError::connection("Connection already released")),
        };
        match result {
            Ok(info) => Ok(info),
            Err(e) => Err(self.handle_failure(e).await),
        }
    }

    /// Probe connection liveness.
    pub async fn reset(&mut self) -> DriverResult<()> {
        let result = match self.connection.as_mut().and_then(|c| c.connection_mut()) {
            Some(conn) => conn.reset().await,
            None => return Err(DriverError::connection("Connection already released")),
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) => Err(self.handle_failure(e).await),
        }
    }

    /// Release the connection back to its pool.
    pub fn close(self) {
        drop(self);
    }

    async fn handle_failure(&mut self, error: DriverError) -> DriverError {
        if error.is_connectivity() {
            // The socket is suspect: discard it rather than returning
            // it to the idle queue.
            if let Some(mut conn) = self.connection.take() {
                conn.mark_failed();
                conn.return_to_pool();
            }
            self.handler
                .on_connection_error(&self.address, &error)
                .await;
            return DriverError::session_expired(format!(
                "Server at {} is no longer available: {}",
                self.address, error
            ));
        }

        if error.is_write_failure() {
            self.handler.on_write_error(&self.address).await;
            return DriverError::session_expired(format!(
                "Server at {} no longer accepts writes: {}",
                self.address, error
            ));
        }

        error
    }
}

impl Drop for ClusterConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.return_to_pool();
        }
    }
}

impl std::fmt::Debug for ClusterConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterConnection")
            .field("address", &self.address)
            .field("mode", &self.mode)
            .field("held", &self.connection.is_some())
            .finish()
    }
}

// ============================================================================
// Test doubles
// ============================================================================
