//! Per-server connection pooling.
//!
//! One [`ConnectionPool`] holds the reusable physical connections for a
//! single cluster member. The cluster-wide mapping from member address
//! to pool lives in [`crate::driver::routing::ClusterConnectionPool`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::config::ServerAddress;
use super::connection::{Connector, ServerConnection};
use super::error::{DriverError, DriverResult};

// ============================================================================
// PoolConfig
// ============================================================================

/// Sizing and lifetime settings for one per-server pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections per server.
    pub max_size: usize,
    /// Idle connections to keep available.
    pub min_idle: usize,
    /// Pre-establish connections when a pool is warmed up.
    pub warmup_on_init: bool,
    /// Connections created by warmup (0 falls back to `min_idle`).
    pub warmup_size: usize,
    /// A connection older than this is never reused.
    pub max_lifetime: Duration,
    /// An idle connection unused for this long is discarded.
    pub idle_timeout: Duration,
    /// Deadline for establishing or waiting on a connection.
    pub connection_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            min_idle: 1,
            warmup_on_init: false,
            warmup_size: 0,
            max_lifetime: Duration::from_secs(3600),
            idle_timeout: Duration::from_secs(300),
            connection_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }
}

/// Builder for [`PoolConfig`].
#[derive(Debug, Clone, Default)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    pub fn max_size(mut self, size: usize) -> Self {
        self.config.max_size = size;
        self
    }

    pub fn min_idle(mut self, size: usize) -> Self {
        self.config.min_idle = size;
        self
    }

    pub fn with_warmup(mut self) -> Self {
        self.config.warmup_on_init = true;
        self
    }

    pub fn with_warmup_size(mut self, size: usize) -> Self {
        self.config.warmup_on_init = true;
        self.config.warmup_size = size;
        self
    }

    pub fn max_lifetime(mut self, duration: Duration) -> Self {
        self.config.max_lifetime = duration;
        self
    }

    pub fn idle_timeout(mut self, duration: Duration) -> Self {
        self.config.idle_timeout = duration;
        self
    }

    pub fn connection_timeout(mut self, duration: Duration) -> Self {
        self.config.connection_timeout = duration;
        self
    }

    pub fn build(self) -> PoolConfig {
        self.config
    }
}

// ============================================================================
// ConnectionState / PooledConnection
// ============================================================================

/// Lifecycle state of a pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    InUse,
    Idle,
    Closed,
    Failed,
}

/// One physical connection owned by a pool.
///
/// Exclusively owned by whichever caller currently holds it; released
/// back into its pool with [`PooledConnection::return_to_pool`] (or
/// discarded there if marked failed).
pub struct PooledConnection {
    id: u64,
    address: ServerAddress,
    created_at: Instant,
    last_used: Instant,
    state: ConnectionState,
    pool: Option<Arc<ConnectionPool>>,
    inner: Option<Box<dyn ServerConnection>>,
    // Held for the whole life of the connection, idle time included,
    // so the semaphore counts connections, not establishment attempts.
    // Dropping the connection releases capacity back to the pool.
    permit: Option<OwnedSemaphorePermit>,
}

impl PooledConnection {
    fn new(
        id: u64,
        address: ServerAddress,
        inner: Box<dyn ServerConnection>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            address,
            created_at: now,
            last_used: now,
            state: ConnectionState::InUse,
            pool: None,
            inner: Some(inner),
            permit: Some(permit),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Mutable access to the underlying protocol connection.
    pub fn connection_mut(&mut self) -> Option<&mut (dyn ServerConnection + 'static)> {
        self.inner.as_deref_mut()
    }

    /// Whether the connection may still be handed out.
    pub fn is_valid(&self, config: &PoolConfig) -> bool {
        if self.state == ConnectionState::Closed || self.state == ConnectionState::Failed {
            return false;
        }
        if !self.inner.as_ref().map(|c| c.is_open()).unwrap_or(false) {
            return false;
        }
        if self.created_at.elapsed() > config.max_lifetime {
            return false;
        }
        if self.state == ConnectionState::Idle && self.last_used.elapsed() > config.idle_timeout {
            return false;
        }
        true
    }

    pub fn mark_in_use(&mut self) {
        self.state = ConnectionState::InUse;
        self.last_used = Instant::now();
    }

    pub fn mark_idle(&mut self) {
        self.state = ConnectionState::Idle;
        self.last_used = Instant::now();
    }

    pub fn mark_closed(&mut self) {
        self.state = ConnectionState::Closed;
    }

    /// Marks the connection broken so its pool discards it on release.
    pub fn mark_failed(&mut self) {
        self.state = ConnectionState::Failed;
    }

    /// Release back to the owning pool. Healthy connections become
    /// idle; failed or expired ones are discarded by the pool.
    pub fn return_to_pool(mut self) {
        if let Some(pool) = self.pool.take() {
            if self.state == ConnectionState::InUse {
                self.mark_idle();
            }
            pool.return_connection(self);
        }
    }

    async fn close(&mut self) {
        self.mark_closed();
        if let Some(mut inner) = self.inner.take() {
            if let Err(e) = inner.close().await {
                tracing::debug!(address = %self.address, error = %e, "Error closing connection");
            }
        }
        drop(self.permit.take());
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("state", &self.state)
            .field("age", &self.created_at.elapsed())
            .finish()
    }
}

// ============================================================================
// PoolMetrics
// ============================================================================

/// Snapshot of pool counters.
#[derive(Debug, Clone, Default)]
pub struct PoolMetrics {
    pub size: usize,
    pub idle: usize,
    pub in_use: usize,
    pub total_acquisitions: u64,
    pub total_created: u64,
    pub total_closed: u64,
}

// ============================================================================
// ConnectionPool
// ============================================================================

/// Pool of reusable physical connections to one cluster member.
pub struct ConnectionPool {
    address: ServerAddress,
    config: PoolConfig,
    connector: Arc<dyn Connector>,
    idle_connections: Mutex<VecDeque<PooledConnection>>,
    semaphore: Arc<Semaphore>,
    size: AtomicUsize,
    in_use: AtomicUsize,
    total_created: AtomicU64,
    total_acquisitions: AtomicU64,
    total_closed: AtomicU64,
    next_id: AtomicU64,
    open: parking_lot::RwLock<bool>,
}

impl ConnectionPool {
    pub fn new(address: ServerAddress, config: PoolConfig, connector: Arc<dyn Connector>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_size));
        Self {
            address,
            config,
            connector,
            idle_connections: Mutex::new(VecDeque::new()),
            semaphore,
            size: AtomicUsize::new(0),
            in_use: AtomicUsize::new(0),
            total_created: AtomicU64::new(0),
            total_acquisitions: AtomicU64::new(0),
            total_closed: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            open: parking_lot::RwLock::new(true),
        }
    }

    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// Borrow an idle connection or lazily establish a new one.
    ///
    /// An unreachable server or failed handshake surfaces as
    /// [`DriverError::ServiceUnavailable`]; retry and member-selection
    /// fallback live one layer up, in the load balancer.
    pub async fn acquire(self: &Arc<Self>) -> DriverResult<PooledConnection> {
        if !*self.open.read() {
            return Err(DriverError::pool(format!(
                "Connection pool for {} is closed",
                self.address
            )));
        }

        if let Some(conn) = self.checkout_idle() {
            self.total_acquisitions.fetch_add(1, Ordering::Relaxed);
            self.in_use.fetch_add(1, Ordering::Relaxed);
            return Ok(conn);
        }

        let permit = tokio::time::timeout(
            self.config.connection_timeout,
            self.semaphore.clone().acquire_owned(),
        )
        .await
        .map_err(|_| {
            DriverError::timeout(format!(
                "Timed out acquiring a connection to {}",
                self.address
            ))
        })?
        .map_err(|_| DriverError::pool("Pool semaphore closed"))?;

        // A connection may have been returned while we waited. It
        // carries its own permit, so the fresh one goes back.
        if let Some(conn) = self.checkout_idle() {
            drop(permit);
            self.total_acquisitions.fetch_add(1, Ordering::Relaxed);
            self.in_use.fetch_add(1, Ordering::Relaxed);
            return Ok(conn);
        }

        let conn = self.create_connection(permit).await?;

        self.total_acquisitions.fetch_add(1, Ordering::Relaxed);
        self.in_use.fetch_add(1, Ordering::Relaxed);
        Ok(conn)
    }

    fn checkout_idle(self: &Arc<Self>) -> Option<PooledConnection> {
        let mut idle = self.idle_connections.lock();

        while let Some(mut conn) = idle.pop_front() {
            if conn.is_valid(&self.config) {
                conn.mark_in_use();
                conn.pool = Some(Arc::clone(self));
                return Some(conn);
            }
            conn.mark_closed();
            self.size.fetch_sub(1, Ordering::Relaxed);
            self.total_closed.fetch_add(1, Ordering::Relaxed);
        }
        None
    }

    async fn create_connection(
        self: &Arc<Self>,
        permit: OwnedSemaphorePermit,
    ) -> DriverResult<PooledConnection> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let inner = self
            .connector
            .connect(&self.address)
            .await
            .map_err(|e| match e {
                e @ DriverError::ServiceUnavailable(_) => e,
                other => DriverError::service_unavailable(format!(
                    "Failed to establish a connection to {}: {}",
                    self.address, other
                )),
            })?;

        let mut conn = PooledConnection::new(id, self.address.clone(), inner, permit);
        conn.pool = Some(Arc::clone(self));
        self.size.fetch_add(1, Ordering::Relaxed);
        self.total_created.fetch_add(1, Ordering::Relaxed);
        Ok(conn)
    }

    /// Take a connection back. Invalid connections are discarded, and
    /// nothing is kept once the pool has been closed.
    pub fn return_connection(&self, mut conn: PooledConnection) {
        self.in_use.fetch_sub(1, Ordering::Relaxed);

        if !*self.open.read() || !conn.is_valid(&self.config) {
            conn.mark_closed();
            self.size.fetch_sub(1, Ordering::Relaxed);
            self.total_closed.fetch_add(1, Ordering::Relaxed);
            return;
        }

        conn.mark_idle();
        self.idle_connections.lock().push_back(conn);
    }

    /// Close every held connection. Subsequent acquisitions fail fast.
    pub async fn close(&self) {
        *self.open.write() = false;

        let drained: Vec<PooledConnection> = {
            let mut idle = self.idle_connections.lock();
            idle.drain(..).collect()
        };
        for mut conn in drained {
            conn.close().await;
            self.size.fetch_sub(1, Ordering::Relaxed);
            self.total_closed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Pre-establish up to `count` idle connections (0 uses the
    /// configured warmup size, falling back to `min_idle`).
    pub async fn warmup(self: &Arc<Self>, count: usize) -> DriverResult<usize> {
        if !*self.open.read() {
            return Err(DriverError::pool(format!(
                "Connection pool for {} is closed",
                self.address
            )));
        }

        let target = if count > 0 {
            count
        } else if self.config.warmup_size > 0 {
            self.config.warmup_size
        } else {
            self.config.min_idle
        };
        let target = target.min(self.config.max_size);

        let current_idle = self.idle_count();
        if current_idle >= target {
            return Ok(0);
        }

        let mut created = 0;
        for _ in 0..(target - current_idle) {
            // Warmup competes for the same capacity as acquisitions.
            let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
                break;
            };
            match self.create_connection(permit).await {
                Ok(mut conn) => {
                    conn.mark_idle();
                    self.idle_connections.lock().push_back(conn);
                    created += 1;
                }
                Err(e) => {
                    tracing::warn!(address = %self.address, error = %e, "Warmup connection failed");
                    if created == 0 {
                        return Err(e);
                    }
                    break;
                }
            }
        }
        Ok(created)
    }

    /// Warm up only when the configuration asks for it.
    pub async fn warmup_if_enabled(self: &Arc<Self>) -> DriverResult<Option<usize>> {
        if !self.config.warmup_on_init {
            return Ok(None);
        }
        let count = self.warmup(0).await?;
        Ok(Some(count))
    }

    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            size: self.size.load(Ordering::Relaxed),
            idle: self.idle_count(),
            in_use: self.in_use.load(Ordering::Relaxed),
            total_acquisitions: self.total_acquisitions.load(Ordering::Relaxed),
            total_created: self.total_created.load(Ordering::Relaxed),
            total_closed: self.total_closed.load(Ordering::Relaxed),
        }
    }

    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    pub fn idle_count(&self) -> usize {
        self.idle_connections.lock().len()
    }

    pub fn in_use_count(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("address", &self.address)
            .field("size", &self.size())
            .field("idle", &self.idle_count())
            .field("in_use", &self.in_use_count())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::connection::testing::{addr, FakeConnector};

    fn test_pool(connector: Arc<FakeConnector>) -> Arc<ConnectionPool> {
        Arc::new(ConnectionPool::new(
            addr("core1"),
            PoolConfig {
                max_size: 10,
                ..Default::default()
            },
            connector,
        ))
    }

    #[test]
    fn test_pool_config_default() {
        let config = PoolConfig::default();
        assert_eq!(config.max_size, 100);
        assert_eq!(config.min_idle, 1);
        assert!(!config.warmup_on_init);
    }

    #[test]
    fn test_pool_config_builder() {
        let config = PoolConfig::builder()
            .max_size(50)
            .min_idle(5)
            .with_warmup()
            .connection_timeout(Duration::from_secs(10))
            .build();

        assert_eq!(config.max_size, 50);
        assert_eq!(config.min_idle, 5);
        assert!(config.warmup_on_init);
        assert_eq!(config.warmup_size, 0);
        assert_eq!(config.connection_timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_acquire_creates_and_reuses() {
        let connector = Arc::new(FakeConnector::with_reachable([addr("core1")]));
        let pool = test_pool(connector.clone());

        let conn = pool.acquire().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::InUse);
        assert_eq!(pool.size(), 1);
        assert_eq!(pool.in_use_count(), 1);

        let id = conn.id();
        conn.return_to_pool();
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.in_use_count(), 0);

        let conn = pool.acquire().await.unwrap();
        assert_eq!(conn.id(), id);
        assert_eq!(connector.connect_count(&addr("core1")), 1);
        conn.return_to_pool();
    }

    #[tokio::test]
    async fn test_connection_mut_reaches_protocol_connection() {
        let connector = Arc::new(FakeConnector::with_reachable([addr("core1")]));
        let pool = test_pool(connector);

        let mut conn = pool.acquire().await.unwrap();
        let inner = conn.connection_mut().unwrap();
        inner.reset().await.unwrap();
        assert_eq!(inner.server_address(), &addr("core1"));
        conn.return_to_pool();
    }

    #[tokio::test]
    async fn test_max_size_bounds_total_connections() {
        let connector = Arc::new(FakeConnector::with_reachable([addr("core1")]));
        let pool = Arc::new(ConnectionPool::new(
            addr("core1"),
            PoolConfig::builder()
                .max_size(2)
                .connection_timeout(Duration::from_millis(50))
                .build(),
            connector.clone(),
        ));

        let first = pool.acquire().await.unwrap();
        let second = pool.acquire().await.unwrap();
        assert_eq!(pool.size(), 2);

        // Capacity exhausted: the next acquisition waits and times out.
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, DriverError::Timeout(_)));
        assert_eq!(pool.size(), 2);
        assert_eq!(connector.connect_count(&addr("core1")), 2);

        // A returned connection hands its capacity to the next caller.
        second.return_to_pool();
        let third = pool.acquire().await.unwrap();
        assert_eq!(connector.connect_count(&addr("core1")), 2);

        // A discarded connection frees capacity for a replacement.
        let mut broken = third;
        broken.mark_failed();
        broken.return_to_pool();
        let replacement = pool.acquire().await.unwrap();
        assert_eq!(connector.connect_count(&addr("core1")), 3);

        replacement.return_to_pool();
        first.return_to_pool();
    }

    #[tokio::test]
    async fn test_warmup_respects_max_size() {
        let connector = Arc::new(FakeConnector::with_reachable([addr("core1")]));
        let pool = Arc::new(ConnectionPool::new(
            addr("core1"),
            PoolConfig::builder().max_size(2).build(),
            connector,
        ));

        let warmed = pool.warmup(5).await.unwrap();
        assert_eq!(warmed, 2);
        assert_eq!(pool.size(), 2);
    }

    #[tokio::test]
    async fn test_acquire_unreachable_is_service_unavailable() {
        let connector = Arc::new(FakeConnector::new());
        let pool = test_pool(connector);

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, DriverError::ServiceUnavailable(_)));
        assert_eq!(pool.size(), 0);
    }

    #[tokio::test]
    async fn test_failed_connection_is_discarded_on_return() {
        let connector = Arc::new(FakeConnector::with_reachable([addr("core1")]));
        let pool = test_pool(connector.clone());

        let mut conn = pool.acquire().await.unwrap();
        conn.mark_failed();
        conn.return_to_pool();

        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.size(), 0);

        // The next acquisition has to establish a fresh connection.
        let conn = pool.acquire().await.unwrap();
        assert_eq!(connector.connect_count(&addr("core1")), 2);
        conn.return_to_pool();
    }

    #[tokio::test]
    async fn test_closed_pool_fails_fast() {
        let connector = Arc::new(FakeConnector::with_reachable([addr("core1")]));
        let pool = test_pool(connector);

        let conn = pool.acquire().await.unwrap();
        conn.return_to_pool();
        assert_eq!(pool.idle_count(), 1);

        pool.close().await;
        assert_eq!(pool.idle_count(), 0);

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, DriverError::Pool(_)));
    }

    #[tokio::test]
    async fn test_return_after_close_discards() {
        let connector = Arc::new(FakeConnector::with_reachable([addr("core1")]));
        let pool = test_pool(connector);

        let conn = pool.acquire().await.unwrap();
        pool.close().await;
        conn.return_to_pool();

        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.size(), 0);
    }

    #[tokio::test]
    async fn test_metrics() {
        let connector = Arc::new(FakeConnector::with_reachable([addr("core1")]));
        let pool = test_pool(connector);

        let conn = pool.acquire().await.unwrap();
        let metrics = pool.metrics();
        assert_eq!(metrics.size, 1);
        assert_eq!(metrics.in_use, 1);
        assert_eq!(metrics.total_created, 1);
        assert_eq!(metrics.total_acquisitions, 1);

        conn.return_to_pool();
        let metrics = pool.metrics();
        assert_eq!(metrics.in_use, 0);
        assert_eq!(metrics.idle, 1);
    }

    #[tokio::test]
    async fn test_warmup_creates_idle_connections() {
        let connector = Arc::new(FakeConnector::with_reachable([addr("core1")]));
        let pool = Arc::new(ConnectionPool::new(
            addr("core1"),
            PoolConfig::builder().max_size(10).min_idle(3).build(),
            connector,
        ));

        let warmed = pool.warmup(0).await.unwrap();
        assert_eq!(warmed, 3);
        assert_eq!(pool.idle_count(), 3);
        assert_eq!(pool.size(), 3);

        // Already warm enough.
        assert_eq!(pool.warmup(2).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_warmup_if_enabled() {
        let connector = Arc::new(FakeConnector::with_reachable([addr("core1")]));

        let cold = Arc::new(ConnectionPool::new(
            addr("core1"),
            PoolConfig::default(),
            connector.clone(),
        ));
        assert!(cold.warmup_if_enabled().await.unwrap().is_none());

        let warm = Arc::new(ConnectionPool::new(
            addr("core1"),
            PoolConfig::builder().with_warmup_size(2).build(),
            connector,
        ));
        assert_eq!(warm.warmup_if_enabled().await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_warmup_unreachable_server_fails() {
        let connector = Arc::new(FakeConnector::new());
        let pool = test_pool(connector);

        assert!(pool.warmup(2).await.is_err());
    }
}
