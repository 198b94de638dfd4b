//! The load balancer: sole entry point for acquiring cluster
//! connections, and sole sink for member-failure feedback.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Mutex;

use super::super::config::{AccessMode, RoutingConfig, ServerAddress};
use super::super::connection::{Connector, DnsSeedResolver, SeedResolver};
use super::super::error::{DriverError, DriverResult};
use super::cluster_connection::{ClusterConnection, ClusterErrorHandler};
use super::cluster_pool::ClusterConnectionPool;
use super::discovery::ClusterDiscoveryManager;
use super::table::RoutingTable;

/// Routes connection requests to healthy cluster members.
///
/// Owns the current routing table (replaced wholesale under its lock on
/// every successful rediscovery) and the per-cluster connection pool.
/// Refresh is serialized on one async mutex, so concurrent callers
/// observing a stale table queue up and all see the same fresh table
/// instead of each running its own topology query.
pub struct LoadBalancer {
    table: RwLock<RoutingTable>,
    pool: Arc<ClusterConnectionPool>,
    seeds: Vec<ServerAddress>,
    resolver: Arc<dyn SeedResolver>,
    database: Option<String>,
    ttl_override: Option<Duration>,
    refresh_lock: Mutex<()>,
    disposed: AtomicBool,
}

impl LoadBalancer {
    pub fn new(config: RoutingConfig, connector: Arc<dyn Connector>) -> Arc<Self> {
        Self::with_resolver(config, connector, Arc::new(DnsSeedResolver))
    }

    /// Construct with a custom seed resolver instead of DNS.
    pub fn with_resolver(
        config: RoutingConfig,
        connector: Arc<dyn Connector>,
        resolver: Arc<dyn SeedResolver>,
    ) -> Arc<Self> {
        let pool = Arc::new(ClusterConnectionPool::new(connector, config.pool));
        pool.add(&config.routers);

        Arc::new(Self {
            table: RwLock::new(RoutingTable::seeded(config.routers.clone())),
            pool,
            seeds: config.routers,
            resolver,
            database: config.database,
            ttl_override: config.routing_table_ttl_override,
            refresh_lock: Mutex::new(()),
            disposed: AtomicBool::new(false),
        })
    }

    /// Acquire a healthy connection for the given access intent.
    ///
    /// Triggers rediscovery when the routing table is stale, and falls
    /// through to the next candidate member when one is unreachable.
    /// Fails with `SessionExpired` when no member of the required role
    /// is left, and with `ServiceUnavailable` when rediscovery itself
    /// exhausts every router and the re-resolved seeds.
    pub async fn acquire(self: &Arc<Self>, mode: AccessMode) -> DriverResult<ClusterConnection> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(DriverError::Disposed);
        }

        self.ensure_routing_table_is_fresh(mode).await?;
        let conn = self.acquire_for(mode).await?;

        // Disposal may have begun while the acquisition was in flight.
        // Re-checking here bounds the window in which a connection
        // could leak past `close()`; best effort, not linearizable.
        if self.disposed.load(Ordering::SeqCst) {
            drop(conn);
            return Err(DriverError::Disposed);
        }
        Ok(conn)
    }

    /// Dispose the load balancer: new acquisitions fail fast, the
    /// routing table is emptied and every pool is closed. The table
    /// and pool are emptied rather than dropped, so an acquisition
    /// racing with disposal fails through the normal "no server
    /// available" path.
    pub async fn close(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.table.write().clear();
        self.pool.close().await;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Number of cluster members the pool currently tracks.
    pub fn tracked_server_count(&self) -> usize {
        self.pool.tracked_addresses().len()
    }

    /// Connections currently checked out across the cluster.
    pub fn in_use_count(&self) -> usize {
        self.pool.in_use_count()
    }

    async fn acquire_for(self: &Arc<Self>, mode: AccessMode) -> DriverResult<ClusterConnection> {
        // One bounded pass over a materialized candidate snapshot, so
        // exhaustion is explicit and fairness observable.
        let candidates: Vec<ServerAddress> = {
            let table = self.table.read();
            let count = match mode {
                AccessMode::Read => table.reader_count(),
                AccessMode::Write => table.writer_count(),
            };
            (0..count)
                .filter_map(|_| match mode {
                    AccessMode::Read => table.next_reader(),
                    AccessMode::Write => table.next_writer(),
                })
                .collect()
        };

        for address in candidates {
            if let Some(conn) = self.create_cluster_connection(&address, mode).await? {
                return Ok(conn);
            }
        }

        Err(DriverError::session_expired(format!(
            "Failed to connect to any {mode} server"
        )))
    }

    /// Borrow a pooled connection to one member, wrapped with the
    /// error-feedback capability. `None` means the member was evicted
    /// (unreachable, or unknown to the pool) and the caller should try
    /// the next candidate.
    async fn create_cluster_connection(
        self: &Arc<Self>,
        address: &ServerAddress,
        mode: AccessMode,
    ) -> DriverResult<Option<ClusterConnection>> {
        match self.pool.try_acquire(address).await {
            Ok(Some(conn)) => Ok(Some(ClusterConnection::new(
                conn,
                address.clone(),
                mode,
                Arc::clone(self) as Arc<dyn ClusterErrorHandler>,
            ))),
            Ok(None) => {
                let error = DriverError::connection(format!(
                    "Routing table contains a server {address} that is not known to the connection pool"
                ));
                self.on_connection_error(address, &error).await;
                Ok(None)
            }
            Err(error @ DriverError::ServiceUnavailable(_)) => {
                self.on_connection_error(address, &error).await;
                Ok(None)
            }
            Err(other) => Err(other),
        }
    }

    /// Rediscover and swap in a fresh routing table when the current
    /// one is stale for `mode`. Serialized across callers.
    async fn ensure_routing_table_is_fresh(self: &Arc<Self>, mode: AccessMode) -> DriverResult<()> {
        let _guard = self.refresh_lock.lock().await;

        if !self.table.read().is_stale(mode) {
            return Ok(());
        }

        let fresh = self.update_routing_table_with_seeds().await?;
        self.pool.update(&fresh.all()).await;
        tracing::info!(table = %fresh, "Refreshed routing table");
        *self.table.write() = fresh;
        Ok(())
    }

    /// Try every known router; when all fail, re-resolve the seed
    /// addresses, add any genuinely new routers and retry once. Total
    /// failure here is terminal for the driver instance.
    async fn update_routing_table_with_seeds(self: &Arc<Self>) -> DriverResult<RoutingTable> {
        let mut tried = HashSet::new();
        if let Some(table) = self.update_routing_table(&mut tried).await? {
            return Ok(table);
        }

        let mut resolved = Vec::new();
        for seed in &self.seeds {
            match self.resolver.resolve(seed).await {
                Ok(addresses) => resolved.extend(addresses),
                Err(e) => tracing::warn!(%seed, error = %e, "Seed resolution failed"),
            }
        }

        let fresh_routers: Vec<ServerAddress> = resolved
            .into_iter()
            .filter(|address| !tried.contains(address))
            .collect();
        if !fresh_routers.is_empty() {
            self.add_routers(&fresh_routers);
            if let Some(table) = self.update_routing_table(&mut tried).await? {
                return Ok(table);
            }
        }

        Err(DriverError::service_unavailable(
            "Failed to connect to any routing server. \
             Please make sure that the cluster is up and can be accessed by the driver and retry.",
        ))
    }

    /// One bounded pass over the current router candidates, accepting
    /// the first rediscovered table that carries both roles.
    ///
    /// `SessionExpired` means the failing router was already evicted
    /// through the error callback, and a `ServiceUnavailable` marks a
    /// malformed discovery result; both advance to the next router.
    /// Anything else is fatal and propagates.
    async fn update_routing_table(
        self: &Arc<Self>,
        tried: &mut HashSet<ServerAddress>,
    ) -> DriverResult<Option<RoutingTable>> {
        let candidates: Vec<ServerAddress> = {
            let table = self.table.read();
            (0..table.router_count())
                .filter_map(|_| table.next_router())
                .collect()
        };

        for address in candidates {
            tried.insert(address.clone());

            let Some(mut conn) = self
                .create_cluster_connection(&address, AccessMode::Write)
                .await?
            else {
                continue;
            };

            let mut discovery = ClusterDiscoveryManager::new(self.database.clone());
            match discovery.rediscover(&mut conn).await {
                Ok(()) => {
                    conn.close();
                    let table = RoutingTable::new(
                        discovery.routers().to_vec(),
                        discovery.readers().to_vec(),
                        discovery.writers().to_vec(),
                        self.effective_ttl(discovery.expire_after_seconds()),
                    );
                    // Completeness, not expiry: a short or even zero
                    // TTL is a valid table, a missing role is not.
                    if table.reader_count() > 0 && table.writer_count() > 0 {
                        return Ok(Some(table));
                    }
                    tracing::info!(router = %address, "Ignoring incomplete routing table");
                }
                Err(DriverError::SessionExpired(msg)) => {
                    tracing::info!(router = %address, error = %msg, "Router no longer available");
                }
                Err(DriverError::ServiceUnavailable(msg)) => {
                    tracing::info!(router = %address, error = %msg, "Malformed routing table");
                }
                Err(other) => return Err(other),
            }
        }
        Ok(None)
    }

    fn add_routers(&self, addresses: &[ServerAddress]) {
        self.table.write().add_routers(addresses);
        self.pool.add(addresses);
    }

    fn effective_ttl(&self, server_ttl_seconds: u64) -> Duration {
        self.ttl_override
            .unwrap_or_else(|| Duration::from_secs(server_ttl_seconds))
    }
}

#[async_trait]
impl ClusterErrorHandler for LoadBalancer {
    async fn on_connection_error(&self, address: &ServerAddress, error: &DriverError) {
        tracing::info!(%address, error = %error, "Server is no longer available");
        self.table.write().remove(address);
        self.pool.purge(address).await;
    }

    async fn on_write_error(&self, address: &ServerAddress) {
        tracing::info!(%address, "Server no longer accepts writes");
        self.table.write().remove_writer(address);
    }
}

impl std::fmt::Debug for LoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBalancer")
            .field("table", &*self.table.read())
            .field("pool", &self.pool)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
