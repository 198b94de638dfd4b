//! Cluster-wide connection pooling.
//!
//! Maps each cluster member address to its own [`ConnectionPool`].
//! Sub-pools are created lazily (idle, not yet connected), added when a
//! topology update introduces new members, and purged when a member is
//! evicted. The tracked address set is reconciled against the routing
//! table after every successful rediscovery.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::super::config::ServerAddress;
use super::super::connection::Connector;
use super::super::error::{DriverError, DriverResult};
use super::super::pool::{ConnectionPool, PoolConfig, PooledConnection};

/// Per-cluster connection pool: one sub-pool per member address.
pub struct ClusterConnectionPool {
    pools: RwLock<HashMap<ServerAddress, Arc<ConnectionPool>>>,
    connector: Arc<dyn Connector>,
    config: PoolConfig,
    open: AtomicBool,
}

impl ClusterConnectionPool {
    pub fn new(connector: Arc<dyn Connector>, config: PoolConfig) -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            connector,
            config,
            open: AtomicBool::new(true),
        }
    }

    /// Ensure a sub-pool exists for each address not already tracked.
    /// New sub-pools hold no connections until first acquisition.
    pub fn add<'a, I: IntoIterator<Item = &'a ServerAddress>>(&self, addresses: I) {
        let mut pools = self.pools.write();
        for address in addresses {
            pools.entry(address.clone()).or_insert_with(|| {
                Arc::new(ConnectionPool::new(
                    address.clone(),
                    self.config.clone(),
                    Arc::clone(&self.connector),
                ))
            });
        }
    }

    /// Reconcile tracked addresses with the authoritative set: create
    /// sub-pools for new addresses, purge sub-pools for addresses no
    /// longer present. Runs on every successful topology refresh.
    pub async fn update(&self, addresses: &HashSet<ServerAddress>) {
        let removed: Vec<Arc<ConnectionPool>> = {
            let mut pools = self.pools.write();
            for address in addresses {
                pools.entry(address.clone()).or_insert_with(|| {
                    Arc::new(ConnectionPool::new(
                        address.clone(),
                        self.config.clone(),
                        Arc::clone(&self.connector),
                    ))
                });
            }
            let stale: Vec<ServerAddress> = pools
                .keys()
                .filter(|known| !addresses.contains(*known))
                .cloned()
                .collect();
            stale.iter().filter_map(|a| pools.remove(a)).collect()
        };

        for pool in removed {
            tracing::debug!(address = %pool.address(), "Pruning sub-pool after topology change");
            pool.close().await;
        }
    }

    /// Borrow or lazily establish a connection to `address`.
    ///
    /// Returns `Ok(None)` when the address is unknown to the pool.
    /// An unreachable server surfaces as `ServiceUnavailable` so the
    /// load balancer can evict the member and try elsewhere.
    pub async fn try_acquire(
        &self,
        address: &ServerAddress,
    ) -> DriverResult<Option<PooledConnection>> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(DriverError::pool("Cluster connection pool is closed"));
        }

        let pool = { self.pools.read().get(address).cloned() };
        match pool {
            Some(pool) => pool.acquire().await.map(Some),
            None => Ok(None),
        }
    }

    /// Close and discard the sub-pool for one address. Idempotent.
    pub async fn purge(&self, address: &ServerAddress) {
        let removed = { self.pools.write().remove(address) };
        if let Some(pool) = removed {
            tracing::debug!(%address, "Purging sub-pool");
            pool.close().await;
        }
    }

    /// Close every sub-pool. Subsequent acquisitions fail fast.
    pub async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);

        let drained: Vec<Arc<ConnectionPool>> = {
            let mut pools = self.pools.write();
            pools.drain().map(|(_, pool)| pool).collect()
        };
        for pool in drained {
            pool.close().await;
        }
    }

    /// Whether `address` currently has a sub-pool.
    pub fn contains(&self, address: &ServerAddress) -> bool {
        self.pools.read().contains_key(address)
    }

    /// Snapshot of the tracked address set.
    pub fn tracked_addresses(&self) -> HashSet<ServerAddress> {
        self.pools.read().keys().cloned().collect()
    }

    /// Number of connections currently held in use across the cluster.
    pub fn in_use_count(&self) -> usize {
        self.pools
            .read()
            .values()
            .map(|pool| pool.in_use_count())
            .sum()
    }
}

impl std::fmt::Debug for ClusterConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterConnectionPool")
            .field("tracked", &self.tracked_addresses())
            .field("open", &self.open.load(Ordering::SeqCst))
            .finish()
    }
}
