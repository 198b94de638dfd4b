//! # HelixDB Driver
//!
//! Cluster-aware Rust driver core for [HelixDB](https://helixdb.dev).
//!
//! ## Features
//!
//! - **Cluster routing** - Reads go to follower replicas, writes to the
//!   current leader, driven by a TTL-bounded routing table the driver
//!   rediscovers on demand
//! - **Async/Await** - Built on Tokio
//! - **Connection pooling** - One lazily-populated pool per cluster
//!   member, reconciled against the routing table on every refresh
//! - **Failure feedback** - Unreachable members are evicted from the
//!   routing table the moment a connection attempt fails, and demoted
//!   leaders lose their writer role without losing their other duties
//!
//! ## Quick Start
//!
//! ```ignore
//! use helixdb_driver::{AccessMode, RoutingDriver};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let driver = RoutingDriver::new(
//!         "helix://server1:7878,server2:7878,server3:7878",
//!         connector,
//!     )?;
//!
//!     driver.verify_connectivity().await?;
//!
//!     // Routed to a follower.
//!     let read_conn = driver.acquire(AccessMode::Read).await?;
//!
//!     // Routed to the leader.
//!     let write_conn = driver.acquire(AccessMode::Write).await?;
//!
//!     driver.close().await;
//!     Ok(())
//! }
//! ```
//!
//! The wire protocol lives behind the [`Connector`] and
//! [`ServerConnection`] traits, so the routing core is independent of
//! any particular protocol version.

pub mod driver;

pub use driver::{
    is_routing_uri, parse_routing_uri, AccessMode, ClusterConnection, ClusterConnectionPool,
    ClusterDiscoveryManager, ClusterErrorHandler, ConnectionPool, ConnectionState, Connector,
    DnsSeedResolver, DriverError, DriverResult, LoadBalancer, PoolConfig, PoolConfigBuilder,
    PoolMetrics, PooledConnection, RoutingConfig, RoutingDriver, RoutingDriverMetrics,
    RoutingInfo, RoutingTable, SeedResolver, ServerAddress, ServerConnection, DEFAULT_PORT,
};
