//! Driver core.
//!
//! Client-side building blocks for talking to a HelixDB cluster:
//!
//! - Configuration and addressing (`config`)
//! - Error taxonomy (`error`)
//! - The wire-layer boundary traits (`connection`)
//! - Per-server connection pooling (`pool`)
//! - Cluster routing (`routing`)
//!
//! # Example
//!
//! ```ignore
//! use helixdb_driver::{AccessMode, RoutingConfig, RoutingDriver, ServerAddress};
//!
//! let config = RoutingConfig::new(vec![ServerAddress::new("server1", 7878)]);
//! let driver = RoutingDriver::with_config(config, connector);
//!
//! driver.verify_connectivity().await?;
//! let conn = driver.acquire(AccessMode::Read).await?;
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod pool;
pub mod routing;

pub use config::{AccessMode, RoutingConfig, ServerAddress, DEFAULT_PORT};
pub use connection::{Connector, DnsSeedResolver, RoutingInfo, SeedResolver, ServerConnection};
pub use error::{DriverError, DriverResult};
pub use pool::{
    ConnectionPool, ConnectionState, PoolConfig, PoolConfigBuilder, PoolMetrics, PooledConnection,
};
pub use routing::{
    is_routing_uri, parse_routing_uri, ClusterConnection, ClusterConnectionPool,
    ClusterDiscoveryManager, ClusterErrorHandler, LoadBalancer, RoutingDriver,
    RoutingDriverMetrics, RoutingTable,
};
