//! Cluster routing.
//!
//! The routing driver connects through the `helix://` scheme, keeps a
//! TTL-bounded routing table of cluster roles, and routes read work to
//! followers and write work to the leader. Members that fail are
//! evicted from the table immediately and rediscovered on the next
//! refresh.
//!
//! # Example
//!
//! ```ignore
//! use helixdb_driver::{AccessMode, RoutingDriver};
//!
//! let driver = RoutingDriver::new("helix://server1:7878,server2:7878", connector)?;
//!
//! // Routed to a follower replica.
//! let read_conn = driver.acquire(AccessMode::Read).await?;
//!
//! // Routed to the current leader.
//! let write_conn = driver.acquire(AccessMode::Write).await?;
//!
//! driver.close().await;
//! ```

mod cluster_connection;
mod cluster_pool;
mod discovery;
mod driver;
mod load_balancer;
mod table;

pub use cluster_connection::{ClusterConnection, ClusterErrorHandler};
pub use cluster_pool::ClusterConnectionPool;
pub use discovery::ClusterDiscoveryManager;
pub use driver::{is_routing_uri, parse_routing_uri, RoutingDriver, RoutingDriverMetrics};
pub use load_balancer::LoadBalancer;
pub use table::RoutingTable;
