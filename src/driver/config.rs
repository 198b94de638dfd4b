//! Server addresses, access modes and routing configuration.

use std::fmt;
use std::time::Duration;

use super::error::{DriverError, DriverResult};
use super::pool::PoolConfig;

/// Default Helix protocol port.
pub const DEFAULT_PORT: u16 = 7878;

// ============================================================================
// AccessMode
// ============================================================================

/// Access intent for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// Read-only work, routed to reader members.
    Read,
    /// Write work, routed to the writer members.
    Write,
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

// ============================================================================
// ServerAddress
// ============================================================================

/// Host/port identity of a cluster member.
///
/// Equality is by value; the address is purely a lookup key into the
/// routing table and the connection pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse a `host[:port]` string, defaulting to [`DEFAULT_PORT`].
    pub fn parse(s: &str) -> DriverResult<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.len() {
            1 if !parts[0].is_empty() => Ok(Self::new(parts[0], DEFAULT_PORT)),
            2 => {
                let port = parts[1]
                    .parse()
                    .map_err(|_| DriverError::configuration(format!("Invalid port in '{s}'")))?;
                Ok(Self::new(parts[0], port))
            }
            _ => Err(DriverError::configuration(format!(
                "Invalid server address '{s}'"
            ))),
        }
    }

    /// `host:port` form suitable for socket connection and DNS lookup.
    pub fn to_socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }
}

// ============================================================================
// RoutingConfig
// ============================================================================

/// Configuration for the cluster routing core.
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    /// Initial seed routers. The routing table is rebuilt from these on
    /// every driver construction; no routing state is persisted.
    pub routers: Vec<ServerAddress>,
    /// Database the topology query targets, when the cluster hosts more
    /// than one.
    pub database: Option<String>,
    /// Sizing and lifetime settings applied to every per-server pool.
    pub pool: PoolConfig,
    /// When set, wins over the server-supplied routing table TTL.
    pub routing_table_ttl_override: Option<Duration>,
}

impl RoutingConfig {
    pub fn new(routers: Vec<ServerAddress>) -> Self {
        Self {
            routers,
            database: None,
            pool: PoolConfig::default(),
            routing_table_ttl_override: None,
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_ttl_override(mut self, ttl: Duration) -> Self {
        self.routing_table_ttl_override = Some(ttl);
        self
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

// ============================================================================
// Tests
// ============================================================================
