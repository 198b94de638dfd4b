//! The boundary to the wire-protocol layer.
//!
//! The routing core never frames or serializes protocol messages itself.
//! It talks to the codec layer through [`Connector`] and
//! [`ServerConnection`]: the only capability it requires from a live
//! connection is "run the topology query and return role-partitioned
//! address lists plus a TTL".

use async_trait::async_trait;

use super::config::ServerAddress;
use super::error::{DriverError, DriverResult};

// ============================================================================
// RoutingInfo
// ============================================================================

/// Role-partitioned cluster topology returned by the discovery query.
#[derive(Debug, Clone, Default)]
pub struct RoutingInfo {
    /// Seconds the routing table stays valid, as reported by the server.
    pub ttl_seconds: u64,
    /// Members capable of answering topology queries.
    pub routers: Vec<ServerAddress>,
    /// Members eligible to serve read-only transactions.
    pub readers: Vec<ServerAddress>,
    /// Members eligible to serve write transactions.
    pub writers: Vec<ServerAddress>,
    /// Database the topology applies to, when reported.
    pub database: Option<String>,
}

// ============================================================================
// Connector / ServerConnection
// ============================================================================

/// One established, authenticated physical connection.
#[async_trait]
pub trait ServerConnection: Send {
    /// Run the topology discovery query on this connection.
    async fn route(&mut self, database: Option<&str>) -> DriverResult<RoutingInfo>;

    /// Lightweight liveness probe (protocol RESET or equivalent).
    async fn reset(&mut self) -> DriverResult<()>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> DriverResult<()>;

    /// False once the transport is known to be broken or closed.
    fn is_open(&self) -> bool;

    /// The member this connection is bound to.
    fn server_address(&self) -> &ServerAddress;
}

/// Establishes physical connections: TCP connect, handshake and
/// authentication all live behind this seam.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &ServerAddress) -> DriverResult<Box<dyn ServerConnection>>;
}

// ============================================================================
// SeedResolver
// ============================================================================

/// Re-resolves a seed address into the set of routers it currently
/// stands for. Used as the rediscovery fallback of last resort when
/// every known router is unreachable.
#[async_trait]
pub trait SeedResolver: Send + Sync {
    async fn resolve(&self, seed: &ServerAddress) -> DriverResult<Vec<ServerAddress>>;
}

/// Default resolver: DNS lookup of the seed host, one router candidate
/// per resolved IP, seed port preserved.
#[derive(Debug, Default)]
pub struct DnsSeedResolver;

#[async_trait]
impl SeedResolver for DnsSeedResolver {
    async fn resolve(&self, seed: &ServerAddress) -> DriverResult<Vec<ServerAddress>> {
        let resolved: Vec<ServerAddress> = tokio::net::lookup_host(seed.to_socket_addr())
            .await
            .map_err(|e| {
                DriverError::service_unavailable(format!("Failed to resolve seed {seed}: {e}"))
            })?
            .map(|sock| ServerAddress::new(sock.ip().to_string(), sock.port()))
            .collect();

        if resolved.is_empty() {
            return Err(DriverError::service_unavailable(format!(
                "Seed {seed} resolved to no addresses"
            )));
        }
        Ok(resolved)
    }
}

// ============================================================================
// Test doubles
// ============================================================================
