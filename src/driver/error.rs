//! Driver error types.

use std::io;

use thiserror::Error;

/// Server error codes, `Helix.{Category}.{SubCategory}.{Kind}`.
pub mod codes {
    /// The member rejected a write because it is no longer the leader.
    pub const NOT_A_LEADER: &str = "Helix.ClientError.Cluster.NotALeader";
    /// The member is serving a read-only copy of the database.
    pub const FORBIDDEN_ON_READ_ONLY_DATABASE: &str =
        "Helix.ClientError.General.ForbiddenOnReadOnlyDatabase";
    /// Prefix for transient server errors that are safe to retry.
    pub const TRANSIENT_PREFIX: &str = "Helix.TransientError";
}

// ============================================================================
// DriverError
// ============================================================================

/// Errors produced by the driver.
#[derive(Error, Debug)]
pub enum DriverError {
    /// No reachable server could satisfy the request at all.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The routing table has no candidate of the required role left.
    /// Recoverable by a later call once topology is rediscovered.
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// Operation attempted after the driver was disposed.
    #[error("Driver is disposed")]
    Disposed,

    /// Transport-level connection failure.
    #[error("Connection error: {0}")]
    Connection(String),

    /// An operation exceeded its deadline.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Connection pool failure (closed pool, exhausted semaphore).
    #[error("Pool error: {0}")]
    Pool(String),

    /// Invalid driver configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Unexpected protocol exchange with the server.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Error reported by the server, with its error code.
    #[error("Server error: {code} - {message}")]
    Server { code: String, message: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl DriverError {
    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    pub fn session_expired(msg: impl Into<String>) -> Self {
        Self::SessionExpired(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn pool(msg: impl Into<String>) -> Self {
        Self::Pool(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn server(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Server {
            code: code.into(),
            message: message.into(),
        }
    }

    /// True when the underlying server should be treated as unreachable.
    ///
    /// Such failures evict the member from the routing table entirely.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::ServiceUnavailable(_) | Self::Connection(_) | Self::Timeout(_) | Self::Io(_)
        )
    }

    /// True when the server is healthy but no longer accepts writes
    /// (leadership change). Such failures demote the member from the
    /// writer role only.
    pub fn is_write_failure(&self) -> bool {
        matches!(
            self,
            Self::Server { code, .. }
                if code == codes::NOT_A_LEADER || code == codes::FORBIDDEN_ON_READ_ONLY_DATABASE
        )
    }

    /// True when a retry at a higher level may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ServiceUnavailable(_) | Self::SessionExpired(_) | Self::Timeout(_) => true,
            Self::Connection(_) => true,
            Self::Server { code, .. } => {
                code.starts_with(codes::TRANSIENT_PREFIX) || self.is_write_failure()
            }
            _ => false,
        }
    }
}

/// Driver result type.
pub type DriverResult<T> = Result<T, DriverError>;

// ============================================================================
// Tests
// ============================================================================
