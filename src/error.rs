//! Error taxonomy for the router.
//!
//! Callers need to tell transport problems (retryable) apart from tool-level
//! failures and from their own bad input, so every category carries a stable
//! machine-readable `kind()` string that the inbound layer puts in error
//! payloads.

use std::fmt;

/// Errors surfaced by the routing engine and its components.
#[derive(Debug, Clone)]
pub enum RouterError {
    /// An upstream session could not be established or is no longer viable.
    /// Fatal to that connection until a reconnect succeeds.
    Connection { server: String, message: String },

    /// The upstream sent a malformed or unexpected response. The call fails
    /// but the connection stays usable.
    Protocol { server: String, message: String },

    /// The effective deadline elapsed before the upstream answered. The call
    /// fails but the connection stays usable.
    Timeout { server: String, secs: f64 },

    /// The tool itself reported a failure. This is data, not a router defect.
    Upstream { server: String, message: String },

    /// Caller referenced a server name that is not configured.
    UnknownServer(String),

    /// Caller referenced a qualified tool id that is not in the registry.
    UnknownTool(String),

    /// Caller polled a task id that was never spawned.
    UnknownTask(String),

    /// One or more servers could not be queried during a strict registry
    /// build. Pairs of (server name, failure message).
    RegistryBuild(Vec<(String, String)>),
}

impl RouterError {
    /// Stable category tag for error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection_error",
            Self::Protocol { .. } => "protocol_error",
            Self::Timeout { .. } => "timeout_error",
            Self::Upstream { .. } => "upstream_error",
            Self::UnknownServer(_) => "unknown_server",
            Self::UnknownTool(_) => "unknown_tool",
            Self::UnknownTask(_) => "unknown_task",
            Self::RegistryBuild(_) => "registry_build_error",
        }
    }

    /// True for transport-level failures a caller may reasonably retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection { server, message } => {
                write!(f, "connection to `{}` failed: {}", server, message)
            }
            Self::Protocol { server, message } => {
                write!(f, "protocol error from `{}`: {}", server, message)
            }
            Self::Timeout { server, secs } => {
                write!(f, "call to `{}` exceeded timeout of {}s", server, secs)
            }
            Self::Upstream { server, message } => {
                write!(f, "tool on `{}` reported failure: {}", server, message)
            }
            Self::UnknownServer(name) => write!(f, "unknown server: {}", name),
            Self::UnknownTool(id) => write!(f, "unknown tool: {}", id),
            Self::UnknownTask(id) => write!(f, "unknown task: {}", id),
            Self::RegistryBuild(failures) => {
                let names: Vec<&str> = failures.iter().map(|(n, _)| n.as_str()).collect();
                write!(f, "registry build failed for servers: {}", names.join(", "))
            }
        }
    }
}

impl std::error::Error for RouterError {}
