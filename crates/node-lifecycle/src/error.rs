//! Lifecycle errors
//!
//! Every variant is fatal to startup. The daemon has no degraded mode: an
//! external supervisor is expected to restart the whole process.

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while bringing the daemon up.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Configuration rejected at construction
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A health listener could not bind its address
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested
        addr: SocketAddr,
        /// Underlying socket error
        #[source]
        source: std::io::Error,
    },

    /// TLS material for the secure listener could not be loaded
    #[error("TLS error: {0}")]
    Tls(String),

    /// A health listener failed after binding
    #[error("Serve error: {0}")]
    Serve(String),

    /// A single control-plane probe failed
    #[error("Probe failed: {0}")]
    Probe(String),

    /// The control-plane API did not become ready in time
    #[error("Timed out after {timeout:?} waiting for the API server: {last_error}")]
    DeadlineExceeded {
        /// Configured readiness timeout
        timeout: Duration,
        /// Error reported by the last failed probe
        last_error: String,
    },

    /// A collaborator failed to start
    #[error("Collaborator failed to start: {0}")]
    Collaborator(String),

    /// A collaborator was started more than once
    #[error("{0} already started")]
    AlreadyStarted(&'static str),

    /// Kubernetes client error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),
}

impl LifecycleError {
    /// Returns true for the readiness timeout condition.
    #[must_use]
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Self::DeadlineExceeded { .. })
    }
}
