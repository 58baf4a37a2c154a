//! Daemon configuration.
//!
//! `DaemonConfig` is assembled once by the binary (from environment variables)
//! and then owned by the orchestrator for the lifetime of the process.

use crate::error::LifecycleError;
use crate::health::{AuthenticationConfig, AuthorizationConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default time to wait for the API server before giving up.
pub const DEFAULT_API_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default spacing between API server readiness probes.
pub const DEFAULT_READINESS_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// PEM-encoded certificate and private key on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    /// Certificate chain
    pub cert_path: PathBuf,
    /// Private key
    pub key_path: PathBuf,
}

/// Authenticated HTTPS health listener.
#[derive(Debug, Clone)]
pub struct SecureServing {
    /// Address to bind (port 0 picks a free port)
    pub bind_address: SocketAddr,
    /// Serving certificate
    pub tls: TlsMaterial,
    /// Who may call the listener
    pub authentication: AuthenticationConfig,
    /// What authenticated callers may reach
    pub authorization: AuthorizationConfig,
}

/// Plain HTTP health listener. Every caller is treated as a superuser, so it
/// should only be bound to loopback or a trusted network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsecureServing {
    /// Address to bind (port 0 picks a free port)
    pub bind_address: SocketAddr,
}

/// Immutable configuration for a single daemon process.
#[derive(Debug, Clone)]
pub struct DaemonConfig<C> {
    node_name: String,
    client: C,
    reconcile_interval: Duration,
    api_ready_timeout: Duration,
    readiness_poll_interval: Duration,
    secure_serving: Option<SecureServing>,
    insecure_serving: Option<InsecureServing>,
}

impl<C> DaemonConfig<C> {
    /// Creates a configuration with no health listeners and default readiness timings.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `node_name` is empty or `reconcile_interval` is zero.
    pub fn new(
        node_name: impl Into<String>,
        client: C,
        reconcile_interval: Duration,
    ) -> Result<Self, LifecycleError> {
        let node_name = node_name.into();
        if node_name.trim().is_empty() {
            return Err(LifecycleError::InvalidConfig(
                "node name must not be empty".to_string(),
            ));
        }
        ensure_positive("reconcile interval", reconcile_interval)?;

        Ok(Self {
            node_name,
            client,
            reconcile_interval,
            api_ready_timeout: DEFAULT_API_READY_TIMEOUT,
            readiness_poll_interval: DEFAULT_READINESS_POLL_INTERVAL,
            secure_serving: None,
            insecure_serving: None,
        })
    }

    /// Enables the authenticated health listener.
    #[must_use]
    pub fn with_secure_serving(mut self, serving: SecureServing) -> Self {
        self.secure_serving = Some(serving);
        self
    }

    /// Enables the unauthenticated health listener.
    #[must_use]
    pub fn with_insecure_serving(mut self, serving: InsecureServing) -> Self {
        self.insecure_serving = Some(serving);
        self
    }

    /// Overrides how long startup waits for the API server.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a zero timeout.
    pub fn with_api_ready_timeout(mut self, timeout: Duration) -> Result<Self, LifecycleError> {
        ensure_positive("API ready timeout", timeout)?;
        self.api_ready_timeout = timeout;
        Ok(self)
    }

    /// Overrides the spacing between readiness probes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a zero interval.
    pub fn with_readiness_poll_interval(
        mut self,
        interval: Duration,
    ) -> Result<Self, LifecycleError> {
        ensure_positive("readiness poll interval", interval)?;
        self.readiness_poll_interval = interval;
        Ok(self)
    }

    /// Name of the node this daemon manages
    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Shared control-plane client
    pub fn client(&self) -> &C {
        &self.client
    }

    /// How often the worker reconciles the node
    pub fn reconcile_interval(&self) -> Duration {
        self.reconcile_interval
    }

    /// Upper bound on the API server readiness wait
    pub fn api_ready_timeout(&self) -> Duration {
        self.api_ready_timeout
    }

    /// Spacing between readiness probes
    pub fn readiness_poll_interval(&self) -> Duration {
        self.readiness_poll_interval
    }

    /// Authenticated listener, if configured
    pub fn secure_serving(&self) -> Option<&SecureServing> {
        self.secure_serving.as_ref()
    }

    /// Unauthenticated listener, if configured
    pub fn insecure_serving(&self) -> Option<&InsecureServing> {
        self.insecure_serving.as_ref()
    }
}

fn ensure_positive(what: &str, value: Duration) -> Result<(), LifecycleError> {
    if value.is_zero() {
        return Err(LifecycleError::InvalidConfig(format!(
            "{what} must be greater than zero"
        )));
    }
    Ok(())
}
