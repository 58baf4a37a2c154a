//! Node Lifecycle
//!
//! Startup sequencing for per-node cluster daemons. The orchestrator serves
//! local health endpoints, starts the reconciliation worker, waits for the
//! API server to become reachable, starts the watches, and then runs until
//! the process is terminated.
//!
//! # Example
//!
//! ```no_run
//! use node_lifecycle::{DaemonConfig, InsecureServing, LifecycleOrchestrator, never_stop};
//! # use node_lifecycle::{LifecycleError, ReconciliationWorker, StopSignal, WatchLifecycleManager};
//! # struct Worker;
//! # impl ReconciliationWorker for Worker {
//! #     fn start(&self, _: StopSignal) -> Result<(), LifecycleError> { Ok(()) }
//! # }
//! # struct Watches;
//! # impl WatchLifecycleManager for Watches {
//! #     fn start(&self, _: StopSignal) -> Result<(), LifecycleError> { Ok(()) }
//! # }
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let config = DaemonConfig::new("node-a", client, Duration::from_secs(300))?
//!     .with_insecure_serving(InsecureServing {
//!         bind_address: "127.0.0.1:10258".parse()?,
//!     });
//!
//! // Only returns on a fatal startup error.
//! LifecycleOrchestrator::new(config, Worker, Watches)
//!     .run(never_stop())
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod orchestrator;
pub mod probe;
pub mod readiness;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use config::{
    DEFAULT_API_READY_TIMEOUT, DEFAULT_READINESS_POLL_INTERVAL, DaemonConfig, InsecureServing,
    SecureServing, TlsMaterial,
};
pub use error::LifecycleError;
pub use health::{
    AuthenticationConfig, AuthorizationConfig, HealthChecker, HealthChecks,
    HealthEndpointServer, ServingHandle, UserInfo,
};
pub use metrics::Metrics;
pub use orchestrator::{
    LifecycleOrchestrator, LifecyclePhase, ReconciliationWorker, WatchLifecycleManager,
};
pub use probe::ControlPlaneProbe;
pub use readiness::ReadinessGate;

/// Process-wide cancellation signal.
///
/// Cancelling it is observed by every component it was handed to. It is
/// never un-cancelled.
pub type StopSignal = tokio_util::sync::CancellationToken;

/// A signal nothing ever cancels; what production runs with.
#[must_use]
pub fn never_stop() -> StopSignal {
    StopSignal::new()
}
