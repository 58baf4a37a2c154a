//! Startup sequencing and lifecycle supervision.
//!
//! The order is fixed:
//!
//! 1. serve health endpoints (bind failure is fatal)
//! 2. start the reconciliation worker in the background
//! 3. block until the API server answers (timeout is fatal)
//! 4. start the watches
//! 5. block until the stop signal fires
//!
//! The worker starts before the watches so that no initial watch event is
//! delivered before a consumer exists. The watches start after the readiness
//! gate so a cold cluster does not see a burst of doomed list/watch calls.
//! Nothing is ever restarted: any failure ends the process.

use crate::StopSignal;
use crate::config::DaemonConfig;
use crate::error::LifecycleError;
use crate::health::{HealthChecks, HealthEndpointServer, ServingHandle};
use crate::metrics::Metrics;
use crate::probe::ControlPlaneProbe;
use crate::readiness::ReadinessGate;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

/// Startup state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    /// Nothing started yet
    Init,
    /// Health listeners bound
    ServingHealth,
    /// Reconciliation worker running
    WorkerStarted,
    /// Waiting for the API server
    AwaitingApiReady,
    /// Watches streaming
    WatchesStarted,
    /// Running until stopped
    SteadyState,
    /// A startup step failed
    FatalAbort,
}

impl LifecyclePhase {
    /// Numeric value exported on the phase gauge.
    pub fn ordinal(self) -> i64 {
        match self {
            Self::Init => 0,
            Self::ServingHealth => 1,
            Self::WorkerStarted => 2,
            Self::AwaitingApiReady => 3,
            Self::WatchesStarted => 4,
            Self::SteadyState => 5,
            Self::FatalAbort => -1,
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "Init",
            Self::ServingHealth => "ServingHealth",
            Self::WorkerStarted => "WorkerStarted",
            Self::AwaitingApiReady => "AwaitingApiReady",
            Self::WatchesStarted => "WatchesStarted",
            Self::SteadyState => "SteadyState",
            Self::FatalAbort => "FatalAbort",
        };
        f.write_str(name)
    }
}

/// Continuously reconciles the local node once started.
///
/// Implementations must tolerate being started before the watch cache has
/// synced; they simply see no objects until it has.
pub trait ReconciliationWorker: Send + Sync {
    /// Spawns the reconciliation loop and returns immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the loop cannot be constructed or was already started.
    fn start(&self, stop: StopSignal) -> Result<(), LifecycleError>;
}

/// Drives the watch streams registered by the worker.
pub trait WatchLifecycleManager: Send + Sync {
    /// Spawns every registered watch and returns immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if a watch cannot be constructed or was already started.
    fn start(&self, stop: StopSignal) -> Result<(), LifecycleError>;
}

impl<T: ReconciliationWorker + ?Sized> ReconciliationWorker for Arc<T> {
    fn start(&self, stop: StopSignal) -> Result<(), LifecycleError> {
        (**self).start(stop)
    }
}

impl<T: WatchLifecycleManager + ?Sized> WatchLifecycleManager for Arc<T> {
    fn start(&self, stop: StopSignal) -> Result<(), LifecycleError> {
        (**self).start(stop)
    }
}

enum Startup {
    Ready(ServingHandle),
    Stopped,
}

/// Brings the daemon up in order and then never returns in normal operation.
pub struct LifecycleOrchestrator<C> {
    config: DaemonConfig<C>,
    worker: Box<dyn ReconciliationWorker>,
    watches: Box<dyn WatchLifecycleManager>,
    checks: HealthChecks,
    metrics: Option<Metrics>,
    phase: watch::Sender<LifecyclePhase>,
}

impl<C> fmt::Debug for LifecycleOrchestrator<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleOrchestrator")
            .field("node", &self.config.node_name())
            .field("phase", &*self.phase.borrow())
            .finish_non_exhaustive()
    }
}

impl<C> LifecycleOrchestrator<C>
where
    C: ControlPlaneProbe,
{
    /// Creates an orchestrator owning `config` and both collaborators.
    ///
    /// The worker and the watch manager are expected to share the client held
    /// by `config`.
    pub fn new(
        config: DaemonConfig<C>,
        worker: impl ReconciliationWorker + 'static,
        watches: impl WatchLifecycleManager + 'static,
    ) -> Self {
        let (phase, _) = watch::channel(LifecyclePhase::Init);
        Self {
            config,
            worker: Box::new(worker),
            watches: Box::new(watches),
            checks: HealthChecks::new(),
            metrics: None,
            phase,
        }
    }

    /// Checks served on the health listeners.
    #[must_use]
    pub fn with_health_checks(mut self, checks: HealthChecks) -> Self {
        self.checks = checks;
        self
    }

    /// Registry served on `/metrics` and updated with lifecycle progress.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Observes phase transitions.
    pub fn phases(&self) -> watch::Receiver<LifecyclePhase> {
        self.phase.subscribe()
    }

    /// Runs the daemon.
    ///
    /// Never returns in production, where `stop` is never cancelled. Returns
    /// `Ok(())` once `stop` is cancelled (tests) and an error for any fatal
    /// startup failure, after which nothing started later in the sequence has
    /// been started.
    ///
    /// # Errors
    ///
    /// `Bind`/`Tls` when a health listener cannot start, `DeadlineExceeded`
    /// when the API server stays unreachable, or the error of a collaborator
    /// that failed to start.
    pub async fn run(self, stop: StopSignal) -> Result<(), LifecycleError> {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            node = %self.config.node_name(),
            "Starting node lifecycle"
        );

        let _serving = match self.start(&stop).await {
            Ok(Startup::Ready(serving)) => serving,
            Ok(Startup::Stopped) => {
                info!("Stop signal received before steady state");
                return Ok(());
            }
            Err(e) => {
                self.transition(LifecyclePhase::FatalAbort);
                error!(error = %e, "Startup failed");
                return Err(e);
            }
        };

        self.transition(LifecyclePhase::SteadyState);
        tokio::select! {
            () = stop.cancelled() => {
                info!("Stop signal received, leaving steady state");
                Ok(())
            }
            () = std::future::pending::<()>() => {
                unreachable!("steady state never completes on its own")
            }
        }
    }

    /// Runs every step up to and including starting the watches.
    async fn start(&self, stop: &StopSignal) -> Result<Startup, LifecycleError> {
        let server = HealthEndpointServer::new(self.checks.clone(), self.metrics.clone());
        let serving = server
            .start(
                self.config.secure_serving(),
                self.config.insecure_serving(),
                stop,
            )
            .await?;
        if serving.is_empty() {
            info!("No health listeners configured");
        }
        self.transition(LifecyclePhase::ServingHealth);

        // Collaborators run on a child signal so a failed startup can stop
        // whatever it already started without cancelling the caller's signal.
        let collaborators = stop.child_token();
        match self.start_collaborators(&collaborators).await {
            Ok(true) => Ok(Startup::Ready(serving)),
            Ok(false) => Ok(Startup::Stopped),
            Err(e) => {
                collaborators.cancel();
                serving.abort();
                Err(e)
            }
        }
    }

    /// Starts the worker, gates on the API server, then starts the watches.
    /// Returns `false` if the stop signal interrupted the readiness wait.
    async fn start_collaborators(&self, stop: &StopSignal) -> Result<bool, LifecycleError> {
        self.worker.start(stop.clone())?;
        self.transition(LifecyclePhase::WorkerStarted);
        info!(node = %self.config.node_name(), "Started reconciliation worker");

        self.transition(LifecyclePhase::AwaitingApiReady);
        let mut gate = ReadinessGate::new(
            self.config.readiness_poll_interval(),
            self.config.api_ready_timeout(),
        );
        if let Some(metrics) = &self.metrics {
            gate = gate.with_metrics(metrics.clone());
        }
        tokio::select! {
            result = gate.wait_until_ready(self.config.client()) => result?,
            () = stop.cancelled() => return Ok(false),
        }

        self.watches.start(stop.clone())?;
        self.transition(LifecyclePhase::WatchesStarted);
        info!("Started watches");

        Ok(true)
    }

    fn transition(&self, next: LifecyclePhase) {
        if let Some(metrics) = &self.metrics {
            metrics.set_phase(next);
        }
        self.phase.send_replace(next);
        info!(phase = %next, "Lifecycle phase changed");
    }
}

#[cfg(test)]
#[path = "orchestrator_test.rs"]
mod orchestrator_test;
