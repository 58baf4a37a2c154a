//! Prometheus metrics served on `/metrics`.

use crate::error::LifecycleError;
use crate::orchestrator::LifecyclePhase;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// Process-wide metric handles.
///
/// Cloning is cheap; all clones share the same registry.
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    lifecycle_phase: IntGauge,
    readiness_probes: IntCounter,
    readiness_probe_failures: IntCounter,
}

impl Metrics {
    /// Creates a registry with the lifecycle metrics registered.
    ///
    /// # Errors
    ///
    /// Returns a `prometheus::Error` if a metric cannot be registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let lifecycle_phase = IntGauge::new(
            "node_manager_lifecycle_phase",
            "Current startup phase (0=init .. 5=steady state, -1=fatal abort)",
        )?;
        let readiness_probes = IntCounter::new(
            "node_manager_readiness_probes_total",
            "API server readiness probes issued",
        )?;
        let readiness_probe_failures = IntCounter::new(
            "node_manager_readiness_probe_failures_total",
            "API server readiness probes that failed",
        )?;

        registry.register(Box::new(lifecycle_phase.clone()))?;
        registry.register(Box::new(readiness_probes.clone()))?;
        registry.register(Box::new(readiness_probe_failures.clone()))?;

        Ok(Self {
            registry,
            lifecycle_phase,
            readiness_probes,
            readiness_probe_failures,
        })
    }

    /// Registry for collaborators that export their own metrics
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn set_phase(&self, phase: LifecyclePhase) {
        self.lifecycle_phase.set(phase.ordinal());
    }

    pub(crate) fn observe_probe(&self, succeeded: bool) {
        self.readiness_probes.inc();
        if !succeeded {
            self.readiness_probe_failures.inc();
        }
    }

    /// Renders every registered metric in the Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns `Serve` if encoding fails.
    pub fn encode(&self) -> Result<String, LifecycleError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| LifecycleError::Serve(format!("failed to encode metrics: {e}")))?;
        String::from_utf8(buffer)
            .map_err(|e| LifecycleError::Serve(format!("metrics were not UTF-8: {e}")))
    }
}
