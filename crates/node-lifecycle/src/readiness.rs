//! API server readiness gate.
//!
//! The daemon may start before the API server does (for example while the
//! cluster itself is forming). Starting watches in that window fails hard, so
//! startup blocks here until a probe succeeds or the timeout elapses.

use crate::error::LifecycleError;
use crate::metrics::Metrics;
use crate::probe::ControlPlaneProbe;
use std::time::Duration;
use tokio::time::{Instant, sleep_until, timeout_at};
use tracing::{info, warn};

/// Bounded polling wait on the control plane.
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    interval: Duration,
    timeout: Duration,
    metrics: Option<Metrics>,
}

impl ReadinessGate {
    /// Creates a gate probing every `interval` for at most `timeout`.
    #[must_use]
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            metrics: None,
        }
    }

    /// Counts probe attempts and failures in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Probes immediately, then once per interval, until the control plane
    /// answers healthy.
    ///
    /// Failed probes inside the window are logged and retried. Each probe is
    /// cut off at the deadline, so the call returns no later than
    /// `timeout + interval`.
    ///
    /// # Errors
    ///
    /// Returns `DeadlineExceeded` carrying the last probe error once the
    /// timeout has elapsed.
    pub async fn wait_until_ready<P>(&self, probe: &P) -> Result<(), LifecycleError>
    where
        P: ControlPlaneProbe + ?Sized,
    {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let attempt_started = Instant::now();
            let outcome = match timeout_at(deadline, probe.probe()).await {
                Ok(result) => result,
                Err(_) => Err(LifecycleError::Probe(
                    "probe did not complete before the deadline".to_string(),
                )),
            };

            if let Some(metrics) = &self.metrics {
                metrics.observe_probe(outcome.is_ok());
            }

            let last_error = match outcome {
                Ok(()) => {
                    info!(attempt, elapsed = ?started.elapsed(), "API server is ready");
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "API server isn't healthy yet, waiting a little while");
                    e.to_string()
                }
            };

            // Probes start on a fixed schedule regardless of how long each took.
            let now = Instant::now();
            let next = attempt_started + self.interval;
            if now >= deadline || next > deadline {
                sleep_until(deadline).await;
                return Err(LifecycleError::DeadlineExceeded {
                    timeout: self.timeout,
                    last_error,
                });
            }
            sleep_until(next).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{PendingProbe, ScriptedProbe};

    const INTERVAL: Duration = Duration::from_secs(1);

    #[tokio::test(start_paused = true)]
    async fn test_ready_on_first_probe() {
        let probe = ScriptedProbe::ready();
        let gate = ReadinessGate::new(INTERVAL, Duration::from_secs(10));

        let started = Instant::now();
        gate.wait_until_ready(&probe).await.unwrap();

        assert_eq!(probe.calls(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_on_nth_probe_spaced_by_interval() {
        let probe = ScriptedProbe::succeeding_on(4);
        let gate = ReadinessGate::new(INTERVAL, Duration::from_secs(10));

        gate.wait_until_ready(&probe).await.unwrap();

        let times = probe.call_times();
        assert_eq!(times.len(), 4);
        for pair in times.windows(2) {
            assert_eq!(pair[1] - pair[0], INTERVAL);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_probes_keep_fixed_spacing() {
        let probe = ScriptedProbe::succeeding_on(4).with_latency(Duration::from_millis(400));
        let gate = ReadinessGate::new(INTERVAL, Duration::from_secs(10));

        let started = Instant::now();
        gate.wait_until_ready(&probe).await.unwrap();

        let times = probe.call_times();
        assert_eq!(times.len(), 4);
        for pair in times.windows(2) {
            assert_eq!(pair[1] - pair[0], INTERVAL);
        }
        // three intervals plus the last answer
        assert_eq!(started.elapsed(), Duration::from_millis(3400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_ready_times_out_within_window() {
        let timeout = Duration::from_millis(3500);
        let probe = ScriptedProbe::never_ready();
        let gate = ReadinessGate::new(INTERVAL, timeout);

        let started = Instant::now();
        let err = gate.wait_until_ready(&probe).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(err.is_deadline_exceeded(), "unexpected error: {err}");
        assert!(elapsed >= timeout, "returned early after {elapsed:?}");
        assert!(elapsed <= timeout + INTERVAL, "returned late after {elapsed:?}");
        // probes at 0s, 1s, 2s and 3s
        assert_eq!(probe.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_error_carries_last_probe_error() {
        let probe = ScriptedProbe::never_ready();
        let gate = ReadinessGate::new(INTERVAL, Duration::from_secs(2));

        match gate.wait_until_ready(&probe).await {
            Err(LifecycleError::DeadlineExceeded { timeout, last_error }) => {
                assert_eq!(timeout, Duration::from_secs(2));
                assert!(last_error.contains("not ready"), "got {last_error}");
            }
            other => panic!("expected DeadlineExceeded, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_probe_is_cut_off_at_deadline() {
        let timeout = Duration::from_secs(5);
        let gate = ReadinessGate::new(INTERVAL, timeout);

        let started = Instant::now();
        let err = gate.wait_until_ready(&PendingProbe).await.unwrap_err();

        assert!(err.is_deadline_exceeded());
        assert_eq!(started.elapsed(), timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_metrics_recorded() {
        let metrics = Metrics::new().unwrap();
        let probe = ScriptedProbe::succeeding_on(3);
        let gate = ReadinessGate::new(INTERVAL, Duration::from_secs(10)).with_metrics(metrics.clone());

        gate.wait_until_ready(&probe).await.unwrap();

        let text = metrics.encode().unwrap();
        assert!(text.contains("node_manager_readiness_probes_total 3"));
        assert!(text.contains("node_manager_readiness_probe_failures_total 2"));
    }
}
