//! Test doubles for the orchestrator's collaborators
//!
//! Enabled with the `test-util` feature so controller crates can drive the
//! lifecycle without a cluster. Every double can write into a shared
//! `LifecycleTrace`, which lets tests assert cross-component ordering.

use crate::StopSignal;
use crate::error::LifecycleError;
use crate::orchestrator::{ReconciliationWorker, WatchLifecycleManager};
use crate::probe::ControlPlaneProbe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Recorded when a `RecordingWorker` starts
pub const WORKER_STARTED: &str = "worker-started";
/// Recorded when a `RecordingWatches` starts
pub const WATCHES_STARTED: &str = "watches-started";
/// Recorded for every successful `ScriptedProbe` call
pub const PROBE_OK: &str = "probe-ok";
/// Recorded for every failed `ScriptedProbe` call
pub const PROBE_FAILED: &str = "probe-failed";

/// Ordered log of collaborator events shared between doubles.
#[derive(Debug, Clone, Default)]
pub struct LifecycleTrace {
    events: Arc<Mutex<Vec<String>>>,
}

impl LifecycleTrace {
    /// Create an empty trace
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event
    pub fn record(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    /// Snapshot of all events so far
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Index of the first occurrence of `event`
    pub fn position(&self, event: &str) -> Option<usize> {
        self.events.lock().unwrap().iter().position(|e| e == event)
    }

    /// Number of occurrences of `event`
    pub fn count(&self, event: &str) -> usize {
        self.events.lock().unwrap().iter().filter(|e| *e == event).count()
    }
}

/// Probe that fails until a chosen attempt, recording when it was called.
#[derive(Debug)]
pub struct ScriptedProbe {
    succeed_on: Option<usize>,
    latency: Duration,
    calls: Mutex<Vec<Instant>>,
    trace: Option<LifecycleTrace>,
}

impl ScriptedProbe {
    /// Succeeds on the first call
    pub fn ready() -> Self {
        Self::succeeding_on(1)
    }

    /// Fails calls `1..attempt` and succeeds from call `attempt` on
    pub fn succeeding_on(attempt: usize) -> Self {
        Self {
            succeed_on: Some(attempt),
            latency: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            trace: None,
        }
    }

    /// Never succeeds
    pub fn never_ready() -> Self {
        Self {
            succeed_on: None,
            latency: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            trace: None,
        }
    }

    /// Also record each call into `trace`
    pub fn with_trace(mut self, trace: LifecycleTrace) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Each call takes `latency` to answer
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of probes issued
    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// When each probe was issued
    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ControlPlaneProbe for ScriptedProbe {
    async fn probe(&self) -> Result<(), LifecycleError> {
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Instant::now());
            calls.len()
        };
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let ready = self.succeed_on.is_some_and(|n| attempt >= n);

        if let Some(trace) = &self.trace {
            trace.record(if ready { PROBE_OK } else { PROBE_FAILED });
        }
        if ready {
            Ok(())
        } else {
            Err(LifecycleError::Probe(format!(
                "API server not ready (attempt {attempt})"
            )))
        }
    }
}

/// Probe whose request never completes.
#[derive(Debug, Clone, Copy, Default)]
pub struct PendingProbe;

#[async_trait::async_trait]
impl ControlPlaneProbe for PendingProbe {
    async fn probe(&self) -> Result<(), LifecycleError> {
        std::future::pending().await
    }
}

#[derive(Debug, Default)]
struct Recorder {
    starts: AtomicUsize,
    trace: LifecycleTrace,
    failure: Option<String>,
    stop: Mutex<Option<StopSignal>>,
}

impl Recorder {
    fn start(&self, event: &str, stop: StopSignal) -> Result<(), LifecycleError> {
        if let Some(message) = &self.failure {
            return Err(LifecycleError::Collaborator(message.clone()));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.trace.record(event);
        *self.stop.lock().unwrap() = Some(stop);
        Ok(())
    }
}

/// Worker that only records that it was started.
#[derive(Debug, Clone, Default)]
pub struct RecordingWorker {
    inner: Arc<Recorder>,
}

impl RecordingWorker {
    /// Worker writing into `trace`
    pub fn new(trace: LifecycleTrace) -> Self {
        Self {
            inner: Arc::new(Recorder {
                trace,
                ..Recorder::default()
            }),
        }
    }

    /// Worker whose start fails with `message`
    pub fn failing(trace: LifecycleTrace, message: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Recorder {
                trace,
                failure: Some(message.into()),
                ..Recorder::default()
            }),
        }
    }

    /// How many times `start` succeeded
    pub fn starts(&self) -> usize {
        self.inner.starts.load(Ordering::SeqCst)
    }

    /// Stop signal handed to `start`
    pub fn stop_signal(&self) -> Option<StopSignal> {
        self.inner.stop.lock().unwrap().clone()
    }
}

impl ReconciliationWorker for RecordingWorker {
    fn start(&self, stop: StopSignal) -> Result<(), LifecycleError> {
        self.inner.start(WORKER_STARTED, stop)
    }
}

/// Watch manager that only records that it was started.
#[derive(Debug, Clone, Default)]
pub struct RecordingWatches {
    inner: Arc<Recorder>,
}

impl RecordingWatches {
    /// Watch manager writing into `trace`
    pub fn new(trace: LifecycleTrace) -> Self {
        Self {
            inner: Arc::new(Recorder {
                trace,
                ..Recorder::default()
            }),
        }
    }

    /// Watch manager whose start fails with `message`
    pub fn failing(trace: LifecycleTrace, message: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Recorder {
                trace,
                failure: Some(message.into()),
                ..Recorder::default()
            }),
        }
    }

    /// How many times `start` succeeded
    pub fn starts(&self) -> usize {
        self.inner.starts.load(Ordering::SeqCst)
    }

    /// Stop signal handed to `start`
    pub fn stop_signal(&self) -> Option<StopSignal> {
        self.inner.stop.lock().unwrap().clone()
    }
}

impl WatchLifecycleManager for RecordingWatches {
    fn start(&self, stop: StopSignal) -> Result<(), LifecycleError> {
        self.inner.start(WATCHES_STARTED, stop)
    }
}

/// A `kube::Client` whose every request is answered with `status` and `body`.
///
/// No connection is made; requests never leave the process.
pub fn stub_client(status: http::StatusCode, body: &'static str) -> kube::Client {
    let service = tower::service_fn(move |_request: http::Request<kube::client::Body>| async move {
        let mut response = http::Response::new(kube::client::Body::from(body.as_bytes().to_vec()));
        *response.status_mut() = status;
        Ok::<_, std::convert::Infallible>(response)
    });
    kube::Client::new(service, "default")
}
