//! Main controller implementation.
//!
//! `NodeController` is the reconciliation worker handed to the lifecycle
//! orchestrator. Once started it waits for the node cache to sync and then
//! reconciles the local Node on a fixed interval.

use crate::error::ControllerError;
use crate::reconciler::{ReconcileOutcome, Reconciler};
use k8s_openapi::api::core::v1::Node;
use kube::{Api, Client};
use kube_runtime::reflector::Store;
use node_lifecycle::{LifecycleError, Metrics, ReconciliationWorker, StopSignal};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Reconciliation worker for the Node this daemon runs on.
pub struct NodeController {
    reconciler: Arc<Reconciler>,
    store: Store<Node>,
    api: Api<Node>,
    interval: Duration,
    started: AtomicBool,
}

impl NodeController {
    /// Creates a controller for `node_name` reading from `store`.
    ///
    /// The reconcile counters are registered with the daemon's metrics.
    pub fn new(
        node_name: &str,
        store: Store<Node>,
        client: Client,
        interval: Duration,
        metrics: &Metrics,
    ) -> Result<Self, ControllerError> {
        let reconciler = Reconciler::new(node_name, store.clone(), metrics.registry())?;
        Ok(Self {
            reconciler: Arc::new(reconciler),
            store,
            api: Api::all(client),
            interval,
            started: AtomicBool::new(false),
        })
    }
}

impl ReconciliationWorker for NodeController {
    fn start(&self, stop: StopSignal) -> Result<(), LifecycleError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(LifecycleError::AlreadyStarted("node controller"));
        }

        info!(
            node = %self.reconciler.node_name(),
            interval_secs = self.interval.as_secs(),
            "Starting node controller"
        );
        tokio::spawn(run(
            Arc::clone(&self.reconciler),
            self.store.clone(),
            self.api.clone(),
            self.interval,
            stop,
        ));
        Ok(())
    }
}

async fn run(
    reconciler: Arc<Reconciler>,
    store: Store<Node>,
    api: Api<Node>,
    interval: Duration,
    stop: StopSignal,
) {
    // The cache only fills once the watches start, after the API server is up.
    tokio::select! {
        () = stop.cancelled() => return,
        synced = store.wait_until_ready() => {
            if let Err(e) = synced {
                error!(error = %e, "Node cache writer dropped before sync");
                return;
            }
        }
    }
    info!(node = %reconciler.node_name(), "Node cache synced, reconciling");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if let Err(e) = reconcile(&reconciler, &api).await {
            reconciler.record_error();
            warn!(node = %reconciler.node_name(), error = %e, "Reconcile failed");
        }
    }

    info!(node = %reconciler.node_name(), "Node controller stopped");
}

async fn reconcile(reconciler: &Reconciler, api: &Api<Node>) -> Result<(), ControllerError> {
    let node = match reconciler.cached() {
        Some(node) => node,
        None => {
            debug!(node = %reconciler.node_name(), "Node missing from cache, reading from API");
            api.get_opt(reconciler.node_name())
                .await?
                .map(Arc::new)
                .ok_or_else(|| ControllerError::NodeNotFound(reconciler.node_name().to_string()))?
        }
    };

    match reconciler.observe(&node) {
        ReconcileOutcome::Unchanged => {
            debug!(node = %reconciler.node_name(), "Node unchanged");
        }
        ReconcileOutcome::Changed {
            previous: None,
            current,
        } => {
            info!(node = %reconciler.node_name(), observed = %current, "Observed node");
        }
        ReconcileOutcome::Changed {
            previous: Some(previous),
            current,
        } => {
            info!(
                node = %reconciler.node_name(),
                previous = %previous,
                observed = %current,
                "Node state changed"
            );
        }
    }
    Ok(())
}
