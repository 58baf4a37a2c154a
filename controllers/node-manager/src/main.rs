//! Node Manager
//!
//! Per-node daemon that keeps an eye on the Node it runs on.
//!
//! Health endpoints come up first, then the node controller, and the Node
//! watch only starts once the API server answers `/healthz`. The process
//! runs until it is killed or a startup step fails.

mod config;
mod controller;
mod error;
mod reconciler;
mod watcher;

use crate::config::Settings;
use crate::controller::NodeController;
use crate::error::ControllerError;
use crate::watcher::SharedInformers;
use node_lifecycle::{HealthChecks, LifecycleOrchestrator, Metrics, never_stop};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting Node Manager");

    let settings = Settings::from_env()?;
    info!("Configuration:");
    info!("  Node: {}", settings.node_name);
    info!("  Reconcile interval: {}s", settings.reconcile_interval.as_secs());
    info!("  API ready timeout: {}s", settings.api_ready_timeout.as_secs());
    info!(
        "  Secure serving: {}",
        settings
            .secure_serving
            .as_ref()
            .map_or_else(|| "disabled".to_string(), |s| s.bind_address.to_string())
    );
    info!(
        "  Insecure serving: {}",
        settings
            .insecure_serving
            .as_ref()
            .map_or_else(|| "disabled".to_string(), |s| s.bind_address.to_string())
    );

    // One client shared by the probe, the controller and the watches.
    let client = kube::Client::try_default().await?;
    let metrics = Metrics::new()?;

    let informers = Arc::new(SharedInformers::new(client.clone()));
    let node_store = informers.nodes_for(&settings.node_name)?;
    let controller = NodeController::new(
        &settings.node_name,
        node_store,
        client.clone(),
        settings.reconcile_interval,
        &metrics,
    )?;
    let checks = HealthChecks::new().with_readiness(informers.synced_check());

    let config = settings.into_daemon_config(client)?;
    LifecycleOrchestrator::new(config, controller, Arc::clone(&informers))
        .with_health_checks(checks)
        .with_metrics(metrics)
        .run(never_stop())
        .await?;

    Ok(())
}
