//! Integration tests for the health listeners
//!
//! These bind real loopback sockets and talk to them over HTTP.

use node_lifecycle::{
    ControlPlaneProbe, DaemonConfig, HealthChecks, HealthEndpointServer, InsecureServing,
    LifecycleError, LifecycleOrchestrator, LifecyclePhase, Metrics, ReconciliationWorker,
    StopSignal, WatchLifecycleManager,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

struct AlwaysReady;

#[async_trait::async_trait]
impl ControlPlaneProbe for AlwaysReady {
    async fn probe(&self) -> Result<(), LifecycleError> {
        Ok(())
    }
}

#[derive(Clone, Default)]
struct Flag(Arc<AtomicBool>);

impl ReconciliationWorker for Flag {
    fn start(&self, _stop: StopSignal) -> Result<(), LifecycleError> {
        self.0.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl WatchLifecycleManager for Flag {
    fn start(&self, _stop: StopSignal) -> Result<(), LifecycleError> {
        self.0.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn loopback() -> InsecureServing {
    InsecureServing {
        bind_address: "127.0.0.1:0".parse().unwrap(),
    }
}

#[tokio::test]
async fn test_insecure_listener_serves_over_http_until_stopped() {
    let server = HealthEndpointServer::new(HealthChecks::new(), Some(Metrics::new().unwrap()));
    let stop = StopSignal::new();

    let handle = server.start(None, Some(&loopback()), &stop).await.unwrap();
    let addr = handle.insecure_addr().unwrap();

    let response = reqwest::get(format!("http://{addr}/healthz")).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "ok");

    let metrics = reqwest::get(format!("http://{addr}/metrics"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics.contains("node_manager_readiness_probes_total"));

    stop.cancel();
    // graceful shutdown closes the listening socket
    let mut refused = false;
    for _ in 0..50 {
        if reqwest::get(format!("http://{addr}/healthz")).await.is_err() {
            refused = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(refused, "listener still accepting after stop");
}

#[tokio::test]
async fn test_orchestrator_serves_health_while_running() {
    let worker = Flag::default();
    let watches = Flag::default();
    let stop = StopSignal::new();

    // reserve a free port, then release it for the daemon
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let addr = format!("127.0.0.1:{port}");

    let config = DaemonConfig::new("node-a", AlwaysReady, Duration::from_secs(30))
        .unwrap()
        .with_insecure_serving(InsecureServing {
            bind_address: addr.parse().unwrap(),
        });
    let orchestrator = LifecycleOrchestrator::new(config, worker.clone(), watches.clone());
    let mut phases = orchestrator.phases();
    let run = tokio::spawn(orchestrator.run(stop.clone()));

    phases
        .wait_for(|phase| *phase == LifecyclePhase::SteadyState)
        .await
        .unwrap();
    assert!(worker.0.load(Ordering::SeqCst));
    assert!(watches.0.load(Ordering::SeqCst));

    let response = reqwest::get(format!("http://{addr}/readyz?verbose")).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert!(response.text().await.unwrap().contains("[+]ping ok"));

    stop.cancel();
    run.await.unwrap().unwrap();
}
