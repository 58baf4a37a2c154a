//! Kubernetes resource watchers.
//!
//! Consumers register interest first and receive a cache reader straight
//! away; the watch streams that fill those caches only begin when the
//! lifecycle starts the manager, after the API server is reachable.

use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::{Api, Client};
use kube_runtime::reflector::{self, Store, store::Writer};
use kube_runtime::{WatchStreamExt, watcher};
use node_lifecycle::{HealthChecker, LifecycleError, StopSignal, WatchLifecycleManager};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// A node cache waiting for its watch to be started.
struct NodeRegistration {
    node_name: String,
    writer: Writer<Node>,
    synced: Arc<AtomicBool>,
}

/// Owns the watch streams for every registered cache.
pub struct SharedInformers {
    client: Client,
    pending: Mutex<Vec<NodeRegistration>>,
    synced: Mutex<Vec<(String, Arc<AtomicBool>)>>,
    started: AtomicBool,
}

impl SharedInformers {
    /// Creates a manager sharing `client`.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            pending: Mutex::new(Vec::new()),
            synced: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Registers a cache of the single `Node` named `node_name`.
    ///
    /// The returned store stays empty until the manager is started and the
    /// initial list completes.
    pub fn nodes_for(&self, node_name: &str) -> Result<Store<Node>, LifecycleError> {
        if self.started.load(Ordering::SeqCst) {
            return Err(LifecycleError::AlreadyStarted("shared informers"));
        }

        let (store, writer) = reflector::store::<Node>();
        let synced = Arc::new(AtomicBool::new(false));
        self.synced
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((format!("node/{node_name}"), Arc::clone(&synced)));
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(NodeRegistration {
                node_name: node_name.to_string(),
                writer,
                synced,
            });

        debug!(node = %node_name, "Registered node cache");
        Ok(store)
    }

    /// Readiness check that fails until every registered cache has synced.
    pub fn synced_check(&self) -> Arc<dyn HealthChecker> {
        Arc::new(CachesSynced {
            caches: self
                .synced
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        })
    }
}

impl WatchLifecycleManager for SharedInformers {
    fn start(&self, stop: StopSignal) -> Result<(), LifecycleError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(LifecycleError::AlreadyStarted("shared informers"));
        }

        let registrations =
            std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner));
        if registrations.is_empty() {
            warn!("Shared informers started with no registered caches");
        }

        for registration in registrations {
            let api: Api<Node> = Api::all(self.client.clone());
            let config = watcher::Config::default()
                .fields(&format!("metadata.name={}", registration.node_name));
            tokio::spawn(watch_node(registration, api, config, stop.clone()));
        }

        Ok(())
    }
}

async fn watch_node(
    registration: NodeRegistration,
    api: Api<Node>,
    config: watcher::Config,
    stop: StopSignal,
) {
    let NodeRegistration {
        node_name,
        writer,
        synced,
    } = registration;
    info!(node = %node_name, "Starting Node watcher");

    let stream = reflector::reflector(writer, watcher(api, config)).default_backoff();
    futures::pin_mut!(stream);

    loop {
        let event = tokio::select! {
            () = stop.cancelled() => break,
            event = stream.next() => event,
        };
        match event {
            Some(Ok(watcher::Event::InitDone)) => {
                if !synced.swap(true, Ordering::SeqCst) {
                    info!(node = %node_name, "Node cache synced");
                }
            }
            Some(Ok(watcher::Event::Apply(_) | watcher::Event::Delete(_))) => {
                debug!(node = %node_name, "Node cache updated");
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(node = %node_name, error = %e, "Node watch failed, backing off");
            }
            None => break,
        }
    }

    info!(node = %node_name, "Node watcher stopped");
}

/// Readiness check over the caches registered with a `SharedInformers`.
struct CachesSynced {
    caches: Vec<(String, Arc<AtomicBool>)>,
}

impl HealthChecker for CachesSynced {
    fn name(&self) -> &str {
        "informer-sync"
    }

    fn check(&self) -> Result<(), String> {
        let waiting: Vec<&str> = self
            .caches
            .iter()
            .filter(|(_, synced)| !synced.load(Ordering::SeqCst))
            .map(|(name, _)| name.as_str())
            .collect();
        if waiting.is_empty() {
            Ok(())
        } else {
            Err(format!("caches not synced: {}", waiting.join(", ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use node_lifecycle::mock::stub_client;

    #[test]
    fn test_caches_synced_check() {
        let node = Arc::new(AtomicBool::new(false));
        let check = CachesSynced {
            caches: vec![("node/node-a".to_string(), Arc::clone(&node))],
        };

        assert_eq!(
            check.check(),
            Err("caches not synced: node/node-a".to_string())
        );
        node.store(true, Ordering::SeqCst);
        assert_eq!(check.check(), Ok(()));
    }

    #[test]
    fn test_no_caches_is_synced() {
        let check = CachesSynced { caches: Vec::new() };
        assert!(check.check().is_ok());
    }

    #[tokio::test]
    async fn test_second_start_rejected() {
        let informers = SharedInformers::new(stub_client(StatusCode::OK, "{}"));
        informers.nodes_for("node-a").unwrap();
        let stop = StopSignal::new();

        informers.start(stop.clone()).unwrap();
        assert!(matches!(
            informers.start(stop.clone()),
            Err(LifecycleError::AlreadyStarted(_))
        ));

        stop.cancel();
    }

    #[tokio::test]
    async fn test_registration_after_start_rejected() {
        let informers = SharedInformers::new(stub_client(StatusCode::OK, "{}"));
        let stop = StopSignal::new();

        informers.start(stop.clone()).unwrap();
        assert!(matches!(
            informers.nodes_for("node-a"),
            Err(LifecycleError::AlreadyStarted(_))
        ));

        stop.cancel();
    }

    #[tokio::test]
    async fn test_synced_check_fails_before_first_list() {
        let informers = SharedInformers::new(stub_client(StatusCode::OK, "{}"));
        informers.nodes_for("node-a").unwrap();

        let check = informers.synced_check();
        assert_eq!(check.name(), "informer-sync");
        assert!(check.check().is_err());
    }
}
