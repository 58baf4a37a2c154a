//! Reconciliation logic for the local Node.
//!
//! The reconciler reads the node from the shared cache and reports what it
//! observes. It does not mutate the node.

use crate::error::ControllerError;
use k8s_openapi::api::core::v1::Node;
use kube_runtime::reflector::{ObjectRef, Store};
use prometheus::{IntCounter, Registry};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// The parts of a Node the manager reports on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeObservation {
    /// Status of the `Ready` condition (`True`, `False`, `Unknown`), if present
    pub ready: Option<String>,
    /// `type=address` pairs in the order the kubelet reported them
    pub addresses: Vec<String>,
    pub unschedulable: bool,
}

impl NodeObservation {
    pub fn from_node(node: &Node) -> Self {
        let status = node.status.as_ref();

        let ready = status
            .and_then(|s| s.conditions.as_ref())
            .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"))
            .map(|c| c.status.clone());

        let addresses = status
            .and_then(|s| s.addresses.as_ref())
            .map(|addresses| {
                addresses
                    .iter()
                    .map(|a| format!("{}={}", a.type_, a.address))
                    .collect()
            })
            .unwrap_or_default();

        let unschedulable = node
            .spec
            .as_ref()
            .and_then(|s| s.unschedulable)
            .unwrap_or(false);

        Self {
            ready,
            addresses,
            unschedulable,
        }
    }
}

impl fmt::Display for NodeObservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ready={} addresses=[{}] unschedulable={}",
            self.ready.as_deref().unwrap_or("<none>"),
            self.addresses.join(", "),
            self.unschedulable
        )
    }
}

/// Result of a single reconcile pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Same as the previous pass
    Unchanged,
    /// First observation, or something differs from the previous pass
    Changed {
        previous: Option<NodeObservation>,
        current: NodeObservation,
    },
}

/// Tracks the observed state of one Node across reconcile passes.
pub struct Reconciler {
    node_name: String,
    store: Store<Node>,
    last: Mutex<Option<NodeObservation>>,
    reconciles: IntCounter,
    reconcile_errors: IntCounter,
}

impl Reconciler {
    /// Creates a reconciler and registers its counters with `registry`.
    pub fn new(
        node_name: impl Into<String>,
        store: Store<Node>,
        registry: &Registry,
    ) -> Result<Self, ControllerError> {
        let reconciles = IntCounter::new(
            "node_manager_reconciles_total",
            "Reconcile passes over the local Node",
        )?;
        let reconcile_errors = IntCounter::new(
            "node_manager_reconcile_errors_total",
            "Reconcile passes that failed",
        )?;
        registry.register(Box::new(reconciles.clone()))?;
        registry.register(Box::new(reconcile_errors.clone()))?;

        Ok(Self {
            node_name: node_name.into(),
            store,
            last: Mutex::new(None),
            reconciles,
            reconcile_errors,
        })
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// The node as currently held in the cache.
    pub fn cached(&self) -> Option<Arc<Node>> {
        self.store.get(&ObjectRef::new(&self.node_name))
    }

    /// Records `node` as the current state and reports whether it changed.
    pub fn observe(&self, node: &Node) -> ReconcileOutcome {
        self.reconciles.inc();

        let current = NodeObservation::from_node(node);
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if last.as_ref() == Some(&current) {
            return ReconcileOutcome::Unchanged;
        }

        let previous = last.replace(current.clone());
        ReconcileOutcome::Changed { previous, current }
    }

    /// Counts a pass that could not read the node.
    pub fn record_error(&self) {
        self.reconciles.inc();
        self.reconcile_errors.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeAddress, NodeCondition, NodeSpec, NodeStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube_runtime::reflector;
    use kube_runtime::watcher;

    fn node(name: &str, ready: &str, ip: &str) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(NodeSpec::default()),
            status: Some(NodeStatus {
                conditions: Some(vec![
                    NodeCondition {
                        type_: "MemoryPressure".to_string(),
                        status: "False".to_string(),
                        ..Default::default()
                    },
                    NodeCondition {
                        type_: "Ready".to_string(),
                        status: ready.to_string(),
                        ..Default::default()
                    },
                ]),
                addresses: Some(vec![NodeAddress {
                    type_: "InternalIP".to_string(),
                    address: ip.to_string(),
                }]),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_observation_from_node() {
        let observation = NodeObservation::from_node(&node("node-a", "True", "10.0.0.5"));

        assert_eq!(observation.ready.as_deref(), Some("True"));
        assert_eq!(observation.addresses, vec!["InternalIP=10.0.0.5".to_string()]);
        assert!(!observation.unschedulable);
        assert_eq!(
            observation.to_string(),
            "ready=True addresses=[InternalIP=10.0.0.5] unschedulable=false"
        );
    }

    #[test]
    fn test_observation_of_empty_node() {
        let observation = NodeObservation::from_node(&Node::default());
        assert_eq!(observation, NodeObservation::default());
    }

    #[test]
    fn test_observe_reports_changes_only() {
        let (store, _writer) = reflector::store::<Node>();
        let registry = Registry::new();
        let reconciler = Reconciler::new("node-a", store, &registry).unwrap();

        let first = reconciler.observe(&node("node-a", "Unknown", "10.0.0.5"));
        assert!(matches!(first, ReconcileOutcome::Changed { previous: None, .. }));

        let same = reconciler.observe(&node("node-a", "Unknown", "10.0.0.5"));
        assert_eq!(same, ReconcileOutcome::Unchanged);

        match reconciler.observe(&node("node-a", "True", "10.0.0.5")) {
            ReconcileOutcome::Changed { previous, current } => {
                assert_eq!(previous.and_then(|p| p.ready).as_deref(), Some("Unknown"));
                assert_eq!(current.ready.as_deref(), Some("True"));
            }
            ReconcileOutcome::Unchanged => panic!("ready transition not reported"),
        }
    }

    #[test]
    fn test_cached_reads_from_store() {
        let (store, mut writer) = reflector::store::<Node>();
        let registry = Registry::new();
        let reconciler = Reconciler::new("node-a", store, &registry).unwrap();
        assert!(reconciler.cached().is_none());

        writer.apply_watcher_event(&watcher::Event::Apply(node("node-b", "True", "10.0.0.6")));
        assert!(reconciler.cached().is_none());

        writer.apply_watcher_event(&watcher::Event::Apply(node("node-a", "True", "10.0.0.5")));
        let cached = reconciler.cached().unwrap();
        assert_eq!(cached.metadata.name.as_deref(), Some("node-a"));
    }

    #[test]
    fn test_counters_registered() {
        let (store, _writer) = reflector::store::<Node>();
        let registry = Registry::new();
        let reconciler = Reconciler::new("node-a", store, &registry).unwrap();

        reconciler.observe(&node("node-a", "True", "10.0.0.5"));
        reconciler.record_error();

        assert_eq!(reconciler.reconciles.get(), 2);
        assert_eq!(reconciler.reconcile_errors.get(), 1);
        assert_eq!(registry.gather().len(), 2);
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = Registry::new();
        let (store, _writer) = reflector::store::<Node>();
        Reconciler::new("node-a", store.clone(), &registry).unwrap();
        assert!(matches!(
            Reconciler::new("node-a", store, &registry),
            Err(ControllerError::Metrics(_))
        ));
    }
}
