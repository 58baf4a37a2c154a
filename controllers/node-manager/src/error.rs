//! Controller-specific error types.
//!
//! This module defines error types specific to the Node Manager that are not
//! covered by the lifecycle crate or upstream library errors.

use kube::Error as KubeError;
use node_lifecycle::LifecycleError;
use thiserror::Error;

/// Errors that can occur in the Node Manager.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Startup sequencing error
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Metric registration error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The managed node does not exist in the API server
    #[error("Node not found: {0}")]
    NodeNotFound(String),
}
