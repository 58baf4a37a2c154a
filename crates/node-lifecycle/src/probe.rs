//! Control-plane reachability probe.
//!
//! The probe is the only call the readiness gate makes against the API
//! server. It must be idempotent and side-effect free.

use crate::error::LifecycleError;
use std::sync::Arc;
use tracing::debug;

/// Path probed on the API server
pub const HEALTHZ_PATH: &str = "/healthz";

/// A single bounded-latency health request against the control plane.
#[async_trait::async_trait]
pub trait ControlPlaneProbe: Send + Sync {
    /// Succeeds when the control plane answered healthy.
    async fn probe(&self) -> Result<(), LifecycleError>;
}

#[async_trait::async_trait]
impl ControlPlaneProbe for kube::Client {
    async fn probe(&self) -> Result<(), LifecycleError> {
        let request = http::Request::get(HEALTHZ_PATH)
            .body(Vec::new())
            .map_err(|e| LifecycleError::Probe(format!("failed to build request: {e}")))?;

        // request_text maps non-2xx statuses to errors
        let body = self.request_text(request).await?;

        if body.trim() != "ok" {
            return Err(LifecycleError::Probe(format!(
                "API server isn't healthy: {}",
                body.trim()
            )));
        }

        debug!("API server reported healthy");
        Ok(())
    }
}

#[async_trait::async_trait]
impl<T: ControlPlaneProbe + ?Sized> ControlPlaneProbe for Arc<T> {
    async fn probe(&self) -> Result<(), LifecycleError> {
        (**self).probe().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::stub_client;
    use http::StatusCode;

    #[tokio::test]
    async fn test_ok_body_is_ready() {
        let client = stub_client(StatusCode::OK, "ok");
        assert!(client.probe().await.is_ok());
    }

    #[tokio::test]
    async fn test_other_body_is_not_ready() {
        let client = stub_client(StatusCode::OK, "[-]etcd failed");
        match client.probe().await {
            Err(LifecycleError::Probe(message)) => assert!(message.contains("etcd failed")),
            other => panic!("expected Probe error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_error_status_is_kube_error() {
        let client = stub_client(StatusCode::SERVICE_UNAVAILABLE, "unavailable");
        assert!(matches!(client.probe().await, Err(LifecycleError::Kube(_))));
    }
}
