//! Health endpoint listeners.
//!
//! Up to two listeners share one handler chain and differ only in their
//! identity layer: the secure listener terminates TLS and authenticates
//! callers, the insecure listener treats every caller as a superuser. Both
//! sockets are bound before `start` returns so a bind failure aborts startup.

use crate::StopSignal;
use crate::config::{InsecureServing, SecureServing};
use crate::error::LifecycleError;
use crate::health::auth::{Identity, identify};
use crate::health::checks::{Endpoint, HealthChecks};
use crate::metrics::Metrics;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum_server::tls_rustls::RustlsConfig;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Time in-flight requests get to finish after the stop signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct HealthState {
    checks: HealthChecks,
    metrics: Option<Metrics>,
}

#[derive(Debug, Deserialize)]
struct HealthQuery {
    verbose: Option<String>,
}

/// Running listeners.
#[derive(Debug, Default)]
pub struct ServingHandle {
    secure_addr: Option<SocketAddr>,
    insecure_addr: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServingHandle {
    /// Bound address of the secure listener
    pub fn secure_addr(&self) -> Option<SocketAddr> {
        self.secure_addr
    }

    /// Bound address of the insecure listener
    pub fn insecure_addr(&self) -> Option<SocketAddr> {
        self.insecure_addr
    }

    /// True when no listener was configured
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tears the listeners down without waiting for the stop signal.
    pub fn abort(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

/// Serves health checks and metrics on the configured listeners.
#[derive(Debug, Clone)]
pub struct HealthEndpointServer {
    state: Arc<HealthState>,
}

impl HealthEndpointServer {
    /// Creates a server exposing `checks` and, if given, `metrics`.
    #[must_use]
    pub fn new(checks: HealthChecks, metrics: Option<Metrics>) -> Self {
        Self {
            state: Arc::new(HealthState { checks, metrics }),
        }
    }

    /// Builds the handler chain for one listener.
    pub fn router(&self, identity: Identity) -> Router {
        Router::new()
            .route("/metrics", get(metrics))
            .route("/{endpoint}", get(aggregate))
            .route("/{endpoint}/{check}", get(single))
            .with_state(Arc::clone(&self.state))
            .layer(middleware::from_fn_with_state(Arc::new(identity), identify))
            .layer(TraceLayer::new_for_http())
    }

    /// Binds each configured listener and serves it in the background.
    ///
    /// Returns once every socket is bound. With neither descriptor set this is
    /// a no-op and no socket is touched.
    ///
    /// # Errors
    ///
    /// Returns `Tls` if the serving certificate cannot be loaded and `Bind` if
    /// an address cannot be bound. Listeners already started are torn down
    /// before the error is returned.
    pub async fn start(
        &self,
        secure: Option<&SecureServing>,
        insecure: Option<&InsecureServing>,
        stop: &StopSignal,
    ) -> Result<ServingHandle, LifecycleError> {
        let mut handle = ServingHandle::default();

        if let Some(serving) = secure {
            let (addr, task) = self.start_secure(serving, stop.clone()).await?;
            handle.secure_addr = Some(addr);
            handle.tasks.push(task);
        }

        if let Some(serving) = insecure {
            match self.start_insecure(serving, stop.clone()).await {
                Ok((addr, task)) => {
                    handle.insecure_addr = Some(addr);
                    handle.tasks.push(task);
                }
                Err(e) => {
                    handle.abort();
                    return Err(e);
                }
            }
        }

        Ok(handle)
    }

    async fn start_secure(
        &self,
        serving: &SecureServing,
        stop: StopSignal,
    ) -> Result<(SocketAddr, JoinHandle<()>), LifecycleError> {
        let tls = RustlsConfig::from_pem_file(&serving.tls.cert_path, &serving.tls.key_path)
            .await
            .map_err(|e| {
                LifecycleError::Tls(format!(
                    "failed to load serving certificate {}: {e}",
                    serving.tls.cert_path.display()
                ))
            })?;

        let requested = serving.bind_address;
        let bind_error = |source| LifecycleError::Bind {
            addr: requested,
            source,
        };
        let listener = std::net::TcpListener::bind(requested).map_err(bind_error)?;
        listener.set_nonblocking(true).map_err(bind_error)?;
        let addr = listener.local_addr().map_err(bind_error)?;

        let app = self.router(Identity::Authenticated {
            authentication: serving.authentication.clone(),
            authorization: serving.authorization.clone(),
        });
        let server_handle = axum_server::Handle::new();
        let server = axum_server::from_tcp_rustls(listener, tls).handle(server_handle.clone());

        info!(addr = %addr, "Serving secure health endpoints");
        let task = tokio::spawn(async move {
            let serve = server.serve(app.into_make_service());
            tokio::pin!(serve);
            let result = tokio::select! {
                result = &mut serve => result,
                () = stop.cancelled() => {
                    server_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
                    serve.await
                }
            };
            if let Err(e) = result {
                error!(addr = %addr, error = %e, "Secure health listener failed");
            }
        });

        Ok((addr, task))
    }

    async fn start_insecure(
        &self,
        serving: &InsecureServing,
        stop: StopSignal,
    ) -> Result<(SocketAddr, JoinHandle<()>), LifecycleError> {
        let requested = serving.bind_address;
        let bind_error = |source| LifecycleError::Bind {
            addr: requested,
            source,
        };
        let listener = tokio::net::TcpListener::bind(requested)
            .await
            .map_err(bind_error)?;
        let addr = listener.local_addr().map_err(bind_error)?;

        let app = self.router(Identity::InsecureSuperuser);

        warn!(
            addr = %addr,
            "Serving insecure health endpoints; every caller is treated as a superuser"
        );
        let task = tokio::spawn(async move {
            let shutdown = async move { stop.cancelled().await };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!(addr = %addr, error = %e, "Insecure health listener failed");
            }
        });

        Ok((addr, task))
    }
}

async fn aggregate(
    State(state): State<Arc<HealthState>>,
    Path(endpoint): Path<String>,
    Query(query): Query<HealthQuery>,
) -> Response {
    let Some(endpoint) = Endpoint::from_segment(&endpoint) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    state
        .checks
        .report(endpoint, query.verbose.is_some())
        .into_response()
}

async fn single(
    State(state): State<Arc<HealthState>>,
    Path((endpoint, check)): Path<(String, String)>,
) -> Response {
    Endpoint::from_segment(&endpoint)
        .and_then(|endpoint| state.checks.report_one(endpoint, &check))
        .map_or_else(|| StatusCode::NOT_FOUND.into_response(), IntoResponse::into_response)
}

async fn metrics(State(state): State<Arc<HealthState>>) -> Response {
    let Some(metrics) = &state.metrics else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match metrics.encode() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[cfg(test)]
#[path = "server_test.rs"]
mod server_test;
