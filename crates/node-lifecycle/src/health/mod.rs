//! Local health and diagnostic HTTP endpoints.
//!
//! - `/healthz`, `/readyz`: every registered check
//! - `/livez`: liveness checks only
//! - `/<endpoint>/<check>`: a single named check
//! - `/metrics`: Prometheus exposition

mod auth;
mod checks;
mod server;

pub use auth::{
    AUTHENTICATED_GROUP, AuthenticationConfig, AuthorizationConfig, DEFAULT_ALWAYS_ALLOW_PATHS,
    INSECURE_SUPERUSER, Identity, SUPERUSER_GROUP, UserInfo,
};
pub use checks::{Endpoint, HealthChecker, HealthChecks, PingCheck};
pub use server::{HealthEndpointServer, ServingHandle};
