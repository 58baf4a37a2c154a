//! Health check registry and report rendering.
//!
//! Output follows the API server's own healthz format so existing probes and
//! tooling read it unchanged:
//!
//! ```text
//! [+]ping ok
//! [-]node-cache-synced failed: cache not synced
//! readyz check failed
//! ```

use axum::http::StatusCode;
use std::fmt;
use std::sync::Arc;

/// A named check contributing to a health endpoint.
pub trait HealthChecker: Send + Sync {
    /// Name used in reports and in `/<endpoint>/<name>`
    fn name(&self) -> &str;

    /// Returns the failure reason when unhealthy.
    fn check(&self) -> Result<(), String>;
}

/// Always healthy; proves the listener is serving.
#[derive(Debug, Clone, Copy, Default)]
pub struct PingCheck;

impl HealthChecker for PingCheck {
    fn name(&self) -> &str {
        "ping"
    }

    fn check(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Health endpoints served by every listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// `/healthz`: every check
    Healthz,
    /// `/livez`: liveness checks only
    Livez,
    /// `/readyz`: every check
    Readyz,
}

impl Endpoint {
    /// Maps a first path segment to an endpoint.
    pub fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "healthz" => Some(Self::Healthz),
            "livez" => Some(Self::Livez),
            "readyz" => Some(Self::Readyz),
            _ => None,
        }
    }

    /// Endpoint name without the leading slash
    pub fn name(self) -> &'static str {
        match self {
            Self::Healthz => "healthz",
            Self::Livez => "livez",
            Self::Readyz => "readyz",
        }
    }
}

/// Liveness and readiness checks exposed by the health listeners.
///
/// `ping` is always registered as a liveness check.
#[derive(Clone)]
pub struct HealthChecks {
    liveness: Vec<Arc<dyn HealthChecker>>,
    readiness: Vec<Arc<dyn HealthChecker>>,
}

impl Default for HealthChecks {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HealthChecks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |checks: &[Arc<dyn HealthChecker>]| {
            checks.iter().map(|c| c.name().to_string()).collect::<Vec<_>>()
        };
        f.debug_struct("HealthChecks")
            .field("liveness", &names(&self.liveness))
            .field("readiness", &names(&self.readiness))
            .finish()
    }
}

impl HealthChecks {
    /// Registry containing only `ping`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            liveness: vec![Arc::new(PingCheck)],
            readiness: Vec::new(),
        }
    }

    /// Adds a check reported on every endpoint.
    #[must_use]
    pub fn with_liveness(mut self, check: Arc<dyn HealthChecker>) -> Self {
        self.liveness.push(check);
        self
    }

    /// Adds a check reported on `/healthz` and `/readyz` but not `/livez`.
    #[must_use]
    pub fn with_readiness(mut self, check: Arc<dyn HealthChecker>) -> Self {
        self.readiness.push(check);
        self
    }

    fn for_endpoint(&self, endpoint: Endpoint) -> impl Iterator<Item = &Arc<dyn HealthChecker>> {
        let readiness: &[Arc<dyn HealthChecker>] = match endpoint {
            Endpoint::Livez => &[],
            Endpoint::Healthz | Endpoint::Readyz => &self.readiness,
        };
        self.liveness.iter().chain(readiness)
    }

    /// Runs every check behind `endpoint`.
    pub fn report(&self, endpoint: Endpoint, verbose: bool) -> (StatusCode, String) {
        let mut lines = String::new();
        let mut failed = false;

        for check in self.for_endpoint(endpoint) {
            match check.check() {
                Ok(()) => lines.push_str(&format!("[+]{} ok\n", check.name())),
                Err(reason) => {
                    failed = true;
                    lines.push_str(&format!("[-]{} failed: {reason}\n", check.name()));
                }
            }
        }

        if failed {
            lines.push_str(&format!("{} check failed\n", endpoint.name()));
            return (StatusCode::INTERNAL_SERVER_ERROR, lines);
        }
        if verbose {
            lines.push_str(&format!("{} check passed\n", endpoint.name()));
            return (StatusCode::OK, lines);
        }
        (StatusCode::OK, "ok".to_string())
    }

    /// Runs the single check named `name`, or `None` if the endpoint has no such check.
    pub fn report_one(&self, endpoint: Endpoint, name: &str) -> Option<(StatusCode, String)> {
        let check = self.for_endpoint(endpoint).find(|c| c.name() == name)?;
        Some(match check.check() {
            Ok(()) => (StatusCode::OK, "ok".to_string()),
            Err(reason) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("internal server error: {reason}\n"),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Toggle {
        healthy: AtomicBool,
    }

    impl HealthChecker for Toggle {
        fn name(&self) -> &str {
            "toggle"
        }

        fn check(&self) -> Result<(), String> {
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err("not yet".to_string())
            }
        }
    }

    fn checks_with_toggle(healthy: bool) -> (HealthChecks, Arc<Toggle>) {
        let toggle = Arc::new(Toggle {
            healthy: AtomicBool::new(healthy),
        });
        let checks = HealthChecks::new().with_readiness(toggle.clone());
        (checks, toggle)
    }

    #[test]
    fn test_all_passing_reports_ok() {
        let (checks, _) = checks_with_toggle(true);
        assert_eq!(
            checks.report(Endpoint::Readyz, false),
            (StatusCode::OK, "ok".to_string())
        );
    }

    #[test]
    fn test_verbose_lists_every_check() {
        let (checks, _) = checks_with_toggle(true);
        let (status, body) = checks.report(Endpoint::Healthz, true);

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "[+]ping ok\n[+]toggle ok\nhealthz check passed\n");
    }

    #[test]
    fn test_failing_readiness_check_fails_readyz_not_livez() {
        let (checks, toggle) = checks_with_toggle(false);

        let (status, body) = checks.report(Endpoint::Readyz, false);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.contains("[-]toggle failed: not yet"));
        assert!(body.ends_with("readyz check failed\n"));

        assert_eq!(checks.report(Endpoint::Livez, false).0, StatusCode::OK);

        toggle.healthy.store(true, Ordering::SeqCst);
        assert_eq!(checks.report(Endpoint::Readyz, false).0, StatusCode::OK);
    }

    #[test]
    fn test_single_check_lookup() {
        let (checks, _) = checks_with_toggle(false);

        assert_eq!(
            checks.report_one(Endpoint::Healthz, "ping"),
            Some((StatusCode::OK, "ok".to_string()))
        );
        assert_eq!(
            checks.report_one(Endpoint::Healthz, "toggle").map(|r| r.0),
            Some(StatusCode::INTERNAL_SERVER_ERROR)
        );
        // readiness checks are not part of livez
        assert!(checks.report_one(Endpoint::Livez, "toggle").is_none());
        assert!(checks.report_one(Endpoint::Healthz, "missing").is_none());
    }
}
