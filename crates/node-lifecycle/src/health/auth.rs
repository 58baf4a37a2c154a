//! Identity layer of the health handler chain.
//!
//! The secure listener authenticates bearer tokens and authorizes the
//! resulting user per path. The insecure listener skips both and treats every
//! caller as the implicit superuser.

use crate::error::LifecycleError;
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Group whose members may reach every path.
pub const SUPERUSER_GROUP: &str = "system:masters";

/// Group added to every authenticated user.
pub const AUTHENTICATED_GROUP: &str = "system:authenticated";

/// User attributed to requests on the insecure listener.
pub const INSECURE_SUPERUSER: &str = "system:unsecured";

/// Paths reachable without credentials by default.
pub const DEFAULT_ALWAYS_ALLOW_PATHS: [&str; 3] = ["/healthz", "/readyz", "/livez"];

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    /// User name
    pub name: String,
    /// Group memberships
    pub groups: Vec<String>,
}

impl UserInfo {
    /// Identity given to every caller of the insecure listener.
    #[must_use]
    pub fn insecure_superuser() -> Self {
        Self {
            name: INSECURE_SUPERUSER.to_string(),
            groups: vec![SUPERUSER_GROUP.to_string(), AUTHENTICATED_GROUP.to_string()],
        }
    }
}

/// Static bearer tokens accepted by the secure listener.
#[derive(Debug, Clone, Default)]
pub struct AuthenticationConfig {
    tokens: HashMap<String, UserInfo>,
}

impl AuthenticationConfig {
    /// Accepts `token` as `user`.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, user: UserInfo) -> Self {
        self.tokens.insert(token.into(), user);
        self
    }

    /// Parses a comma-separated list of `token=user[:group;group]` entries.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for an entry without a token or user.
    pub fn parse_tokens(list: &str) -> Result<Self, LifecycleError> {
        let mut config = Self::default();
        for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (token, identity) = entry.split_once('=').ok_or_else(|| {
                LifecycleError::InvalidConfig(format!("token entry missing '=': {entry}"))
            })?;
            let (name, groups) = identity.split_once(':').unwrap_or((identity, ""));
            if token.is_empty() || name.is_empty() {
                return Err(LifecycleError::InvalidConfig(format!(
                    "token entry needs a token and a user: {entry}"
                )));
            }

            let mut groups: Vec<String> = groups
                .split(';')
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .map(ToString::to_string)
                .collect();
            groups.push(AUTHENTICATED_GROUP.to_string());

            config.tokens.insert(
                token.to_string(),
                UserInfo {
                    name: name.to_string(),
                    groups,
                },
            );
        }
        Ok(config)
    }

    /// Resolves the `Authorization: Bearer` header to a user.
    pub fn authenticate(&self, request: &Request) -> Option<UserInfo> {
        let value = request.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
        let token = value.strip_prefix("Bearer ")?.trim();
        self.tokens.get(token).cloned()
    }
}

/// Path-based authorization for the secure listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationConfig {
    /// Paths reachable without credentials; a trailing `*` matches a prefix
    pub always_allow_paths: Vec<String>,
    /// Groups allowed on every path
    pub privileged_groups: Vec<String>,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            always_allow_paths: DEFAULT_ALWAYS_ALLOW_PATHS.iter().map(ToString::to_string).collect(),
            privileged_groups: vec![SUPERUSER_GROUP.to_string()],
        }
    }
}

impl AuthorizationConfig {
    /// Replaces the always-allowed paths with a comma-separated list.
    #[must_use]
    pub fn with_always_allow_paths(mut self, list: &str) -> Self {
        self.always_allow_paths = list
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(ToString::to_string)
            .collect();
        self
    }

    /// True if `path` needs no credentials.
    pub fn is_always_allowed(&self, path: &str) -> bool {
        self.always_allow_paths.iter().any(|allowed| match allowed.strip_suffix('*') {
            Some(prefix) => path.starts_with(prefix),
            None => path == allowed,
        })
    }

    /// True if `user` may reach `path`.
    pub fn authorize(&self, user: &UserInfo, path: &str) -> bool {
        self.is_always_allowed(path)
            || user.groups.iter().any(|g| self.privileged_groups.contains(g))
    }
}

/// How a listener establishes who is calling.
#[derive(Debug, Clone)]
pub enum Identity {
    /// Bearer-token authentication plus path authorization
    Authenticated {
        /// Accepted tokens
        authentication: AuthenticationConfig,
        /// Per-path rules
        authorization: AuthorizationConfig,
    },
    /// Every request runs as [`UserInfo::insecure_superuser`]
    InsecureSuperuser,
}

/// Middleware resolving the caller and rejecting unauthorized requests.
///
/// The resolved `UserInfo` is inserted into the request extensions.
pub async fn identify(
    State(identity): State<Arc<Identity>>,
    mut request: Request,
    next: Next,
) -> Response {
    let (authentication, authorization) = match identity.as_ref() {
        Identity::InsecureSuperuser => {
            request.extensions_mut().insert(UserInfo::insecure_superuser());
            return next.run(request).await;
        }
        Identity::Authenticated {
            authentication,
            authorization,
        } => (authentication, authorization),
    };

    let path = request.uri().path().to_string();
    if authorization.is_always_allowed(&path) {
        return next.run(request).await;
    }

    let Some(user) = authentication.authenticate(&request) else {
        debug!(path = %path, "Rejecting unauthenticated request");
        return (StatusCode::UNAUTHORIZED, "Unauthorized\n").into_response();
    };

    if !authorization.authorize(&user, &path) {
        debug!(path = %path, user = %user.name, "Rejecting unauthorized request");
        return (
            StatusCode::FORBIDDEN,
            format!("forbidden: User \"{}\" cannot get path \"{path}\"\n", user.name),
        )
            .into_response();
    }

    request.extensions_mut().insert(user);
    next.run(request).await
}
