//! Configuration from environment variables.

use crate::error::ControllerError;
use node_lifecycle::{
    AuthenticationConfig, AuthorizationConfig, DEFAULT_API_READY_TIMEOUT, DaemonConfig,
    InsecureServing, SecureServing, TlsMaterial,
};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default reconcile interval (five minutes)
const DEFAULT_NODE_STATUS_UPDATE_FREQUENCY_SECONDS: u64 = 300;

/// Settings read at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub node_name: String,
    pub reconcile_interval: Duration,
    pub api_ready_timeout: Duration,
    pub secure_serving: Option<SecureServing>,
    pub insecure_serving: Option<InsecureServing>,
}

impl Settings {
    /// Reads settings from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads settings through `lookup`, which returns `None` for unset keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let node_name = lookup("NODE_NAME")
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| {
                ControllerError::InvalidConfig(
                    "NODE_NAME environment variable is required".to_string(),
                )
            })?;

        let reconcile_interval = match lookup("NODE_STATUS_UPDATE_FREQUENCY_SECONDS") {
            Some(value) => seconds("NODE_STATUS_UPDATE_FREQUENCY_SECONDS", &value)?,
            None => Duration::from_secs(DEFAULT_NODE_STATUS_UPDATE_FREQUENCY_SECONDS),
        };
        let api_ready_timeout = match lookup("API_READY_TIMEOUT_SECONDS") {
            Some(value) => seconds("API_READY_TIMEOUT_SECONDS", &value)?,
            None => DEFAULT_API_READY_TIMEOUT,
        };

        let secure_serving = match lookup("SECURE_BIND_ADDRESS") {
            Some(addr) => Some(secure_serving(&lookup, &addr)?),
            None => None,
        };
        let insecure_serving = lookup("INSECURE_BIND_ADDRESS")
            .map(|addr| {
                socket_addr("INSECURE_BIND_ADDRESS", &addr)
                    .map(|bind_address| InsecureServing { bind_address })
            })
            .transpose()?;

        Ok(Self {
            node_name,
            reconcile_interval,
            api_ready_timeout,
            secure_serving,
            insecure_serving,
        })
    }

    /// Builds the lifecycle configuration around the shared `client`.
    pub fn into_daemon_config<C>(self, client: C) -> Result<DaemonConfig<C>, ControllerError> {
        let mut config = DaemonConfig::new(self.node_name, client, self.reconcile_interval)?
            .with_api_ready_timeout(self.api_ready_timeout)?;
        if let Some(serving) = self.secure_serving {
            config = config.with_secure_serving(serving);
        }
        if let Some(serving) = self.insecure_serving {
            config = config.with_insecure_serving(serving);
        }
        Ok(config)
    }
}

fn secure_serving(
    lookup: &impl Fn(&str) -> Option<String>,
    addr: &str,
) -> Result<SecureServing, ControllerError> {
    let bind_address = socket_addr("SECURE_BIND_ADDRESS", addr)?;
    let (Some(cert_path), Some(key_path)) = (lookup("TLS_CERT_FILE"), lookup("TLS_PRIVATE_KEY_FILE"))
    else {
        return Err(ControllerError::InvalidConfig(
            "TLS_CERT_FILE and TLS_PRIVATE_KEY_FILE are required with SECURE_BIND_ADDRESS"
                .to_string(),
        ));
    };

    let authentication = match lookup("AUTHENTICATION_TOKENS") {
        Some(tokens) => AuthenticationConfig::parse_tokens(&tokens)?,
        None => AuthenticationConfig::default(),
    };
    let authorization = match lookup("AUTHORIZATION_ALWAYS_ALLOW_PATHS") {
        Some(paths) => AuthorizationConfig::default().with_always_allow_paths(&paths),
        None => AuthorizationConfig::default(),
    };

    Ok(SecureServing {
        bind_address,
        tls: TlsMaterial {
            cert_path: PathBuf::from(cert_path),
            key_path: PathBuf::from(key_path),
        },
        authentication,
        authorization,
    })
}

fn socket_addr(key: &str, value: &str) -> Result<SocketAddr, ControllerError> {
    value.trim().parse().map_err(|e| {
        ControllerError::InvalidConfig(format!("{key} must be a socket address: {e}"))
    })
}

fn seconds(key: &str, value: &str) -> Result<Duration, ControllerError> {
    let secs: u64 = value.trim().parse().map_err(|e| {
        ControllerError::InvalidConfig(format!("{key} must be a number of seconds: {e}"))
    })?;
    if secs == 0 {
        return Err(ControllerError::InvalidConfig(format!(
            "{key} must be greater than zero"
        )));
    }
    Ok(Duration::from_secs(secs))
}
