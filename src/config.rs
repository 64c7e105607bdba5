//! Client configuration resolved from command-line options and environment.

use anyhow::{Context, Result, bail};
use log::debug;
use std::path::PathBuf;
use std::time::Duration;

use crate::runtime::Runtime;

pub const API_URL_ENV: &str = "KVITT_API_URL";
pub const AUTH_URL_ENV: &str = "KVITT_AUTH_URL";
pub const AUTH_API_KEY_ENV: &str = "KVITT_AUTH_API_KEY";
pub const SESSION_FILE_ENV: &str = "KVITT_SESSION_FILE";
pub const TIMEOUT_ENV: &str = "KVITT_TIMEOUT_SECS";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Values given explicitly on the command line. Anything left `None` falls
/// back to the environment, then to defaults.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub api_url: Option<String>,
    pub auth_url: Option<String>,
    pub session_file: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Backend base URL. Required to build an [`crate::http::ApiClient`].
    pub api_url: Option<String>,
    /// Auth service base URL used for session refresh.
    pub auth_url: Option<String>,
    /// Public key some auth services expect on every call (`apikey` header).
    pub auth_api_key: Option<String>,
    pub session_file: PathBuf,
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl ClientConfig {
    #[tracing::instrument(skip(runtime, overrides))]
    pub fn resolve<R: Runtime + ?Sized>(runtime: &R, overrides: &ConfigOverrides) -> Result<Self> {
        let api_url = overrides
            .api_url
            .clone()
            .or_else(|| env_non_empty(runtime, API_URL_ENV));
        let auth_url = overrides
            .auth_url
            .clone()
            .or_else(|| env_non_empty(runtime, AUTH_URL_ENV));
        let auth_api_key = env_non_empty(runtime, AUTH_API_KEY_ENV);

        let session_file = match overrides.session_file.clone() {
            Some(path) => path,
            None => match env_non_empty(runtime, SESSION_FILE_ENV) {
                Some(path) => PathBuf::from(path),
                None => default_session_file(runtime)?,
            },
        };

        let timeout = match overrides.timeout_secs {
            Some(secs) => Duration::from_secs(secs),
            None => match env_non_empty(runtime, TIMEOUT_ENV) {
                Some(raw) => Duration::from_secs(raw.trim().parse::<u64>().with_context(|| {
                    format!("{} must be a whole number of seconds, got '{}'", TIMEOUT_ENV, raw)
                })?),
                None => DEFAULT_TIMEOUT,
            },
        };
        if timeout.is_zero() {
            bail!("Request timeout must be at least one second");
        }
        let connect_timeout = timeout.min(DEFAULT_CONNECT_TIMEOUT);

        let config = Self {
            api_url,
            auth_url,
            auth_api_key,
            session_file,
            timeout,
            connect_timeout,
        };
        debug!(
            "Resolved config: api_url={:?} auth_url={:?} session_file={} timeout={:?}",
            config.api_url,
            config.auth_url,
            config.session_file.display(),
            config.timeout
        );
        Ok(config)
    }

    /// The backend URL, failing when none was configured.
    pub fn require_api_url(&self) -> Result<&str> {
        match self.api_url.as_deref() {
            Some(url) => Ok(url),
            None => bail!(
                "No API URL configured. Pass --api-url or set the {} environment variable.",
                API_URL_ENV
            ),
        }
    }
}

fn env_non_empty<R: Runtime + ?Sized>(runtime: &R, key: &str) -> Option<String> {
    runtime
        .env_var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn default_session_file<R: Runtime + ?Sized>(runtime: &R) -> Result<PathBuf> {
    let dir = runtime.config_dir().with_context(|| {
        format!(
            "Could not determine the config directory. Set {} to choose a session file.",
            SESSION_FILE_ENV
        )
    })?;
    Ok(dir.join("kvitt").join("session.json"))
}
