//! Configuration for the appflow service.
//!
//! Values come from a JSON file, from `OS_*` environment variables, or
//! both (`from_file` followed by `merge_env`). Every field has a serde
//! default so partial files are accepted.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Read {
        /// The file path.
        path: String,
        /// The IO error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for this schema.
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        /// The file path.
        path: String,
        /// The parse error.
        #[source]
        source: serde_json::Error,
    },

    /// An environment variable had an unusable value.
    #[error("invalid value for {name}: {reason}")]
    InvalidEnv {
        /// The variable name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The configuration is incomplete or inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct AppflowConfig {
    /// Tenant hostname hosting the remote APIs (e.g. `env.outsystems.dev`).
    #[serde(default)]
    pub hostname: String,
    /// Principal used by the credential provider.
    #[serde(default)]
    pub username: String,
    /// Secret used by the credential provider.
    #[serde(default)]
    pub password: String,
    /// Base address for final URLs; derived from the hostname when unset.
    #[serde(default)]
    pub base_address: Option<String>,
    /// A pre-issued bearer token.
    #[serde(default)]
    pub token: Option<String>,
    /// Helper executable that prints a bearer token on stdout.
    #[serde(default)]
    pub credential_command: Option<String>,
    /// Outbound HTTP settings.
    #[serde(default)]
    pub http: HttpConfig,
    /// Poll intervals.
    #[serde(default)]
    pub polling: PollingConfig,
    /// Credential cache settings.
    #[serde(default)]
    pub auth: AuthConfig,
}

impl std::fmt::Debug for AppflowConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppflowConfig")
            .field("hostname", &self.hostname)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("base_address", &self.base_address)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("credential_command", &self.credential_command)
            .field("http", &self.http)
            .field("polling", &self.polling)
            .field("auth", &self.auth)
            .finish()
    }
}

impl AppflowConfig {
    /// Creates a configuration for `hostname` with defaults elsewhere.
    #[must_use]
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ..Self::default()
        }
    }

    /// Sets the credential principal.
    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Sets an explicit base address.
    #[must_use]
    pub fn with_base_address(mut self, base_address: impl Into<String>) -> Self {
        self.base_address = Some(base_address.into());
        self
    }

    /// Sets a pre-issued token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Sets the credential helper command.
    #[must_use]
    pub fn with_credential_command(mut self, command: impl Into<String>) -> Self {
        self.credential_command = Some(command.into());
        self
    }

    /// Sets the polling configuration.
    #[must_use]
    pub fn with_polling(mut self, polling: PollingConfig) -> Self {
        self.polling = polling;
        self
    }

    /// Loads a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }

    /// Builds a configuration purely from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.merge_env()?;
        Ok(config)
    }

    /// Overlays any `OS_*` / `APPFLOW_*` variables that are set.
    pub fn merge_env(&mut self) -> Result<(), ConfigError> {
        self.merge_vars(|name| std::env::var(name).ok())
    }

    /// Overlays values from an arbitrary variable source.
    pub fn merge_vars<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("OS_HOSTNAME") {
            self.hostname = v;
        }
        if let Some(v) = get("OS_USERNAME") {
            self.username = v;
        }
        if let Some(v) = get("OS_PASSWORD") {
            self.password = v;
        }
        if let Some(v) = get("OS_BASE_ADDRESS") {
            self.base_address = Some(v);
        }
        if let Some(v) = get("OS_TOKEN") {
            self.token = Some(v);
        }
        if let Some(v) = get("OS_CREDENTIAL_COMMAND") {
            self.credential_command = Some(v);
        }
        if let Some(v) = get("APPFLOW_HTTP_TIMEOUT_SECONDS") {
            self.http.timeout_seconds = v.parse().map_err(|e: std::num::ParseFloatError| {
                ConfigError::InvalidEnv {
                    name: "APPFLOW_HTTP_TIMEOUT_SECONDS".to_string(),
                    reason: e.to_string(),
                }
            })?;
        }
        Ok(())
    }

    /// Checks that the configuration can drive a workflow.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hostname.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "missing required setting: hostname (OS_HOSTNAME)".to_string(),
            ));
        }
        if self.token.is_none() && self.credential_command.is_none() {
            return Err(ConfigError::Invalid(
                "no credential source: set a token (OS_TOKEN) or a credential command (OS_CREDENTIAL_COMMAND)"
                    .to_string(),
            ));
        }
        if self.http.timeout_seconds <= 0.0 || !self.http.timeout_seconds.is_finite() {
            return Err(ConfigError::Invalid(
                "http.timeout_seconds must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the base address final URLs are composed on.
    ///
    /// When none is configured, the public application host is derived
    /// from the tenant host: `.outsystems.dev` becomes `-dev.outsystems.app`.
    #[must_use]
    pub fn resolved_base_address(&self) -> String {
        match &self.base_address {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("https://{}", derive_app_hostname(&self.hostname)),
        }
    }
}

/// Rewrites a tenant hostname into its public application hostname.
#[must_use]
pub fn derive_app_hostname(hostname: &str) -> String {
    hostname.replacen(".outsystems.dev", "-dev.outsystems.app", 1)
}

/// Outbound HTTP settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: f64,
    /// User agent string.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_timeout() -> f64 {
    30.0
}

fn default_user_agent() -> String {
    concat!("appflow/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl HttpConfig {
    /// Gets timeout as Duration.
    ///
    /// Values that are not a usable duration fall back to the default.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        match Duration::try_from_secs_f64(self.timeout_seconds) {
            Ok(timeout) if !timeout.is_zero() => timeout,
            _ => Duration::from_secs_f64(default_timeout()),
        }
    }
}

/// Inter-poll delays for the three polling stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Delay between job polls while waiting for `ReadyToGenerate`.
    #[serde(default = "default_ready_interval")]
    pub ready_interval_ms: u64,
    /// Delay between job polls while waiting for `Done`.
    #[serde(default = "default_build_interval")]
    pub build_interval_ms: u64,
    /// Delay between publication polls.
    #[serde(default = "default_publish_interval")]
    pub publish_interval_ms: u64,
}

fn default_ready_interval() -> u64 {
    5_000
}

fn default_build_interval() -> u64 {
    10_000
}

fn default_publish_interval() -> u64 {
    10_000
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            ready_interval_ms: default_ready_interval(),
            build_interval_ms: default_build_interval(),
            publish_interval_ms: default_publish_interval(),
        }
    }
}

impl PollingConfig {
    /// Uses the same interval for every stage.
    #[must_use]
    pub fn uniform(interval_ms: u64) -> Self {
        Self {
            ready_interval_ms: interval_ms,
            build_interval_ms: interval_ms,
            publish_interval_ms: interval_ms,
        }
    }

    /// Delay for the ready poll.
    #[must_use]
    pub fn ready_interval(&self) -> Duration {
        Duration::from_millis(self.ready_interval_ms)
    }

    /// Delay for the build poll.
    #[must_use]
    pub fn build_interval(&self) -> Duration {
        Duration::from_millis(self.build_interval_ms)
    }

    /// Delay for the publication poll.
    #[must_use]
    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }
}

/// Credential cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// A token is refreshed this many seconds before it expires.
    #[serde(default = "default_refresh_skew")]
    pub refresh_skew_seconds: u64,
    /// Lifetime assumed for tokens without a readable expiry claim.
    #[serde(default = "default_fallback_lifetime")]
    pub fallback_lifetime_seconds: u64,
}

fn default_refresh_skew() -> u64 {
    60
}

fn default_fallback_lifetime() -> u64 {
    60
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            refresh_skew_seconds: default_refresh_skew(),
            fallback_lifetime_seconds: default_fallback_lifetime(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppflowConfig::default();
        assert_eq!(config.http.timeout_seconds, 30.0);
        assert_eq!(config.polling.ready_interval_ms, 5_000);
        assert_eq!(config.polling.build_interval_ms, 10_000);
        assert_eq!(config.auth.refresh_skew_seconds, 60);
        assert_eq!(config.auth.fallback_lifetime_seconds, 60);
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"hostname": "env.outsystems.dev", "token": "abc", "polling": {{"ready_interval_ms": 250}}}}"#
        )
        .unwrap();

        let config = AppflowConfig::from_file(file.path()).unwrap();
        assert_eq!(config.hostname, "env.outsystems.dev");
        assert_eq!(config.polling.ready_interval_ms, 250);
        assert_eq!(config.polling.build_interval_ms, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_missing() {
        let err = AppflowConfig::from_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_from_file_malformed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = AppflowConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_merge_vars_overrides() {
        let vars: HashMap<&str, &str> = [
            ("OS_HOSTNAME", "tenant.outsystems.dev"),
            ("OS_USERNAME", "me@example.com"),
            ("OS_PASSWORD", "secret"),
            ("OS_CREDENTIAL_COMMAND", "/usr/local/bin/get-token"),
            ("APPFLOW_HTTP_TIMEOUT_SECONDS", "12.5"),
            ("OS_BASE_ADDRESS", "  "),
        ]
        .into_iter()
        .collect();

        let mut config = AppflowConfig::new("ignored");
        config
            .merge_vars(|name| vars.get(name).map(|v| (*v).to_string()))
            .unwrap();

        assert_eq!(config.hostname, "tenant.outsystems.dev");
        assert_eq!(config.username, "me@example.com");
        assert_eq!(config.http.timeout_seconds, 12.5);
        assert_eq!(config.base_address, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_merge_vars_bad_timeout() {
        let mut config = AppflowConfig::default();
        let err = config
            .merge_vars(|name| (name == "APPFLOW_HTTP_TIMEOUT_SECONDS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn test_validate_requires_hostname_and_credentials() {
        assert!(AppflowConfig::default().with_token("t").validate().is_err());
        assert!(AppflowConfig::new("env.outsystems.dev").validate().is_err());
        assert!(AppflowConfig::new("env.outsystems.dev")
            .with_credential_command("helper")
            .validate()
            .is_ok());
    }

    #[test]
    fn test_resolved_base_address() {
        let derived = AppflowConfig::new("env.outsystems.dev");
        assert_eq!(derived.resolved_base_address(), "https://env-dev.outsystems.app");

        let explicit = AppflowConfig::new("env.outsystems.dev").with_base_address("https://apps.example.com/");
        assert_eq!(explicit.resolved_base_address(), "https://apps.example.com");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = AppflowConfig::new("h")
            .with_credentials("user", "hunter2")
            .with_token("tok");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("tok\""));
        assert!(rendered.contains("<redacted>"));
    }
}
