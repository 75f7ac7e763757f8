//! Credential providers.
//!
//! A provider turns a [`Principal`] into a bearer token. It may be slow
//! (a full identity-provider login) and it may fail; the cache in
//! [`super::CredentialCache`] makes sure it is called as rarely as possible.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tracing::debug;

use crate::errors::AuthError;

/// Who the token is requested for.
#[derive(Clone, Default)]
pub struct Principal {
    /// Tenant hostname.
    pub hostname: String,
    /// Login name.
    pub username: String,
    /// Login secret.
    pub password: String,
}

impl Principal {
    /// Creates a new principal.
    #[must_use]
    pub fn new(
        hostname: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Principal")
            .field("hostname", &self.hostname)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Produces bearer tokens.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Obtains a fresh token for `principal`.
    async fn authenticate(&self, principal: &Principal) -> Result<String, AuthError>;
}

/// Hands out a token that was issued out of band.
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    /// Creates a provider that always returns `token`.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenProvider").finish_non_exhaustive()
    }
}

#[async_trait]
impl CredentialProvider for StaticTokenProvider {
    async fn authenticate(&self, _principal: &Principal) -> Result<String, AuthError> {
        Ok(self.token.clone())
    }
}

/// Runs an external helper that performs the login and prints the token.
///
/// The helper receives `APPFLOW_HOSTNAME`, `APPFLOW_USERNAME` and
/// `APPFLOW_PASSWORD` in its environment. The last non-empty line of its
/// stdout is taken as the token.
#[derive(Debug, Clone)]
pub struct CommandCredentialProvider {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandCredentialProvider {
    /// Parses a whitespace-separated command line.
    #[must_use]
    pub fn new(command_line: &str) -> Self {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_default();
        Self {
            program,
            args: parts.collect(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Sets how long the helper may run.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl CredentialProvider for CommandCredentialProvider {
    async fn authenticate(&self, principal: &Principal) -> Result<String, AuthError> {
        if self.program.is_empty() {
            return Err(AuthError::provider("credential command is empty"));
        }

        debug!(program = %self.program, "Running credential helper");
        let child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .env("APPFLOW_HOSTNAME", &principal.hostname)
            .env("APPFLOW_USERNAME", &principal.username)
            .env("APPFLOW_PASSWORD", &principal.password)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| {
                AuthError::provider(format!(
                    "credential helper timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| AuthError::provider(format!("failed to run credential helper: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AuthError::provider(format!(
                "credential helper exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .map(str::to_string)
            .ok_or(AuthError::EmptyToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_provider() {
        let provider = StaticTokenProvider::new("tok");
        let token = provider.authenticate(&Principal::default()).await.unwrap();
        assert_eq!(token, "tok");
    }

    #[test]
    fn test_principal_debug_redacts_password() {
        let principal = Principal::new("h", "u", "hunter2");
        assert!(!format!("{principal:?}").contains("hunter2"));
    }

    #[test]
    fn test_command_parsing() {
        let provider = CommandCredentialProvider::new("node  dist/get-token.js --quiet");
        assert_eq!(provider.program, "node");
        assert_eq!(provider.args, vec!["dist/get-token.js", "--quiet"]);
    }

    #[tokio::test]
    async fn test_empty_command_fails() {
        let provider = CommandCredentialProvider::new("   ");
        let err = provider.authenticate(&Principal::default()).await.unwrap_err();
        assert!(matches!(err, AuthError::Provider(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_reads_last_line() {
        let provider = CommandCredentialProvider {
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                "echo logging in as $APPFLOW_USERNAME; echo the-token".to_string(),
            ],
            timeout: Duration::from_secs(5),
        };

        let token = provider
            .authenticate(&Principal::new("h", "me", "pw"))
            .await
            .unwrap();
        assert_eq!(token, "the-token");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_failure_is_auth_error() {
        let provider = CommandCredentialProvider {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "echo nope >&2; exit 3".to_string()],
            timeout: Duration::from_secs(5),
        };

        let err = provider.authenticate(&Principal::default()).await.unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_without_output_is_empty_token() {
        let provider = CommandCredentialProvider {
            program: "true".to_string(),
            args: Vec::new(),
            timeout: Duration::from_secs(5),
        };

        let err = provider.authenticate(&Principal::default()).await.unwrap_err();
        assert_eq!(err, AuthError::EmptyToken);
    }
}
