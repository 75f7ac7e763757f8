//! Single-flight credential cache.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::jwt::decode_expiry;
use super::provider::{CredentialProvider, Principal};
use crate::config::AuthConfig;
use crate::errors::AuthError;
use crate::utils::{Clock, SystemClock, Timestamp};

/// A bearer token and the moment it stops being valid.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// The opaque bearer string.
    pub token: String,
    /// Absolute expiry.
    pub expires_at: Timestamp,
}

impl Credential {
    /// Returns true if the credential is usable at `now` given `skew`.
    #[must_use]
    pub fn is_fresh(&self, now: Timestamp, skew: chrono::Duration) -> bool {
        now < self.expires_at - skew
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Freshness rules for cached credentials.
#[derive(Debug, Clone, Copy)]
pub struct AuthSettings {
    /// Refresh this long before expiry.
    pub refresh_skew: chrono::Duration,
    /// Lifetime assumed when the token carries no readable expiry.
    pub fallback_lifetime: chrono::Duration,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self::from(&AuthConfig::default())
    }
}

impl From<&AuthConfig> for AuthSettings {
    fn from(config: &AuthConfig) -> Self {
        Self {
            refresh_skew: clamped_seconds(config.refresh_skew_seconds),
            fallback_lifetime: clamped_seconds(config.fallback_lifetime_seconds),
        }
    }
}

// Ten years; keeps timestamp arithmetic far from chrono's overflow panics.
const MAX_SETTING_SECONDS: u64 = 315_360_000;

fn clamped_seconds(seconds: u64) -> chrono::Duration {
    let clamped = seconds.min(MAX_SETTING_SECONDS);
    chrono::Duration::seconds(i64::try_from(clamped).unwrap_or(0))
}

type RefreshFuture = Shared<BoxFuture<'static, Result<Credential, AuthError>>>;

#[derive(Default)]
struct CacheState {
    credential: Option<Credential>,
    in_flight: Option<(u64, RefreshFuture)>,
    generation: u64,
}

struct CacheInner {
    provider: Arc<dyn CredentialProvider>,
    principal: Principal,
    clock: Arc<dyn Clock>,
    settings: AuthSettings,
    state: Mutex<CacheState>,
}

/// Caches one bearer credential and coalesces refreshes.
///
/// Cheap to clone; clones share the same cache. Reads of a fresh
/// credential never block on I/O. When the credential is missing or
/// inside the skew window, the first caller starts a refresh and every
/// concurrent caller awaits that same refresh, sharing its result or its
/// failure. A failed refresh leaves nothing cached, so the next call
/// asks the provider again.
#[derive(Clone)]
pub struct CredentialCache {
    inner: Arc<CacheInner>,
}

impl CredentialCache {
    /// Creates a cache using the system clock.
    pub fn new(
        provider: Arc<dyn CredentialProvider>,
        principal: Principal,
        settings: AuthSettings,
    ) -> Self {
        Self::with_clock(provider, principal, settings, Arc::new(SystemClock))
    }

    /// Creates a cache with an explicit clock.
    pub fn with_clock(
        provider: Arc<dyn CredentialProvider>,
        principal: Principal,
        settings: AuthSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                provider,
                principal,
                clock,
                settings,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    /// Returns a usable credential, refreshing it if needed.
    pub async fn get_token(&self) -> Result<Credential, AuthError> {
        let refresh = {
            let mut state = self.inner.state.lock();
            let now = self.inner.clock.now();

            if let Some(credential) = &state.credential {
                if credential.is_fresh(now, self.inner.settings.refresh_skew) {
                    return Ok(credential.clone());
                }
            }

            if let Some((_, in_flight)) = &state.in_flight {
                debug!("Joining in-flight credential refresh");
                in_flight.clone()
            } else {
                state.generation += 1;
                let generation = state.generation;
                let refresh = Self::refresh(Arc::clone(&self.inner), generation)
                    .boxed()
                    .shared();
                state.in_flight = Some((generation, refresh.clone()));
                refresh
            }
        };

        refresh.await
    }

    /// Returns just the bearer string.
    pub async fn bearer(&self) -> Result<String, AuthError> {
        self.get_token().await.map(|c| c.token)
    }

    /// Drops the cached credential so the next call refreshes.
    pub fn invalidate(&self) {
        self.inner.state.lock().credential = None;
    }

    /// Returns the cached credential without refreshing.
    #[must_use]
    pub fn cached(&self) -> Option<Credential> {
        self.inner.state.lock().credential.clone()
    }

    /// Fetches a token ahead of the first request.
    ///
    /// Failure is logged, not returned; the next `get_token` simply retries.
    pub async fn warm_up(&self) {
        match self.get_token().await {
            Ok(credential) => info!(expires_at = %credential.expires_at, "Credential cache warmed"),
            Err(e) => warn!(error = %e, "Failed to pre-warm credential cache"),
        }
    }

    async fn refresh(inner: Arc<CacheInner>, generation: u64) -> Result<Credential, AuthError> {
        info!(hostname = %inner.principal.hostname, "Fetching a new bearer token");

        let result = match inner.provider.authenticate(&inner.principal).await {
            Ok(token) if token.trim().is_empty() => Err(AuthError::EmptyToken),
            Ok(token) => {
                let now = inner.clock.now();
                match decode_expiry(&token) {
                    Some(expires_at) if now < expires_at - inner.settings.refresh_skew => {
                        Ok(Credential { token, expires_at })
                    }
                    Some(expires_at) => Err(AuthError::Expired { expires_at }),
                    None => {
                        warn!("Token has no readable expiry claim; using fallback lifetime");
                        let expires_at = now + inner.settings.fallback_lifetime;
                        Ok(Credential { token, expires_at })
                    }
                }
            }
            Err(e) => Err(e),
        };

        let mut state = inner.state.lock();
        if matches!(&state.in_flight, Some((g, _)) if *g == generation) {
            state.in_flight = None;
        }
        match &result {
            Ok(credential) => {
                debug!(expires_at = %credential.expires_at, "Bearer token cached");
                state.credential = Some(credential.clone());
            }
            Err(e) => warn!(error = %e, "Credential refresh failed"),
        }
        drop(state);

        result
    }
}

impl std::fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCache")
            .field("principal", &self.inner.principal)
            .field("settings", &self.inner.settings)
            .field("cached", &self.cached())
            .finish_non_exhaustive()
    }
}
