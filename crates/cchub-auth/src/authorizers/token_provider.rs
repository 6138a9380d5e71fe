#[cfg(not(feature = "runtime-tokio"))]
compile_error!("An async runtime, such as `runtime-tokio`, must be enabled to drive token refreshes.");

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, RwLock,
    },
    time::{Duration, Instant},
};

use futures::future::{BoxFuture, FutureExt, Shared};
use http::HeaderValue;
use tracing::Instrument;

use super::{bearer_header, Authorizer};
use crate::{
    backend::{AuthBackend, Grant, OAuth2Backend},
    clock::{Clock, SystemClock},
    config::{ProviderConfig, DEFAULT_REFRESH_SKEW},
    error::{AuthenticationError, Result},
};

/// An opaque bearer token. Cheap to clone, redacted in `Debug`.
#[derive(Clone, PartialEq, Eq, veil::Redact)]
pub struct AccessToken {
    #[redact]
    secret: Arc<str>,
}

impl AccessToken {
    fn new(secret: &str) -> Self {
        Self {
            secret: Arc::from(secret),
        }
    }

    /// The raw token, exactly as issued.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// `Bearer {token}` header value, marked sensitive.
    ///
    /// # Errors
    /// Fails if the token is not ASCII.
    pub fn authorization_header(&self) -> Result<HeaderValue> {
        bearer_header(&self.secret)
    }
}

/// Normalized scope request: sorted, deduplicated scope names. `None` is the
/// server's default scope.
fn normalize_scope(scope: Option<&str>) -> Option<String> {
    let mut scopes: Vec<&str> = scope?.split_whitespace().collect();
    scopes.sort_unstable();
    scopes.dedup();
    (!scopes.is_empty()).then(|| scopes.join(" "))
}

#[derive(Clone, veil::Redact)]
struct CachedToken {
    #[redact]
    token: AccessToken,
    expires_at: Instant,
}

impl CachedToken {
    fn from_grant(
        grant: Grant,
        received_at: Instant,
    ) -> std::result::Result<Self, AuthenticationError> {
        let expires_at = received_at.checked_add(grant.expires_in).ok_or_else(|| {
            AuthenticationError::Parse {
                reason: format!("expires_in of {}s is out of range", grant.expires_in.as_secs()),
                body: String::new(),
            }
        })?;

        Ok(Self {
            token: AccessToken::new(&grant.access_token),
            expires_at,
        })
    }

    fn remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }

    /// Expired once no more than `skew` is left before `expires_at`.
    fn is_expired(&self, now: Instant, skew: Duration) -> bool {
        self.remaining(now) <= skew
    }
}

type RefreshResult = std::result::Result<AccessToken, AuthenticationError>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshResult>>;

#[derive(Clone)]
struct InFlight {
    id: u64,
    result: SharedRefresh,
}

struct Inner {
    backend: Arc<dyn AuthBackend>,
    clock: Arc<dyn Clock>,
    refresh_skew: Duration,
    token: RwLock<Option<CachedToken>>,
    in_flight: Mutex<Option<InFlight>>,
    next_flight: AtomicU64,
}

/// Hands out `OAuth2` access tokens obtained with the client-credentials grant.
///
/// The token is cached and reused until it is within `refresh_skew` of its expiry.
/// Only then is a new one requested from the [`AuthBackend`]. Concurrent callers that
/// find the cache stale share one refresh: the request runs on a spawned task, every
/// waiter receives its result, and dropping a waiter does not cancel it.
///
/// A failed refresh is returned to the waiting callers and leaves the cached token as
/// it was. There are no retries; the next call simply tries again.
///
/// Uses `Arc` internally for cheap cloning.
#[derive(Clone)]
pub struct TokenProvider {
    inner: Arc<Inner>,
}

impl fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenProvider")
            .field("backend", &self.inner.backend)
            .field("refresh_skew", &self.inner.refresh_skew)
            .finish_non_exhaustive()
    }
}

impl TokenProvider {
    /// Create a provider for the token endpoint in `config`.
    /// No token is fetched until the first call to [`Self::get_access_token`].
    ///
    /// # Errors
    /// Fails if the configuration is invalid.
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let backend = OAuth2Backend::new(config)?;
        Ok(Self::with_backend(
            Arc::new(backend),
            config.refresh_skew,
            Arc::new(SystemClock),
        ))
    }

    /// Create a new [`TokenProviderBuilder`].
    #[must_use]
    pub fn builder(
        client_id: &str,
        client_secret: &str,
        token_endpoint: url::Url,
    ) -> TokenProviderBuilder {
        TokenProviderBuilder::new(client_id, client_secret, token_endpoint)
    }

    /// Create a provider on top of any [`AuthBackend`] and [`Clock`].
    #[must_use]
    pub fn with_backend(
        backend: Arc<dyn AuthBackend>,
        refresh_skew: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                clock,
                refresh_skew,
                token: RwLock::new(None),
                in_flight: Mutex::new(None),
                next_flight: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the cached token, or a new one requested for `scope`
    /// (space-delimited; `None` for the default scope).
    ///
    /// While the cached token is fresh it is returned without suspending, whatever
    /// `scope` asks for; the scope is only sent along when a refresh is needed.
    /// Otherwise a refresh is started, or joined if one is already running.
    ///
    /// # Errors
    /// Fails with [`Error::Authentication`](crate::Error::Authentication) if the refresh fails.
    pub async fn get_access_token(&self, scope: Option<&str>) -> Result<AccessToken> {
        if let Some(token) = self.inner.fresh_token() {
            return Ok(token);
        }

        let token = self.inner.refresh(normalize_scope(scope)).await?;
        Ok(token)
    }

    /// Obtain a default-scope token ahead of the first request.
    ///
    /// # Errors
    /// Fails if the refresh fails.
    pub async fn prefetch(&self) -> Result<()> {
        self.get_access_token(None).await.map(|_| ())
    }

    /// The cached token if it is still fresh, without touching the network.
    #[must_use]
    pub fn cached_token(&self) -> Option<AccessToken> {
        self.inner.current_token()
    }

    /// An [`Authorizer`] that requests tokens for `scope` instead of the default scope.
    #[must_use]
    pub fn scoped(&self, scope: impl Into<String>) -> ScopedAuthorizer {
        ScopedAuthorizer {
            provider: self.clone(),
            scope: scope.into(),
        }
    }
}

impl Inner {
    fn current_token(&self) -> Option<AccessToken> {
        let now = self.clock.now();
        // Unwrap RWLock to propagate poison (writer panicked)
        let state_read_guard = self.token.read().expect("Non-poisoned lock");
        let token = state_read_guard
            .as_ref()
            .filter(|cached| !cached.is_expired(now, self.refresh_skew))
            .map(|cached| cached.token.clone());
        drop(state_read_guard);
        token
    }

    fn fresh_token(&self) -> Option<AccessToken> {
        let now = self.clock.now();
        // Unwrap RWLock to propagate poison (writer panicked)
        let state_read_guard = self.token.read().expect("Non-poisoned lock");
        let cached = state_read_guard.as_ref()?;

        let remaining = cached.remaining(now);
        let valid = !cached.is_expired(now, self.refresh_skew);
        tracing::debug!(
            seconds_remaining = remaining.as_secs(),
            valid,
            "Checked cached access token"
        );

        if valid {
            Some(cached.token.clone())
        } else {
            tracing::info!(
                seconds_remaining = remaining.as_secs(),
                "Access token near expiry, refreshing"
            );
            None
        }
    }

    /// Join the running refresh, or start one for `scope`.
    fn refresh(self: &Arc<Self>, scope: Option<String>) -> SharedRefresh {
        let mut in_flight = self.in_flight.lock().expect("Non-poisoned lock");
        if let Some(flight) = in_flight.as_ref() {
            tracing::trace!("Joining token refresh already in flight");
            return flight.result.clone();
        }

        // A refresh may have completed between our cache check and taking the lock.
        // It writes the cache before clearing `in_flight`, so this sees its token.
        if let Some(token) = self.current_token() {
            let fresh: RefreshResult = Ok(token);
            return futures::future::ready(fresh).boxed().shared();
        }

        let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(self);
        // The task cannot clear `in_flight` before we release the lock below.
        #[cfg(feature = "runtime-tokio")]
        let task =
            tokio::spawn(async move { inner.run_refresh(id, scope).await }.in_current_span());

        let result = task
            .map(|joined| {
                joined.unwrap_or_else(|e| {
                    tracing::error!("Token refresh task failed: {e}");
                    Err(AuthenticationError::RefreshAborted)
                })
            })
            .boxed()
            .shared();

        *in_flight = Some(InFlight {
            id,
            result: result.clone(),
        });
        result
    }

    async fn run_refresh(self: Arc<Self>, id: u64, scope: Option<String>) -> RefreshResult {
        tracing::info!(
            scope = scope.as_deref().unwrap_or("<default>"),
            "Requesting new access token"
        );

        let grant = self.backend.request_token(scope.as_deref()).await;
        let received_at = self.clock.now();
        let result = grant.and_then(|grant| CachedToken::from_grant(grant, received_at));

        match &result {
            Ok(cached) => {
                let expires_in = cached.remaining(received_at);
                if expires_in <= self.refresh_skew {
                    tracing::warn!(
                        "Token expires in {}s which is not more than the refresh skew of {}s. It will be refreshed on next use.",
                        expires_in.as_secs(),
                        self.refresh_skew.as_secs()
                    );
                }
                // Unwrap RWLock to propagate poison (writer panicked)
                *self.token.write().expect("Non-poisoned lock") = Some(cached.clone());
                tracing::info!(expires_in_secs = expires_in.as_secs(), "Access token acquired");
            }
            Err(e) => tracing::error!("Failed to refresh token: {e}"),
        }

        let mut in_flight = self.in_flight.lock().expect("Non-poisoned lock");
        if in_flight.as_ref().is_some_and(|flight| flight.id == id) {
            *in_flight = None;
        }
        drop(in_flight);

        result.map(|cached| cached.token)
    }
}

impl Authorizer for TokenProvider {
    async fn authorization_header(&self) -> Result<Arc<HeaderValue>> {
        let token = self.get_access_token(None).await?;
        Ok(Arc::new(token.authorization_header()?))
    }
}

/// [`Authorizer`] requesting tokens with a fixed scope, see [`TokenProvider::scoped`].
#[derive(Debug, Clone)]
pub struct ScopedAuthorizer {
    provider: TokenProvider,
    scope: String,
}

impl Authorizer for ScopedAuthorizer {
    async fn authorization_header(&self) -> Result<Arc<HeaderValue>> {
        let token = self.provider.get_access_token(Some(&self.scope)).await?;
        Ok(Arc::new(token.authorization_header()?))
    }
}

/// Builder for [`TokenProvider`] using the `OAuth2` token endpoint.
///
/// The following configurations are available:
/// * `refresh_skew`: How long before expiry a token counts as expired. Default is 30 seconds.
/// * `extra_params`: Extra parameters to include in the token request. Empty by default.
/// * `http_client`: Custom `reqwest::Client` to use for token requests. Default is a client with redirects disabled.
/// * `clock`: Time source for expiry checks. Default is the system clock.
#[derive(Debug, Clone)]
pub struct TokenProviderBuilder {
    config: ProviderConfig,
    http_client: Option<reqwest::Client>,
    clock: Option<Arc<dyn Clock>>,
}

impl TokenProviderBuilder {
    /// Create a builder for the given credentials and token endpoint.
    /// See [`TokenProviderBuilder`] for the defaults.
    #[must_use]
    pub fn new(client_id: &str, client_secret: &str, token_endpoint: url::Url) -> Self {
        Self {
            config: ProviderConfig::builder()
                .token_endpoint(token_endpoint)
                .client_id(client_id)
                .client_secret(client_secret)
                .refresh_skew(DEFAULT_REFRESH_SKEW)
                .build(),
            http_client: None,
            clock: None,
        }
    }

    /// Tokens are refreshed once they are within `skew` of expiry.
    #[must_use]
    pub fn refresh_skew(mut self, skew: Duration) -> Self {
        self.config.refresh_skew = skew;
        self
    }

    /// Appends an extra param to the token request.
    #[must_use]
    pub fn add_extra_param(mut self, name: &str, value: &str) -> Self {
        self.config
            .extra_params
            .push((name.to_string(), value.to_string()));
        self
    }

    /// Optionally specify the `reqwest::Client` to use for token requests.
    /// When setting a custom client, please make sure to set the `redirect` policy to `Policy::none()`
    /// to prevent SSRF vulnerabilities.
    #[must_use]
    pub fn set_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Time source used for expiry checks, e.g. a [`ManualClock`](crate::ManualClock) in tests.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the [`TokenProvider`]. Does not fetch a token.
    ///
    /// # Errors
    /// Fails if the client id or secret is empty or the endpoint is not http(s).
    pub fn build(self) -> Result<TokenProvider> {
        let mut backend = OAuth2Backend::new(&self.config)?;
        if let Some(client) = self.http_client {
            backend = backend.with_http_client(client);
        }

        Ok(TokenProvider::with_backend(
            Arc::new(backend),
            self.config.refresh_skew,
            self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        ))
    }
}
