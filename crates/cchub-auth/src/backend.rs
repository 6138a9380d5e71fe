//! The token endpoint a [`TokenProvider`](crate::TokenProvider) refreshes against.
use std::{error::Error as StdError, fmt::Debug, time::Duration};

use async_trait::async_trait;
use http::StatusCode;
use oauth2::{
    basic::{
        BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
        BasicTokenResponse,
    },
    AsyncHttpClient, AuthType, Client, ClientId, ClientSecret, EndpointNotSet, EndpointSet,
    HttpClientError, HttpRequest, HttpResponse, RequestTokenError, Scope, StandardRevocableToken,
    TokenResponse, TokenUrl,
};

use crate::{
    config::ProviderConfig,
    error::{AuthenticationError, Error, Result},
};

/// A token issued by the authorization server.
#[derive(Clone, veil::Redact)]
pub struct Grant {
    #[redact]
    pub access_token: String,
    /// Lifetime reported by the server, counted from when the response arrived.
    pub expires_in: Duration,
    /// Scopes the server reports the token was issued for.
    pub scopes: Option<Vec<String>>,
}

/// Performs the client-credentials grant.
///
/// Implementations must not retry; a failed call is reported to the caller of
/// [`TokenProvider::get_access_token`](crate::TokenProvider::get_access_token) as is.
#[async_trait]
pub trait AuthBackend: Debug + Send + Sync {
    /// Request a new token. `scope` is a space-delimited list of scopes,
    /// `None` asks for the server's default scope.
    async fn request_token(&self, scope: Option<&str>)
        -> std::result::Result<Grant, AuthenticationError>;
}

// The oauth2 library also has a basic client.
// We can't use it as the token url must be set at the type level.
type TokenEndpointClient = Client<
    BasicErrorResponse,
    BasicTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointSet,
>;

/// [`AuthBackend`] talking to an `OAuth2` token endpoint over HTTP.
///
/// Client id and secret are sent in the form-encoded request body.
#[derive(Debug, Clone)]
pub struct OAuth2Backend {
    oauth2_client: TokenEndpointClient,
    http_client: reqwest::Client,
    extra_params: Vec<(String, String)>,
}

impl OAuth2Backend {
    /// Create a backend for the endpoint and credentials in `config`.
    /// The HTTP client does not follow redirects.
    ///
    /// # Errors
    /// Fails if the configuration is invalid or the HTTP client cannot be built.
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        config.validate()?;

        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::configuration(format!("Failed to create http client: {e}")))?;

        let oauth2_client = oauth2::Client::new(ClientId::new(config.client_id.clone()))
            .set_client_secret(ClientSecret::new(config.client_secret.clone()))
            .set_auth_type(AuthType::RequestBody)
            .set_token_uri(TokenUrl::from_url(config.token_endpoint.clone()));

        Ok(Self {
            oauth2_client,
            http_client,
            extra_params: config.extra_params.clone(),
        })
    }

    /// Use a custom `reqwest::Client` for token requests.
    /// Make sure its `redirect` policy is `Policy::none()` to prevent SSRF vulnerabilities.
    ///
    /// Timeouts of the token request are those of this client.
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = client;
        self
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        self.oauth2_client.client_id().as_str()
    }
}

#[async_trait]
impl AuthBackend for OAuth2Backend {
    async fn request_token(
        &self,
        scope: Option<&str>,
    ) -> std::result::Result<Grant, AuthenticationError> {
        let http_client = self.http_client.clone();
        let send = move |request: HttpRequest| {
            let http_client = http_client.clone();
            async move {
                let response: HttpResponse = AsyncHttpClient::call(&http_client, request)
                    .await
                    .map_err(TransportError::Http)?;
                if !response.status().is_success() {
                    return Err(TransportError::Status {
                        status: response.status(),
                        body: String::from_utf8_lossy(response.body()).into_owned(),
                    });
                }
                Ok(response)
            }
        };

        let mut request = self.oauth2_client.exchange_client_credentials();
        for scope in scope.into_iter().flat_map(str::split_whitespace) {
            request = request.add_scope(Scope::new(scope.to_string()));
        }
        for (name, value) in &self.extra_params {
            request = request.add_extra_param(name, value);
        }

        let response = request
            .request_async(&send)
            .await
            .map_err(authentication_error)?;

        // Without a lifetime the token could never be refreshed.
        let expires_in = response
            .expires_in()
            .ok_or_else(|| AuthenticationError::Parse {
                reason: "Token response has no expires_in".to_string(),
                body: String::new(),
            })?;

        Ok(Grant {
            access_token: response.access_token().secret().clone(),
            expires_in,
            scopes: response
                .scopes()
                .map(|scopes| scopes.iter().map(|s| s.as_str().to_owned()).collect()),
        })
    }
}

#[derive(Debug, thiserror::Error)]
enum TransportError {
    #[error(transparent)]
    Http(HttpClientError<reqwest::Error>),
    #[error("Unexpected status {status}")]
    Status { status: StatusCode, body: String },
}

fn authentication_error(
    err: RequestTokenError<TransportError, BasicErrorResponse>,
) -> AuthenticationError {
    match err {
        RequestTokenError::Request(TransportError::Status { status, body }) => {
            AuthenticationError::Status { status, body }
        }
        RequestTokenError::Request(e) => AuthenticationError::Request(describe(&e)),
        RequestTokenError::Parse(e, body) => AuthenticationError::Parse {
            reason: e.to_string(),
            body: String::from_utf8_lossy(&body).into_owned(),
        },
        RequestTokenError::ServerResponse(e) => AuthenticationError::Rejected(e.to_string()),
        RequestTokenError::Other(e) => AuthenticationError::Request(e),
    }
}

/// Error message including its sources, e.g. "Request failed: error sending request: connection refused".
fn describe(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
