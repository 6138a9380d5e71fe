use std::time::Duration;

use typed_builder::TypedBuilder;
use url::Url;

use crate::error::{Error, Result};

/// Tokens are treated as expired this long before they actually expire.
pub const DEFAULT_REFRESH_SKEW: Duration = Duration::from_secs(30);

pub const ENV_BASE_URL: &str = "CCHUB_BASE_URL";
pub const ENV_TOKEN_ENDPOINT: &str = "CCHUB_TOKEN_ENDPOINT";
pub const ENV_CLIENT_ID: &str = "CCHUB_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "CCHUB_CLIENT_SECRET";
pub const ENV_REFRESH_SKEW_SECS: &str = "CCHUB_REFRESH_SKEW_SECS";

/// Settings of a [`TokenProvider`](crate::TokenProvider).
///
/// ```
/// use cchub_auth::ProviderConfig;
///
/// let config = ProviderConfig::builder()
///     .token_endpoint("https://auth.example.com/connect/token".parse().unwrap())
///     .client_id("my-client")
///     .client_secret("my-secret")
///     .build();
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, veil::Redact, TypedBuilder)]
pub struct ProviderConfig {
    pub token_endpoint: Url,
    #[builder(setter(into))]
    pub client_id: String,
    #[redact]
    #[builder(setter(into))]
    pub client_secret: String,
    #[builder(default = DEFAULT_REFRESH_SKEW)]
    pub refresh_skew: Duration,
    /// Extra form fields sent with every token request.
    #[builder(default)]
    pub extra_params: Vec<(String, String)>,
}

impl ProviderConfig {
    /// Token endpoint of a Customer's Canvas identity server: `{base_url}/connect/token`.
    ///
    /// # Errors
    /// Fails if the resulting URL cannot be parsed.
    pub fn token_endpoint_for(base_url: &str) -> Result<Url> {
        let base = base_url.trim_end_matches('/');
        format!("{base}/connect/token")
            .parse()
            .map_err(|e| Error::configuration(format!("Invalid base url `{base_url}`: {e}")))
    }

    /// Load the configuration from `CCHUB_*` environment variables.
    ///
    /// `CCHUB_TOKEN_ENDPOINT` takes precedence over `CCHUB_BASE_URL`.
    ///
    /// # Errors
    /// Fails if a required variable is missing or a value cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| Error::configuration(format!("Missing environment variable `{key}`")))
        };

        let token_endpoint = match lookup(ENV_TOKEN_ENDPOINT) {
            Some(endpoint) => endpoint.parse().map_err(|e| {
                Error::configuration(format!("Invalid `{ENV_TOKEN_ENDPOINT}`: {e}"))
            })?,
            None => Self::token_endpoint_for(&required(ENV_BASE_URL)?)?,
        };

        let refresh_skew = match lookup(ENV_REFRESH_SKEW_SECS) {
            Some(secs) => secs.trim().parse().map(Duration::from_secs).map_err(|e| {
                Error::configuration(format!("Invalid `{ENV_REFRESH_SKEW_SECS}`: {e}"))
            })?,
            None => DEFAULT_REFRESH_SKEW,
        };

        let config = Self {
            token_endpoint,
            client_id: required(ENV_CLIENT_ID)?,
            client_secret: required(ENV_CLIENT_SECRET)?,
            refresh_skew,
            extra_params: Vec::new(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that the provider can be used with this configuration.
    ///
    /// # Errors
    /// Fails if the client id or secret is empty, or the endpoint is not http(s).
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(Error::configuration("client_id must not be empty"));
        }
        if self.client_secret.is_empty() {
            return Err(Error::configuration("client_secret must not be empty"));
        }
        if !matches!(self.token_endpoint.scheme(), "http" | "https") {
            return Err(Error::configuration(format!(
                "token endpoint must use http or https, got `{}`",
                self.token_endpoint.scheme()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_token_endpoint_for_base_url() {
        for base in ["https://auth.example.com", "https://auth.example.com/"] {
            assert_eq!(
                ProviderConfig::token_endpoint_for(base).unwrap().as_str(),
                "https://auth.example.com/connect/token"
            );
        }
        assert!(ProviderConfig::token_endpoint_for("not a url").is_err());
    }

    #[test]
    fn test_from_env() {
        let config = ProviderConfig::from_lookup(lookup(&[
            (ENV_BASE_URL, "https://auth.example.com"),
            (ENV_CLIENT_ID, "my-client"),
            (ENV_CLIENT_SECRET, "my-secret"),
            (ENV_REFRESH_SKEW_SECS, "300"),
        ]))
        .unwrap();

        assert_eq!(
            config.token_endpoint.as_str(),
            "https://auth.example.com/connect/token"
        );
        assert_eq!(config.client_id, "my-client");
        assert_eq!(config.refresh_skew, Duration::from_secs(300));
    }

    #[test]
    fn test_from_env_prefers_token_endpoint() {
        let config = ProviderConfig::from_lookup(lookup(&[
            (ENV_BASE_URL, "https://auth.example.com"),
            (ENV_TOKEN_ENDPOINT, "https://idp.example.com/oauth2/token"),
            (ENV_CLIENT_ID, "my-client"),
            (ENV_CLIENT_SECRET, "my-secret"),
        ]))
        .unwrap();

        assert_eq!(
            config.token_endpoint.as_str(),
            "https://idp.example.com/oauth2/token"
        );
        assert_eq!(config.refresh_skew, DEFAULT_REFRESH_SKEW);
    }

    #[test]
    fn test_from_env_missing_secret() {
        let err = ProviderConfig::from_lookup(lookup(&[
            (ENV_BASE_URL, "https://auth.example.com"),
            (ENV_CLIENT_ID, "my-client"),
        ]))
        .unwrap_err();

        assert!(matches!(err, Error::Configuration(msg) if msg.contains(ENV_CLIENT_SECRET)));
    }

    #[test]
    fn test_validate_rejects_empty_client_id() {
        let config = ProviderConfig::builder()
            .token_endpoint("https://auth.example.com/connect/token".parse().unwrap())
            .client_id("  ")
            .client_secret("my-secret")
            .build();

        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_validate_rejects_non_http_endpoint() {
        let config = ProviderConfig::builder()
            .token_endpoint("ftp://auth.example.com/token".parse().unwrap())
            .client_id("my-client")
            .client_secret("my-secret")
            .build();

        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = ProviderConfig::builder()
            .token_endpoint("https://auth.example.com/connect/token".parse().unwrap())
            .client_id("my-client")
            .client_secret("super-secret-value")
            .build();

        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret-value"));
        assert!(debug.contains("my-client"));
    }
}
