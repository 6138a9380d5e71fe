mod bearer_token;
mod token_provider;

use std::{future::Future, sync::Arc};

pub use bearer_token::*;
use http::HeaderValue;
pub use token_provider::*;

/// Source of the `Authorization` header for outgoing requests.
pub trait Authorizer {
    /// Returns the authorization header to use for requests.
    ///
    /// # Errors
    /// Fails if a token is not available, for example because the refresh failed.
    fn authorization_header(
        &self,
    ) -> impl Future<Output = Result<Arc<HeaderValue>, crate::error::Error>> + Send;
}

/// Builds a sensitive `Bearer {token}` header value.
///
/// # Errors
/// Fails with `InvalidHeaderValue` if the token is not ASCII.
pub(crate) fn bearer_header(token: &str) -> Result<HeaderValue, crate::error::Error> {
    if !token.is_ascii() {
        return Err(crate::error::Error::InvalidHeaderValue);
    }
    let mut header = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|_e| crate::error::Error::InvalidHeaderValue)?;
    header.set_sensitive(true);
    Ok(header)
}
