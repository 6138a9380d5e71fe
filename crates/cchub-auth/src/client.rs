use std::sync::Arc;

use http::{HeaderValue, header::AUTHORIZATION};
use reqwest::IntoUrl;

use crate::{Authorizer, error::Result};

/// Wrapper around `reqwest::Client` that adds the authorization header obtained
/// from an `Authorizer` to every request.
///
/// If no token can be obtained, no request is sent and the authentication error
/// is returned instead.
#[derive(Debug, Clone)]
pub struct HttpClient<A: Authorizer> {
    authorizer: A,
    client: reqwest::Client,
}

impl<A: Authorizer> HttpClient<A> {
    /// Creates a new `HttpClient` with the given `Authorizer`.
    pub fn new(authorizer: A) -> Self {
        Self {
            authorizer,
            client: reqwest::Client::new(),
        }
    }

    /// Set a custom `reqwest::Client`.
    #[must_use]
    pub fn set_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Obtain the authorization header for the next request.
    ///
    /// # Errors
    /// Returns an error if the authorizer fails to provide a token, typically because
    /// the token refresh failed.
    pub async fn authorization_header(&self) -> Result<Arc<HeaderValue>> {
        self.authorizer.authorization_header().await
    }

    /// Start building a `Request`, adding the authorization header.
    ///
    /// # Errors
    /// Returns an error if the authorizer fails to provide a token, typically because
    /// the token refresh failed.
    pub async fn request<U: IntoUrl>(
        &self,
        method: reqwest::Method,
        url: U,
    ) -> Result<reqwest::RequestBuilder> {
        let header = self.authorization_header().await?;
        let request = self
            .client
            .request(method, url)
            .header(AUTHORIZATION, Arc::unwrap_or_clone(header));
        Ok(request)
    }

    /// Execute a `Request`, adding the authorization header if it is not already set.
    ///
    /// # Errors
    /// - Returns an error if the authorizer fails to provide a token, typically because the token refresh failed.
    /// - Returns an error if the request fails.
    pub async fn execute(&self, mut request: reqwest::Request) -> Result<reqwest::Response> {
        if !request.headers().contains_key(AUTHORIZATION) {
            let header = self.authorization_header().await?;
            request
                .headers_mut()
                .insert(AUTHORIZATION, Arc::unwrap_or_clone(header));
        }
        self.client
            .execute(request)
            .await
            .map_err(Arc::new)
            .map_err(Into::into)
    }

    /// Convenience method to make a `GET` request to a URL.
    ///
    /// # Errors
    /// See [`request`](Self::request).
    pub async fn get<U: IntoUrl>(&self, url: U) -> Result<reqwest::RequestBuilder> {
        self.request(reqwest::Method::GET, url).await
    }

    /// Convenience method to make a `POST` request to a URL.
    ///
    /// # Errors
    /// See [`request`](Self::request).
    pub async fn post<U: IntoUrl>(&self, url: U) -> Result<reqwest::RequestBuilder> {
        self.request(reqwest::Method::POST, url).await
    }

    /// Convenience method to make a `PUT` request to a URL.
    ///
    /// # Errors
    /// See [`request`](Self::request).
    pub async fn put<U: IntoUrl>(&self, url: U) -> Result<reqwest::RequestBuilder> {
        self.request(reqwest::Method::PUT, url).await
    }

    /// Convenience method to make a `PATCH` request to a URL.
    ///
    /// # Errors
    /// See [`request`](Self::request).
    pub async fn patch<U: IntoUrl>(&self, url: U) -> Result<reqwest::RequestBuilder> {
        self.request(reqwest::Method::PATCH, url).await
    }

    /// Convenience method to make a `DELETE` request to a URL.
    ///
    /// # Errors
    /// See [`request`](Self::request).
    pub async fn delete<U: IntoUrl>(&self, url: U) -> Result<reqwest::RequestBuilder> {
        self.request(reqwest::Method::DELETE, url).await
    }

    /// Convenience method to make a `HEAD` request to a URL.
    ///
    /// # Errors
    /// See [`request`](Self::request).
    pub async fn head<U: IntoUrl>(&self, url: U) -> Result<reqwest::RequestBuilder> {
        self.request(reqwest::Method::HEAD, url).await
    }
}
