use std::sync::Arc;

use http::StatusCode;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error, Clone)]
pub enum Error {
    #[error("Token cannot be used as a header value. Must be ASCII.")]
    InvalidHeaderValue,
    #[error("Invalid configuration: {0}")]
    Configuration(String),
    #[error("Authentication unavailable: {0}")]
    Authentication(#[from] AuthenticationError),
    #[error("Request failed: {0}")]
    ReqwestFailed(#[from] Arc<reqwest::Error>),
}

impl Error {
    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }
}

/// A token refresh failed.
///
/// Cloned and handed to every caller that waited on the same refresh.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    #[error("Token endpoint responded with status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("Request to fetch token failed: {0}")]
    Request(String),
    #[error("Failed to parse token response: {reason}")]
    Parse { reason: String, body: String },
    #[error("Token endpoint rejected the grant: {0}")]
    Rejected(String),
    #[error("Token refresh was aborted before it completed")]
    RefreshAborted,
}

impl AuthenticationError {
    /// HTTP status returned by the token endpoint, if it answered at all.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Raw response body, if one was received.
    #[must_use]
    pub fn body(&self) -> Option<&str> {
        match self {
            Self::Status { body, .. } | Self::Parse { body, .. } => Some(body),
            _ => None,
        }
    }
}
