use std::sync::Arc;

use reqwest::StatusCode;

/// Represents a result type for operations in the JENTIS SDK.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur in the JENTIS SDK.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// No tracking configuration is active. Call [`Client::configure`](crate::Client::configure)
    /// first.
    #[error("tracking is not configured")]
    NotConfigured,

    /// The collection endpoint built from `scheme` and `track_domain` is not a valid URL.
    #[error("invalid tracking endpoint")]
    InvalidEndpoint(#[source] url::ParseError),

    /// The payload could not be serialized. This indicates a bug in the SDK.
    #[error("failed to encode payload")]
    EncodingFailure(#[source] Arc<serde_json::Error>),

    /// Network-level failure (connection refused, timeout, etc.).
    #[error("transport failure")]
    TransportFailure(#[source] Arc<dyn std::error::Error + Send + Sync>),

    /// The endpoint responded with a non-2xx status.
    #[error("unexpected response status: {0}")]
    UnexpectedStatus(StatusCode),

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::EncodingFailure(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        match value.status() {
            Some(status) => Error::UnexpectedStatus(status),
            None => Error::TransportFailure(Arc::new(value.without_url())),
        }
    }
}
