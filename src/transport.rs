//! Delivery of payloads to the collection endpoint.
use std::{future::Future, sync::Arc, time::Duration};

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use url::Url;

use crate::{Error, Result, TrackConfig};

/// A serialized payload ready to be posted.
#[derive(Debug, Clone)]
pub struct Request {
    /// Collection endpoint.
    pub url: Url,
    /// JSON-encoded payload.
    pub body: Vec<u8>,
    /// Bearer token, if configured.
    pub auth_token: Option<String>,
}

/// Sends a [`Request`] and classifies the outcome.
///
/// Implementations must return `Ok(())` only for a 2xx response,
/// [`Error::UnexpectedStatus`] for any other response, and [`Error::TransportFailure`] when no
/// response was received. They must not retry.
pub trait Transport: Send + Sync {
    /// POST `request` and report the outcome.
    fn post(&self, request: Request) -> impl Future<Output = Result<()>> + Send;
}

/// [`Transport`] over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpTransport {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport whose requests fail after `timeout`.
    pub fn new(timeout: Duration) -> Result<HttpTransport> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("jentis-rust/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| Error::TransportFailure(Arc::new(err)))?;
        Ok(HttpTransport { client })
    }
}

impl Transport for HttpTransport {
    async fn post(&self, request: Request) -> Result<()> {
        let mut builder = self
            .client
            .post(request.url)
            .header(CONTENT_TYPE, "application/json")
            .body(request.body);
        if let Some(token) = request.auth_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|err| {
            log::warn!(target: "jentis", timeout = err.is_timeout(); "request failed: {err}");
            Error::from(err)
        })?;

        let status = response.status();
        if !status.is_success() {
            log::warn!(target: "jentis", status = status.as_u16(); "received non-2xx response");
            return Err(Error::UnexpectedStatus(status));
        }

        log::debug!(target: "jentis", status = status.as_u16(); "payload delivered");
        Ok(())
    }
}

/// Encodes payloads and hands them to a [`Transport`].
pub struct TransportClient<T> {
    transport: T,
}

impl<T: Transport> TransportClient<T> {
    pub fn new(transport: T) -> TransportClient<T> {
        TransportClient { transport }
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// POST `payload` as JSON to `{scheme}://{track_domain}/`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidEndpoint`] if the endpoint URL cannot be built from `config`.
    /// - [`Error::EncodingFailure`] if `payload` cannot be serialized.
    /// - [`Error::TransportFailure`] or [`Error::UnexpectedStatus`] as reported by the transport.
    pub async fn send<P: Serialize>(&self, config: &TrackConfig, payload: &P) -> Result<()> {
        let url = endpoint(config)?;
        let body = serde_json::to_vec(payload)?;

        log::debug!(target: "jentis", url = url.as_str(), bytes = body.len(); "sending payload");
        self.transport
            .post(Request {
                url,
                body,
                auth_token: config.auth_token.clone(),
            })
            .await
    }
}

/// Collection endpoint of `config`.
pub fn endpoint(config: &TrackConfig) -> Result<Url> {
    let url = Url::parse(&format!("{}://{}/", config.scheme, config.track_domain))
        .map_err(Error::InvalidEndpoint)?;
    if url.cannot_be_a_base() || url.host_str().map_or(true, str::is_empty) {
        return Err(Error::InvalidEndpoint(url::ParseError::EmptyHost));
    }
    Ok(url)
}
