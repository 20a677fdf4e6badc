use crate::config::RemoteConfig;
use crate::{BoxStream, Error, ErrorContext, Result};
use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::Proxy;
use std::time::Duration;

/// Thin reqwest wrapper shared by the remote engine.
///
/// Only knows how to POST a JSON body with bearer auth. Status interpretation is
/// left to the caller.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(8)
            .pool_idle_timeout(Some(Duration::from_secs(90)));

        if let Some(proxy_url) = config.proxy_url.as_deref() {
            let proxy = Proxy::all(proxy_url).map_err(|e| {
                Error::configuration_with_context(
                    format!("invalid proxy url: {}", e),
                    ErrorContext::new()
                        .with_field_path("remote.proxy_url")
                        .with_source("http_transport"),
                )
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))?;

        Ok(Self { client })
    }

    /// POST `body` to `url`. When `sse` is set the server is asked for an event stream.
    ///
    /// Non-2xx responses are returned as-is; only failures to get a response at all are errors.
    pub async fn post_json(
        &self,
        url: &str,
        credential: &str,
        body: &serde_json::Value,
        sse: bool,
        request_id: &str,
    ) -> Result<reqwest::Response> {
        let mut req = self
            .client
            .post(url)
            .bearer_auth(credential)
            .json(body)
            .header("x-request-id", request_id);

        if sse {
            req = req
                .header("X-DashScope-SSE", "enable")
                .header("accept", "text/event-stream");
        }

        req.send()
            .await
            .map_err(|e| Error::Transport(TransportError::Http(e)))
    }

    /// Convert a response body into the crate's unified byte stream.
    pub fn body_stream(resp: reqwest::Response) -> BoxStream<'static, Bytes> {
        Box::pin(
            resp.bytes_stream()
                .map_err(|e| Error::Transport(TransportError::Http(e))),
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Other(String),
}
