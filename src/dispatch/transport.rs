use std::future::Future;
use std::time::Duration;

use reqwest::Client;

use crate::error::CommentaryError;

/// Max response body size (4MB; web-search responses carry long annotation lists).
pub const MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A fully built HTTP request.
#[derive(Debug, Clone)]
pub struct WireRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub timeout: Duration,
}

/// Status, the one header the executor cares about, and the raw body.
#[derive(Debug, Clone)]
pub struct WireResponse {
    pub status: u16,
    pub retry_after: Option<String>,
    pub body: Vec<u8>,
}

impl WireResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request exceeded its timeout. The server may still be working on it.
    Timeout,
    /// Connection, TLS or body-read failure.
    Network(String),
    /// The server answered, but the body exceeded `MAX_RESPONSE_BYTES`.
    TooLarge(usize),
}

/// Sends one HTTP request. Implemented by reqwest in production and by
/// scripted stubs in tests.
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        req: WireRequest,
    ) -> impl Future<Output = Result<WireResponse, TransportError>> + Send;
}

impl TransportError {
    /// Message for a `TooLarge` body; a terminal failure, never retried.
    pub fn too_large_message(size: usize) -> String {
        format!("response too large: {size} bytes (max {MAX_RESPONSE_BYTES})")
    }
}

impl<T: Transport> Transport for std::sync::Arc<T> {
    fn send(
        &self,
        req: WireRequest,
    ) -> impl Future<Output = Result<WireResponse, TransportError>> + Send {
        (**self).send(req)
    }
}

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, CommentaryError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| CommentaryError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    fn classify(e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Network(e.to_string())
        }
    }
}

impl Transport for ReqwestTransport {
    async fn send(&self, req: WireRequest) -> Result<WireResponse, TransportError> {
        let mut builder = match req.method {
            Method::Get => self.client.get(&req.url),
            Method::Post => self.client.post(&req.url),
        };
        for (k, v) in &req.headers {
            builder = builder.header(k, v);
        }
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }

        let response = builder
            .timeout(req.timeout)
            .send()
            .await
            .map_err(Self::classify)?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string());

        let bytes = response.bytes().await.map_err(Self::classify)?;
        if bytes.len() > MAX_RESPONSE_BYTES {
            return Err(TransportError::TooLarge(bytes.len()));
        }

        Ok(WireResponse {
            status,
            retry_after,
            body: bytes.to_vec(),
        })
    }
}
