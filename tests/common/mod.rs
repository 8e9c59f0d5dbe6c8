//! Scripted transport and fixtures shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};

use contribnote::config::RateLimitConfig;
use contribnote::dispatch::executor::RequestExecutor;
use contribnote::dispatch::responses::ResponsesApi;
use contribnote::dispatch::transport::{Method, Transport, TransportError, WireRequest, WireResponse};

pub const MODEL: &str = "gpt-5.2-2025-12-11";

#[derive(Debug, Clone)]
pub struct Reply {
    pub delay: Duration,
    pub result: Result<WireResponse, TransportError>,
}

impl Reply {
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

pub fn status(code: u16, body: &str) -> Reply {
    Reply {
        delay: Duration::ZERO,
        result: Ok(WireResponse {
            status: code,
            retry_after: None,
            body: body.as_bytes().to_vec(),
        }),
    }
}

pub fn json_reply(body: Value) -> Reply {
    status(200, &body.to_string())
}

pub fn rate_limited(retry_after: Option<&str>) -> Reply {
    Reply {
        delay: Duration::ZERO,
        result: Ok(WireResponse {
            status: 429,
            retry_after: retry_after.map(str::to_string),
            body: br#"{"error":{"message":"Rate limit reached"}}"#.to_vec(),
        }),
    }
}

pub fn timeout() -> Reply {
    Reply {
        delay: Duration::ZERO,
        result: Err(TransportError::Timeout),
    }
}

pub fn network(msg: &str) -> Reply {
    Reply {
        delay: Duration::ZERO,
        result: Err(TransportError::Network(msg.to_string())),
    }
}

pub fn too_large(size: usize) -> Reply {
    Reply {
        delay: Duration::ZERO,
        result: Err(TransportError::TooLarge(size)),
    }
}

/// A completed Responses API payload whose text cites every url in order.
pub fn completed(text: &str, urls: &[&str]) -> Value {
    let annotations: Vec<Value> = urls
        .iter()
        .enumerate()
        .map(|(i, url)| {
            json!({"type": "url_citation", "url": url, "title": "", "start_index": i})
        })
        .collect();
    json!({
        "id": "resp_done",
        "status": "completed",
        "output": [
            {"type": "web_search_call", "status": "completed"},
            {"type": "message", "content": [
                {"type": "output_text", "text": text, "annotations": annotations}
            ]}
        ]
    })
}

pub fn pending(id: &str, state: &str) -> Value {
    json!({"id": id, "status": state})
}

/// User prompt of a submit request.
pub fn prompt_of(req: &WireRequest) -> String {
    req.body
        .as_ref()
        .and_then(|b| b["input"][1]["content"].as_str())
        .unwrap_or_default()
        .to_string()
}

type Handler = Box<dyn Fn(&WireRequest) -> Reply + Send + Sync>;

/// Counts calls and tracks concurrency; replies come from a handler.
pub struct StubTransport {
    handler: Handler,
    pub submits: AtomicUsize,
    pub polls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub requests: Mutex<Vec<WireRequest>>,
}

impl StubTransport {
    pub fn with_handler(handler: impl Fn(&WireRequest) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            submits: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Replies in order; calls past the end get a network error.
    pub fn scripted(replies: Vec<Reply>) -> Arc<Self> {
        let queue = Mutex::new(VecDeque::from(replies));
        Self::with_handler(move |_| {
            queue
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| network("script exhausted"))
        })
    }

    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn submitted_bodies(&self) -> Vec<Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| r.body.clone())
            .collect()
    }
}

impl Transport for StubTransport {
    async fn send(&self, req: WireRequest) -> Result<WireResponse, TransportError> {
        match req.method {
            Method::Post => self.submits.fetch_add(1, Ordering::SeqCst),
            Method::Get => self.polls.fetch_add(1, Ordering::SeqCst),
        };
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let reply = (self.handler)(&req);
        self.requests.lock().unwrap().push(req);
        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        reply.result
    }
}

/// Deterministic limits: no jitter, 1s initial backoff, 2s poll interval.
pub fn test_limits() -> RateLimitConfig {
    RateLimitConfig {
        jitter_factor: 0.0,
        ..RateLimitConfig::default()
    }
}

pub fn executor(transport: Arc<StubTransport>) -> RequestExecutor<Arc<StubTransport>> {
    executor_for(transport, MODEL)
}

pub fn executor_for(transport: Arc<StubTransport>, model: &str) -> RequestExecutor<Arc<StubTransport>> {
    let api = ResponsesApi::new("https://api.test/v1", "sk-test", model, "Be factual.");
    RequestExecutor::new(transport, api, &test_limits())
}
