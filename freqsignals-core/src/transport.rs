//! HTTP transport trait and implementations.
//!
//! The Transport trait abstracts over the wire so the request layer can be
//! driven by `reqwest` in production and by a scripted transport in tests
//! and offline replays. Transports only move bytes; status classification
//! and retry belong to [`crate::client::ResilientHttpClient`].

use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

/// HTTP verb requested by a caller.
///
/// Only GET and POST are spoken by the API. Anything else is carried through
/// so the request layer can reject it with a usage error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Other(String),
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
            HttpMethod::Other(m) => write!(f, "{m}"),
        }
    }
}

/// A fully-resolved outgoing request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Raw response: status plus body text.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn json(status: u16, body: &Value) -> Self {
        Self {
            status,
            body: body.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport-level failures, before any HTTP status exists.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    /// Timed out while establishing the connection. The only retryable case.
    #[error("connect timeout: {0}")]
    ConnectTimeout(String),

    #[error("{0}")]
    Other(String),
}

/// Executes one HTTP exchange.
pub trait Transport: Send + Sync {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

// ── reqwest ──────────────────────────────────────────────────────────

/// Production transport on `reqwest::blocking`.
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    /// Build a transport whose connection phase is bounded by `connect_timeout`.
    pub fn new(connect_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("freqsignals-rs/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    fn classify(e: reqwest::Error) -> TransportError {
        if e.is_connect() && e.is_timeout() {
            TransportError::ConnectTimeout(e.to_string())
        } else {
            TransportError::Other(e.to_string())
        }
    }
}

impl Transport for ReqwestTransport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = match &request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
            HttpMethod::Other(m) => {
                return Err(TransportError::Other(format!("unsupported method: {m}")))
            }
        };

        builder = builder.timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let resp = builder.send().map_err(Self::classify)?;
        let status = resp.status().as_u16();
        let body = resp.text().map_err(Self::classify)?;
        Ok(HttpResponse { status, body })
    }
}

// ── Scripted ─────────────────────────────────────────────────────────

/// Replays canned responses and records every request it sees.
///
/// Requests whose URL contains a registered route fragment always get that
/// route's response (useful for the token endpoint). Everything else is
/// served from a FIFO queue.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    routes: Mutex<Vec<(String, HttpResponse)>>,
    queue: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    log: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `response` for every request whose URL contains `fragment`.
    pub fn route(self, fragment: &str, response: HttpResponse) -> Self {
        lock(&self.routes).push((fragment.to_string(), response));
        self
    }

    pub fn push_json(&self, status: u16, body: Value) {
        self.push(Ok(HttpResponse::json(status, &body)));
    }

    pub fn push_error(&self, err: TransportError) {
        self.push(Err(err));
    }

    pub fn push(&self, outcome: Result<HttpResponse, TransportError>) {
        lock(&self.queue).push_back(outcome);
    }

    /// Every request executed so far, in order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.log).clone()
    }

    /// Number of requests whose URL contains `fragment`.
    pub fn count(&self, fragment: &str) -> usize {
        lock(&self.log)
            .iter()
            .filter(|r| r.url.contains(fragment))
            .count()
    }

    pub fn remaining(&self) -> usize {
        lock(&self.queue).len()
    }
}

impl Transport for ScriptedTransport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        lock(&self.log).push(request.clone());

        if let Some((_, resp)) = lock(&self.routes)
            .iter()
            .find(|(fragment, _)| request.url.contains(fragment.as_str()))
        {
            return Ok(resp.clone());
        }

        lock(&self.queue).pop_front().unwrap_or_else(|| {
            Err(TransportError::Other(format!(
                "no scripted response for {} {}",
                request.method, request.url
            )))
        })
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn get(url: &str) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            url: url.to_string(),
            headers: vec![("Authorization".into(), "Bearer t".into())],
            body: None,
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn scripted_serves_queue_in_order() {
        let t = ScriptedTransport::new();
        t.push_json(200, json!({"n": 1}));
        t.push_error(TransportError::ConnectTimeout("slow".into()));

        assert_eq!(t.execute(&get("http://h/a")).unwrap().body, r#"{"n":1}"#);
        assert_eq!(
            t.execute(&get("http://h/b")),
            Err(TransportError::ConnectTimeout("slow".into()))
        );
        assert!(t.execute(&get("http://h/c")).is_err());
        assert_eq!(t.requests().len(), 3);
    }

    #[test]
    fn routes_take_precedence_and_do_not_drain() {
        let t = ScriptedTransport::new().route("/oa2/token/", HttpResponse::json(200, &json!({})));
        t.push_json(200, json!([]));

        t.execute(&get("http://h/oa2/token/")).unwrap();
        t.execute(&get("http://h/oa2/token/")).unwrap();
        assert_eq!(t.remaining(), 1);
        assert_eq!(t.count("/oa2/token/"), 2);
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let r = get("http://h/");
        assert_eq!(r.header("authorization"), Some("Bearer t"));
        assert_eq!(r.header("content-type"), None);
    }

    #[test]
    fn success_range_is_half_open() {
        assert!(HttpResponse::json(200, &json!(null)).is_success());
        assert!(HttpResponse::json(299, &json!(null)).is_success());
        assert!(!HttpResponse::json(300, &json!(null)).is_success());
        assert!(!HttpResponse::json(199, &json!(null)).is_success());
    }
}
