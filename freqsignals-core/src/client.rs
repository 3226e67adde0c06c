//! Authenticated request layer with bounded retry.
//!
//! Only connection-establishment timeouts are retried. Non-2xx statuses,
//! other transport failures and malformed bodies surface to the caller on the
//! first attempt, since none of them is recoverable within a single tick.

use crate::auth::TokenManager;
use crate::clock::{Clock, SystemClock};
use crate::config::{ClientConfig, NumericEncoding};
use crate::error::{Result, SignalError};
use crate::transport::{HttpMethod, HttpRequest, ReqwestTransport, Transport, TransportError};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde_json::{Number, Value};
use std::sync::Arc;
use std::time::Duration;

/// Attempt budget and timing for one logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestPolicy {
    pub max_attempts: u32,
    pub timeout: Duration,
    pub retry_wait: Duration,
}

impl RequestPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            timeout: config.request_timeout(),
            retry_wait: config.retry_wait(),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Upper bound on how long a request under this policy can block.
    pub fn worst_case(&self) -> Duration {
        let n = self.max_attempts.max(1);
        self.timeout * n + self.retry_wait * (n - 1)
    }
}

/// HTTP client that attaches a bearer token to every attempt.
pub struct ResilientHttpClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    tokens: TokenManager,
}

impl ResilientHttpClient {
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>, clock: Arc<dyn Clock>) -> Self {
        let tokens = TokenManager::new(&config);
        Self {
            config,
            transport,
            clock,
            tokens,
        }
    }

    /// Production client: `reqwest` transport and the system clock.
    pub fn from_config(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let transport = ReqwestTransport::new(config.request_timeout())
            .map_err(|e| SignalError::Transport(e.to_string()))?;
        Ok(Self::new(config, Arc::new(transport), Arc::new(SystemClock)))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn tokens_mut(&mut self) -> &mut TokenManager {
        &mut self.tokens
    }

    pub fn default_policy(&self) -> RequestPolicy {
        RequestPolicy::from_config(&self.config)
    }

    pub fn get(&mut self, path: &str) -> Result<Value> {
        let policy = self.default_policy();
        self.request(path, HttpMethod::Get, None, &policy)
    }

    pub fn post(&mut self, path: &str, body: &Value) -> Result<Value> {
        let policy = self.default_policy();
        self.request(path, HttpMethod::Post, Some(body), &policy)
    }

    /// GET and decode the body into `T`.
    pub fn get_json<T: DeserializeOwned>(&mut self, path: &str) -> Result<T> {
        let value = self.get(path)?;
        serde_json::from_value(value)
            .map_err(|e| SignalError::Decode(format!("unexpected body from {path}: {e}")))
    }

    /// Execute one logical request under `policy`.
    ///
    /// Each attempt re-reads the token so one that expired during a retry
    /// wait is refreshed before the next send. Connect timeouts on the token
    /// grant count against the same attempt budget.
    pub fn request(
        &mut self,
        path: &str,
        method: HttpMethod,
        body: Option<&Value>,
        policy: &RequestPolicy,
    ) -> Result<Value> {
        if let HttpMethod::Other(m) = &method {
            return Err(SignalError::Usage(format!("bad method: {m}")));
        }
        if policy.max_attempts == 0 {
            return Err(SignalError::Usage("max_attempts must be at least 1".into()));
        }

        let url = self.config.full_url(path);
        let payload = match method {
            HttpMethod::Post => Some(normalize_numbers(
                body.cloned().unwrap_or(Value::Null),
                self.config.numeric_encoding,
            )),
            _ => None,
        };

        let mut remaining = policy.max_attempts;
        loop {
            remaining -= 1;

            // A grant that times out on connect spends one attempt like any
            // other connect timeout.
            let bearer = match self
                .tokens
                .token(self.transport.as_ref(), self.clock.as_ref())
            {
                Ok(token) => token.bearer(),
                Err(SignalError::Timeout { url: token_url, .. }) => {
                    warn!("token grant connect timeout (remaining_attempts={remaining})");
                    if remaining == 0 {
                        return Err(SignalError::Timeout {
                            url: token_url,
                            attempts: policy.max_attempts,
                        });
                    }
                    std::thread::sleep(policy.retry_wait);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let mut headers = vec![("Authorization".to_string(), bearer)];
            if payload.is_some() {
                headers.push(("Content-Type".to_string(), "application/json".to_string()));
            }

            let request = HttpRequest {
                method: method.clone(),
                url: url.clone(),
                headers,
                body: payload.clone(),
                timeout: policy.timeout,
            };

            match self.transport.execute(&request) {
                Ok(resp) => {
                    if !resp.is_success() {
                        warn!(
                            "{method} {path} returned status {} (remaining_attempts={remaining})",
                            resp.status
                        );
                        return Err(SignalError::Request {
                            status: resp.status,
                            body: resp.body,
                        });
                    }

                    let json = if resp.body.trim().is_empty() {
                        Value::Null
                    } else {
                        serde_json::from_str(&resp.body).map_err(|e| {
                            SignalError::Decode(format!("invalid JSON from {path}: {e}"))
                        })?
                    };
                    debug!(
                        "{method} {path} succeeded with status {} (remaining_attempts={remaining})",
                        resp.status
                    );
                    return Ok(json);
                }
                Err(TransportError::ConnectTimeout(msg)) => {
                    warn!("{method} {path} connect timeout: {msg} (remaining_attempts={remaining})");
                    if remaining == 0 {
                        return Err(SignalError::Timeout {
                            url,
                            attempts: policy.max_attempts,
                        });
                    }
                    std::thread::sleep(policy.retry_wait);
                }
                Err(TransportError::Other(msg)) => {
                    return Err(SignalError::Transport(msg));
                }
            }
        }
    }
}

/// Encode a float as a JSON value under `encoding`. Non-finite → `null`.
pub fn encode_f64(v: f64, encoding: NumericEncoding) -> Value {
    let v = match encoding {
        NumericEncoding::Plain => v,
        NumericEncoding::Rounded { decimals } => round_to(v, decimals),
    };
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

fn round_to(v: f64, decimals: u32) -> f64 {
    let scale = 10f64.powi(decimals as i32);
    (v * scale).round() / scale
}

/// Apply `encoding` to every float in a JSON tree. Integers are untouched.
pub fn normalize_numbers(value: Value, encoding: NumericEncoding) -> Value {
    match value {
        Value::Number(n) if n.is_f64() => match n.as_f64() {
            Some(f) => encode_f64(f, encoding),
            None => Value::Number(n),
        },
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| normalize_numbers(v, encoding))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, normalize_numbers(v, encoding)))
                .collect(),
        ),
        other => other,
    }
}
