//! Publishing newly computed signals.
//!
//! Delivery is at-most-once: a post that fails after its attempt budget is
//! dropped. Callers that need more must retry the call themselves.

use crate::client::{encode_f64, ResilientHttpClient};
use crate::config::NumericEncoding;
use crate::error::{Result, SignalError};
use crate::signal::{Context, Scalar};
use crate::transport::HttpMethod;
use log::info;
use serde_json::{Map, Value};

/// A signal about to be published.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSignal {
    pub symbol: String,
    pub value: f64,
    pub ttl_minutes: u32,
    /// Falls back to the configured default dataset when absent.
    pub data_set_id: Option<String>,
    /// Extra fields sent alongside the required ones.
    pub context: Context,
}

impl NewSignal {
    pub fn new(symbol: impl Into<String>, value: f64, ttl_minutes: u32) -> Self {
        Self {
            symbol: symbol.into(),
            value,
            ttl_minutes,
            data_set_id: None,
            context: Context::new(),
        }
    }

    pub fn data_set(mut self, id: impl Into<String>) -> Self {
        self.data_set_id = Some(id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Flat publish body. Context keys never shadow the required fields.
    pub fn to_body(&self, data_set_id: &str, encoding: NumericEncoding) -> Value {
        let mut body = Map::new();
        for (key, value) in &self.context {
            body.insert(key.clone(), scalar_to_json(value, encoding));
        }
        body.insert("symbol".into(), Value::String(self.symbol.clone()));
        body.insert("value".into(), encode_f64(self.value, encoding));
        body.insert("ttl_minutes".into(), Value::from(self.ttl_minutes));
        body.insert("data_set_id".into(), Value::String(data_set_id.to_string()));
        Value::Object(body)
    }
}

fn scalar_to_json(value: &Scalar, encoding: NumericEncoding) -> Value {
    match value {
        Scalar::Null => Value::Null,
        Scalar::Bool(b) => Value::Bool(*b),
        Scalar::Number(n) => encode_f64(*n, encoding),
        Scalar::Text(s) => Value::String(s.clone()),
        Scalar::Json(v) => v.clone(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalPublisher {
    max_attempts: u32,
}

impl Default for SignalPublisher {
    fn default() -> Self {
        Self { max_attempts: 1 }
    }
}

impl SignalPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// POST `signal` to the publish endpoint and return the ack body.
    pub fn publish(&self, client: &mut ResilientHttpClient, signal: &NewSignal) -> Result<Value> {
        let data_set_id = signal
            .data_set_id
            .clone()
            .or_else(|| client.config().default_data_set_id.clone())
            .ok_or_else(|| {
                SignalError::Usage(format!(
                    "no dataset given for {} and no default configured",
                    signal.symbol
                ))
            })?;

        let body = signal.to_body(&data_set_id, client.config().numeric_encoding);
        let path = client.config().publish_path.clone();
        let policy = client.default_policy().with_max_attempts(self.max_attempts);

        let ack = client.request(&path, HttpMethod::Post, Some(&body), &policy)?;
        info!(
            "published signal for {} in {data_set_id}: value={}",
            signal.symbol, signal.value
        );
        Ok(ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn body_flattens_context_with_required_fields() {
        let s = NewSignal::new("BTC/USD", 0.05, 60)
            .with_context("rsi", 61.23)
            .with_context("overbought", false)
            .with_context("value", "shadowed");
        let body = s.to_body("ds1", NumericEncoding::Plain);
        assert_eq!(
            body,
            json!({
                "symbol": "BTC/USD",
                "value": 0.05,
                "ttl_minutes": 60,
                "data_set_id": "ds1",
                "rsi": 61.23,
                "overbought": false,
            })
        );
    }

    #[test]
    fn body_rounds_when_configured() {
        let s = NewSignal::new("SPY", 1.234567, 5).with_context("price", 412.987654);
        let body = s.to_body("d", NumericEncoding::Rounded { decimals: 4 });
        assert_eq!(body["value"], json!(1.2346));
        assert_eq!(body["price"], json!(412.9877));
    }

    #[test]
    fn nested_context_passes_through() {
        let s = NewSignal::new("SPY", 1.0, 5)
            .with_context("levels", Scalar::Json(json!({"lo": 1, "hi": [2, 3]})));
        let body = s.to_body("d", NumericEncoding::Plain);
        assert_eq!(body["levels"], json!({"lo": 1, "hi": [2, 3]}));
    }

    #[test]
    fn nan_value_becomes_null() {
        let body = NewSignal::new("SPY", f64::NAN, 5).to_body("d", NumericEncoding::Plain);
        assert_eq!(body["value"], Value::Null);
    }

    #[test]
    fn default_attempt_budget_is_one() {
        assert_eq!(SignalPublisher::new().max_attempts(), 1);
        assert_eq!(SignalPublisher::new().with_max_attempts(3).max_attempts(), 3);
    }
}
