//! Signal domain types and their wire shapes.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Scalar value carried in a signal's context or a series cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    /// Nested objects and arrays, kept as-is.
    Json(Value),
}

impl Scalar {
    /// Numeric view: numbers as-is, booleans as 1/0.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Number(n) => Some(*n),
            Scalar::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => Ok(()),
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Number(n) => write!(f, "{n}"),
            Scalar::Text(s) => write!(f, "{s}"),
            Scalar::Json(v) => write!(f, "{v}"),
        }
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Number(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Number(v as f64)
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Text(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Text(v)
    }
}

pub type Context = BTreeMap<String, Scalar>;

/// Natural key of a signal. The store holds at most one signal per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignalKey {
    pub symbol: String,
    pub data_set_id: String,
    pub updated_at: DateTime<Utc>,
}

/// Half-open validity interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ValidityWindow {
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t < self.end
    }

    /// True if the window closed at or before `t`.
    pub fn ended_by(&self, t: DateTime<Utc>) -> bool {
        self.end <= t
    }
}

/// One published fact about a symbol.
///
/// Serialized in the signals-list wire shape (`updated_date`, `ttl_minutes`,
/// `data_set_id`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub data_set_id: String,
    pub value: f64,
    pub ttl_minutes: u32,
    #[serde(
        rename = "updated_date",
        alias = "updated_at",
        deserialize_with = "deserialize_timestamp"
    )]
    pub updated_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "deserialize_context")]
    pub context: Context,
}

impl Signal {
    pub fn new(
        symbol: impl Into<String>,
        data_set_id: impl Into<String>,
        value: f64,
        ttl_minutes: u32,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            data_set_id: data_set_id.into(),
            value,
            ttl_minutes,
            updated_at,
            context: Context::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn key(&self) -> SignalKey {
        SignalKey {
            symbol: self.symbol.clone(),
            data_set_id: self.data_set_id.clone(),
            updated_at: self.updated_at,
        }
    }

    pub fn window(&self) -> ValidityWindow {
        ValidityWindow {
            start: self.updated_at,
            end: self.updated_at + Duration::minutes(i64::from(self.ttl_minutes)),
        }
    }
}

/// Compact record from the signal-history endpoint.
///
/// Symbol and dataset are implied by the query, so only time, TTL, value and
/// context travel on the wire.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HistoricalRecord {
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub t: DateTime<Utc>,
    pub l: u32,
    pub v: f64,
    #[serde(default, deserialize_with = "deserialize_context")]
    pub c: Context,
}

impl HistoricalRecord {
    /// Expand into the canonical signal shape for the pair it was loaded for.
    pub fn into_signal(self, symbol: &str, data_set_id: &str) -> Signal {
        Signal {
            symbol: symbol.to_string(),
            data_set_id: data_set_id.to_string(),
            value: self.v,
            ttl_minutes: self.l,
            updated_at: self.t,
            context: self.c,
        }
    }
}

/// `{count, results}` envelope shared by list endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
}

// ── Deserialization helpers ─────────────────────────────────────────

/// Parse an ISO-8601 timestamp. Offset-less values are taken as UTC.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc());
        }
    }
    Err(format!("unrecognised timestamp: {s:?}"))
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    parse_timestamp(&s).map_err(serde::de::Error::custom)
}

fn deserialize_context<'de, D>(deserializer: D) -> Result<Context, D::Error>
where
    D: Deserializer<'de>,
{
    let ctx: Option<Context> = Deserialize::deserialize(deserializer)?;
    Ok(ctx.unwrap_or_default())
}
