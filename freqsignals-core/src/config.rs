//! Client configuration.
//!
//! Sources, lowest to highest precedence: built-in defaults, an optional TOML
//! file, then `FREQSIGNALS_*` environment variables.

use crate::error::{Result, SignalError};
use crate::store::RetentionPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "api.freqsignals.com";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;
pub const DEFAULT_RETRY_WAIT_MS: u64 = 1_000;
pub const DEFAULT_TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;
pub const MAX_TOKEN_EXPIRY_MARGIN_SECS: i64 = 86_400;
pub const DEFAULT_HISTORY_PAGE_LIMIT: usize = 1_000;

/// How floats in outgoing JSON bodies are encoded.
///
/// Non-finite values are always sent as `null` since JSON has no NaN.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NumericEncoding {
    /// Send floats as-is.
    #[default]
    Plain,
    /// Round every float to a fixed number of decimals before sending.
    Rounded { decimals: u32 },
}

/// Everything needed to talk to the signal API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub https: bool,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,

    /// Dataset used by the publisher when a signal names none.
    pub default_data_set_id: Option<String>,

    pub request_timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_wait_ms: u64,

    /// Subtracted from the grant's `expires_in` so a token is never used
    /// right at the edge of its server-side lifetime.
    pub token_expiry_margin_secs: i64,

    pub token_path: String,
    pub signals_path: String,
    pub history_path: String,
    pub publish_path: String,

    pub history_page_limit: usize,
    pub numeric_encoding: NumericEncoding,

    /// Restrict live polling to these datasets (empty = all).
    pub data_set_ids: Vec<String>,

    /// Dataset id → series column name.
    pub data_set_names: HashMap<String, String>,

    pub retention: RetentionPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            https: true,
            client_id: None,
            client_secret: None,
            default_data_set_id: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_wait_ms: DEFAULT_RETRY_WAIT_MS,
            token_expiry_margin_secs: DEFAULT_TOKEN_EXPIRY_MARGIN_SECS,
            token_path: "/oa2/token/".to_string(),
            signals_path: "/api/crud/signals/".to_string(),
            history_path: "/api/crud/signal_history/".to_string(),
            publish_path: "/api/async/signals/".to_string(),
            history_page_limit: DEFAULT_HISTORY_PAGE_LIMIT,
            numeric_encoding: NumericEncoding::Plain,
            data_set_ids: Vec::new(),
            data_set_names: HashMap::new(),
            retention: RetentionPolicy::Unbounded,
        }
    }
}

impl ClientConfig {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_with(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a TOML file, then overlay the process environment.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| SignalError::Config(format!("read {}: {e}", path.display())))?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env_with(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| SignalError::Config(format!("parse toml: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `FREQSIGNALS_*` variables using the given lookup.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("FREQSIGNALS_HOST") {
            self.host = host;
        }
        if let Some(https) = lookup("FREQSIGNALS_HTTPS") {
            self.https = https.trim() != "0";
        }
        if let Some(id) = lookup("FREQSIGNALS_CLIENT_ID") {
            self.client_id = Some(id);
        }
        if let Some(secret) = lookup("FREQSIGNALS_CLIENT_SECRET") {
            self.client_secret = Some(secret);
        }
        if let Some(ds) = lookup("FREQSIGNALS_DATA_SET_ID") {
            self.default_data_set_id = Some(ds);
        }
        if let Some(v) = lookup("FREQSIGNALS_REQUEST_TIMEOUT") {
            self.request_timeout_secs = parse_env("FREQSIGNALS_REQUEST_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("FREQSIGNALS_REQUEST_MAX_ATTEMPTS") {
            self.max_attempts = parse_env("FREQSIGNALS_REQUEST_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("FREQSIGNALS_REQUEST_WAIT_INTERVAL_MS") {
            self.retry_wait_ms = parse_env("FREQSIGNALS_REQUEST_WAIT_INTERVAL_MS", &v)?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(SignalError::Config("host must not be empty".into()));
        }
        if self.max_attempts == 0 {
            return Err(SignalError::Config("max_attempts must be at least 1".into()));
        }
        if !(0..=MAX_TOKEN_EXPIRY_MARGIN_SECS).contains(&self.token_expiry_margin_secs) {
            return Err(SignalError::Config(format!(
                "token_expiry_margin_secs must be between 0 and {MAX_TOKEN_EXPIRY_MARGIN_SECS}"
            )));
        }
        if self.history_page_limit == 0 {
            return Err(SignalError::Config(
                "history_page_limit must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// `http[s]://host`
    pub fn base_url(&self) -> String {
        let scheme = if self.https { "https" } else { "http" };
        format!("{scheme}://{}", self.host)
    }

    pub fn full_url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_wait(&self) -> Duration {
        Duration::from_millis(self.retry_wait_ms)
    }

    /// Column name for a dataset: mapped name if configured, else the id.
    pub fn column_for(&self, data_set_id: &str) -> String {
        self.data_set_names
            .get(data_set_id)
            .cloned()
            .unwrap_or_else(|| data_set_id.to_string())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| SignalError::Config(format!("{key}={value:?}: {e}")))
}
