//! OAuth2 client-credentials token management.
//!
//! A single bearer token is cached per client. It is considered stale once
//! the clock reaches `expires_at`, which already has the configured safety
//! margin subtracted, and is then re-granted lazily on the next call.

use crate::clock::Clock;
use crate::config::ClientConfig;
use crate::error::{Result, SignalError};
use crate::transport::{HttpMethod, HttpRequest, Transport, TransportError};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use serde::Deserialize;
use serde_json::{json, Value};

/// Cached bearer credential.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// `Authorization` header value.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.value)
    }
}

/// Grant response. Every field is required; they are optional here only so
/// that a missing one can be reported as an auth error instead of a decode
/// error.
#[derive(Debug, Deserialize)]
struct GrantResponse {
    access_token: Option<String>,
    expires_in: Option<f64>,
    scope: Option<Value>,
    token_type: Option<String>,
}

/// Obtains and caches the bearer token.
#[derive(Debug)]
pub struct TokenManager {
    token_url: String,
    client_id: Option<String>,
    client_secret: Option<String>,
    margin: Duration,
    timeout: std::time::Duration,
    token: Option<AuthToken>,
    grants: u32,
}

impl TokenManager {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            token_url: config.full_url(&config.token_path),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            margin: Duration::seconds(
                config
                    .token_expiry_margin_secs
                    .clamp(0, crate::config::MAX_TOKEN_EXPIRY_MARGIN_SECS),
            ),
            timeout: config.request_timeout(),
            token: None,
            grants: 0,
        }
    }

    /// Return the cached token, granting a fresh one if absent or expired.
    pub fn token(&mut self, transport: &dyn Transport, clock: &dyn Clock) -> Result<&AuthToken> {
        let now = clock.now();
        if self.token.as_ref().map_or(true, |t| t.is_expired(now)) {
            self.token = None;
            let fresh = self.grant(transport, now)?;
            self.token = Some(fresh);
        }
        self.token
            .as_ref()
            .ok_or_else(|| SignalError::Auth("token missing after grant".into()))
    }

    /// Drop the cached token so the next call re-grants.
    pub fn invalidate(&mut self) {
        self.token = None;
    }

    pub fn cached(&self) -> Option<&AuthToken> {
        self.token.as_ref()
    }

    /// Number of grant calls made so far.
    pub fn grant_count(&self) -> u32 {
        self.grants
    }

    fn grant(&mut self, transport: &dyn Transport, now: DateTime<Utc>) -> Result<AuthToken> {
        let (client_id, client_secret) = match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) => (id.clone(), secret.clone()),
            _ => {
                return Err(SignalError::Auth(
                    "client id and client secret must both be configured".into(),
                ))
            }
        };

        let request = HttpRequest {
            method: HttpMethod::Post,
            url: self.token_url.clone(),
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: Some(json!({
                "grant_type": "client_credentials",
                "client_id": client_id,
                "client_secret": client_secret,
            })),
            timeout: self.timeout,
        };

        debug!("requesting token grant from {}", self.token_url);
        self.grants += 1;
        let resp = transport.execute(&request).map_err(|e| match e {
            TransportError::ConnectTimeout(_) => SignalError::Timeout {
                url: self.token_url.clone(),
                attempts: 1,
            },
            TransportError::Other(msg) => SignalError::Transport(msg),
        })?;

        if !resp.is_success() {
            return Err(SignalError::Auth(format!(
                "token grant returned status {}: {}",
                resp.status, resp.body
            )));
        }

        let grant: GrantResponse = serde_json::from_str(&resp.body)
            .map_err(|e| SignalError::Auth(format!("malformed grant response: {e}")))?;

        let missing: Vec<&str> = [
            ("access_token", grant.access_token.is_none()),
            ("expires_in", grant.expires_in.is_none()),
            ("scope", grant.scope.is_none()),
            ("token_type", grant.token_type.is_none()),
        ]
        .iter()
        .filter(|(_, absent)| *absent)
        .map(|(name, _)| *name)
        .collect();
        if !missing.is_empty() {
            return Err(SignalError::Auth(format!(
                "grant response missing {}",
                missing.join(", ")
            )));
        }

        let (Some(value), Some(expires_in)) = (grant.access_token, grant.expires_in) else {
            return Err(SignalError::Auth("grant response incomplete".into()));
        };

        let expires_at = expiry_after(now, expires_in, self.margin)
            .ok_or_else(|| SignalError::Auth(format!("invalid expires_in: {expires_in}")))?;
        info!("obtained bearer token, refresh due at {expires_at}");

        Ok(AuthToken { value, expires_at })
    }
}

/// Longest token lifetime accepted from a grant response.
const MAX_LIFETIME_SECS: f64 = 366.0 * 24.0 * 3600.0;

/// `now + expires_in - margin`, or `None` if `expires_in` is not a finite,
/// non-negative lifetime within a year.
fn expiry_after(now: DateTime<Utc>, expires_in: f64, margin: Duration) -> Option<DateTime<Utc>> {
    if !expires_in.is_finite() || !(0.0..=MAX_LIFETIME_SECS).contains(&expires_in) {
        return None;
    }
    let lifetime = Duration::try_milliseconds((expires_in * 1000.0).round() as i64)?;
    now.checked_add_signed(lifetime)?.checked_sub_signed(margin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::transport::{HttpResponse, ScriptedTransport};
    use chrono::TimeZone;

    fn config() -> ClientConfig {
        ClientConfig {
            client_id: Some("id".into()),
            client_secret: Some("secret".into()),
            ..ClientConfig::default()
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn grant_body(expires_in: u64) -> Value {
        json!({
            "access_token": "abc",
            "expires_in": expires_in,
            "scope": "read write",
            "token_type": "Bearer",
        })
    }

    #[test]
    fn caches_until_expiry_then_regrants() {
        let transport =
            ScriptedTransport::new().route("/oa2/token/", HttpResponse::json(200, &grant_body(3600)));
        let clock = ManualClock::new(start());
        let mut tm = TokenManager::new(&config());

        let t1 = tm.token(&transport, &clock).unwrap().clone();
        assert_eq!(t1.value, "abc");
        assert_eq!(t1.expires_at, start() + Duration::seconds(3600 - 60));

        clock.advance(Duration::minutes(30));
        tm.token(&transport, &clock).unwrap();
        assert_eq!(tm.grant_count(), 1);

        clock.set(t1.expires_at);
        tm.token(&transport, &clock).unwrap();
        assert_eq!(tm.grant_count(), 2);
        assert_eq!(transport.count("/oa2/token/"), 2);
    }

    #[test]
    fn grant_body_carries_client_credentials_without_bearer() {
        let transport =
            ScriptedTransport::new().route("/oa2/token/", HttpResponse::json(200, &grant_body(60)));
        let clock = ManualClock::new(start());
        let mut tm = TokenManager::new(&config());
        tm.token(&transport, &clock).unwrap();

        let req = &transport.requests()[0];
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.url, "https://api.freqsignals.com/oa2/token/");
        assert!(req.header("Authorization").is_none());
        let body = req.body.as_ref().unwrap();
        assert_eq!(body["grant_type"], "client_credentials");
        assert_eq!(body["client_id"], "id");
        assert_eq!(body["client_secret"], "secret");
    }

    #[test]
    fn missing_field_is_auth_error() {
        let transport = ScriptedTransport::new().route(
            "/oa2/token/",
            HttpResponse::json(200, &json!({"access_token": "abc", "expires_in": 60})),
        );
        let clock = ManualClock::new(start());
        let mut tm = TokenManager::new(&config());
        let err = tm.token(&transport, &clock).unwrap_err();
        match err {
            SignalError::Auth(msg) => {
                assert!(msg.contains("scope"));
                assert!(msg.contains("token_type"));
            }
            other => panic!("expected auth error, got {other:?}"),
        }
        assert!(tm.cached().is_none());
    }

    #[test]
    fn out_of_range_lifetime_is_auth_error() {
        for expires_in in [json!(1e13), json!(-5), json!(1.7e308)] {
            let transport = ScriptedTransport::new().route(
                "/oa2/token/",
                HttpResponse::json(
                    200,
                    &json!({
                        "access_token": "abc",
                        "expires_in": expires_in.clone(),
                        "scope": "s",
                        "token_type": "Bearer",
                    }),
                ),
            );
            let clock = ManualClock::new(start());
            let mut tm = TokenManager::new(&config());
            match tm.token(&transport, &clock) {
                Err(SignalError::Auth(msg)) => assert!(msg.contains("expires_in"), "{msg}"),
                other => panic!("expected auth error for {expires_in}, got {other:?}"),
            }
            assert!(tm.cached().is_none());
        }
    }

    #[test]
    fn fractional_lifetime_is_honoured() {
        let at = expiry_after(start(), 90.5, Duration::seconds(60)).unwrap();
        assert_eq!(at, start() + Duration::milliseconds(30_500));
        assert!(expiry_after(start(), f64::NAN, Duration::zero()).is_none());
    }

    #[test]
    fn non_success_status_is_auth_error() {
        let transport = ScriptedTransport::new().route(
            "/oa2/token/",
            HttpResponse::json(401, &json!({"error": "invalid_client"})),
        );
        let clock = ManualClock::new(start());
        let mut tm = TokenManager::new(&config());
        assert!(matches!(
            tm.token(&transport, &clock),
            Err(SignalError::Auth(_))
        ));
    }

    #[test]
    fn missing_credentials_fail_without_network() {
        let transport = ScriptedTransport::new();
        let clock = ManualClock::new(start());
        let mut tm = TokenManager::new(&ClientConfig::default());
        assert!(matches!(
            tm.token(&transport, &clock),
            Err(SignalError::Auth(_))
        ));
        assert!(transport.requests().is_empty());
        assert_eq!(tm.grant_count(), 0);
    }

    #[test]
    fn invalidate_forces_regrant() {
        let transport =
            ScriptedTransport::new().route("/oa2/token/", HttpResponse::json(200, &grant_body(3600)));
        let clock = ManualClock::new(start());
        let mut tm = TokenManager::new(&config());
        tm.token(&transport, &clock).unwrap();
        tm.invalidate();
        tm.token(&transport, &clock).unwrap();
        assert_eq!(tm.grant_count(), 2);
    }
}
