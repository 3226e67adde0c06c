//! In-memory, deduplicated signal index.
//!
//! Signals are keyed by (symbol, dataset, updated_at). The first observation
//! of a key wins; later observations with the same key are ignored, whether
//! they arrive by live polling or historical backfill.

use crate::client::ResilientHttpClient;
use crate::error::Result;
use crate::signal::{Page, Signal, SignalKey};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How long signals stay in memory after their window closes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetentionPolicy {
    /// Never evict. Memory grows with every distinct signal observed.
    #[default]
    Unbounded,
    /// Evict once a signal's window has been closed for `minutes`.
    ExpiredFor { minutes: u32 },
}

/// Result of one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSummary {
    pub received: usize,
    pub inserted: usize,
}

#[derive(Debug, Default)]
pub struct SignalStore {
    signals: BTreeMap<SignalKey, Signal>,
    retention: RetentionPolicy,
}

impl SignalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: RetentionPolicy) -> Self {
        Self {
            signals: BTreeMap::new(),
            retention,
        }
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    /// Insert `signal` unless its key is already present.
    ///
    /// Returns true if the signal was newly inserted.
    pub fn upsert(&mut self, signal: Signal) -> bool {
        use std::collections::btree_map::Entry;
        match self.signals.entry(signal.key()) {
            Entry::Vacant(slot) => {
                slot.insert(signal);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Fetch the live signal list and merge it in.
    ///
    /// The whole response is decoded before anything is inserted, so a
    /// malformed page leaves the store untouched.
    pub fn poll(
        &mut self,
        client: &mut ResilientHttpClient,
        data_set_filter: &[String],
    ) -> Result<PollSummary> {
        let path = signals_list_path(&client.config().signals_path, data_set_filter);
        let page: Page<Signal> = client.get_json(&path)?;

        let received = page.results.len();
        let mut inserted = 0;
        for signal in page.results {
            if self.upsert(signal) {
                inserted += 1;
            }
        }

        info!(
            "polled {received} signal(s), {inserted} new, {} stored",
            self.signals.len()
        );
        Ok(PollSummary { received, inserted })
    }

    pub fn get(&self, key: &SignalKey) -> Option<&Signal> {
        self.signals.get(key)
    }

    /// Signals for `symbol`, optionally limited to one dataset, ordered by
    /// `updated_at` ascending (ties broken by dataset id).
    pub fn signals_for(&self, symbol: &str, data_set_id: Option<&str>) -> Vec<&Signal> {
        let mut out: Vec<&Signal> = self
            .signals
            .values()
            .filter(|s| s.symbol == symbol)
            .filter(|s| data_set_id.map_or(true, |ds| s.data_set_id == ds))
            .collect();
        out.sort_by(|a, b| {
            a.updated_at
                .cmp(&b.updated_at)
                .then_with(|| a.data_set_id.cmp(&b.data_set_id))
        });
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = &Signal> {
        self.signals.values()
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Apply the retention policy. Returns the keys of the removed signals.
    pub fn evict(&mut self, now: DateTime<Utc>) -> Vec<SignalKey> {
        let grace = match self.retention {
            RetentionPolicy::Unbounded => return Vec::new(),
            RetentionPolicy::ExpiredFor { minutes } => Duration::minutes(i64::from(minutes)),
        };
        let cutoff = now - grace;

        let expired: Vec<SignalKey> = self
            .signals
            .iter()
            .filter(|(_, s)| s.window().ended_by(cutoff))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.signals.remove(key);
        }
        if !expired.is_empty() {
            debug!("evicted {} expired signal(s)", expired.len());
        }
        expired
    }
}

fn signals_list_path(base: &str, data_set_filter: &[String]) -> String {
    if data_set_filter.is_empty() {
        return base.to_string();
    }
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("data_set_id__in", &data_set_filter.join(","))
        .finish();
    format!("{base}?{query}")
}
