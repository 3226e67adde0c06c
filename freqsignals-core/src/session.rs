//! Session: the one value a host owns for all signal work.
//!
//! Bundles the client (and its cached token), the store, the backfill
//! loader's loaded-set, the projector and the publisher. All mutation goes
//! through `&mut self`; a host that shares a session across threads wraps it
//! in a `Mutex`.

use crate::backfill::{BackfillOutcome, HistoricalBackfillLoader};
use crate::client::ResilientHttpClient;
use crate::clock::Clock;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::projector::{ProjectionOptions, ProjectionSummary, SeriesProjector};
use crate::publisher::{NewSignal, SignalPublisher};
use crate::series::Series;
use crate::store::{PollSummary, SignalStore};
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

/// How the host is running. Live polling only makes sense with real
/// connectivity, so backtests never poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Live,
    DryRun,
    Backtest,
}

impl RunMode {
    pub fn polls(&self) -> bool {
        matches!(self, RunMode::Live | RunMode::DryRun)
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub poll: Option<PollSummary>,
    pub evicted: usize,
}

pub struct SignalSession {
    client: ResilientHttpClient,
    store: SignalStore,
    loader: HistoricalBackfillLoader,
    projector: SeriesProjector,
    publisher: SignalPublisher,
}

impl SignalSession {
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>, clock: Arc<dyn Clock>) -> Self {
        Self::from_client(ResilientHttpClient::new(config, transport, clock))
    }

    /// Production session on `reqwest` and the system clock.
    pub fn from_config(config: ClientConfig) -> Result<Self> {
        Ok(Self::from_client(ResilientHttpClient::from_config(config)?))
    }

    fn from_client(client: ResilientHttpClient) -> Self {
        let config = client.config();
        let store = SignalStore::with_retention(config.retention);
        let loader = HistoricalBackfillLoader::new(config.history_page_limit);
        let projector = SeriesProjector::new(config.data_set_names.clone());
        Self {
            client,
            store,
            loader,
            projector,
            publisher: SignalPublisher::new(),
        }
    }

    pub fn with_publisher(mut self, publisher: SignalPublisher) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        self.client.config()
    }

    pub fn client_mut(&mut self) -> &mut ResilientHttpClient {
        &mut self.client
    }

    pub fn store(&self) -> &SignalStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut SignalStore {
        &mut self.store
    }

    pub fn loader(&self) -> &HistoricalBackfillLoader {
        &self.loader
    }

    /// Periodic host callback: poll and apply retention when the mode allows
    /// it.
    ///
    /// Retention is measured against the clock, so backtests (which replay
    /// signals far older than now) never evict. Pairs that lose signals to
    /// retention are forgotten by the loader so `ensure_history` can fetch
    /// them again.
    pub fn on_tick(&mut self, mode: RunMode) -> Result<TickSummary> {
        if !mode.polls() {
            return Ok(TickSummary {
                poll: None,
                evicted: 0,
            });
        }

        let filter = self.client.config().data_set_ids.clone();
        let poll = self.store.poll(&mut self.client, &filter)?;

        let removed = self.store.evict(self.client.clock().now());
        let pairs: BTreeSet<(&str, &str)> = removed
            .iter()
            .map(|k| (k.symbol.as_str(), k.data_set_id.as_str()))
            .collect();
        for (symbol, data_set_id) in pairs {
            self.loader.reset(symbol, data_set_id);
        }

        Ok(TickSummary {
            poll: Some(poll),
            evicted: removed.len(),
        })
    }

    /// Poll once regardless of mode, with an explicit dataset filter.
    pub fn poll(&mut self, data_set_filter: &[String]) -> Result<PollSummary> {
        self.store.poll(&mut self.client, data_set_filter)
    }

    /// Backfill a pair unless it was already loaded in this session.
    pub fn ensure_history(&mut self, symbol: &str, data_set_id: &str) -> Result<BackfillOutcome> {
        self.loader
            .load(&mut self.client, &mut self.store, symbol, data_set_id)
    }

    /// Backfill a pair with extra history query filters.
    pub fn ensure_history_filtered(
        &mut self,
        symbol: &str,
        data_set_id: &str,
        filters: &[(String, String)],
    ) -> Result<BackfillOutcome> {
        self.loader
            .load_filtered(&mut self.client, &mut self.store, symbol, data_set_id, filters)
    }

    /// Overlay stored signals for `pair` onto `series`.
    pub fn annotate(
        &self,
        series: &mut Series,
        pair: &str,
        options: &ProjectionOptions,
    ) -> ProjectionSummary {
        self.projector.project(&self.store, series, pair, options)
    }

    pub fn publish(&mut self, signal: &NewSignal) -> Result<Value> {
        self.publisher.publish(&mut self.client, signal)
    }
}
