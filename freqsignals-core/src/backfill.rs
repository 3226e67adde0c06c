//! One-shot historical backfill per (symbol, dataset).
//!
//! Pages through the signal-history endpoint with a fixed page size. A page
//! shorter than the page size ends the run. Records are merged into the
//! store only after the last page arrives, and the pair is marked loaded only
//! then, so a failed run can simply be retried.

use crate::client::ResilientHttpClient;
use crate::error::{Result, SignalError};
use crate::signal::{HistoricalRecord, Page};
use crate::store::SignalStore;
use log::{debug, info};
use std::collections::HashSet;

/// What a `load` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillOutcome {
    /// The pair was loaded earlier in this process; no request was made.
    AlreadyLoaded,
    Loaded {
        pages: usize,
        fetched: usize,
        inserted: usize,
    },
}

#[derive(Debug)]
pub struct HistoricalBackfillLoader {
    page_limit: usize,
    loaded: HashSet<(String, String)>,
}

impl HistoricalBackfillLoader {
    pub fn new(page_limit: usize) -> Self {
        Self {
            page_limit: page_limit.max(1),
            loaded: HashSet::new(),
        }
    }

    pub fn page_limit(&self) -> usize {
        self.page_limit
    }

    pub fn is_loaded(&self, symbol: &str, data_set_id: &str) -> bool {
        self.loaded
            .contains(&(symbol.to_string(), data_set_id.to_string()))
    }

    /// Forget that a pair was loaded so the next `load` fetches it again.
    pub fn reset(&mut self, symbol: &str, data_set_id: &str) -> bool {
        self.loaded
            .remove(&(symbol.to_string(), data_set_id.to_string()))
    }

    pub fn load(
        &mut self,
        client: &mut ResilientHttpClient,
        store: &mut SignalStore,
        symbol: &str,
        data_set_id: &str,
    ) -> Result<BackfillOutcome> {
        self.load_filtered(client, store, symbol, data_set_id, &[])
    }

    /// Like [`load`](Self::load), with extra query filters (for example a
    /// time range) appended to every page request.
    ///
    /// The loaded-set is keyed by pair only: once a filtered load succeeds,
    /// later calls for the pair return `AlreadyLoaded` until `reset`.
    pub fn load_filtered(
        &mut self,
        client: &mut ResilientHttpClient,
        store: &mut SignalStore,
        symbol: &str,
        data_set_id: &str,
        filters: &[(String, String)],
    ) -> Result<BackfillOutcome> {
        if let Some((key, _)) = filters
            .iter()
            .find(|(k, _)| RESERVED_PARAMS.contains(&k.as_str()))
        {
            return Err(SignalError::Usage(format!(
                "history filter {key:?} is set by the loader"
            )));
        }
        if self.is_loaded(symbol, data_set_id) {
            return Ok(BackfillOutcome::AlreadyLoaded);
        }

        info!("loading historical signals for {symbol} in {data_set_id}");
        let base = client.config().history_path.clone();
        let mut records: Vec<HistoricalRecord> = Vec::new();
        let mut offset = 0usize;
        let mut pages = 0usize;

        loop {
            let path = history_page_path(
                &base,
                symbol,
                data_set_id,
                filters,
                self.page_limit,
                offset,
            );
            let page: Page<HistoricalRecord> = client.get_json(&path)?;
            pages += 1;

            let n = page.results.len();
            debug!("history page {pages} for {symbol}/{data_set_id}: {n} record(s)");
            records.extend(page.results);

            if n < self.page_limit {
                break;
            }
            offset += self.page_limit;
        }

        let fetched = records.len();
        let mut inserted = 0usize;
        for record in records {
            if store.upsert(record.into_signal(symbol, data_set_id)) {
                inserted += 1;
            }
        }

        self.loaded
            .insert((symbol.to_string(), data_set_id.to_string()));
        info!(
            "backfilled {symbol}/{data_set_id}: {fetched} record(s) over {pages} page(s), {inserted} new"
        );

        Ok(BackfillOutcome::Loaded {
            pages,
            fetched,
            inserted,
        })
    }
}

/// Query parameters the loader owns.
const RESERVED_PARAMS: [&str; 4] = ["symbol", "data_set_id", "limit", "offset"];

fn history_page_path(
    base: &str,
    symbol: &str,
    data_set_id: &str,
    filters: &[(String, String)],
    limit: usize,
    offset: usize,
) -> String {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    query
        .append_pair("symbol", symbol)
        .append_pair("data_set_id", data_set_id);
    for (key, value) in filters {
        query.append_pair(key, value);
    }
    let query = query
        .append_pair("limit", &limit.to_string())
        .append_pair("offset", &offset.to_string())
        .finish();
    format!("{base}?{query}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_path_encodes_pair() {
        assert_eq!(
            history_page_path("/api/crud/signal_history/", "BTC/USD", "ds 1", &[], 1000, 2000),
            "/api/crud/signal_history/?symbol=BTC%2FUSD&data_set_id=ds+1&limit=1000&offset=2000"
        );
    }

    #[test]
    fn page_path_carries_filters_before_paging() {
        let filters = vec![("t__gte".to_string(), "2024-01-01T00:00:00Z".to_string())];
        assert_eq!(
            history_page_path("/h/", "SPY", "d", &filters, 10, 0),
            "/h/?symbol=SPY&data_set_id=d&t__gte=2024-01-01T00%3A00%3A00Z&limit=10&offset=0"
        );
    }

    #[test]
    fn reset_forgets_pair() {
        let mut loader = HistoricalBackfillLoader::new(1000);
        loader.loaded.insert(("SPY".into(), "d".into()));
        assert!(loader.is_loaded("SPY", "d"));
        assert!(loader.reset("SPY", "d"));
        assert!(!loader.is_loaded("SPY", "d"));
        assert!(!loader.reset("SPY", "d"));
    }

    #[test]
    fn zero_page_limit_is_clamped() {
        assert_eq!(HistoricalBackfillLoader::new(0).page_limit(), 1);
    }
}
