//! Property tests for store and projection invariants.
//!
//! Uses proptest to verify:
//! 1. Dedup idempotence: repeated keys keep the first write
//! 2. Window half-openness: membership is exactly `start <= t < end`
//! 3. Projection never writes outside any window

use chrono::{DateTime, Duration, TimeZone, Utc};
use freqsignals_core::{ProjectionOptions, SeriesProjector, Series, Signal, SignalStore};
use proptest::prelude::*;

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_value() -> impl Strategy<Value = f64> {
    -1000.0..1000.0_f64
}

fn arb_offset_minutes() -> impl Strategy<Value = i64> {
    0i64..10_000
}

// ── 1. Dedup idempotence ─────────────────────────────────────────────

proptest! {
    #[test]
    fn first_write_wins(
        offset in arb_offset_minutes(),
        first in arb_value(),
        later in prop::collection::vec(arb_value(), 1..10),
    ) {
        let at = base() + Duration::minutes(offset);
        let mut store = SignalStore::new();
        prop_assert!(store.upsert(Signal::new("BTC/USD", "ds1", first, 60, at)));
        for v in later {
            prop_assert!(!store.upsert(Signal::new("BTC/USD", "ds1", v, 15, at)));
        }
        prop_assert_eq!(store.len(), 1);
        let kept = store.signals_for("BTC/USD", Some("ds1"))[0];
        prop_assert_eq!(kept.value, first);
        prop_assert_eq!(kept.ttl_minutes, 60);
    }

    /// Store size equals the number of distinct keys inserted.
    #[test]
    fn store_size_is_distinct_keys(offsets in prop::collection::vec(0i64..50, 0..100)) {
        let mut store = SignalStore::new();
        for (i, off) in offsets.iter().enumerate() {
            store.upsert(Signal::new("SPY", "d", i as f64, 5, base() + Duration::minutes(*off)));
        }
        let distinct: std::collections::BTreeSet<i64> = offsets.iter().copied().collect();
        prop_assert_eq!(store.len(), distinct.len());
    }
}

// ── 2. Window half-openness ──────────────────────────────────────────

proptest! {
    #[test]
    fn membership_matches_interval(
        ttl in 0u32..600,
        probe_secs in -3_600i64..40_000,
    ) {
        let s = Signal::new("SPY", "d", 1.0, ttl, base());
        let probe = base() + Duration::seconds(probe_secs);
        let expected = probe_secs >= 0 && probe_secs < i64::from(ttl) * 60;
        prop_assert_eq!(s.window().contains(probe), expected);
    }
}

// ── 3. Projection stays inside windows ───────────────────────────────

proptest! {
    #[test]
    fn projection_only_touches_windowed_rows(
        starts in prop::collection::vec((0i64..300, 1u32..60), 1..8),
        row_count in 1usize..200,
    ) {
        let mut store = SignalStore::new();
        for (i, (start, ttl)) in starts.iter().enumerate() {
            store.upsert(Signal::new("SPY", "d", i as f64, *ttl, base() + Duration::minutes(*start)));
        }
        let mut series = Series::from_timestamps((0..row_count as i64).map(|m| base() + Duration::minutes(m)));
        SeriesProjector::default().project(&store, &mut series, "SPY", &ProjectionOptions::default());

        for row in &series.rows {
            let covered = store.iter().any(|s| s.window().contains(row.timestamp));
            prop_assert_eq!(row.get("d").is_some(), covered);
        }
    }
}
