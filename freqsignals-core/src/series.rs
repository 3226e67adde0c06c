//! Consumer time series: timestamped rows with named scalar fields.

use crate::signal::Scalar;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

/// One sample of a time series.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesRow {
    pub timestamp: DateTime<Utc>,
    pub fields: BTreeMap<String, Scalar>,
}

impl SeriesRow {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Scalar> {
        self.fields.get(name)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.fields.get(name).and_then(Scalar::as_f64)
    }

    pub fn set(&mut self, name: &str, value: Scalar) {
        self.fields.insert(name.to_string(), value);
    }
}

/// Ordered collection of rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Series {
    pub rows: Vec<SeriesRow>,
}

impl Series {
    pub fn new(rows: Vec<SeriesRow>) -> Self {
        Self { rows }
    }

    /// Rows at each of the given timestamps, with no fields.
    pub fn from_timestamps<I>(timestamps: I) -> Self
    where
        I: IntoIterator<Item = DateTime<Utc>>,
    {
        Self {
            rows: timestamps.into_iter().map(SeriesRow::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Union of field names across all rows, sorted.
    pub fn columns(&self) -> Vec<String> {
        let names: BTreeSet<&String> = self.rows.iter().flat_map(|r| r.fields.keys()).collect();
        names.into_iter().cloned().collect()
    }

    /// Values of one column, `None` where a row lacks it.
    pub fn column(&self, name: &str) -> Vec<Option<&Scalar>> {
        self.rows.iter().map(|r| r.get(name)).collect()
    }

    /// Ensure every row has `name`, filling gaps with `default`.
    pub fn init_column(&mut self, name: &str, default: Scalar) {
        for row in &mut self.rows {
            row.fields
                .entry(name.to_string())
                .or_insert_with(|| default.clone());
        }
    }

    /// Sort rows by timestamp (stable).
    pub fn sort(&mut self) {
        self.rows.sort_by_key(|r| r.timestamp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, m, 0).unwrap()
    }

    #[test]
    fn columns_are_union_of_row_fields() {
        let s = Series::new(vec![
            SeriesRow::new(t(0)).with("close", 1.0),
            SeriesRow::new(t(1)).with("volume", 10.0),
        ]);
        assert_eq!(s.columns(), vec!["close".to_string(), "volume".to_string()]);
        assert_eq!(s.column("close"), vec![Some(&Scalar::Number(1.0)), None]);
    }

    #[test]
    fn init_column_fills_only_gaps() {
        let mut s = Series::new(vec![
            SeriesRow::new(t(0)).with("sig", 1.0),
            SeriesRow::new(t(1)),
        ]);
        s.init_column("sig", Scalar::Number(0.0));
        assert_eq!(s.rows[0].number("sig"), Some(1.0));
        assert_eq!(s.rows[1].number("sig"), Some(0.0));
    }

    #[test]
    fn sort_orders_by_timestamp() {
        let mut s = Series::from_timestamps([t(5), t(1), t(3)]);
        s.sort();
        let ts: Vec<_> = s.rows.iter().map(|r| r.timestamp).collect();
        assert_eq!(ts, vec![t(1), t(3), t(5)]);
    }
}
