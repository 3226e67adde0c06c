//! Series file I/O: CSV and Parquet.
//!
//! Files carry a time column named `date` (or `timestamp`) followed by one
//! column per field. Written files always use `date`, RFC 3339 strings, and
//! fields in name order.

use crate::error::{Result, SignalError};
use crate::series::{Series, SeriesRow};
use crate::signal::{parse_timestamp, Scalar};
use chrono::{DateTime, SecondsFormat, Utc};
use polars::prelude::*;
use std::fs;
use std::path::Path;

const TIME_COLUMNS: [&str; 2] = ["date", "timestamp"];

fn format_ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn is_time_column(name: &str) -> bool {
    TIME_COLUMNS.iter().any(|c| c.eq_ignore_ascii_case(name))
}

/// Parse a CSV cell: empty → unset, then number, then boolean, else text.
fn parse_cell(raw: &str) -> Option<Scalar> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(n) = raw.parse::<f64>() {
        return Some(Scalar::Number(n));
    }
    match raw {
        "true" | "True" => Some(Scalar::Bool(true)),
        "false" | "False" => Some(Scalar::Bool(false)),
        _ => Some(Scalar::Text(raw.to_string())),
    }
}

// ── CSV ──────────────────────────────────────────────────────────────

pub fn read_csv(path: &Path) -> Result<Series> {
    let map_err = |e: csv::Error| SignalError::Series(format!("{}: {e}", path.display()));

    let mut reader = csv::Reader::from_path(path).map_err(map_err)?;
    let headers = reader.headers().map_err(map_err)?.clone();
    let time_idx = headers
        .iter()
        .position(is_time_column)
        .ok_or_else(|| {
            SignalError::Series(format!("{}: no date or timestamp column", path.display()))
        })?;

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(map_err)?;
        let raw_ts = record.get(time_idx).unwrap_or_default();
        let timestamp = parse_timestamp(raw_ts)
            .map_err(|e| SignalError::Series(format!("row {}: {e}", line + 1)))?;

        let mut row = SeriesRow::new(timestamp);
        for (i, (name, raw)) in headers.iter().zip(record.iter()).enumerate() {
            if i == time_idx {
                continue;
            }
            if let Some(value) = parse_cell(raw) {
                row.fields.insert(name.to_string(), value);
            }
        }
        rows.push(row);
    }

    Ok(Series::new(rows))
}

pub fn write_csv(series: &Series, path: &Path) -> Result<()> {
    let map_err = |e: csv::Error| SignalError::Series(format!("{}: {e}", path.display()));

    let columns = series.columns();
    let mut writer = csv::Writer::from_path(path).map_err(map_err)?;

    let mut header = Vec::with_capacity(columns.len() + 1);
    header.push("date".to_string());
    header.extend(columns.iter().cloned());
    writer.write_record(&header).map_err(map_err)?;

    for row in &series.rows {
        let mut record = Vec::with_capacity(header.len());
        record.push(format_ts(row.timestamp));
        for name in &columns {
            record.push(row.get(name).map(|v| v.to_string()).unwrap_or_default());
        }
        writer.write_record(&record).map_err(map_err)?;
    }

    writer
        .flush()
        .map_err(|e| SignalError::Series(format!("{}: {e}", path.display())))
}

// ── Parquet ──────────────────────────────────────────────────────────

pub fn write_parquet(series: &Series, path: &Path) -> Result<()> {
    let mut df = series_to_dataframe(series)?;
    let file = fs::File::create(path)
        .map_err(|e| SignalError::Series(format!("create {}: {e}", path.display())))?;
    ParquetWriter::new(file)
        .finish(&mut df)
        .map_err(|e| SignalError::Series(format!("write parquet: {e}")))?;
    Ok(())
}

pub fn read_parquet(path: &Path) -> Result<Series> {
    let file = fs::File::open(path)
        .map_err(|e| SignalError::Series(format!("open {}: {e}", path.display())))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| SignalError::Series(format!("read parquet: {e}")))?;
    dataframe_to_series(&df)
}

/// Convert a series to a DataFrame: `date` strings, then one column per field.
///
/// Columns holding only numbers (or booleans mixed with numbers) become
/// Float64, only booleans become Boolean, anything else becomes String.
pub fn series_to_dataframe(series: &Series) -> Result<DataFrame> {
    let dates: Vec<String> = series.rows.iter().map(|r| format_ts(r.timestamp)).collect();
    let mut columns = vec![Column::new("date".into(), dates)];

    for name in series.columns() {
        let cells = series.column(&name);
        let present = || cells.iter().flatten().filter(|v| !v.is_null());

        let column = if present().all(|v| matches!(v, Scalar::Bool(_))) && present().count() > 0 {
            let values: Vec<Option<bool>> = cells
                .iter()
                .map(|c| match c {
                    Some(Scalar::Bool(b)) => Some(*b),
                    _ => None,
                })
                .collect();
            Column::new(name.as_str().into(), values)
        } else if present().all(|v| v.as_f64().is_some()) {
            let values: Vec<Option<f64>> =
                cells.iter().map(|c| c.and_then(Scalar::as_f64)).collect();
            Column::new(name.as_str().into(), values)
        } else {
            let values: Vec<Option<String>> = cells
                .iter()
                .map(|c| c.filter(|v| !v.is_null()).map(|v| v.to_string()))
                .collect();
            Column::new(name.as_str().into(), values)
        };
        columns.push(column);
    }

    DataFrame::new(columns).map_err(|e| SignalError::Series(format!("dataframe creation: {e}")))
}

/// Convert a DataFrame back to a series. Null cells are left unset.
pub fn dataframe_to_series(df: &DataFrame) -> Result<Series> {
    let map_err = |e: PolarsError| SignalError::Series(format!("column read: {e}"));

    let time_col = df
        .get_columns()
        .iter()
        .find(|c| is_time_column(c.name().as_str()))
        .ok_or_else(|| SignalError::Series("no date or timestamp column".into()))?;
    let timestamps = read_timestamps(time_col)?;

    let mut rows: Vec<SeriesRow> = timestamps.into_iter().map(SeriesRow::new).collect();

    for col in df.get_columns() {
        let name = col.name().as_str();
        if is_time_column(name) {
            continue;
        }
        match col.dtype() {
            DataType::Boolean => {
                let ca = col.bool().map_err(map_err)?;
                for (i, row) in rows.iter_mut().enumerate() {
                    if let Some(b) = ca.get(i) {
                        row.set(name, Scalar::Bool(b));
                    }
                }
            }
            DataType::String => {
                let ca = col.str().map_err(map_err)?;
                for (i, row) in rows.iter_mut().enumerate() {
                    if let Some(s) = ca.get(i) {
                        row.set(name, Scalar::Text(s.to_string()));
                    }
                }
            }
            DataType::Float64
            | DataType::Float32
            | DataType::Int64
            | DataType::Int32
            | DataType::UInt64
            | DataType::UInt32 => {
                let cast = col.cast(&DataType::Float64).map_err(map_err)?;
                let ca = cast.f64().map_err(map_err)?;
                for (i, row) in rows.iter_mut().enumerate() {
                    if let Some(n) = ca.get(i) {
                        row.set(name, Scalar::Number(n));
                    }
                }
            }
            other => {
                return Err(SignalError::Series(format!(
                    "column '{name}' has unsupported type {other}"
                )))
            }
        }
    }

    Ok(Series::new(rows))
}

/// Time column as UTC timestamps: RFC 3339 strings, datetimes, or epoch ms.
fn read_timestamps(col: &Column) -> Result<Vec<DateTime<Utc>>> {
    let map_err = |e: PolarsError| SignalError::Series(format!("time column: {e}"));
    let n = col.len();

    if let DataType::String = col.dtype() {
        let ca = col.str().map_err(map_err)?;
        return (0..n)
            .map(|i| {
                let raw = ca
                    .get(i)
                    .ok_or_else(|| SignalError::Series(format!("null timestamp at row {i}")))?;
                parse_timestamp(raw).map_err(|e| SignalError::Series(format!("row {i}: {e}")))
            })
            .collect();
    }

    let per_ms: i64 = match col.dtype() {
        DataType::Datetime(TimeUnit::Nanoseconds, _) => 1_000_000,
        DataType::Datetime(TimeUnit::Microseconds, _) => 1_000,
        _ => 1,
    };
    let cast = col.cast(&DataType::Int64).map_err(map_err)?;
    let ca = cast.i64().map_err(map_err)?;
    (0..n)
        .map(|i| {
            let raw = ca
                .get(i)
                .ok_or_else(|| SignalError::Series(format!("null timestamp at row {i}")))?;
            DateTime::from_timestamp_millis(raw / per_ms)
                .ok_or_else(|| SignalError::Series(format!("row {i}: timestamp out of range")))
        })
        .collect()
}
