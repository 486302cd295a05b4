//! CSV ingestion of candles, ATM option OI and futures OI.
//!
//! Formats:
//! - candles: `timestamp,open,high,low,close`
//! - options OI: `timestamp,oi_call_atm,oi_put_atm`
//! - futures OI: `timestamp,current_month_oi,next_month_oi`
//!
//! Timestamps are RFC 3339, or `YYYY-MM-DD HH:MM[:SS]` read as UTC. Bad rows
//! are skipped and counted; they never fail the load.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use csv::{ReaderBuilder, Trim};
use oi_strangle_core::{Candle, DataError, FuturesOISample, OISample};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, warn};

/// Row counts from one load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped: usize,
    pub duplicates: usize,
}

/// Parsed rows, sorted by timestamp with unique timestamps.
#[derive(Debug, Clone)]
pub struct Loaded<T> {
    pub rows: Vec<T>,
    pub report: LoadReport,
}

#[derive(Debug, Deserialize)]
struct CandleRow {
    timestamp: String,
    open: String,
    high: String,
    low: String,
    close: String,
}

#[derive(Debug, Deserialize)]
struct OptionsRow {
    timestamp: String,
    oi_call_atm: String,
    oi_put_atm: String,
}

#[derive(Debug, Deserialize)]
struct FuturesRow {
    timestamp: String,
    current_month_oi: String,
    next_month_oi: String,
}

/// Loads candles from a CSV file.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or has no usable header.
pub fn load_candles(path: impl AsRef<Path>) -> Result<Loaded<Candle>> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open candle file: {}", path.display()))?;
    read_candles(file)
}

/// Loads ATM option OI from a CSV file.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or has no usable header.
pub fn load_options_oi(path: impl AsRef<Path>) -> Result<Loaded<OISample>> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open options OI file: {}", path.display()))?;
    read_options_oi(file)
}

/// Loads futures OI from a CSV file.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or has no usable header.
pub fn load_futures_oi(path: impl AsRef<Path>) -> Result<Loaded<FuturesOISample>> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open futures OI file: {}", path.display()))?;
    read_futures_oi(file)
}

/// # Errors
///
/// Returns an error if the header cannot be read.
pub fn read_candles(reader: impl Read) -> Result<Loaded<Candle>> {
    read_rows("candles", reader, |row: CandleRow, line| {
        let candle = Candle::new(
            parse_timestamp("candles", line, &row.timestamp)?,
            parse_decimal("candles", line, "open", &row.open)?,
            parse_decimal("candles", line, "high", &row.high)?,
            parse_decimal("candles", line, "low", &row.low)?,
            parse_decimal("candles", line, "close", &row.close)?,
        );
        if !candle.is_well_formed() {
            return Err(malformed("candles", line, "high/low do not bracket open/close"));
        }
        Ok((candle.timestamp, candle))
    })
}

/// # Errors
///
/// Returns an error if the header cannot be read.
pub fn read_options_oi(reader: impl Read) -> Result<Loaded<OISample>> {
    read_rows("options_oi", reader, |row: OptionsRow, line| {
        let sample = OISample {
            timestamp: parse_timestamp("options_oi", line, &row.timestamp)?,
            call_oi: parse_oi("options_oi", line, "oi_call_atm", &row.oi_call_atm)?,
            put_oi: parse_oi("options_oi", line, "oi_put_atm", &row.oi_put_atm)?,
        };
        Ok((sample.timestamp, sample))
    })
}

/// # Errors
///
/// Returns an error if the header cannot be read.
pub fn read_futures_oi(reader: impl Read) -> Result<Loaded<FuturesOISample>> {
    read_rows("futures_oi", reader, |row: FuturesRow, line| {
        let sample = FuturesOISample {
            timestamp: parse_timestamp("futures_oi", line, &row.timestamp)?,
            current_month_oi: parse_oi(
                "futures_oi",
                line,
                "current_month_oi",
                &row.current_month_oi,
            )?,
            next_month_oi: parse_oi("futures_oi", line, "next_month_oi", &row.next_month_oi)?,
        };
        Ok((sample.timestamp, sample))
    })
}

fn read_rows<R, T, F>(series: &'static str, reader: impl Read, convert: F) -> Result<Loaded<T>>
where
    R: for<'de> Deserialize<'de>,
    F: Fn(R, usize) -> Result<(DateTime<Utc>, T), DataError>,
{
    let mut csv = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
    csv.headers()
        .with_context(|| format!("Failed to read {series} header"))?;

    let mut report = LoadReport::default();
    let mut rows: Vec<(DateTime<Utc>, T)> = Vec::new();

    for (i, result) in csv.deserialize::<R>().enumerate() {
        // Header is line 1.
        let line = i + 2;
        let converted = result
            .map_err(|e| malformed(series, line, &e.to_string()))
            .and_then(|row| convert(row, line));
        match converted {
            Ok(row) => rows.push(row),
            Err(e) => {
                warn!(series, line, error = %e, "Skipping malformed row");
                report.skipped += 1;
            }
        }
    }

    rows.sort_by_key(|(timestamp, _)| *timestamp);
    let before = rows.len();
    rows.dedup_by_key(|(timestamp, _)| *timestamp);
    report.duplicates = before - rows.len();
    report.loaded = rows.len();

    if report.duplicates > 0 {
        warn!(series, duplicates = report.duplicates, "Dropped duplicate timestamps");
    }
    info!(
        series,
        loaded = report.loaded,
        skipped = report.skipped,
        "Loaded rows"
    );

    Ok(Loaded {
        rows: rows.into_iter().map(|(_, row)| row).collect(),
        report,
    })
}

/// Parses RFC 3339 or a naive `YYYY-MM-DD HH:MM[:SS]` timestamp as UTC.
///
/// # Errors
///
/// Returns [`DataError::Malformed`] when neither format matches.
pub fn parse_timestamp(
    series: &'static str,
    line: usize,
    value: &str,
) -> Result<DateTime<Utc>, DataError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(malformed(series, line, &format!("bad timestamp {value:?}")))
}

fn parse_decimal(
    series: &'static str,
    line: usize,
    field: &str,
    value: &str,
) -> Result<Decimal, DataError> {
    Decimal::from_str(value)
        .or_else(|_| Decimal::from_scientific(value))
        .map_err(|_| malformed(series, line, &format!("bad {field} {value:?}")))
}

fn parse_oi(
    series: &'static str,
    line: usize,
    field: &str,
    value: &str,
) -> Result<Decimal, DataError> {
    let oi = parse_decimal(series, line, field, value)?;
    if oi.is_sign_negative() && !oi.is_zero() {
        return Err(malformed(series, line, &format!("negative {field} {oi}")));
    }
    Ok(oi)
}

fn malformed(series: &'static str, row: usize, reason: &str) -> DataError {
    DataError::Malformed {
        series,
        row,
        reason: reason.to_string(),
    }
}
