use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::util;

// ------------------------------------------------------------
// Raw exchange rate
// ------------------------------------------------------------
//
// One bucket exactly as reported by the exchange.
//
// Exchange clients produce these; the extractor turns them into
// `Candlestick`s by attaching the run granularity.
//
#[derive(Debug, Clone, PartialEq)]
pub struct RawRate {
    /// Bucket start time
    pub time: DateTime<Utc>,
    pub low: f64,
    pub high: f64,
    pub open: f64,
    pub close: f64,
    pub volume: f64,
}

/// One OHLCV record for a fixed time bucket.
///
/// This is the unit of data flowing through the whole pipeline:
/// - Extractor -> record stream
/// - Collector -> every registered receiver
///
/// DESIGN NOTES:
/// - Values are passed through from the exchange untouched.
///   No relation between low/high/open/close is enforced.
/// - The JSON field names are stable, sinks and indexes depend on them.
///
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Candlestick {
    /// Canonical UTC string form of `timestamp`
    /// Example: "2021-01-01 00:00:00 +0000 UTC"
    pub datetime: String,

    /// Seconds per bucket, constant across one extraction run
    pub granularity: i64,

    pub low: f64,
    pub high: f64,
    pub open: f64,
    pub close: f64,
    pub volume: f64,

    /// Bucket start in seconds since Unix epoch (UTC)
    pub timestamp: i64,
}

impl Candlestick {
    /// Builds a candlestick from an exchange rate and the run granularity.
    pub fn from_rate(granularity: i64, rate: &RawRate) -> Self {
        Self {
            datetime: util::canonical_datetime(&rate.time),
            granularity,
            low: rate.low,
            high: rate.high,
            open: rate.open,
            close: rate.close,
            volume: rate.volume,
            timestamp: rate.time.timestamp(),
        }
    }
}

// ------------------------------------------------------------
// Request window
// ------------------------------------------------------------
//
// A bounded sub-range of the extraction range, sized so that a
// single exchange request never exceeds the per-call record cap.
//
// Invariant: `end > start` for every planned window.
//
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Length of the window in whole seconds.
    pub fn span_secs(&self) -> i64 {
        (self.end - self.start).num_seconds()
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} - {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}
