/// Small helpers shared by the extractor, the sinks and the binary:
/// - Time parsing and canonical formatting
/// - TLS provider setup for HTTP clients
///
/// IMPORTANT:
/// - Everything here works in UTC.
/// - No exchange or sink specific logic should live here.
///

use anyhow::Context;
use chrono::{DateTime, Utc};
use rustls::crypto::{CryptoProvider, ring};

/// Installs the `ring` rustls provider as the process default.
///
/// rustls >= 0.23 needs an explicit CryptoProvider before the first
/// TLS client is built. Safe to call any number of times; the first
/// installed provider wins.
pub fn install_crypto_provider() {
    if CryptoProvider::get_default().is_none() {
        // Losing the race to another installer is fine
        let _ = ring::default_provider().install_default();
    }
}

/// Formats a UTC time in the canonical candlestick form.
///
/// Example:
///     2021-01-01 00:00:00 +0000 UTC
///
/// This string doubles as the document ID for the index sink,
/// so it must stay stable across releases.
pub fn canonical_datetime(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S %z UTC").to_string()
}

/// Parses an RFC3339 timestamp into UTC.
///
/// Accepts any offset ("2021-01-01T00:00:00Z", "2021-01-01T02:00:00+02:00")
/// and normalizes it.
pub fn parse_rfc3339(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("time must be RFC3339, found [{raw}]"))?;
    Ok(parsed.with_timezone(&Utc))
}

/// Converts Unix seconds into a UTC time.
pub fn from_unix_secs(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}
