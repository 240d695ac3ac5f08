use chrono::{DateTime, Duration, Utc};

use crate::{error::PipelineError, schema::TimeWindow};

/// Maximum number of candles the exchange returns for one request.
pub const MAX_RECORDS_PER_REQUEST: i64 = 200;

/// Splits `[start, end]` into request windows.
///
/// Every window spans `granularity * MAX_RECORDS_PER_REQUEST` seconds,
/// except the last one, which is cut to end exactly at `end`.
///
/// GUARANTEES:
/// - Windows are contiguous: `w[i].end == w[i + 1].start`
/// - The first starts at `start`, the last ends at `end`
/// - Always at least one window
///
pub fn plan(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    granularity: i64,
) -> Result<Vec<TimeWindow>, PipelineError> {
    if granularity <= 0 {
        return Err(PipelineError::InvalidGranularity(granularity));
    }
    if end <= start {
        return Err(PipelineError::InvalidRange {
            start: start.to_rfc3339(),
            end: end.to_rfc3339(),
        });
    }

    let span = granularity
        .checked_mul(MAX_RECORDS_PER_REQUEST)
        .and_then(Duration::try_seconds)
        .ok_or(PipelineError::InvalidGranularity(granularity))?;

    let mut windows = Vec::new();
    let mut s = start;

    // Full-size frames while the frame end is still before the target end
    while let Some(e) = s.checked_add_signed(span) {
        if end - e <= Duration::zero() {
            break;
        }
        windows.push(TimeWindow::new(s, e));
        s = e;
    }

    // Trailing frame closes the range exactly
    windows.push(TimeWindow::new(s, end));

    Ok(windows)
}
