use std::sync::atomic::{AtomicUsize, Ordering};

/// Runtime counters for one extraction run.
///
/// Purpose:
/// - Track request windows (planned / requested / failed)
/// - Track throughput (extracted / delivered candles)
/// - Track sink failures
///
/// Design:
/// - Lock-free (Atomics)
/// - Shared via `Arc` between the extractor and the collector
/// - One instance per run, no process-wide registry
#[derive(Debug, Default)]
pub struct RunMetrics {
    // Windows
    pub windows_planned: AtomicUsize,
    pub windows_requested: AtomicUsize,
    pub window_errors: AtomicUsize,

    // Throughput
    pub candles_extracted: AtomicUsize,
    /// Candles stored by at least one receiver
    pub candles_delivered: AtomicUsize,

    pub receiver_errors: AtomicUsize,
}

/// Point-in-time copy of `RunMetrics`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub windows_planned: usize,
    pub windows_requested: usize,
    pub window_errors: usize,
    pub candles_extracted: usize,
    pub candles_delivered: usize,
    pub receiver_errors: usize,
}

impl RunMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            windows_planned: self.windows_planned.load(Ordering::Relaxed),
            windows_requested: self.windows_requested.load(Ordering::Relaxed),
            window_errors: self.window_errors.load(Ordering::Relaxed),
            candles_extracted: self.candles_extracted.load(Ordering::Relaxed),
            candles_delivered: self.candles_delivered.load(Ordering::Relaxed),
            receiver_errors: self.receiver_errors.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "windows={}/{} window_err={} extracted={} delivered={} recv_err={}",
            self.windows_requested,
            self.windows_planned,
            self.window_errors,
            self.candles_extracted,
            self.candles_delivered,
            self.receiver_errors,
        )
    }
}
