//! Extractor
//!
//! Pulls historic candles from an exchange, one planned window at a time,
//! and streams them out as they arrive.
//!
//! Lifecycle:
//!     Idle --start--> Running --(windows exhausted | stop)--> Stopped
//!
//! Streams:
//! - record stream: every candle, in window order then exchange order
//! - error stream: one entry per failed window request
//!
//! Both streams are bounded and closed together when the production
//! task ends. Only the production task owns the senders, so a stream
//! can never be closed while a send to it is in flight.

pub mod pacing;
pub mod planner;

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use crate::{
    error::PipelineError,
    exchanges::adapter::ExchangeClient,
    metrics::RunMetrics,
    schema::{Candlestick, TimeWindow},
};

use pacing::RateLimiter;

/// Default capacity of the record and error streams.
pub const DEFAULT_BUFFER_SIZE: usize = 100;

/// What to extract. Immutable for the lifetime of a run.
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    /// Exchange product identifier (e.g. "BTC-USD")
    pub product: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,

    /// Bucket width in seconds
    pub granularity: i64,

    /// Capacity of each output stream
    pub buffer_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Stopped,
}

/// State shared between the owner handle(s) and the production task.
struct Shared {
    client: Arc<dyn ExchangeClient>,
    limiter: RateLimiter,
    metrics: Arc<RunMetrics>,

    /// Run state. Transitions go through `send_if_modified` so each
    /// check-and-set is atomic.
    state: watch::Sender<RunState>,

    records: Mutex<Option<mpsc::Receiver<Candlestick>>>,
    errors: Mutex<Option<mpsc::Receiver<PipelineError>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Windowed, rate-limited extraction from an `ExchangeClient`.
///
/// Cloning yields another handle to the same run, so one clone can be
/// handed to a `Collector` while another is kept for `stop()`.
#[derive(Clone)]
pub struct Extractor {
    shared: Arc<Shared>,
}

impl Extractor {
    pub fn new(client: Arc<dyn ExchangeClient>) -> Self {
        Self::with_rate_limiter(client, RateLimiter::default())
    }

    pub fn with_rate_limiter(client: Arc<dyn ExchangeClient>, limiter: RateLimiter) -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            shared: Arc::new(Shared {
                client,
                limiter,
                metrics: Arc::new(RunMetrics::default()),
                state,
                records: Mutex::new(None),
                errors: Mutex::new(None),
                task: Mutex::new(None),
            }),
        }
    }

    /// Convenience constructor taking the request spacing directly.
    pub fn with_min_interval(client: Arc<dyn ExchangeClient>, min_interval: Duration) -> Self {
        Self::with_rate_limiter(client, RateLimiter::new(min_interval))
    }

    pub fn state(&self) -> RunState {
        *self.shared.state.borrow()
    }

    pub fn metrics(&self) -> Arc<RunMetrics> {
        self.shared.metrics.clone()
    }

    /// Plans the windows and spawns the production task.
    ///
    /// ERRORS:
    /// - `AlreadyStarted` unless the extractor is `Idle`
    /// - `InvalidGranularity` / `InvalidRange` from the planner;
    ///   the extractor stays `Idle` in that case
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, job: ExtractionJob) -> Result<(), PipelineError> {
        if self.state() != RunState::Idle {
            return Err(PipelineError::AlreadyStarted);
        }

        let windows = planner::plan(job.start, job.end, job.granularity)?;

        let mut claimed = false;
        self.shared.state.send_if_modified(|state| {
            if *state == RunState::Idle {
                *state = RunState::Running;
                claimed = true;
            }
            claimed
        });
        if !claimed {
            return Err(PipelineError::AlreadyStarted);
        }

        let capacity = job.buffer_size.max(1);
        let (record_tx, record_rx) = mpsc::channel(capacity);
        let (error_tx, error_rx) = mpsc::channel(capacity);
        store(&self.shared.records, record_rx);
        store(&self.shared.errors, error_rx);

        self.shared
            .metrics
            .windows_planned
            .store(windows.len(), std::sync::atomic::Ordering::Relaxed);

        info!(
            "extracting {} at {}s over {} window(s) {} -> {}",
            job.product,
            job.granularity,
            windows.len(),
            job.start.to_rfc3339(),
            job.end.to_rfc3339(),
        );

        let shared = self.shared.clone();
        let handle = tokio::spawn(async move {
            produce(shared, job, windows, record_tx, error_tx).await;
        });
        store(&self.shared.task, handle);

        Ok(())
    }

    /// Requests cooperative cancellation.
    ///
    /// The in-flight request (if any) is allowed to finish; no further
    /// window is requested. The streams are closed by the production
    /// task once it observes the stop, never by this call.
    ///
    /// No-op unless `Running`.
    pub fn stop(&self) {
        let stopped = self.shared.state.send_if_modified(|state| {
            if *state == RunState::Running {
                *state = RunState::Stopped;
                true
            } else {
                false
            }
        });
        if stopped {
            info!("extraction stop requested");
        }
    }

    /// Takes the record stream. Single consumer: later calls return `None`.
    pub fn records(&self) -> Option<mpsc::Receiver<Candlestick>> {
        take(&self.shared.records)
    }

    /// Takes the error stream. Single consumer: later calls return `None`.
    pub fn errors(&self) -> Option<mpsc::Receiver<PipelineError>> {
        take(&self.shared.errors)
    }

    /// Waits for the production task to finish.
    ///
    /// Returns immediately if the extractor was never started or the
    /// task was already joined.
    pub async fn join(&self) {
        let handle = take(&self.shared.task);
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("extraction task ended abnormally: {e}");
            }
        }
    }
}

fn store<T>(slot: &Mutex<Option<T>>, value: T) {
    let mut guard = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = Some(value);
}

fn take<T>(slot: &Mutex<Option<T>>) -> Option<T> {
    slot.lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take()
}

/// Resolves once the run state leaves `Running`.
async fn cancelled(state: &mut watch::Receiver<RunState>) {
    let _ = state.wait_for(|s| *s != RunState::Running).await;
}

/// Production loop. Owns both senders; dropping them on return closes
/// the streams.
async fn produce(
    shared: Arc<Shared>,
    job: ExtractionJob,
    windows: Vec<TimeWindow>,
    records: mpsc::Sender<Candlestick>,
    errors: mpsc::Sender<PipelineError>,
) {
    use std::sync::atomic::Ordering;

    let mut state = shared.state.subscribe();
    let last = windows.len().saturating_sub(1);

    'windows: for (i, window) in windows.iter().enumerate() {
        if *state.borrow() != RunState::Running {
            break;
        }

        let started = Instant::now();
        shared.metrics.windows_requested.fetch_add(1, Ordering::Relaxed);

        debug!("=> REQ: [{}:{}] {}", job.product, job.granularity, window);

        match shared
            .client
            .get_historic_rates(&job.product, window, job.granularity)
            .await
        {
            Ok(rates) => {
                debug!("<= RES: {} results", rates.len());

                // The window completed: all of its records go out even if a
                // stop arrived while the request was in flight
                for rate in &rates {
                    let candle = Candlestick::from_rate(job.granularity, rate);
                    if records.send(candle).await.is_err() {
                        // Consumer went away, nobody left to produce for
                        warn!("record stream consumer dropped, ending extraction");
                        break 'windows;
                    }
                    shared.metrics.candles_extracted.fetch_add(1, Ordering::Relaxed);
                }
            }

            Err(source) => {
                shared.metrics.window_errors.fetch_add(1, Ordering::Relaxed);
                let err = PipelineError::Request {
                    product: job.product.clone(),
                    window: *window,
                    source,
                };
                if let Err(mpsc::error::SendError(err)) = errors.send(err).await {
                    warn!("error stream consumer dropped: {err}");
                }
            }
        }

        // Pace between windows, measured from the request start
        if i < last {
            tokio::select! {
                _ = shared.limiter.wait(started) => {}
                _ = cancelled(&mut state) => break 'windows,
            }
        }
    }

    // Natural completion: the production task is the only writer of this transition
    shared.state.send_if_modified(|s| {
        if *s == RunState::Running {
            *s = RunState::Stopped;
            true
        } else {
            false
        }
    });

    info!(
        "extraction finished: {}",
        shared.metrics.snapshot()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RawRate;
    use chrono::TimeZone;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns one rate per bucket in the window; fails for chosen calls.
    struct StubClient {
        calls: AtomicUsize,
        failing: HashSet<usize>,
        starts: Mutex<Vec<Instant>>,
    }

    impl StubClient {
        fn new(failing: &[usize]) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                failing: failing.iter().copied().collect(),
                starts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl ExchangeClient for StubClient {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn get_historic_rates(
            &self,
            _product: &str,
            window: &TimeWindow,
            granularity: i64,
        ) -> anyhow::Result<Vec<RawRate>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.starts.lock().unwrap().push(Instant::now());
            tokio::time::sleep(Duration::from_millis(50)).await;

            if self.failing.contains(&call) {
                anyhow::bail!("window {call} rejected");
            }

            let mut rates = Vec::new();
            let mut t = window.start;
            while t < window.end {
                rates.push(RawRate {
                    time: t,
                    low: 1.0,
                    high: 2.0,
                    open: 1.0,
                    close: 2.0,
                    volume: call as f64,
                });
                t += chrono::Duration::seconds(granularity);
            }
            Ok(rates)
        }
    }

    fn job(days: i64, granularity: i64) -> ExtractionJob {
        let start = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        ExtractionJob {
            product: "BTC-USD".into(),
            start,
            end: start + chrono::Duration::days(days),
            granularity,
            buffer_size: 16,
        }
    }

    async fn drain(extractor: &Extractor) -> (Vec<Candlestick>, Vec<PipelineError>) {
        let mut records = extractor.records().unwrap();
        let mut errors = extractor.errors().unwrap();
        let (candles, errs) = tokio::join!(
            async {
                let mut out = Vec::new();
                while let Some(c) = records.recv().await {
                    out.push(c);
                }
                out
            },
            async {
                let mut out = Vec::new();
                while let Some(e) = errors.recv().await {
                    out.push(e);
                }
                out
            },
        );
        (candles, errs)
    }

    #[tokio::test(start_paused = true)]
    async fn streams_every_window_in_order_then_stops() {
        let client = StubClient::new(&[]);
        let extractor = Extractor::new(client.clone());

        // 3600s * 200 = 200 hours per window; 20 days -> 3 windows
        extractor.start(job(20, 3600)).unwrap();
        assert_eq!(extractor.state(), RunState::Running);

        let (candles, errors) = drain(&extractor).await;
        extractor.join().await;

        assert!(errors.is_empty());
        assert_eq!(candles.len(), 20 * 24);
        assert!(candles.windows(2).all(|p| p[0].timestamp < p[1].timestamp));
        assert_eq!(extractor.state(), RunState::Stopped);
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);

        let snapshot = extractor.metrics().snapshot();
        assert_eq!(snapshot.windows_planned, 3);
        assert_eq!(snapshot.candles_extracted, 480);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_window_is_reported_without_dropping_others() {
        let client = StubClient::new(&[1]);
        let extractor = Extractor::new(client.clone());
        extractor.start(job(20, 3600)).unwrap();

        let (candles, errors) = drain(&extractor).await;

        assert_eq!(errors.len(), 1);
        match &errors[0] {
            PipelineError::Request { product, window, .. } => {
                assert_eq!(product, "BTC-USD");
                assert_eq!(window.span_secs(), 3600 * 200);
            }
            other => panic!("unexpected error {other:?}"),
        }

        // window 0 (200 candles) + window 2 (80 candles), in order
        assert_eq!(candles.len(), 280);
        assert!(candles[..200].iter().all(|c| c.volume == 0.0));
        assert!(candles[200..].iter().all(|c| c.volume == 2.0));
        assert!(candles.windows(2).all(|p| p[0].timestamp < p[1].timestamp));
    }

    #[tokio::test(start_paused = true)]
    async fn requests_are_spaced_by_the_minimum_interval() {
        let client = StubClient::new(&[]);
        let extractor = Extractor::with_min_interval(client.clone(), Duration::from_millis(400));
        extractor.start(job(20, 3600)).unwrap();
        drain(&extractor).await;

        let starts = client.starts.lock().unwrap().clone();
        assert_eq!(starts.len(), 3);
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(400));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_fails_and_spawns_nothing() {
        let client = StubClient::new(&[]);
        let extractor = Extractor::new(client.clone());
        extractor.start(job(4, 86_400)).unwrap();

        let err = extractor.start(job(4, 86_400)).unwrap_err();
        assert!(matches!(err, PipelineError::AlreadyStarted));

        drain(&extractor).await;
        extractor.join().await;
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);

        // Stopped is terminal
        assert!(matches!(
            extractor.start(job(4, 86_400)),
            Err(PipelineError::AlreadyStarted)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_job_leaves_extractor_idle() {
        let extractor = Extractor::new(StubClient::new(&[]));
        let err = extractor.start(job(1, 0)).unwrap_err();

        assert!(matches!(err, PipelineError::InvalidGranularity(0)));
        assert_eq!(extractor.state(), RunState::Idle);
        assert!(extractor.records().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_after_the_in_flight_window() {
        let client = StubClient::new(&[]);
        let extractor = Extractor::new(client.clone());

        // 1 minute candles over 10 days -> 72 windows
        extractor.start(job(10, 60)).unwrap();
        let mut records = extractor.records().unwrap();
        let mut errors = extractor.errors().unwrap();

        // Stop while the first request is still in flight
        tokio::time::sleep(Duration::from_millis(10)).await;
        extractor.stop();
        assert_eq!(extractor.state(), RunState::Stopped);

        let mut delivered = Vec::new();
        while let Some(candle) = records.recv().await {
            delivered.push(candle);
        }
        assert!(errors.recv().await.is_none());
        extractor.join().await;

        // The in-flight window completes in full, nothing after it is requested
        assert_eq!(delivered.len(), planner::MAX_RECORDS_PER_REQUEST as usize);
        assert!(delivered.iter().all(|c| c.granularity == 60));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(extractor.metrics().snapshot().candles_extracted, 200);
    }

    #[tokio::test(start_paused = true)]
    async fn streams_are_single_consumer() {
        let extractor = Extractor::new(StubClient::new(&[]));
        assert!(extractor.records().is_none());

        extractor.start(job(2, 86_400)).unwrap();
        assert!(extractor.records().is_some());
        assert!(extractor.records().is_none());
        assert!(extractor.errors().is_some());
        assert!(extractor.errors().is_none());
    }
}
