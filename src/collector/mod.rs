/// Collector module
///
/// Fans every candle produced by an `Extractor` out to all registered
/// receivers and routes every failure to a single error handler.
///
/// The collector acts as the layer between:
/// - The extractor (record + error streams)
/// - The receivers (CSV, JSON, index, stdout, ...)
///
/// Design notes:
/// - Sink-specific logic MUST NOT live here
/// - A failing receiver or window never stops the pipeline
/// - Fan-out for one candle completes before the next is dequeued,
///   so every receiver sees candles in extraction order
pub mod fanout;

use std::sync::{Arc, Mutex, MutexGuard};

use log::{error, warn};
use tokio::sync::mpsc;

use crate::{
    error::PipelineError,
    extractor::Extractor,
    metrics::RunMetrics,
    receivers::Receiver,
    schema::Candlestick,
};

pub use fanout::FanOut;

/// Callback invoked synchronously for every extractor and receiver error.
pub type ErrorHandler = Arc<dyn Fn(PipelineError) + Send + Sync>;

/// Default handler: log and keep going.
pub fn log_errors() -> ErrorHandler {
    Arc::new(|err: PipelineError| error!("extraction error: {err}"))
}

pub struct Collector {
    extractor: Extractor,
    receivers: Vec<Arc<dyn Receiver>>,
    error_handler: ErrorHandler,
    fan_out: FanOut,

    phase: Mutex<Phase>,
}

/// Collector lifecycle. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Ready,
    Collecting,
    Closed,
}

impl Collector {
    /// Binds a collector to an extractor.
    ///
    /// The extractor may be started before or after construction,
    /// but must be started before `collect()`.
    pub fn new(extractor: Extractor) -> Self {
        Self {
            extractor,
            receivers: Vec::new(),
            error_handler: log_errors(),
            fan_out: FanOut::default(),
            phase: Mutex::new(Phase::Ready),
        }
    }

    pub fn with_error_handler(mut self, handler: ErrorHandler) -> Self {
        self.error_handler = handler;
        self
    }

    pub fn with_fan_out(mut self, fan_out: FanOut) -> Self {
        self.fan_out = fan_out;
        self
    }

    /// Registers a receiver.
    ///
    /// Takes `&mut self`, so it can never race an active `collect()`.
    pub fn add(&mut self, receiver: Arc<dyn Receiver>) {
        self.receivers.push(receiver);
    }

    pub fn receivers(&self) -> &[Arc<dyn Receiver>] {
        &self.receivers
    }

    /// Drains the extractor's streams until both are closed.
    ///
    /// Runs two consumer tasks:
    /// - records: fan each candle out to every receiver
    /// - errors: forward each extractor error to the error handler
    ///
    /// Once both are done every receiver is closed exactly once.
    ///
    /// ERRORS (returned before any work is done):
    /// - `NoReceivers` when nothing is registered
    /// - `AlreadyCollecting` when a collection is active
    /// - `Closed` when the receivers were already closed
    /// - `NotStarted` when the extractor streams are unavailable
    ///
    pub async fn collect(&self) -> Result<(), PipelineError> {
        if self.receivers.is_empty() {
            return Err(PipelineError::NoReceivers);
        }
        {
            let mut phase = self.phase();
            match *phase {
                Phase::Collecting => return Err(PipelineError::AlreadyCollecting),
                Phase::Closed => return Err(PipelineError::Closed),
                Phase::Ready => *phase = Phase::Collecting,
            }
        }

        let (Some(records), Some(errors)) = (self.extractor.records(), self.extractor.errors())
        else {
            *self.phase() = Phase::Ready;
            return Err(PipelineError::NotStarted);
        };

        let metrics = self.extractor.metrics();

        let record_task = tokio::spawn(drain_records(
            records,
            self.receivers.clone(),
            self.error_handler.clone(),
            self.fan_out,
            metrics,
        ));
        let error_task = tokio::spawn(drain_errors(errors, self.error_handler.clone()));

        let (records_done, errors_done) = tokio::join!(record_task, error_task);

        *self.phase() = Phase::Closed;
        self.close_receivers().await;

        for done in [records_done, errors_done] {
            if let Err(e) = done {
                return Err(PipelineError::Task(e.to_string()));
            }
        }
        Ok(())
    }

    /// Closes every receiver exactly once.
    ///
    /// Happens automatically at the end of `collect()`. Ignored while a
    /// collection is active. After it, `collect()` fails with `Closed`.
    pub async fn close(&self) {
        {
            let mut phase = self.phase();
            match *phase {
                Phase::Collecting => {
                    warn!("close requested during an active collection, ignoring");
                    return;
                }
                Phase::Closed => return,
                Phase::Ready => *phase = Phase::Closed,
            }
        }
        self.close_receivers().await;
    }

    async fn close_receivers(&self) {
        for receiver in &self.receivers {
            receiver.close().await;
        }
    }

    fn phase(&self) -> MutexGuard<'_, Phase> {
        self.phase
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn drain_records(
    mut records: mpsc::Receiver<Candlestick>,
    receivers: Vec<Arc<dyn Receiver>>,
    handler: ErrorHandler,
    fan_out: FanOut,
    metrics: Arc<RunMetrics>,
) {
    while let Some(candle) = records.recv().await {
        fan_out.deliver(&candle, &receivers, &handler, &metrics).await;
    }
}

async fn drain_errors(mut errors: mpsc::Receiver<PipelineError>, handler: ErrorHandler) {
    while let Some(err) = errors.recv().await {
        handler(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchanges::adapter::ExchangeClient;
    use crate::extractor::ExtractionJob;
    use crate::schema::{RawRate, TimeWindow};
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Collect(i64),
        Close,
    }

    /// Records every call; fails `collect` for the listed timestamps.
    struct Recording {
        name: String,
        calls: Mutex<Vec<Call>>,
        fail_on: Vec<i64>,
    }

    impl Recording {
        fn new(name: &str, fail_on: &[i64]) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                calls: Mutex::new(Vec::new()),
                fail_on: fail_on.to_vec(),
            })
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Receiver for Recording {
        fn name(&self) -> &str {
            &self.name
        }

        async fn collect(&self, candle: &Candlestick) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(Call::Collect(candle.timestamp));
            if self.fail_on.contains(&candle.timestamp) {
                anyhow::bail!("cannot store {}", candle.timestamp);
            }
            Ok(())
        }

        async fn close(&self) {
            self.calls.lock().unwrap().push(Call::Close);
        }
    }

    /// Two daily records per window request, or an error for every window.
    struct TwoPerWindow {
        fail: bool,
    }

    #[async_trait::async_trait]
    impl ExchangeClient for TwoPerWindow {
        fn name(&self) -> &'static str {
            "two"
        }

        async fn get_historic_rates(
            &self,
            _product: &str,
            window: &TimeWindow,
            granularity: i64,
        ) -> anyhow::Result<Vec<RawRate>> {
            if self.fail {
                anyhow::bail!("rate limited");
            }
            Ok((0..2)
                .map(|i| RawRate {
                    time: window.start + chrono::Duration::seconds(granularity * i),
                    low: 1.0,
                    high: 1.0,
                    open: 1.0,
                    close: 1.0,
                    volume: 1.0,
                })
                .collect())
        }
    }

    fn started_extractor(fail: bool) -> Extractor {
        let extractor = Extractor::new(Arc::new(TwoPerWindow { fail }));
        let start = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        extractor
            .start(ExtractionJob {
                product: "ETH-USD".into(),
                start,
                end: start + chrono::Duration::days(2),
                granularity: 86_400,
                buffer_size: 4,
            })
            .unwrap();
        extractor
    }

    fn capture() -> (ErrorHandler, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: ErrorHandler = Arc::new(move |err: PipelineError| {
            sink.lock().unwrap().push(err.to_string());
        });
        (handler, seen)
    }

    #[tokio::test(start_paused = true)]
    async fn failing_receiver_does_not_block_others_or_later_records() {
        let (handler, seen) = capture();
        let a = Recording::new("a", &[1_609_459_200]);
        let b = Recording::new("b", &[]);

        let mut collector = Collector::new(started_extractor(false)).with_error_handler(handler);
        collector.add(a.clone());
        collector.add(b.clone());
        collector.collect().await.unwrap();

        let expected = vec![
            Call::Collect(1_609_459_200),
            Call::Collect(1_609_545_600),
            Call::Close,
        ];
        assert_eq!(a.calls(), expected);
        assert_eq!(b.calls(), expected);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("receiver error [a]"));
    }

    #[tokio::test(start_paused = true)]
    async fn extractor_errors_reach_the_handler() {
        let (handler, seen) = capture();
        let a = Recording::new("a", &[]);

        let mut collector = Collector::new(started_extractor(true)).with_error_handler(handler);
        collector.add(a.clone());
        collector.collect().await.unwrap();

        assert_eq!(a.calls(), vec![Call::Close]);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("rate limited"));
    }

    #[tokio::test(start_paused = true)]
    async fn collect_without_receivers_does_nothing() {
        let extractor = started_extractor(false);
        let collector = Collector::new(extractor.clone());

        let err = collector.collect().await.unwrap_err();
        assert!(matches!(err, PipelineError::NoReceivers));

        // streams were not touched
        assert!(extractor.records().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn collect_requires_a_started_extractor() {
        let extractor = Extractor::new(Arc::new(TwoPerWindow { fail: false }));
        let mut collector = Collector::new(extractor);
        let a = Recording::new("a", &[]);
        collector.add(a.clone());

        assert!(matches!(
            collector.collect().await,
            Err(PipelineError::NotStarted)
        ));
        assert!(a.calls().is_empty());
    }

    /// Holds every candle for a second so a collection stays active.
    struct Slow;

    #[async_trait::async_trait]
    impl Receiver for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        async fn collect(&self, _candle: &Candlestick) -> anyhow::Result<()> {
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            Ok(())
        }

        async fn close(&self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_collect_is_rejected() {
        let mut collector = Collector::new(started_extractor(false));
        collector.add(Arc::new(Slow));
        let collector = Arc::new(collector);

        let first = tokio::spawn({
            let collector = collector.clone();
            async move { collector.collect().await }
        });
        while *collector.phase() != Phase::Collecting {
            tokio::task::yield_now().await;
        }

        assert!(matches!(
            collector.collect().await,
            Err(PipelineError::AlreadyCollecting)
        ));
        first.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn receivers_are_closed_once() {
        let mut collector = Collector::new(started_extractor(false));
        let a = Recording::new("a", &[]);
        collector.add(a.clone());

        collector.collect().await.unwrap();
        collector.close().await;

        let closes = a.calls().iter().filter(|c| **c == Call::Close).count();
        assert_eq!(closes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_fan_out_keeps_per_receiver_order() {
        let a = Recording::new("a", &[]);
        let b = Recording::new("b", &[1_609_545_600]);

        let mut collector = Collector::new(started_extractor(false)).with_fan_out(FanOut::Parallel);
        collector.add(a.clone());
        collector.add(b.clone());
        collector.collect().await.unwrap();

        let expected = vec![
            Call::Collect(1_609_459_200),
            Call::Collect(1_609_545_600),
            Call::Close,
        ];
        assert_eq!(a.calls(), expected);
        assert_eq!(b.calls(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn collect_after_close_is_rejected() {
        let extractor = started_extractor(false);
        let mut collector = Collector::new(extractor.clone());
        let a = Recording::new("a", &[]);
        collector.add(a.clone());

        collector.close().await;
        assert!(matches!(
            collector.collect().await,
            Err(PipelineError::Closed)
        ));

        // Closed once, never written to, streams left untouched
        assert_eq!(a.calls(), vec![Call::Close]);
        assert!(extractor.records().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn second_collect_after_a_finished_run_is_rejected() {
        let mut collector = Collector::new(started_extractor(false));
        let a = Recording::new("a", &[]);
        collector.add(a.clone());

        collector.collect().await.unwrap();
        assert!(matches!(
            collector.collect().await,
            Err(PipelineError::Closed)
        ));
        assert_eq!(a.calls().last(), Some(&Call::Close));
    }
}
