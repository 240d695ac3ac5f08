use crate::schema::Candlestick;

/// Receiver is the contract every output sink implements.
///
/// The collector calls `collect` once per candle, in extraction order,
/// and `close` exactly once after the last `collect` has returned.
///
/// THREAD SAFETY:
/// - Must be Send + Sync; receivers are shared with the collector's
///   consumer task via `Arc`
/// - Any internal mutable state (file handles, buffers) must be
///   guarded by the receiver itself. With parallel fan-out, different
///   receivers run at the same time, but a single receiver still sees
///   one candle at a time
///
#[async_trait::async_trait]
pub trait Receiver: Send + Sync {

    /// Short identifier used in error reports (e.g. "csv:out.csv").
    fn name(&self) -> &str;

    /// Persists / forwards one candle.
    ///
    /// A failure only affects this receiver and this candle;
    /// the collector reports it and keeps going.
    async fn collect(&self, candle: &Candlestick) -> anyhow::Result<()>;

    /// Flushes and releases resources.
    ///
    /// No return value: failures must be logged by the receiver itself.
    /// Calling it more than once must be harmless.
    async fn close(&self);
}
