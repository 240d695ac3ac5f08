use crate::schema::{RawRate, TimeWindow};

/// ExchangeClient is the seam between the extractor and a concrete
/// exchange REST API.
///
/// Each implementation must:
/// - Request historic rates for exactly the given window
/// - Return rows in ascending time order
/// - Report transport / HTTP / decode failures as an error
///
/// DESIGN GOALS:
/// - Zero exchange-specific logic in the extractor
/// - One client per exchange
///
/// THREAD SAFETY:
/// - Must be Send + Sync
/// - Instances are shared with the production task via `Arc`
///
#[async_trait::async_trait]
pub trait ExchangeClient: Send + Sync {

    /// Returns the canonical exchange name (e.g. "coinbase").
    fn name(&self) -> &'static str;

    /// Fetches candles for `product` covering `window`.
    ///
    /// CONTRACT:
    /// - `granularity` is the bucket width in seconds
    /// - The caller guarantees the window holds at most the per-request
    ///   record cap; clients must not split it again
    /// - Must not retry internally; the extractor reports the
    ///   failure and moves on to the next window
    ///
    async fn get_historic_rates(
        &self,
        product: &str,
        window: &TimeWindow,
        granularity: i64,
    ) -> anyhow::Result<Vec<RawRate>>;
}
