use std::sync::{Arc, atomic::Ordering};

use futures_util::future::join_all;

use crate::{
    error::PipelineError,
    metrics::RunMetrics,
    receivers::Receiver,
    schema::Candlestick,
};

use super::ErrorHandler;

/// How one candle is delivered to the registered receivers.
///
/// Both modes finish delivering a candle to *every* receiver before
/// the next candle is dequeued, so per-receiver order always matches
/// extraction order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FanOut {
    /// Visit receivers one after another, in registration order
    #[default]
    Sequential,

    /// Call all receivers at once and wait for all of them
    Parallel,
}

impl FanOut {
    /// Delivers one candle; every receiver failure goes to `handler`.
    ///
    /// The candle counts as delivered when at least one receiver took it.
    pub async fn deliver(
        self,
        candle: &Candlestick,
        receivers: &[Arc<dyn Receiver>],
        handler: &ErrorHandler,
        metrics: &RunMetrics,
    ) {
        let mut stored = false;
        match self {
            FanOut::Sequential => {
                for receiver in receivers {
                    let result = receiver.collect(candle).await;
                    stored |= report(receiver.as_ref(), result, handler, metrics);
                }
            }
            FanOut::Parallel => {
                let results = join_all(receivers.iter().map(|r| r.collect(candle))).await;
                for (receiver, result) in receivers.iter().zip(results) {
                    stored |= report(receiver.as_ref(), result, handler, metrics);
                }
            }
        }

        if stored {
            metrics.candles_delivered.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Returns whether the receiver stored the candle.
fn report(
    receiver: &dyn Receiver,
    result: anyhow::Result<()>,
    handler: &ErrorHandler,
    metrics: &RunMetrics,
) -> bool {
    let Err(source) = result else {
        return true;
    };
    metrics.receiver_errors.fetch_add(1, Ordering::Relaxed);
    handler(PipelineError::Receiver {
        receiver: receiver.name().to_string(),
        source,
    });
    false
}
