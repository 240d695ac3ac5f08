//! Pipeline error taxonomy.
//!
//! Three kinds of failure flow through here:
//! - request errors: one window's exchange call failed (recoverable)
//! - receiver errors: one sink failed one record (recoverable)
//! - lifecycle errors: misuse of the extractor or collector (fatal to the call)
//!
//! Recoverable errors never stop the run; they are pushed onto the
//! error stream or handed to the collector's error handler.

use crate::schema::TimeWindow;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Granularity must be a positive number of seconds
    #[error("invalid granularity: {0}s")]
    InvalidGranularity(i64),

    /// The extraction range is empty or inverted
    #[error("invalid range: end {end} is not after start {start}")]
    InvalidRange { start: String, end: String },

    #[error("extractor already started")]
    AlreadyStarted,

    /// The extractor has not been started, or its streams were already taken
    #[error("extractor streams unavailable (not started or already consumed)")]
    NotStarted,

    #[error("no receivers set for the collector")]
    NoReceivers,

    #[error("collection already started")]
    AlreadyCollecting,

    #[error("collector already closed")]
    Closed,

    /// One window's exchange request failed
    #[error("request error [{product}] {window}: {source}")]
    Request {
        product: String,
        window: TimeWindow,
        #[source]
        source: anyhow::Error,
    },

    /// One receiver failed to persist one record
    #[error("receiver error [{receiver}]: {source}")]
    Receiver {
        receiver: String,
        #[source]
        source: anyhow::Error,
    },

    /// A consumer task ended abnormally
    #[error("collector task failed: {0}")]
    Task(String),
}

impl PipelineError {
    /// True for errors the pipeline absorbs and keeps running after.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Request { .. } | Self::Receiver { .. })
    }
}
