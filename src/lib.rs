// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// Each module represents a well-defined responsibility:
//
// - config:     Configuration loaded from JSON + CLI overrides
// - schema:     Candlestick / window value types
// - error:      Pipeline error taxonomy
// - util:       Shared helpers (time, TLS setup)
// - metrics:    Per-run counters
// - exchanges:  Exchange clients and client registry
// - extractor:  Window planning, pacing and the extraction task
// - collector:  Fan-out of extracted candles to receivers
// - receivers:  Output sinks and sink registry
//
pub mod config;
pub mod schema;
pub mod error;
pub mod util;
pub mod metrics;
pub mod exchanges;
pub mod extractor;
pub mod collector;
pub mod receivers;

pub use collector::{Collector, ErrorHandler, FanOut};
pub use error::PipelineError;
pub use extractor::{ExtractionJob, Extractor, RunState};
pub use receivers::Receiver;
pub use schema::{Candlestick, RawRate, TimeWindow};
