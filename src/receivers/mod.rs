//! Output receivers and receiver registry
//!
//! This module provides:
//! - The `Receiver` contract every sink implements
//! - One module per sink (stdout, CSV, JSON, NDJSON, Elasticsearch)
//! - A factory building the configured receivers
//!
//! The collector interacts with sinks exclusively through `Receiver`.

pub mod csv_file;
pub mod elasticsearch;
pub mod json_file;
pub mod receiver;
pub mod writer;

use std::sync::Arc;

use log::info;

use crate::config::OutputsConfig;

pub use receiver::Receiver;

/// Builds every receiver enabled in the outputs configuration.
///
/// Order is fixed: CSV, JSON, NDJSON, Elasticsearch, stdout.
/// Stdout is added when explicitly enabled *or* when nothing else is,
/// so a run always has at least one receiver.
///
/// File receivers create (truncate) their files here; an unwritable
/// path fails the whole build before extraction starts.
pub fn from_config(outputs: &OutputsConfig) -> anyhow::Result<Vec<Arc<dyn Receiver>>> {
    let mut receivers: Vec<Arc<dyn Receiver>> = Vec::new();

    if let Some(path) = &outputs.csv {
        receivers.push(Arc::new(csv_file::CsvReceiver::create(path)?));
    }
    if let Some(path) = &outputs.json {
        receivers.push(Arc::new(json_file::JsonArrayReceiver::create(path)?));
    }
    if let Some(path) = &outputs.ndjson {
        receivers.push(Arc::new(json_file::JsonLinesReceiver::create(path)?));
    }
    if let Some(es) = &outputs.elasticsearch {
        receivers.push(Arc::new(elasticsearch::ElasticsearchReceiver::new(es)?));
    }
    if outputs.stdout || receivers.is_empty() {
        receivers.push(Arc::new(json_file::JsonLinesReceiver::stdout()));
    }

    for r in &receivers {
        info!("receiver registered: {}", r.name());
    }

    Ok(receivers)
}
