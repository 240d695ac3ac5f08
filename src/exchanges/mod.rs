//! Exchange client registry and factory
//!
//! This module provides:
//! - The `ExchangeClient` abstraction used by the extractor
//! - A factory function to resolve clients by name
//!
//! All exchange-specific logic must live in dedicated client modules.

pub mod adapter;
pub mod coinbase;

use std::sync::Arc;

use anyhow::bail;

use adapter::ExchangeClient;
use crate::config::ExchangeConfig;

/// Returns an exchange client for the configured exchange.
///
/// CONTRACT:
/// - `cfg.name` must match a supported exchange (lowercase)
/// - "gdax" is accepted as the historical name of Coinbase
///
/// THREADING:
/// - Clients are wrapped in `Arc` and shared with the production task
///
pub fn get_client(cfg: &ExchangeConfig) -> anyhow::Result<Arc<dyn ExchangeClient>> {
    match cfg.name.as_str() {
        "coinbase" | "gdax" => Ok(Arc::new(coinbase::CoinbaseClient::new(cfg)?)),
        other => bail!("exchange '{other}' is not supported"),
    }
}
