use std::{fs, path::Path, path::PathBuf};

use anyhow::{Context, bail};
use chrono::{DateTime, Duration, Utc};
use clap::Parser;
use serde::Deserialize;

use crate::{
    collector::FanOut,
    extractor::{DEFAULT_BUFFER_SIZE, ExtractionJob},
    util,
};

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// Top-level structure loaded from `config.json`.
//
// It defines:
// - Which exchange to pull from
// - What to extract (product, range, granularity)
// - Where to send the candles
// - Collector behaviour
//
// Every section is optional in the file; CLI flags override
// individual fields after loading.
//
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub exchange: ExchangeConfig,
    pub extraction: ExtractionConfig,
    pub outputs: OutputsConfig,
    pub collector: CollectorConfig,
    pub debug: DebugConfig,
}

// ------------------------------------------------------------
// Exchange configuration
// ------------------------------------------------------------
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Exchange identifier (e.g. "coinbase")
    pub name: String,

    /// REST base URL override; the client default is used when absent
    pub base_url: Option<String>,

    /// Per-request deadline. A hung request otherwise blocks the run.
    pub request_timeout_secs: Option<u64>,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            name: "coinbase".into(),
            base_url: None,
            request_timeout_secs: Some(30),
        }
    }
}

// ------------------------------------------------------------
// Extraction configuration
// ------------------------------------------------------------
//
// Times are RFC3339 strings ("2021-01-01T00:00:00Z").
// Missing start/end default to the last 7 days.
//
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Product ID (e.g. "BTC-USD", "ETH-USD")
    pub product: String,

    pub start: Option<String>,
    pub end: Option<String>,

    /// Bucket width in seconds
    pub granularity: i64,

    /// Capacity of the record / error streams
    pub buffer_size: usize,

    /// Minimum spacing between two exchange requests
    pub rate_limit_ms: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            product: String::new(),
            start: None,
            end: None,
            granularity: 86_400,
            buffer_size: DEFAULT_BUFFER_SIZE,
            rate_limit_ms: 400,
        }
    }
}

// ------------------------------------------------------------
// Output configuration
// ------------------------------------------------------------
//
// Each present section registers one receiver.
// With nothing configured, stdout is used.
//
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct OutputsConfig {
    /// Print every candle as one JSON line
    pub stdout: bool,

    /// CSV file path
    pub csv: Option<PathBuf>,

    /// JSON array file path
    pub json: Option<PathBuf>,

    /// Newline-delimited JSON file path
    pub ndjson: Option<PathBuf>,

    pub elasticsearch: Option<ElasticsearchConfig>,
}

impl OutputsConfig {
    pub fn is_empty(&self) -> bool {
        !self.stdout
            && self.csv.is_none()
            && self.json.is_none()
            && self.ndjson.is_none()
            && self.elasticsearch.is_none()
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ElasticsearchConfig {
    pub index: String,
    pub host: String,
    pub port: u16,

    /// Use https instead of http
    pub secure: bool,
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            index: "candlestick".into(),
            host: "localhost".into(),
            port: 9200,
            secure: false,
        }
    }
}

impl ElasticsearchConfig {
    /// `{scheme}://{host}:{port}/{index}`
    pub fn base_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}/{}", scheme, self.host, self.port, self.index)
    }
}

// ------------------------------------------------------------
// Collector configuration
// ------------------------------------------------------------
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CollectorConfig {
    /// Deliver one candle to all receivers concurrently
    pub parallel_fanout: bool,

    /// Seconds between progress log lines (0 disables)
    pub progress_interval_secs: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            parallel_fanout: false,
            progress_interval_secs: 10,
        }
    }
}

impl CollectorConfig {
    pub fn fan_out(&self) -> FanOut {
        if self.parallel_fanout {
            FanOut::Parallel
        } else {
            FanOut::Sequential
        }
    }
}

// ------------------------------------------------------------
// Debug configuration
// ------------------------------------------------------------
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct DebugConfig {
    /// Per-window request logging
    pub verbose: bool,
}

// ------------------------------------------------------------
// Command line
// ------------------------------------------------------------
//
// Flags override the file. Every flag can also come from the
// environment (CANDLE_EXTRACTOR_*).
//
#[derive(Debug, Parser, Clone, Default)]
#[command(name = "candle-extractor", version, about = "Extract historic exchange candles into files and indexes")]
pub struct Cli {
    /// Path to the JSON config file
    #[arg(short, long, env = "CANDLE_EXTRACTOR_CONFIG", default_value = "config.json")]
    pub config: PathBuf,

    /// Product ID to extract [BTC-USD, ETH-USD, LTC-USD]
    #[arg(long, env = "CANDLE_EXTRACTOR_PRODUCT")]
    pub product: Option<String>,

    /// Start time as RFC3339
    #[arg(short = 'S', long, env = "CANDLE_EXTRACTOR_START")]
    pub start: Option<String>,

    /// End time as RFC3339
    #[arg(short = 'E', long, env = "CANDLE_EXTRACTOR_END")]
    pub end: Option<String>,

    /// Bucket width in seconds
    #[arg(short = 'G', long, env = "CANDLE_EXTRACTOR_GRANULARITY")]
    pub granularity: Option<i64>,

    /// Size of the candle buffer waiting for collection
    #[arg(short, long, env = "CANDLE_EXTRACTOR_BUFFER_SIZE")]
    pub buffer_size: Option<usize>,

    /// Minimum milliseconds between exchange requests
    #[arg(long, env = "CANDLE_EXTRACTOR_RATE_LIMIT_MS")]
    pub rate_limit_ms: Option<u64>,

    /// Verbose logging
    #[arg(short, long, env = "CANDLE_EXTRACTOR_VERBOSE")]
    pub verbose: bool,
}

impl Config {
    /// Reads the config file (if it exists) and applies CLI overrides.
    ///
    /// A missing file is fine as long as the CLI names a product;
    /// a present but malformed file is an error.
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let mut cfg = if cli.config.exists() {
            Self::from_file(&cli.config)?
        } else {
            Self::default()
        };
        cfg.apply(cli);
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg = serde_json::from_str(&data)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(cfg)
    }

    fn apply(&mut self, cli: &Cli) {
        let ex = &mut self.extraction;
        if let Some(product) = &cli.product {
            ex.product = product.clone();
        }
        if let Some(start) = &cli.start {
            ex.start = Some(start.clone());
        }
        if let Some(end) = &cli.end {
            ex.end = Some(end.clone());
        }
        if let Some(granularity) = cli.granularity {
            ex.granularity = granularity;
        }
        if let Some(buffer_size) = cli.buffer_size {
            ex.buffer_size = buffer_size;
        }
        if let Some(rate_limit_ms) = cli.rate_limit_ms {
            ex.rate_limit_ms = rate_limit_ms;
        }
        if cli.verbose {
            self.debug.verbose = true;
        }
    }

    /// Rejects configurations the pipeline cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let ex = &self.extraction;
        if ex.product.trim().is_empty() {
            bail!("extraction.product is required");
        }
        if ex.granularity <= 0 {
            bail!("extraction.granularity must be positive, found {}", ex.granularity);
        }
        if ex.buffer_size == 0 {
            bail!("extraction.buffer_size must be at least 1");
        }
        let (start, end) = self.range_at(Utc::now())?;
        if end <= start {
            bail!("extraction.end ({end}) must be after extraction.start ({start})");
        }
        Ok(())
    }

    /// Resolves the extraction range, defaulting to the 7 days before `now`.
    pub fn range_at(&self, now: DateTime<Utc>) -> anyhow::Result<(DateTime<Utc>, DateTime<Utc>)> {
        let start = match &self.extraction.start {
            Some(raw) => util::parse_rfc3339(raw)?,
            None => now - Duration::days(7),
        };
        let end = match &self.extraction.end {
            Some(raw) => util::parse_rfc3339(raw)?,
            None => now,
        };
        Ok((start, end))
    }

    /// Builds the immutable job handed to `Extractor::start`.
    pub fn job(&self) -> anyhow::Result<ExtractionJob> {
        let (start, end) = self.range_at(Utc::now())?;
        Ok(ExtractionJob {
            product: self.extraction.product.clone(),
            start,
            end,
            granularity: self.extraction.granularity,
            buffer_size: self.extraction.buffer_size,
        })
    }

    pub fn min_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.extraction.rate_limit_ms)
    }
}
