use std::time::Duration;

use clap::Parser;
use log::{error, info};
use tokio::time::{Instant, sleep};

use candle_extractor::{
    Collector, Extractor,
    config::{Cli, Config},
    exchanges::get_client,
    receivers, util,
};

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// Responsibilities:
// - Initialize logging and the TLS backend
// - Load configuration (file + CLI)
// - Start the extractor
// - Register receivers and collect until the range is exhausted
//
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli)?;

    let default_level = if config.debug.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    // rustls >= 0.23 requires an explicit CryptoProvider,
    // installed before the first HTTP client is built
    util::install_crypto_provider();

    let client = get_client(&config.exchange)?;
    let extractor = Extractor::with_min_interval(client, config.min_interval());

    // Outputs are opened before the first request goes out, so a bad
    // path fails the run without touching the exchange
    let job = config.job()?;
    let mut collector = Collector::new(extractor.clone()).with_fan_out(config.collector.fan_out());
    for receiver in receivers::from_config(&config.outputs)? {
        collector.add(receiver);
    }

    info!("Extracting...");
    let started = Instant::now();

    extractor.start(job)?;

    // --------------------------------------------------------
    // Ctrl-C: stop requesting new windows, let the collector
    // drain what was already extracted and close the receivers
    // --------------------------------------------------------
    tokio::spawn({
        let extractor = extractor.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, stopping extraction");
                extractor.stop();
            }
        }
    });

    // --------------------------------------------------------
    // Periodic progress line (low-noise)
    // --------------------------------------------------------
    let progress = (config.collector.progress_interval_secs > 0).then(|| {
        let metrics = extractor.metrics();
        let every = Duration::from_secs(config.collector.progress_interval_secs);
        tokio::spawn(async move {
            loop {
                sleep(every).await;
                info!("[PROGRESS] {}", metrics.snapshot());
            }
        })
    });

    let collected = collector.collect().await;
    extractor.join().await;

    if let Some(progress) = progress {
        progress.abort();
    }

    if let Err(e) = &collected {
        error!("collection failed: {e}");
    }
    collected?;

    info!("[SUMMARY] {}", extractor.metrics().snapshot());
    info!("...Done in {:?}", started.elapsed());

    Ok(())
}
