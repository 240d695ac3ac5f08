use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use reqwest::{Client, Url};
use serde::Serialize;

use crate::{config::ElasticsearchConfig, schema::Candlestick, util};

use super::Receiver;

/// Upserts every candle into an Elasticsearch index.
///
/// Document address:
///     {base_url}/{granularity}/{datetime}/_update
///
/// The granularity is the type and the canonical datetime the ID,
/// so re-running an extraction overwrites instead of duplicating.
pub struct ElasticsearchReceiver {
    name: String,
    base_url: Url,
    client: Client,
}

/// Upsert request body.
#[derive(Serialize)]
struct UpsertBody<'a> {
    doc: &'a Candlestick,
    doc_as_upsert: bool,
}

impl ElasticsearchReceiver {
    pub fn new(cfg: &ElasticsearchConfig) -> anyhow::Result<Self> {
        Self::with_base_url(&cfg.base_url())
    }

    /// Builds a receiver for `{scheme}://{host}:{port}/{index}`.
    pub fn with_base_url(base_url: &str) -> anyhow::Result<Self> {
        util::install_crypto_provider();

        let base_url = Url::parse(base_url)
            .with_context(|| format!("invalid elasticsearch url [{base_url}]"))?;
        if base_url.cannot_be_a_base() {
            bail!("elasticsearch url cannot be a base [{base_url}]");
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("building elasticsearch client")?;

        Ok(Self {
            name: format!("elasticsearch:{base_url}"),
            base_url,
            client,
        })
    }

    fn update_url(&self, candle: &Candlestick) -> anyhow::Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("elasticsearch url cannot be a base"))?
            .pop_if_empty()
            .push(&candle.granularity.to_string())
            .push(&candle.datetime)
            .push("_update");
        Ok(url)
    }
}

#[async_trait::async_trait]
impl Receiver for ElasticsearchReceiver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&self, candle: &Candlestick) -> anyhow::Result<()> {
        let url = self.update_url(candle)?;
        let body = UpsertBody {
            doc: candle,
            doc_as_upsert: true,
        };

        let res = self.client.post(url).json(&body).send().await?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            bail!("ERR: [{}] {}", status.as_u16(), text);
        }
        Ok(())
    }

    async fn close(&self) {
        // Nothing buffered; every upsert is its own request
    }
}
