use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use reqwest::{Client, Url, header};

use crate::{
    config::ExchangeConfig,
    schema::{RawRate, TimeWindow},
    util,
};

use super::adapter::ExchangeClient;

pub const DEFAULT_BASE_URL: &str = "https://api.exchange.coinbase.com";

/// Coinbase Exchange (formerly GDAX) historic rates client
///
/// Endpoint:
///     GET /products/{product}/candles?start&end&granularity
///
/// Response rows:
///     [time, low, high, open, close, volume]
///
/// DESIGN:
/// - Public market data, no authentication
/// - Pure request/decode, no pacing or retries
/// - Rows come back newest first; they are returned oldest first
pub struct CoinbaseClient {
    base_url: Url,
    client: Client,
}

/// One response row, decoded positionally.
type Row = (i64, f64, f64, f64, f64, f64);

impl CoinbaseClient {
    pub fn new(cfg: &ExchangeConfig) -> anyhow::Result<Self> {
        util::install_crypto_provider();

        // The public API rejects requests without a user agent
        let mut builder = Client::builder().user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ));
        if let Some(secs) = cfg.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        let raw = cfg.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let base_url =
            Url::parse(raw).with_context(|| format!("invalid coinbase url [{raw}]"))?;
        if base_url.cannot_be_a_base() {
            bail!("coinbase url cannot be a base [{raw}]");
        }

        Ok(Self {
            base_url,
            client: builder.build().context("building coinbase client")?,
        })
    }

    /// `{base_url}/products/{product}/candles`, with `product` encoded
    /// as a single path segment.
    fn candles_url(&self, product: &str) -> anyhow::Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("coinbase url cannot be a base"))?
            .pop_if_empty()
            .push("products")
            .push(product)
            .push("candles");
        Ok(url)
    }
}

fn to_rate(row: Row) -> anyhow::Result<RawRate> {
    let (time, low, high, open, close, volume) = row;
    Ok(RawRate {
        time: util::from_unix_secs(time).ok_or_else(|| anyhow!("bad candle time {time}"))?,
        low,
        high,
        open,
        close,
        volume,
    })
}

#[async_trait::async_trait]
impl ExchangeClient for CoinbaseClient {

    fn name(&self) -> &'static str {
        "coinbase"
    }

    async fn get_historic_rates(
        &self,
        product: &str,
        window: &TimeWindow,
        granularity: i64,
    ) -> anyhow::Result<Vec<RawRate>> {
        let url = self.candles_url(product)?;

        let res = self
            .client
            .get(url.clone())
            .header(header::ACCEPT, "application/json")
            .query(&[
                ("start", window.start.to_rfc3339()),
                ("end", window.end.to_rfc3339()),
                ("granularity", granularity.to_string()),
            ])
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            bail!("coinbase responded [{}] {}", status.as_u16(), text);
        }

        let rows: Vec<Row> = res.json().await.context("decoding candles")?;
        let mut rates = rows.into_iter().map(to_rate).collect::<anyhow::Result<Vec<_>>>()?;
        rates.sort_by_key(|r| r.time);

        Ok(rates)
    }
}
