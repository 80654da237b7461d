// =============================================================================
// Binance REST API Client — public market data
// =============================================================================
//
// The board only needs unsigned endpoints, so no API key is configured.
// Every response feeds the shared rate-limit tracker.
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

use crate::binance::rate_limit::{kline_weight, RateLimitTracker};
use crate::market_data::candle_feed::{parse_string_f64, Candle};
use crate::types::Interval;

/// Public REST endpoint.
pub const DEFAULT_REST_URL: &str = "https://api.binance.com";

/// Binance answers 451 from jurisdictions it does not serve.
const STATUS_REGION_RESTRICTED: u16 = 451;

/// Binance REST API client for public market data.
#[derive(Clone)]
pub struct BinanceClient {
    base_url: String,
    client: reqwest::Client,
    rate_limits: Arc<RateLimitTracker>,
}

impl BinanceClient {
    /// Create a client against `base_url` (normally [`DEFAULT_REST_URL`]).
    pub fn new(base_url: impl Into<String>, rate_limits: Arc<RateLimitTracker>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("failed to build reqwest client")?;

        debug!(base_url = %base_url, "BinanceClient initialised");

        Ok(Self {
            base_url,
            client,
            rate_limits,
        })
    }

    /// GET /api/v3/klines (public, unsigned).
    ///
    /// Returns candles oldest-first, parsed from Binance's array-of-arrays
    /// response format.
    ///
    /// Array indices:
    ///   [0] openTime, [1] open, [2] high, [3] low, [4] close, [5] volume,
    ///   [6] closeTime, [7] quoteAssetVolume, [8] numberOfTrades
    #[instrument(skip(self), name = "binance::get_klines")]
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: Interval,
        limit: u32,
    ) -> Result<Vec<Candle>> {
        if !self.rate_limits.can_send_request(kline_weight(limit)) {
            anyhow::bail!("kline request withheld: Binance request weight budget exhausted");
        }

        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url, symbol, interval, limit
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /api/v3/klines request failed")?;

        self.rate_limits.update_from_headers(resp.headers());

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse klines response")?;

        if status.as_u16() == STATUS_REGION_RESTRICTED {
            let msg = body["msg"]
                .as_str()
                .unwrap_or("Binance API is not available from this region");
            warn!(status = %status, msg, "Binance rejected request by region");
            anyhow::bail!("Binance region restriction: {msg}");
        }

        if !status.is_success() {
            anyhow::bail!(
                "Binance GET /api/v3/klines returned {}: {}",
                status,
                body
            );
        }

        parse_klines(&body).map(|candles| {
            debug!(symbol, %interval, count = candles.len(), "klines fetched");
            candles
        })
    }
}

/// Parse the klines array. Rows with too few columns are skipped.
pub fn parse_klines(body: &serde_json::Value) -> Result<Vec<Candle>> {
    let raw = body
        .as_array()
        .context("klines response is not an array")?;

    let mut candles = Vec::with_capacity(raw.len());

    for entry in raw {
        let arr = entry
            .as_array()
            .context("kline entry is not an array")?;

        if arr.len() < 7 {
            warn!("skipping malformed kline entry with {} elements", arr.len());
            continue;
        }

        let open_time = arr[0].as_i64().context("kline openTime is not an integer")?;
        let open = parse_string_f64(&arr[1], "open")?;
        let high = parse_string_f64(&arr[2], "high")?;
        let low = parse_string_f64(&arr[3], "low")?;
        let close = parse_string_f64(&arr[4], "close")?;
        let volume = parse_string_f64(&arr[5], "volume")?;
        let close_time = arr[6].as_i64().context("kline closeTime is not an integer")?;

        candles.push(Candle::new(open_time, open, high, low, close, volume, close_time));
    }

    Ok(candles)
}

impl std::fmt::Debug for BinanceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceClient")
            .field("base_url", &self.base_url)
            .field("rate_limits", &self.rate_limits)
            .finish()
    }
}
