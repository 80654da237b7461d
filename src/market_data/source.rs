// =============================================================================
// Snapshot Sources — where a full board reload comes from
// =============================================================================
//
// Two sources are supported:
//
//   Exchange  - Binance REST klines, classified locally.
//   Remote    - another board server's `/api/baccarat` endpoint, whose
//               `{ success, data, error }` envelope carries ready-made records.
//
// Either way the result is a `FetchedBatch` of validated records plus a count
// of elements that failed validation. Failure is split into transport errors
// (retryable) and explicit rejections by the upstream.
// =============================================================================

use std::future::Future;
use std::time::Duration;

use chrono::FixedOffset;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::binance::client::BinanceClient;
use crate::board::record::{CandleRecord, RawCandleRecord};
use crate::market_data::classifier::ResultClassifier;
use crate::types::Interval;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("upstream rejected request: {0}")]
    Rejected(String),
}

/// Validated records from one fetch, plus the number of dropped elements.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedBatch {
    pub records: Vec<CandleRecord>,
    pub rejected: usize,
}

/// Anything able to produce a full snapshot for an interval.
pub trait SnapshotSource: Send + Sync + 'static {
    fn fetch(
        &self,
        interval: Interval,
    ) -> impl Future<Output = Result<FetchedBatch, FetchError>> + Send;
}

// ---------------------------------------------------------------------------
// Exchange
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BinanceSource {
    client: BinanceClient,
    symbol: String,
    limit: u32,
}

impl BinanceSource {
    pub fn new(client: BinanceClient, symbol: impl Into<String>, limit: u32) -> Self {
        Self {
            client,
            symbol: symbol.into(),
            limit,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Fetch with an explicit limit; the series is classified from its first
    /// candle, so flat candles at the head default to Player.
    pub async fn fetch_limit(
        &self,
        interval: Interval,
        limit: u32,
    ) -> Result<FetchedBatch, FetchError> {
        let candles = self
            .client
            .get_klines(&self.symbol, interval, limit)
            .await
            .map_err(|e| FetchError::Transport(format!("{e:#}")))?;
        let (records, rejected) = ResultClassifier::series(&candles);
        Ok(FetchedBatch { records, rejected })
    }
}

impl SnapshotSource for BinanceSource {
    fn fetch(
        &self,
        interval: Interval,
    ) -> impl Future<Output = Result<FetchedBatch, FetchError>> + Send {
        self.fetch_limit(interval, self.limit)
    }
}

// ---------------------------------------------------------------------------
// Remote board server
// ---------------------------------------------------------------------------

/// `{ "success": bool, "data": [...], "error": "..." }`
#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    success: bool,
    #[serde(default)]
    data: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RemoteFeedSource {
    http: reqwest::Client,
    url: String,
    limit: u32,
    zone: FixedOffset,
}

impl RemoteFeedSource {
    pub fn new(url: impl Into<String>, limit: u32, zone: FixedOffset) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            url: url.into(),
            limit,
            zone,
        })
    }

    async fn fetch_remote(&self, interval: Interval) -> Result<FetchedBatch, FetchError> {
        let resp = self
            .http
            .get(&self.url)
            .query(&[("interval", interval.as_str().to_string()), ("limit", self.limit.to_string())])
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        // Error envelopes arrive with 4xx/5xx statuses; prefer their message.
        match parse_envelope(&body, self.zone) {
            Ok(batch) if status.is_success() => Ok(batch),
            Ok(_) => Err(FetchError::Transport(format!("upstream returned {status}"))),
            Err(FetchError::Transport(_)) if !status.is_success() => {
                Err(FetchError::Transport(format!("upstream returned {status}")))
            }
            Err(e) => Err(e),
        }
    }
}

impl SnapshotSource for RemoteFeedSource {
    fn fetch(
        &self,
        interval: Interval,
    ) -> impl Future<Output = Result<FetchedBatch, FetchError>> + Send {
        self.fetch_remote(interval)
    }
}

/// Decode an envelope body. Elements failing validation are counted and
/// skipped; a `success: false` envelope is a rejection.
pub fn parse_envelope(body: &str, zone: FixedOffset) -> Result<FetchedBatch, FetchError> {
    let envelope: ApiEnvelope = serde_json::from_str(body)
        .map_err(|e| FetchError::Transport(format!("malformed envelope: {e}")))?;

    if !envelope.success {
        return Err(FetchError::Rejected(
            envelope
                .error
                .unwrap_or_else(|| "upstream reported failure".to_string()),
        ));
    }

    let mut batch = FetchedBatch::default();
    for value in envelope.data.unwrap_or_default() {
        let record = serde_json::from_value::<RawCandleRecord>(value)
            .map_err(|e| e.to_string())
            .and_then(|raw| raw.into_record(zone).map_err(|e| e.to_string()));
        match record {
            Ok(r) => batch.records.push(r),
            Err(reason) => {
                debug!(%reason, "skipping invalid upstream record");
                batch.rejected += 1;
            }
        }
    }
    if batch.rejected > 0 {
        warn!(rejected = batch.rejected, kept = batch.records.len(), "upstream batch had invalid records");
    }
    Ok(batch)
}

// ---------------------------------------------------------------------------
// Configured source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum FeedSource {
    Exchange(BinanceSource),
    Remote(RemoteFeedSource),
}

impl FeedSource {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Exchange(_) => "binance",
            Self::Remote(_) => "remote",
        }
    }

    /// One-off fetch with a caller-chosen limit (used by `/api/baccarat`).
    pub async fn fetch_with_limit(
        &self,
        interval: Interval,
        limit: u32,
    ) -> Result<FetchedBatch, FetchError> {
        match self {
            Self::Exchange(src) => src.fetch_limit(interval, limit).await,
            Self::Remote(src) => {
                let mut src = src.clone();
                src.limit = limit;
                src.fetch_remote(interval).await
            }
        }
    }
}

impl SnapshotSource for FeedSource {
    async fn fetch(&self, interval: Interval) -> Result<FetchedBatch, FetchError> {
        match self {
            Self::Exchange(src) => src.fetch(interval).await,
            Self::Remote(src) => src.fetch(interval).await,
        }
    }
}
