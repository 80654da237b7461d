use anyhow::{Context, Result};
use futures_util::StreamExt;
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};

use crate::board::actor::BoardHandle;
use crate::market_data::classifier::ResultClassifier;
use crate::types::Interval;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A single OHLCV kline from the Binance REST or stream API.
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub is_closed: bool,
}

impl Candle {
    /// A closed candle with the fields the REST endpoint always provides.
    pub fn new(
        open_time: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
        close_time: i64,
    ) -> Self {
        Self {
            open_time,
            close_time,
            open,
            high,
            low,
            close,
            volume,
            is_closed: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Kline WebSocket stream
// ---------------------------------------------------------------------------

/// Single-stream URL, e.g. `wss://stream.binance.com:9443/ws/btcusdt@kline_1m`.
pub fn kline_stream_url(ws_base: &str, symbol: &str, interval: Interval) -> String {
    format!(
        "{}/ws/{}@kline_{}",
        ws_base.trim_end_matches('/'),
        symbol.to_lowercase(),
        interval
    )
}

/// Connect to the kline stream for `symbol`/`interval` and push every closed
/// candle into the board.
///
/// Runs until the stream disconnects or an error occurs, then returns so that
/// the caller can handle reconnection. Result carry for flat candles restarts
/// with each connection.
pub async fn run_kline_stream(
    ws_base: &str,
    symbol: &str,
    interval: Interval,
    board: &BoardHandle,
) -> Result<()> {
    let url = kline_stream_url(ws_base, symbol, interval);
    info!(url = %url, symbol = %symbol, interval = %interval, "connecting to kline WebSocket");

    let (ws_stream, _response) = connect_async(&url)
        .await
        .context("failed to connect to kline WebSocket")?;

    info!(symbol = %symbol, interval = %interval, "kline WebSocket connected");
    let (_write, mut read) = ws_stream.split();
    let mut classifier = ResultClassifier::new();

    loop {
        match read.next().await {
            Some(Ok(msg)) => {
                if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                    match parse_kline_message(&text) {
                        Ok(candle) if candle.is_closed => match classifier.record(&candle) {
                            Ok(record) => {
                                debug!(
                                    symbol = %symbol,
                                    close = candle.close,
                                    result = %record.result,
                                    "closed candle"
                                );
                                board
                                    .push(interval, record)
                                    .await
                                    .context("board stopped accepting updates")?;
                            }
                            Err(e) => {
                                warn!(error = %e, open_time = candle.open_time, "dropping malformed kline");
                            }
                        },
                        Ok(_) => {}
                        Err(e) => {
                            warn!(error = %e, "failed to parse kline message");
                        }
                    }
                }
                // tungstenite answers pings itself.
            }
            Some(Err(e)) => {
                error!(error = %e, "kline WebSocket read error");
                return Err(e.into());
            }
            None => {
                warn!(symbol = %symbol, interval = %interval, "kline WebSocket stream ended");
                return Ok(());
            }
        }
    }
}

/// Parse a kline event, accepting both the single-stream payload and the
/// combined-stream `{ "stream": ..., "data": ... }` envelope.
///
/// ```json
/// { "e": "kline", "s": "BTCUSDT", "k": { "t": 0, "T": 59999, "o": "1.0", ... } }
/// ```
pub fn parse_kline_message(text: &str) -> Result<Candle> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse kline JSON")?;

    let data = if root.get("data").is_some() {
        &root["data"]
    } else {
        &root
    };

    let k = data.get("k").context("missing field k")?;

    let open_time = k["t"].as_i64().context("missing field k.t")?;
    let close_time = k["T"].as_i64().context("missing field k.T")?;

    let open = parse_string_f64(&k["o"], "k.o")?;
    let high = parse_string_f64(&k["h"], "k.h")?;
    let low = parse_string_f64(&k["l"], "k.l")?;
    let close = parse_string_f64(&k["c"], "k.c")?;
    let volume = parse_string_f64(&k["v"], "k.v")?;
    let is_closed = k["x"].as_bool().context("missing field k.x")?;

    Ok(Candle {
        open_time,
        close_time,
        open,
        high,
        low,
        close,
        volume,
        is_closed,
    })
}

/// Binance sends numeric values as JSON strings inside kline objects.
pub fn parse_string_f64(val: &serde_json::Value, name: &str) -> Result<f64> {
    match val {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .with_context(|| format!("failed to parse {name} as f64: {s}")),
        serde_json::Value::Number(n) => n
            .as_f64()
            .with_context(|| format!("field {name} is not a valid f64")),
        _ => anyhow::bail!("field {name} has unexpected JSON type"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
