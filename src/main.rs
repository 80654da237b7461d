// =============================================================================
// Baccarat Board — Main Entry Point
// =============================================================================
//
// Loads the configuration, starts the board actor with its snapshot source,
// keeps the exchange kline stream attached to the board's current interval,
// and serves the HTTP + WebSocket API until Ctrl+C.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod binance;
mod board;
mod market_data;
mod runtime_config;
mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::binance::client::BinanceClient;
use crate::binance::rate_limit::RateLimitTracker;
use crate::board::actor::{spawn_board, ActorSettings};
use crate::board::session::{BoardSession, BoardSettings};
use crate::market_data::source::{BinanceSource, FeedSource, RemoteFeedSource};
use crate::runtime_config::RuntimeConfig;

const CONFIG_PATH: &str = "board_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Baccarat Board starting up");

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_env();

    let zone = config.zone();
    info!(
        symbol = %config.symbol,
        interval = %config.interval,
        fetch_limit = config.fetch_limit,
        utc_offset_minutes = config.utc_offset_minutes,
        auto_refresh = config.auto_refresh,
        upstream = ?config.upstream_url,
        "Board configuration"
    );

    // ── 2. Snapshot source ───────────────────────────────────────────────
    let rate_limits = Arc::new(RateLimitTracker::new());
    let source = Arc::new(match &config.upstream_url {
        Some(url) => FeedSource::Remote(RemoteFeedSource::new(url.clone(), config.fetch_limit, zone)?),
        None => {
            let client = BinanceClient::new(config.rest_url.clone(), Arc::clone(&rate_limits))?;
            FeedSource::Exchange(BinanceSource::new(client, config.symbol.clone(), config.fetch_limit))
        }
    });
    info!(source = source.name(), "Snapshot source ready");

    // ── 3. Board actor ───────────────────────────────────────────────────
    let settings = BoardSettings {
        chart_len: config.chart_len,
        zone,
        ..BoardSettings::default()
    };
    let board = spawn_board(
        BoardSession::new(settings, config.interval),
        Arc::clone(&source),
        ActorSettings {
            refresh_every: config.refresh_every(),
            auto_refresh: config.auto_refresh,
        },
    );

    let bind_addr = config.bind_addr.clone();
    let ws_url = config.ws_url.clone();
    let reconnect = config.reconnect_delay();
    let state = Arc::new(AppState::new(config, board, Arc::clone(&source), rate_limits));

    // ── 4. Live kline stream ─────────────────────────────────────────────
    if let FeedSource::Exchange(exchange) = source.as_ref() {
        let symbol = exchange.symbol().to_string();
        tokio::spawn(supervise_kline_stream(Arc::clone(&state), ws_url, symbol, reconnect));
    } else {
        info!("Remote snapshot source configured, live kline stream disabled");
    }

    // ── 5. API server ────────────────────────────────────────────────────
    let app = api::rest::router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind API server on {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening. Press Ctrl+C to stop.");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server failed")?;

    // ── 6. Persist user choices ──────────────────────────────────────────
    let snapshot = state.board.snapshot();
    let config = {
        let mut cfg = state.runtime_config.write();
        cfg.interval = snapshot.interval;
        cfg.auto_refresh = snapshot.auto_refresh;
        cfg.clone()
    };
    if let Err(e) = config.save(CONFIG_PATH) {
        error!(error = %e, "Failed to save runtime config on shutdown");
    }

    info!("Baccarat Board shut down complete.");
    Ok(())
}

/// Keep one kline stream attached to the board's current interval.
/// Reconnects after `reconnect` on failure and immediately on an interval
/// switch; exits when the board stops.
async fn supervise_kline_stream(
    state: Arc<AppState>,
    ws_url: String,
    symbol: String,
    reconnect: Duration,
) {
    let mut intervals = state.board.watch_interval();

    loop {
        let interval = *intervals.borrow_and_update();

        tokio::select! {
            result = market_data::candle_feed::run_kline_stream(&ws_url, &symbol, interval, &state.board) => {
                match result {
                    Ok(()) => warn!(%symbol, %interval, "Kline stream ended, reconnecting"),
                    Err(e) => {
                        error!(%symbol, %interval, error = %e, "Kline stream error, reconnecting");
                        state.push_error(format!("kline stream {symbol}@{interval}: {e:#}"));
                    }
                }
            }
            changed = intervals.changed() => {
                if changed.is_err() {
                    info!("Board stopped, kline stream supervisor exiting");
                    return;
                }
                info!(%symbol, from = %interval, "Board interval changed, restarting kline stream");
                continue;
            }
        }

        // ── Back-off, cut short by an interval switch ────────────────────
        tokio::select! {
            _ = tokio::time::sleep(reconnect) => {}
            changed = intervals.changed() => {
                if changed.is_err() {
                    info!("Board stopped, kline stream supervisor exiting");
                    return;
                }
                info!(%symbol, from = %interval, "Board interval changed during back-off, reconnecting now");
            }
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    warn!("Shutdown signal received, stopping gracefully");
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::tests::offline_state;
    use crate::types::Interval;

    async fn wait_for_errors(state: &AppState, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while state.recent_errors.read().len() < n {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn interval_switch_cuts_reconnect_back_off_short() {
        let state = offline_state();
        let supervisor = tokio::spawn(supervise_kline_stream(
            Arc::clone(&state),
            "ws://127.0.0.1:9".to_string(),
            "BTCUSDT".to_string(),
            Duration::from_secs(3600),
        ));

        wait_for_errors(&state, 1).await;
        state.board.set_interval(Interval::FiveMinutes).await.unwrap();
        wait_for_errors(&state, 2).await;

        let errors = state.recent_errors.read();
        assert!(errors[1].message.contains("BTCUSDT@5m"));
        drop(errors);
        supervisor.abort();
    }
}
