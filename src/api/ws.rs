// =============================================================================
// WebSocket Handler — Push-based board updates
// =============================================================================
//
// Clients connect to `/api/ws` and receive:
//   1. An immediate `board` message with the full snapshot on connect.
//   2. A fresh `board` message, checked every 500 ms, whenever the board
//      version has changed since the last push.
//   3. A `candle` message for every live record merged into the board.
//
// Clients may send `set_interval`, `refresh`, and `auto_refresh` control
// messages. A rejected control message is answered with an `error` message;
// any other text is ignored.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::board::actor::CandlePush;
use crate::board::view::BoardSnapshot;

const PUSH_CHECK_EVERY: Duration = Duration::from_millis(500);

// =============================================================================
// Messages
// =============================================================================

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage<'a> {
    Board(&'a BoardSnapshot),
    Candle(&'a CandlePush),
    Error { message: String },
}

#[derive(Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    SetInterval { interval: String },
    Refresh,
    AutoRefresh { enabled: bool },
}

// =============================================================================
// WebSocket upgrade handler
// =============================================================================

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

// =============================================================================
// Connection handler
// =============================================================================

/// Manages a single WebSocket connection lifecycle.
///
/// One `tokio::select!` loop multiplexes the version check, the candle
/// broadcast, and inbound client frames.
async fn handle_ws_connection(socket: WebSocket, state: Arc<AppState>) {
    let conn_id = Uuid::new_v4();
    info!(%conn_id, "WebSocket connection opened");

    let (mut sender, mut receiver) = socket.split();
    let mut snapshots = state.board.watch_snapshots();
    let mut candles = state.board.subscribe_candles();

    let initial = snapshots.borrow_and_update().clone();
    if let Err(e) = send(&mut sender, &ServerMessage::Board(&initial)).await {
        warn!(%conn_id, error = %e, "failed to send initial board snapshot");
        return;
    }
    let mut last_sent_version = initial.version;

    let mut push_interval = interval(PUSH_CHECK_EVERY);
    push_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            // ── Version check every 500 ms ───────────────────────────────
            _ = push_interval.tick() => {
                let snapshot = snapshots.borrow().clone();
                if snapshot.version != last_sent_version {
                    if let Err(e) = send(&mut sender, &ServerMessage::Board(&snapshot)).await {
                        debug!(%conn_id, error = %e, "WebSocket send failed, disconnecting");
                        break;
                    }
                    last_sent_version = snapshot.version;
                }
            }

            // ── Live records ─────────────────────────────────────────────
            pushed = candles.recv() => {
                match pushed {
                    Ok(push) => {
                        if let Err(e) = send(&mut sender, &ServerMessage::Candle(&push)).await {
                            debug!(%conn_id, error = %e, "WebSocket send failed, disconnecting");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        // The next board message carries the merged state.
                        warn!(%conn_id, skipped, "WebSocket client lagging behind candle feed");
                    }
                    Err(RecvError::Closed) => {
                        info!(%conn_id, "candle feed closed");
                        break;
                    }
                }
            }

            // ── Inbound frames ───────────────────────────────────────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_client_text(&state, &text).await {
                            if let Err(e) = send(&mut sender, &reply).await {
                                debug!(%conn_id, error = %e, "WebSocket send failed, disconnecting");
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sender.send(Message::Pong(data)).await {
                            debug!(%conn_id, error = %e, "failed to send Pong, disconnecting");
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) | Some(Ok(Message::Binary(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!(%conn_id, "WebSocket Close frame received");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(%conn_id, error = %e, "WebSocket receive error, disconnecting");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    info!(%conn_id, "WebSocket connection closed");
}

// =============================================================================
// Helpers
// =============================================================================

/// Apply a client control message. Returns an `error` reply when a
/// recognised control message is rejected.
async fn handle_client_text(state: &AppState, text: &str) -> Option<ServerMessage<'static>> {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(m) => m,
        Err(e) => {
            debug!(error = %e, "ignoring unrecognised WebSocket message");
            return None;
        }
    };

    let outcome = match message {
        ClientMessage::SetInterval { interval } => match interval.parse() {
            Ok(iv) => {
                state.runtime_config.write().interval = iv;
                state.board.set_interval(iv).await
            }
            Err(e) => {
                return Some(ServerMessage::Error {
                    message: format!("{e}"),
                })
            }
        },
        ClientMessage::Refresh => state.board.reload().await,
        ClientMessage::AutoRefresh { enabled } => {
            state.runtime_config.write().auto_refresh = enabled;
            state.board.set_auto_refresh(enabled).await
        }
    };

    outcome.err().map(|e| ServerMessage::Error {
        message: e.to_string(),
    })
}

async fn send<S>(sender: &mut S, message: &ServerMessage<'_>) -> Result<(), axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    match serde_json::to_string(message) {
        Ok(json) => sender.send(Message::Text(json)).await,
        Err(e) => {
            // Serialisation errors are not network errors; don't disconnect.
            warn!(error = %e, "failed to serialise WebSocket message");
            Ok(())
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::tests::offline_state;
    use crate::board::record::{BaccaratResult, CandleRecord, Timestamp};
    use crate::types::Interval;
    use chrono::FixedOffset;

    #[test]
    fn client_messages_parse() {
        assert_eq!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"set_interval","interval":"5m"}"#).unwrap(),
            ClientMessage::SetInterval { interval: "5m".into() }
        );
        assert_eq!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"refresh"}"#).unwrap(),
            ClientMessage::Refresh
        );
        assert_eq!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"auto_refresh","enabled":true}"#).unwrap(),
            ClientMessage::AutoRefresh { enabled: true }
        );
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"subscribe"}"#).is_err());
    }

    #[test]
    fn candle_message_is_flat_and_tagged() {
        let record = CandleRecord {
            time: Timestamp::from_millis(1_704_067_260_000).unwrap(),
            close_time: Timestamp::from_millis(1_704_067_319_999),
            open: 10.0,
            high: 12.0,
            low: 9.0,
            close: Some(11.0),
            price: 11.0,
            volume: 1.0,
            result: BaccaratResult::Banker,
        };
        let push = CandlePush {
            interval: Interval::OneMinute,
            record: record.to_payload(FixedOffset::east_opt(0).unwrap()),
        };
        let json: serde_json::Value =
            serde_json::to_value(ServerMessage::Candle(&push)).unwrap();
        assert_eq!(json["type"], "candle");
        assert_eq!(json["interval"], "1m");
        assert_eq!(json["result"], "B");
        assert_eq!(json["time"], "2024-01-01 00:01:00");
        assert_eq!(json["timestamp"], 1_704_067_319_999i64);
    }

    #[tokio::test]
    async fn control_messages_reach_the_board() {
        let state = offline_state();
        assert!(handle_client_text(&state, r#"{"type":"auto_refresh","enabled":true}"#)
            .await
            .is_none());
        assert!(state.runtime_config.read().auto_refresh);

        let reply = handle_client_text(&state, r#"{"type":"set_interval","interval":"3m"}"#).await;
        assert!(matches!(reply, Some(ServerMessage::Error { .. })));

        assert!(handle_client_text(&state, r#"{"type":"set_interval","interval":"15m"}"#)
            .await
            .is_none());
        let mut rx = state.board.watch_interval();
        tokio::time::timeout(
            Duration::from_secs(2),
            rx.wait_for(|iv| *iv == Interval::FifteenMinutes),
        )
        .await
        .unwrap()
        .unwrap();
    }

    #[tokio::test]
    async fn unrecognised_text_is_ignored() {
        let state = offline_state();
        assert!(handle_client_text(&state, "hello").await.is_none());
        assert!(handle_client_text(&state, r#"{"type":"subscribe"}"#).await.is_none());
        assert!(handle_client_text(&state, r#"{"type":"set_interval"}"#).await.is_none());
    }
}
