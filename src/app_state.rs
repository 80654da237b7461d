// =============================================================================
// Central Application State
// =============================================================================
//
// Ties the running board, the snapshot source, and the operational counters
// together for the HTTP and WebSocket handlers.
//
// Thread safety:
//   - The board itself is owned by its actor; handlers talk to it through
//     the cloneable `BoardHandle` and read published snapshots lock-free.
//   - parking_lot::RwLock for the config and the error ring.
// =============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::binance::rate_limit::{RateLimitSnapshot, RateLimitTracker};
use crate::board::actor::BoardHandle;
use crate::market_data::source::FeedSource;
use crate::runtime_config::RuntimeConfig;

/// A recorded operational error (stream failure, reconnect, ...).
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    /// ISO 8601 timestamp.
    pub at: String,
}

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;

/// Shared across all handlers via `Arc<AppState>`.
pub struct AppState {
    pub runtime_config: Arc<RwLock<RuntimeConfig>>,
    pub board: BoardHandle,
    /// Used directly by `/api/baccarat`, bypassing the board.
    pub source: Arc<FeedSource>,
    pub rate_limits: Arc<RateLimitTracker>,
    pub recent_errors: RwLock<VecDeque<ErrorRecord>>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config: RuntimeConfig,
        board: BoardHandle,
        source: Arc<FeedSource>,
        rate_limits: Arc<RateLimitTracker>,
    ) -> Self {
        Self {
            runtime_config: Arc::new(RwLock::new(config)),
            board,
            source,
            rate_limits,
            recent_errors: RwLock::new(VecDeque::with_capacity(MAX_RECENT_ERRORS)),
            start_time: Instant::now(),
        }
    }

    /// Record an error message. The ring is capped at [`MAX_RECENT_ERRORS`];
    /// oldest entries are evicted first.
    pub fn push_error(&self, msg: impl Into<String>) {
        let record = ErrorRecord {
            message: msg.into(),
            at: Utc::now().to_rfc3339(),
        };
        let mut errors = self.recent_errors.write();
        errors.push_back(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.pop_front();
        }
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: "ok",
            source: self.source.name(),
            board_version: self.board.snapshot().version,
            uptime_secs: self.start_time.elapsed().as_secs(),
            rate_limit: self.rate_limits.snapshot(),
            recent_errors: self.recent_errors.read().iter().cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub source: &'static str,
    pub board_version: u64,
    pub uptime_secs: u64,
    pub rate_limit: RateLimitSnapshot,
    pub recent_errors: Vec<ErrorRecord>,
}
