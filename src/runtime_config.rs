// =============================================================================
// Runtime Configuration — board settings with env overrides and atomic save
// =============================================================================
//
// Loaded from `board_config.json` at startup, then overridden by environment
// variables. The user-facing choices (interval, auto refresh) are written
// back on shutdown using an atomic tmp + rename.
//
// All fields carry `#[serde(default)]` so that adding new fields never breaks
// loading an older config file.
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::binance::client::DEFAULT_REST_URL;
use crate::board::layout::BOARD_CAPACITY;
use crate::board::view::CHART_LEN;
use crate::types::Interval;

/// Largest offset `FixedOffset` accepts, in minutes.
const MAX_OFFSET_MINUTES: i32 = 24 * 60 - 1;

/// Largest `limit` the klines endpoint accepts.
pub const MAX_FETCH_LIMIT: u32 = 1000;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_bind_addr() -> String {
    "0.0.0.0:9000".to_string()
}

fn default_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_fetch_limit() -> u32 {
    BOARD_CAPACITY as u32
}

fn default_refresh_secs() -> u64 {
    60
}

fn default_chart_len() -> usize {
    CHART_LEN
}

fn default_reconnect_secs() -> u64 {
    5
}

fn default_rest_url() -> String {
    DEFAULT_REST_URL.to_string()
}

fn default_ws_url() -> String {
    "wss://stream.binance.com:9443".to_string()
}

// =============================================================================
// RuntimeConfig
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Server -------------------------------------------------------------

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    // --- Market data --------------------------------------------------------

    #[serde(default = "default_symbol")]
    pub symbol: String,

    /// Board timeframe. Persisted on shutdown.
    #[serde(default)]
    pub interval: Interval,

    /// Candles requested per full reload.
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: u32,

    #[serde(default = "default_rest_url")]
    pub rest_url: String,

    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    /// When set, snapshots come from another board server's `/api/baccarat`
    /// instead of the exchange.
    #[serde(default)]
    pub upstream_url: Option<String>,

    /// Seconds to wait before reconnecting a dropped kline stream.
    #[serde(default = "default_reconnect_secs")]
    pub reconnect_secs: u64,

    // --- Board --------------------------------------------------------------

    /// Offset from UTC, in minutes, in which the daily anchor and display
    /// times are evaluated.
    #[serde(default)]
    pub utc_offset_minutes: i32,

    /// Periodic full reload. Persisted on shutdown.
    #[serde(default)]
    pub auto_refresh: bool,

    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,

    #[serde(default = "default_chart_len")]
    pub chart_len: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            symbol: default_symbol(),
            interval: Interval::default(),
            fetch_limit: default_fetch_limit(),
            rest_url: default_rest_url(),
            ws_url: default_ws_url(),
            upstream_url: None,
            reconnect_secs: default_reconnect_secs(),
            utc_offset_minutes: 0,
            auto_refresh: false,
            refresh_secs: default_refresh_secs(),
            chart_len: default_chart_len(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let mut config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        let limit = config.fetch_limit.clamp(1, MAX_FETCH_LIMIT);
        if limit != config.fetch_limit {
            warn!(configured = config.fetch_limit, using = limit, "fetch_limit out of range, clamped");
            config.fetch_limit = limit;
        }

        info!(
            path = %path.display(),
            symbol = %config.symbol,
            interval = %config.interval,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`. Unparseable values are logged and
    /// ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(port) = lookup("PORT") {
            match port.trim().parse::<u16>() {
                Ok(port) => self.bind_addr = format!("0.0.0.0:{port}"),
                Err(_) => warn!(value = %port, "ignoring invalid PORT"),
            }
        }
        if let Some(addr) = lookup("BOARD_BIND_ADDR") {
            self.bind_addr = addr.trim().to_string();
        }
        if let Some(symbol) = lookup("BOARD_SYMBOL") {
            let symbol = symbol.trim().to_uppercase();
            if symbol.is_empty() {
                warn!("ignoring empty BOARD_SYMBOL");
            } else {
                self.symbol = symbol;
            }
        }
        if let Some(interval) = lookup("BOARD_INTERVAL") {
            match interval.parse::<Interval>() {
                Ok(iv) => self.interval = iv,
                Err(e) => warn!(error = %e, "ignoring BOARD_INTERVAL"),
            }
        }
        if let Some(limit) = lookup("BACCARAT_LIMIT") {
            match limit.trim().parse::<u32>() {
                Ok(n) => self.fetch_limit = n.clamp(1, MAX_FETCH_LIMIT),
                Err(_) => warn!(value = %limit, "ignoring invalid BACCARAT_LIMIT"),
            }
        }
        if let Some(offset) = lookup("BOARD_UTC_OFFSET_MINUTES") {
            match offset.trim().parse::<i32>() {
                Ok(m) if m.abs() <= MAX_OFFSET_MINUTES => self.utc_offset_minutes = m,
                _ => warn!(value = %offset, "ignoring invalid BOARD_UTC_OFFSET_MINUTES"),
            }
        }
        if let Some(flag) = lookup("BOARD_AUTO_REFRESH") {
            match flag.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.auto_refresh = true,
                "0" | "false" | "no" | "off" => self.auto_refresh = false,
                other => warn!(value = %other, "ignoring invalid BOARD_AUTO_REFRESH"),
            }
        }
        if let Some(url) = lookup("BOARD_UPSTREAM_URL") {
            let url = url.trim();
            self.upstream_url = (!url.is_empty()).then(|| url.to_string());
        }
    }

    /// Board zone. An out-of-range offset from a hand-edited file falls back
    /// to UTC.
    pub fn zone(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60)).unwrap_or_else(|| {
            warn!(offset = self.utc_offset_minutes, "utc offset out of range, using UTC");
            Utc.fix()
        })
    }

    pub fn refresh_every(&self) -> Duration {
        Duration::from_secs(self.refresh_secs.max(1))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_secs)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.bind_addr, "0.0.0.0:9000");
        assert_eq!(cfg.symbol, "BTCUSDT");
        assert_eq!(cfg.interval, Interval::OneMinute);
        assert_eq!(cfg.fetch_limit, 156);
        assert_eq!(cfg.utc_offset_minutes, 0);
        assert!(!cfg.auto_refresh);
        assert_eq!(cfg.refresh_every(), Duration::from_secs(60));
        assert_eq!(cfg.chart_len, 50);
        assert_eq!(cfg.reconnect_delay(), Duration::from_secs(5));
        assert!(cfg.upstream_url.is_none());
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "interval": "15m", "auto_refresh": true }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.interval, Interval::FifteenMinutes);
        assert!(cfg.auto_refresh);
        assert_eq!(cfg.symbol, "BTCUSDT");
        assert_eq!(cfg.fetch_limit, 156);

        let empty: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, RuntimeConfig::default());
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = RuntimeConfig::default();
        cfg.apply_overrides(env(&[
            ("PORT", "8080"),
            ("BOARD_SYMBOL", "ethusdt"),
            ("BOARD_INTERVAL", "1h"),
            ("BACCARAT_LIMIT", "5000"),
            ("BOARD_UTC_OFFSET_MINUTES", "540"),
            ("BOARD_AUTO_REFRESH", "on"),
            ("BOARD_UPSTREAM_URL", "http://feed.local/api/baccarat"),
        ]));
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080");
        assert_eq!(cfg.symbol, "ETHUSDT");
        assert_eq!(cfg.interval, Interval::OneHour);
        assert_eq!(cfg.fetch_limit, MAX_FETCH_LIMIT);
        assert_eq!(cfg.zone().local_minus_utc(), 9 * 3600);
        assert!(cfg.auto_refresh);
        assert_eq!(cfg.upstream_url.as_deref(), Some("http://feed.local/api/baccarat"));
    }

    #[test]
    fn bind_addr_wins_over_port() {
        let mut cfg = RuntimeConfig::default();
        cfg.apply_overrides(env(&[("PORT", "8080"), ("BOARD_BIND_ADDR", "127.0.0.1:7000")]));
        assert_eq!(cfg.bind_addr, "127.0.0.1:7000");
    }

    #[test]
    fn invalid_overrides_are_ignored() {
        let mut cfg = RuntimeConfig::default();
        cfg.apply_overrides(env(&[
            ("PORT", "ninety"),
            ("BOARD_INTERVAL", "2m"),
            ("BACCARAT_LIMIT", "-1"),
            ("BOARD_UTC_OFFSET_MINUTES", "1440"),
            ("BOARD_AUTO_REFRESH", "maybe"),
        ]));
        assert_eq!(cfg, RuntimeConfig::default());
    }

    #[test]
    fn out_of_range_offset_falls_back_to_utc() {
        let cfg = RuntimeConfig {
            utc_offset_minutes: 100_000,
            ..RuntimeConfig::default()
        };
        assert_eq!(cfg.zone().local_minus_utc(), 0);
    }

    #[test]
    fn save_then_load_roundtrip() {
        let dir = std::env::temp_dir().join(format!("board-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("board_config.json");

        let cfg = RuntimeConfig {
            interval: Interval::FiveMinutes,
            auto_refresh: true,
            ..RuntimeConfig::default()
        };
        cfg.save(&path).unwrap();
        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(RuntimeConfig::load(&path).unwrap(), cfg);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn loaded_fetch_limit_is_clamped() {
        let dir = std::env::temp_dir().join(format!("board-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("board_config.json");

        std::fs::write(&path, r#"{"fetch_limit": 0}"#).unwrap();
        assert_eq!(RuntimeConfig::load(&path).unwrap().fetch_limit, 1);

        std::fs::write(&path, r#"{"fetch_limit": 5000}"#).unwrap();
        assert_eq!(RuntimeConfig::load(&path).unwrap().fetch_limit, MAX_FETCH_LIMIT);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(RuntimeConfig::load("/definitely/not/here/board_config.json").is_err());
    }
}
