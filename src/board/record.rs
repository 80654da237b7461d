// =============================================================================
// Candle Record Model — the unit of data flowing through the board
// =============================================================================
//
// Every record carries a canonical `Timestamp` (epoch milliseconds). Inbound
// payloads may supply time as a formatted string, an RFC 3339 string, or a
// numeric epoch; all are normalised here so the merger and windower only ever
// compare integers.
//
// Local wall-clock questions (time-of-day, calendar date, display strings)
// are always answered against an explicit `FixedOffset` supplied by the
// caller, never the host timezone.
// =============================================================================

use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Display format for record times (`2024-01-01 00:01:00`).
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Numeric epochs below this are read as seconds, above as milliseconds.
const EPOCH_SECONDS_CEILING: f64 = 1e11;

// =============================================================================
// Errors
// =============================================================================

/// Why an inbound record was refused by validation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecordError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("field '{field}' is not a finite number: {value}")]
    InvalidNumber { field: &'static str, value: String },
    #[error("field 'volume' must be non-negative, got {0}")]
    NegativeVolume(f64),
    #[error("unparseable time '{0}'")]
    InvalidTime(String),
    #[error("unknown result code '{0}'")]
    UnknownResult(String),
}

// =============================================================================
// Timestamp
// =============================================================================

/// Canonical, totally ordered point in time (epoch milliseconds, UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Build from epoch milliseconds. Returns `None` outside chrono's range.
    pub fn from_millis(ms: i64) -> Option<Self> {
        DateTime::<Utc>::from_timestamp_millis(ms).map(|_| Self(ms))
    }

    pub fn as_millis(self) -> i64 {
        self.0
    }

    /// Stable per-minute identity used for idempotent merges.
    pub fn minute_key(self) -> i64 {
        self.0.div_euclid(60_000)
    }

    /// This instant as wall-clock time in `zone`.
    pub fn in_zone(self, zone: FixedOffset) -> DateTime<FixedOffset> {
        DateTime::<Utc>::from_timestamp_millis(self.0)
            .unwrap_or_default()
            .with_timezone(&zone)
    }

    /// `%Y-%m-%d %H:%M:%S` in `zone`.
    pub fn format_in(self, zone: FixedOffset) -> String {
        self.in_zone(zone).format(TIME_FORMAT).to_string()
    }

    /// Parse a textual time. Naive strings are interpreted in `zone`.
    pub fn parse(text: &str, zone: FixedOffset) -> Result<Self, RecordError> {
        let text = text.trim();
        let invalid = || RecordError::InvalidTime(text.to_string());

        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Self::from_millis(dt.timestamp_millis()).ok_or_else(invalid);
        }
        for fmt in [TIME_FORMAT, "%Y-%m-%dT%H:%M:%S"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
                let local = zone.from_local_datetime(&naive).single().ok_or_else(invalid)?;
                return Self::from_millis(local.timestamp_millis()).ok_or_else(invalid);
            }
        }
        match text.parse::<f64>() {
            Ok(n) => Self::from_epoch(n).ok_or_else(invalid),
            Err(_) => Err(invalid()),
        }
    }

    /// Numeric epoch in seconds or milliseconds.
    pub fn from_epoch(value: f64) -> Option<Self> {
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        let ms = if value < EPOCH_SECONDS_CEILING {
            value * 1000.0
        } else {
            value
        };
        Self::from_millis(ms.round() as i64)
    }
}

// =============================================================================
// Result label
// =============================================================================

/// Upstream classification of a candle's directional outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BaccaratResult {
    #[serde(rename = "P")]
    Player,
    #[serde(rename = "B")]
    Banker,
    #[serde(rename = "T")]
    Tie,
}

impl BaccaratResult {
    /// Single-letter board label.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Player => "P",
            Self::Banker => "B",
            Self::Tie => "T",
        }
    }

    /// Styling tag for the presentation layer.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Player => "player",
            Self::Banker => "banker",
            Self::Tie => "tie",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Player => "Player (down)",
            Self::Banker => "Banker (up)",
            Self::Tie => "Tie",
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            Self::Player => "#3182ce",
            Self::Banker => "#e53e3e",
            Self::Tie => "#38a169",
        }
    }
}

impl std::fmt::Display for BaccaratResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for BaccaratResult {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "p" | "player" => Ok(Self::Player),
            "b" | "banker" => Ok(Self::Banker),
            "t" | "tie" => Ok(Self::Tie),
            _ => Err(RecordError::UnknownResult(s.to_string())),
        }
    }
}

// =============================================================================
// CandleRecord
// =============================================================================

/// A validated candle with its precomputed result label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandleRecord {
    /// Candle open time; ordering and anchoring key.
    pub time: Timestamp,
    /// Candle close time when the source provides it.
    pub close_time: Option<Timestamp>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: Option<f64>,
    /// Last trade price; stands in for `close` when that is absent.
    pub price: f64,
    pub volume: f64,
    pub result: BaccaratResult,
}

impl CandleRecord {
    /// Consume and return `self` if every numeric field is usable.
    pub fn checked(self) -> Result<Self, RecordError> {
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), RecordError> {
        finite("open", self.open)?;
        finite("high", self.high)?;
        finite("low", self.low)?;
        finite("price", self.price)?;
        finite("volume", self.volume)?;
        if let Some(close) = self.close {
            finite("close", close)?;
        }
        if self.volume < 0.0 {
            return Err(RecordError::NegativeVolume(self.volume));
        }
        Ok(())
    }

    pub fn dedup_key(&self) -> i64 {
        self.time.minute_key()
    }

    pub fn close_or_price(&self) -> f64 {
        self.close.unwrap_or(self.price)
    }

    /// Chart colouring rule: a flat candle follows its Banker label.
    pub fn is_up(&self) -> bool {
        let close = self.close_or_price();
        close > self.open || (close == self.open && self.result == BaccaratResult::Banker)
    }

    /// Wire form with times rendered in `zone`.
    pub fn to_payload(&self, zone: FixedOffset) -> RecordPayload {
        RecordPayload {
            time: self.time.format_in(zone),
            timestamp: self.close_time.unwrap_or(self.time).as_millis(),
            price: self.price,
            result: self.result,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close_or_price(),
            volume: self.volume,
            is_up: self.is_up(),
        }
    }
}

fn finite(field: &'static str, value: f64) -> Result<(), RecordError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(RecordError::InvalidNumber {
            field,
            value: value.to_string(),
        })
    }
}

/// Outbound JSON shape shared by `/api/baccarat` and the push channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordPayload {
    pub time: String,
    pub timestamp: i64,
    pub price: f64,
    pub result: BaccaratResult,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub is_up: bool,
}

// =============================================================================
// RawCandleRecord — lenient inbound form
// =============================================================================

/// JSON number or numeric string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FlexNumber {
    Number(f64),
    Text(String),
}

impl FlexNumber {
    fn to_f64(&self, field: &'static str) -> Result<f64, RecordError> {
        let value = match self {
            Self::Number(n) => *n,
            Self::Text(s) => s.trim().parse::<f64>().map_err(|_| RecordError::InvalidNumber {
                field,
                value: s.clone(),
            })?,
        };
        finite(field, value)?;
        Ok(value)
    }

    fn to_timestamp(&self, zone: FixedOffset) -> Result<Timestamp, RecordError> {
        match self {
            Self::Number(n) => {
                Timestamp::from_epoch(*n).ok_or_else(|| RecordError::InvalidTime(n.to_string()))
            }
            Self::Text(s) => Timestamp::parse(s, zone),
        }
    }
}

/// An inbound record before validation. Every field is optional so that a
/// malformed element can be reported instead of failing the whole batch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCandleRecord {
    #[serde(default)]
    pub time: Option<FlexNumber>,
    #[serde(default)]
    pub timestamp: Option<FlexNumber>,
    #[serde(default)]
    pub open: Option<FlexNumber>,
    #[serde(default)]
    pub high: Option<FlexNumber>,
    #[serde(default)]
    pub low: Option<FlexNumber>,
    #[serde(default)]
    pub close: Option<FlexNumber>,
    #[serde(default)]
    pub price: Option<FlexNumber>,
    #[serde(default)]
    pub volume: Option<FlexNumber>,
    #[serde(default)]
    pub result: Option<String>,
}

impl RawCandleRecord {
    /// Validate and normalise. Naive time strings are read in `zone`.
    pub fn into_record(self, zone: FixedOffset) -> Result<CandleRecord, RecordError> {
        let (time, close_time) = match (&self.time, &self.timestamp) {
            (Some(t), ts) => {
                let close_time = ts.as_ref().and_then(|v| match v.to_timestamp(zone) {
                    Ok(close) => Some(close),
                    Err(e) => {
                        debug!(error = %e, "ignoring unparseable timestamp");
                        None
                    }
                });
                (t.to_timestamp(zone)?, close_time)
            }
            (None, Some(ts)) => (ts.to_timestamp(zone)?, None),
            (None, None) => return Err(RecordError::MissingField("time")),
        };

        let open = required(&self.open, "open")?;
        let high = required(&self.high, "high")?;
        let low = required(&self.low, "low")?;
        let volume = required(&self.volume, "volume")?;
        let close = self.close.as_ref().map(|c| c.to_f64("close")).transpose()?;
        let price = match (&self.price, close) {
            (Some(p), _) => p.to_f64("price")?,
            (None, Some(c)) => c,
            (None, None) => return Err(RecordError::MissingField("price")),
        };
        let result = self
            .result
            .as_deref()
            .ok_or(RecordError::MissingField("result"))?
            .parse::<BaccaratResult>()?;

        CandleRecord {
            time,
            close_time,
            open,
            high,
            low,
            close,
            price,
            volume,
            result,
        }
        .checked()
    }
}

fn required(value: &Option<FlexNumber>, field: &'static str) -> Result<f64, RecordError> {
    value
        .as_ref()
        .ok_or(RecordError::MissingField(field))?
        .to_f64(field)
}
