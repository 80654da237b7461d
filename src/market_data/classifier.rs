// =============================================================================
// Result Classifier — derives Player / Banker from candle direction
// =============================================================================
//
//   close > open  -> Banker
//   close < open  -> Player
//   close == open -> previous result in the same series (Player if none)
//
// The carry makes the classifier stateful; use one instance per series.
// =============================================================================

use crate::board::record::{BaccaratResult, CandleRecord, RecordError, Timestamp};
use crate::market_data::candle_feed::Candle;

#[derive(Debug, Clone)]
pub struct ResultClassifier {
    previous: BaccaratResult,
}

impl ResultClassifier {
    pub fn new() -> Self {
        Self {
            previous: BaccaratResult::Player,
        }
    }

    pub fn classify(&mut self, open: f64, close: f64) -> BaccaratResult {
        let result = if close > open {
            BaccaratResult::Banker
        } else if close < open {
            BaccaratResult::Player
        } else {
            self.previous
        };
        self.previous = result;
        result
    }

    /// Classify `candle` and turn it into a board record.
    pub fn record(&mut self, candle: &Candle) -> Result<CandleRecord, RecordError> {
        let time = Timestamp::from_millis(candle.open_time)
            .ok_or_else(|| RecordError::InvalidTime(candle.open_time.to_string()))?;
        let close_time = Timestamp::from_millis(candle.close_time);
        let result = self.classify(candle.open, candle.close);

        CandleRecord {
            time,
            close_time,
            open: candle.open,
            high: candle.high,
            low: candle.low,
            close: Some(candle.close),
            price: candle.close,
            volume: candle.volume,
            result,
        }
        .checked()
    }

    /// Classify an ascending series. Returns the records and how many candles
    /// were dropped as malformed.
    pub fn series(candles: &[Candle]) -> (Vec<CandleRecord>, usize) {
        let mut classifier = Self::new();
        let mut records = Vec::with_capacity(candles.len());
        let mut rejected = 0;
        for candle in candles {
            match classifier.record(candle) {
                Ok(rec) => records.push(rec),
                Err(_) => rejected += 1,
            }
        }
        (records, rejected)
    }
}

impl Default for ResultClassifier {
    fn default() -> Self {
        Self::new()
    }
}
