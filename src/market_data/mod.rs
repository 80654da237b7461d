pub mod candle_feed;
pub mod classifier;
pub mod source;
