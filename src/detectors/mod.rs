//! Chart pattern detectors
//!
//! Ten stateless detectors grouped by family. Each owns an immutable config
//! struct whose `Default` holds the standard heuristic constants.
//!
//! # Pattern Families
//!
//! - **Reversal**: Double Top/Bottom, Head & Shoulders
//! - **Continuation**: Bull/Bear Flag, Ascending/Descending Triangle
//! - **Momentum**: Golden/Death Cross, RSI Divergence, Ichimoku TK cross
//! - **Candlestick**: Engulfing
//! - **Levels**: Support/Resistance break
//! - **Wave**: ABC correction

pub mod helpers;

pub mod candle;
pub mod continuation;
pub mod levels;
pub mod momentum;
pub mod reversal;
pub mod wave;

// Re-export all detectors for convenience
pub use candle::*;
pub use continuation::*;
pub use levels::*;
pub use momentum::*;
pub use reversal::*;
pub use wave::*;
