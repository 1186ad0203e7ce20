//! Score state and the three-way synchronization protocol.

pub mod engine;
pub mod score;

pub use engine::{ScoreCounterMessageSender, ScoreSync, SmartwatchMessageSender};
pub use score::{now_secs, Score, ScoreManager};
