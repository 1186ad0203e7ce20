//! Score counter display: configuration, line protocol and session link.

pub mod config;
pub mod link;
pub mod protocol;

pub use config::ScoreCounterCfg;
pub use link::{ReconnectionType, ScoreCounterLink};
pub use protocol::{DisplayMessage, LineBuffer, ProtocolError};
