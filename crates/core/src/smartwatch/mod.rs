//! Smartwatch companion: frame codec and session manager.

pub mod manager;
pub mod protocol;

pub use manager::{NullWatchTransport, SmartwatchManager, WatchTransport};
pub use protocol::{WatchDict, WatchFrameError, WatchMessageKind};
