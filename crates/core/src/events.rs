//! Events exposed to the UI collaborator.
//!
//! The core pushes these onto an unbounded channel; the host application
//! (mobile UI, CLI) consumes them at its own pace. This is the only surface
//! the out-of-scope presentation layer observes.

use tokio::sync::mpsc;

use crate::ble::DeviceAddress;
use crate::scorecounter::ScoreCounterCfg;
use crate::sync::Score;

/// Connection state of the display link as seen by the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connected { device: DeviceAddress },
    NotConnected,
    ManuallyDisconnected,
}

/// Events emitted by the core.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    ConnectionStateChanged(ConnectionState),
    /// A scan result (already filtered to score counter displays).
    DeviceDiscovered {
        device: DeviceAddress,
        name: Option<String>,
        rssi: Option<i16>,
    },
    /// The local score changed (UI action or applied peer data).
    ScoreChanged(Score),
    OrientationChanged {
        facing_referee: bool,
    },
    /// The display answered GET_CONFIG.
    DisplayConfigReceived(ScoreCounterCfg),
    /// The display acknowledged PERSIST_CONFIG.
    DisplayConfigPersisted,
}

pub type CoreEventSender = mpsc::UnboundedSender<CoreEvent>;
pub type CoreEventReceiver = mpsc::UnboundedReceiver<CoreEvent>;

pub fn channel() -> (CoreEventSender, CoreEventReceiver) {
    mpsc::unbounded_channel()
}
