//! Global constants for the Score Counter RC core

use std::time::Duration;
use uuid::Uuid;

/// Advertised device name of the score counter display.
pub const DISPLAY_NAME: &str = "Score-counter-BLE";

/// GATT identities of the display link
pub mod gatt {
    use super::*;

    /// Writable/notifiable data characteristic of the display.
    pub const DISPLAY_WRITABLE_CHARACTERISTIC: Uuid =
        uuid::uuid!("0000ffe1-0000-1000-8000-00805f9b34fb");

    /// Client Characteristic Configuration Descriptor (0x2902).
    pub const CCC_DESCRIPTOR: Uuid = uuid::uuid!("00002902-0000-1000-8000-00805F9B34FB");

    pub const MIN_MTU_SIZE: u16 = 23;
    pub const MAX_MTU_SIZE: u16 = 517;
    /// MTU requested right after service discovery.
    pub const CUSTOM_MTU_SIZE: u16 = MAX_MTU_SIZE;
}

/// Operation queue limits
pub mod queue {
    /// Operations beyond this bound are dropped, not queued.
    pub const MAX_OPS_QUEUE_SIZE: usize = 20;

    /// Connect attempts before giving up on a device.
    pub const MAX_CONNECT_ATTEMPTS: u32 = 4;
}

/// Line protocol spoken over the display's writable characteristic
pub mod display_cmd {
    pub const SET_SCORE_PREFIX: &str = "SET_SCORE=";
    pub const GET_SCORE: &str = "GET_SCORE";
    pub const SCORE_PREFIX: &str = "SCORE=";
    pub const SET_TIME_PREFIX: &str = "SET_TIME=";
    pub const SET_ALL_LEDS_ON_PREFIX: &str = "SET_ALL_LEDS_ON=";
    pub const SET_BRIGHTNESS_PREFIX: &str = "SET_BRIGHT=";
    pub const SET_SHOW_SCORE_PREFIX: &str = "SET_SHOW_SCORE=";
    pub const SET_SHOW_DATE_PREFIX: &str = "SET_SHOW_DATE=";
    pub const SET_SHOW_TIME_PREFIX: &str = "SET_SHOW_TIME=";
    pub const SET_SCROLL_PREFIX: &str = "SET_SCROLL=";
    pub const PERSIST_CONFIG_PREFIX: &str = "PERSIST_CONFIG=";
    pub const GET_CONFIG: &str = "GET_CONFIG";
    pub const CONFIG_PREFIX: &str = "CONFIG=";
    pub const CFG_PERSIST_ACK: &str = "CFG_PERSIST_ACK";

    /// Every line is terminated with CRLF, both directions.
    pub const CRLF: &str = "\r\n";
}

/// Score bounds (inclusive); increments and decrements wrap around them.
pub mod score {
    pub const MIN_SCORE: u16 = 0;
    pub const MAX_SCORE: u16 = 999;
}

/// Companion (smartwatch) dictionary layout, identical in both directions
pub mod watch {
    pub const CMD_KEY: u32 = 10;
    pub const SCORE_1_KEY: u32 = 11;
    pub const SCORE_2_KEY: u32 = 12;
    pub const TIMESTAMP_KEY: u32 = 13;

    pub const CMD_SET_SCORE: u32 = 1;
    pub const CMD_SYNC_SCORE: u32 = 2;
}

/// Synchronizer poll budget per peer
pub mod sync {
    use super::*;

    pub const GET_WATCH_DATA_MAX_ATTEMPTS: u32 = 2;
    pub const GET_SC_DATA_MAX_ATTEMPTS: u32 = 2;
    pub const GET_WATCH_DATA_TIMEOUT: Duration = Duration::from_millis(1000);
    pub const GET_SC_DATA_TIMEOUT: Duration = Duration::from_millis(1000);
}
