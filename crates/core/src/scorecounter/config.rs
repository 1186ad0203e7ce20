//! Score counter display configuration.

use serde::{Deserialize, Serialize};

pub const MAX_BRIGHTNESS: u8 = 15;

/// Display configuration, round-tripped as JSON inside the line protocol
/// (`CONFIG=`/`PERSIST_CONFIG=` payloads). Field names follow the display
/// firmware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreCounterCfg {
    /// LED brightness, 0..=15.
    #[serde(rename = "bright_lvl")]
    pub brightness: u8,
    #[serde(rename = "use_score")]
    pub use_score: bool,
    #[serde(rename = "use_time")]
    pub use_time: bool,
    pub scroll: bool,
}

impl Default for ScoreCounterCfg {
    fn default() -> Self {
        Self {
            brightness: 3,
            use_score: true,
            use_time: true,
            scroll: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_field_names() {
        let cfg = ScoreCounterCfg::default();
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("\"bright_lvl\":3"));
        assert!(json.contains("\"use_score\":true"));
        assert!(json.contains("\"use_time\":true"));
        assert!(json.contains("\"scroll\":false"));
    }
}
