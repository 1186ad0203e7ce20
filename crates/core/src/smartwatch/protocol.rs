//! Companion frame codec.
//!
//! The watch app exchanges flat dictionaries with unsigned-integer keys and
//! values; the same four keys are used in both directions. The binary frame
//! form is a plain key/value table, the dictionary payload of the companion
//! transport being opaque to everything above it.

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

use crate::constants::watch::{
    CMD_KEY, CMD_SET_SCORE, CMD_SYNC_SCORE, SCORE_1_KEY, SCORE_2_KEY, TIMESTAMP_KEY,
};
use crate::sync::Score;

/// How an inbound watch message is to be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMessageKind {
    /// User-initiated score set on the watch; overrides any sync in flight.
    SetScore,
    /// Reply to a sync request.
    Sync,
}

#[derive(Debug, Error)]
pub enum WatchFrameError {
    #[error("truncated watch frame")]
    Truncated,
}

/// Flat u32 key/value dictionary exchanged with the watch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchDict {
    entries: BTreeMap<u32, u32>,
}

impl WatchDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: u32, value: u32) {
        self.entries.insert(key, value);
    }

    pub fn get(&self, key: u32) -> Option<u32> {
        self.entries.get(&key).copied()
    }

    /// Frame form: entry count (u8), then key/value pairs as little-endian
    /// u32s.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(1 + self.entries.len() * 8);
        buf.put_u8(self.entries.len() as u8);
        for (key, value) in &self.entries {
            buf.put_u32_le(*key);
            buf.put_u32_le(*value);
        }
        buf.to_vec()
    }

    pub fn from_bytes(mut bytes: &[u8]) -> Result<Self, WatchFrameError> {
        if bytes.remaining() < 1 {
            return Err(WatchFrameError::Truncated);
        }
        let count = bytes.get_u8() as usize;
        let mut dict = Self::new();
        for _ in 0..count {
            if bytes.remaining() < 8 {
                return Err(WatchFrameError::Truncated);
            }
            let key = bytes.get_u32_le();
            let value = bytes.get_u32_le();
            dict.insert(key, value);
        }
        Ok(dict)
    }
}

/// Score push towards the watch. The lower 32 timestamp bits stay intact
/// through the truncation.
pub fn encode_score(score: Score, timestamp: u64) -> WatchDict {
    let mut dict = WatchDict::new();
    dict.insert(CMD_KEY, CMD_SET_SCORE);
    dict.insert(SCORE_1_KEY, u32::from(score.left));
    dict.insert(SCORE_2_KEY, u32::from(score.right));
    dict.insert(TIMESTAMP_KEY, timestamp as u32);
    dict
}

pub fn encode_sync_request() -> WatchDict {
    let mut dict = WatchDict::new();
    dict.insert(CMD_KEY, CMD_SYNC_SCORE);
    dict
}

/// Validate an inbound dictionary. Frames with an unknown command or a
/// missing field are dropped (`None`), never partially applied.
pub fn decode(dict: &WatchDict) -> Option<(Score, u64, WatchMessageKind)> {
    let kind = match dict.get(CMD_KEY)? {
        CMD_SET_SCORE => WatchMessageKind::SetScore,
        CMD_SYNC_SCORE => WatchMessageKind::Sync,
        _ => return None,
    };
    let score1 = dict.get(SCORE_1_KEY)?;
    let score2 = dict.get(SCORE_2_KEY)?;
    let timestamp = dict.get(TIMESTAMP_KEY)?;
    Some((
        Score::new(score1 as u16, score2 as u16),
        u64::from(timestamp),
        kind,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_frame_round_trip() {
        let dict = encode_score(Score::new(12, 7), 1_700_000_000);
        let bytes = dict.to_bytes();
        let decoded_dict = WatchDict::from_bytes(&bytes).unwrap();
        assert_eq!(decoded_dict, dict);

        let (score, timestamp, kind) = decode(&decoded_dict).unwrap();
        assert_eq!(score, Score::new(12, 7));
        assert_eq!(timestamp, 1_700_000_000);
        assert_eq!(kind, WatchMessageKind::SetScore);
    }

    #[test]
    fn test_timestamp_truncates_to_lower_32_bits() {
        let dict = encode_score(Score::new(1, 1), 0x1_0000_0001);
        assert_eq!(dict.get(TIMESTAMP_KEY), Some(1));
    }

    #[test]
    fn test_sync_request_has_no_score_fields() {
        let dict = encode_sync_request();
        assert_eq!(dict.get(CMD_KEY), Some(CMD_SYNC_SCORE));
        assert_eq!(dict.get(SCORE_1_KEY), None);
        // A bare sync request is not a valid inbound data frame.
        assert!(decode(&dict).is_none());
    }

    #[test]
    fn test_unknown_command_is_dropped() {
        let mut dict = encode_score(Score::new(1, 1), 10);
        dict.insert(CMD_KEY, 99);
        assert!(decode(&dict).is_none());
    }

    #[test]
    fn test_truncated_frame_is_an_error() {
        let bytes = encode_score(Score::new(1, 1), 10).to_bytes();
        assert!(matches!(
            WatchDict::from_bytes(&bytes[..bytes.len() - 3]),
            Err(WatchFrameError::Truncated)
        ));
        assert!(matches!(
            WatchDict::from_bytes(&[]),
            Err(WatchFrameError::Truncated)
        ));
    }
}
