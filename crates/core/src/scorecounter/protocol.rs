//! Line protocol spoken with the score counter display.
//!
//! Outbound commands are `<PREFIX><payload>\r\n` ASCII lines written to the
//! display's writable characteristic; inbound notification bytes are
//! buffered until a CRLF terminator and then dispatched by prefix. Malformed
//! payloads are reported as errors and the line is discarded - never
//! panicked on, never partially applied.

use chrono::{DateTime, Datelike, Local, Timelike};
use thiserror::Error;

use crate::constants::display_cmd::*;
use crate::sync::Score;

use super::config::ScoreCounterCfg;

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A complete line that matches no known inbound command.
    #[error("unrecognized line: {0}")]
    Unrecognized(String),
    #[error("malformed SCORE payload: {0}")]
    MalformedScore(String),
    #[error("malformed CONFIG payload: {0}")]
    MalformedConfig(#[from] serde_json::Error),
}

/// A parsed inbound line.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayMessage {
    /// Response to GET_SCORE: the display's score and its timestamp.
    Score { score: Score, timestamp: u64 },
    /// Response to GET_CONFIG.
    Config(ScoreCounterCfg),
    /// The last pushed configuration was persisted on the display.
    ConfigPersistAck,
}

pub fn encode_set_score(score: Score, timestamp: u64) -> String {
    format!(
        "{SET_SCORE_PREFIX}{}:{}T{timestamp}{CRLF}",
        score.left, score.right
    )
}

pub fn encode_get_score() -> String {
    format!("{GET_SCORE}{CRLF}")
}

/// Wall-clock push: `SET_TIME=<weekday> <d>.<m>.<yy> <H>:<M>:<S>`, weekday
/// ISO-numbered (Mon=1).
pub fn encode_set_time(now: &DateTime<Local>) -> String {
    format!(
        "{SET_TIME_PREFIX}{} {}.{}.{:02} {}:{}:{}{CRLF}",
        now.weekday().number_from_monday(),
        now.day(),
        now.month(),
        now.year() % 100,
        now.hour(),
        now.minute(),
        now.second()
    )
}

pub fn encode_all_leds_on(on: bool) -> String {
    format!("{SET_ALL_LEDS_ON_PREFIX}{}{CRLF}", on as u8)
}

pub fn encode_brightness(brightness: u8) -> String {
    format!("{SET_BRIGHTNESS_PREFIX}{brightness}{CRLF}")
}

pub fn encode_show_score(show: bool) -> String {
    format!("{SET_SHOW_SCORE_PREFIX}{}{CRLF}", show as u8)
}

pub fn encode_show_date(show: bool) -> String {
    format!("{SET_SHOW_DATE_PREFIX}{}{CRLF}", show as u8)
}

pub fn encode_show_time(show: bool) -> String {
    format!("{SET_SHOW_TIME_PREFIX}{}{CRLF}", show as u8)
}

pub fn encode_scroll(scroll: bool) -> String {
    format!("{SET_SCROLL_PREFIX}{}{CRLF}", scroll as u8)
}

pub fn encode_get_config() -> String {
    format!("{GET_CONFIG}{CRLF}")
}

pub fn encode_persist_config(config: &ScoreCounterCfg) -> Result<String, ProtocolError> {
    let json = serde_json::to_string(config)?;
    Ok(format!("{PERSIST_CONFIG_PREFIX}{json}{CRLF}"))
}

/// Parse one complete line (terminator already stripped).
pub fn parse_line(line: &str) -> Result<DisplayMessage, ProtocolError> {
    if let Some(payload) = line.strip_prefix(SCORE_PREFIX) {
        return parse_score_payload(payload);
    }
    if let Some(json) = line.strip_prefix(CONFIG_PREFIX) {
        let config = serde_json::from_str(json)?;
        return Ok(DisplayMessage::Config(config));
    }
    if line.starts_with(CFG_PERSIST_ACK) {
        return Ok(DisplayMessage::ConfigPersistAck);
    }
    Err(ProtocolError::Unrecognized(line.to_string()))
}

/// Payload form: `<left>:<right>T<timestamp>`.
fn parse_score_payload(payload: &str) -> Result<DisplayMessage, ProtocolError> {
    let malformed = || ProtocolError::MalformedScore(payload.to_string());

    let (score_part, timestamp_part) = payload.split_once('T').ok_or_else(malformed)?;
    let (left_part, right_part) = score_part.split_once(':').ok_or_else(malformed)?;

    let left: u16 = left_part.parse().map_err(|_| malformed())?;
    let right: u16 = right_part.parse().map_err(|_| malformed())?;
    let timestamp: u64 = timestamp_part.parse().map_err(|_| malformed())?;

    Ok(DisplayMessage::Score {
        score: Score::new(left, right),
        timestamp,
    })
}

/// Accumulates notification fragments until a CRLF terminator is seen.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw notification bytes; returns every line completed by this
    /// chunk, terminators stripped. Non-ASCII bytes are replaced, matching
    /// the display's ASCII-only protocol.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut lines = Vec::new();
        while let Some(terminator) = self.buffer.find(CRLF) {
            let line = self.buffer[..terminator].to_string();
            self.buffer.drain(..terminator + CRLF.len());
            lines.push(line);
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_score_line() {
        let message = parse_line("SCORE=12:7T1700000000").unwrap();
        assert_eq!(
            message,
            DisplayMessage::Score {
                score: Score::new(12, 7),
                timestamp: 1_700_000_000
            }
        );
    }

    #[test]
    fn test_parse_malformed_score_is_an_error() {
        assert!(matches!(
            parse_line("SCORE=abc:7T100"),
            Err(ProtocolError::MalformedScore(_))
        ));
        assert!(matches!(
            parse_line("SCORE=12:7"),
            Err(ProtocolError::MalformedScore(_))
        ));
        assert!(matches!(
            parse_line("SCORE=127T100"),
            Err(ProtocolError::MalformedScore(_))
        ));
    }

    #[test]
    fn test_parse_config_line() {
        let message =
            parse_line(r#"CONFIG={"bright_lvl":7,"use_score":true,"use_time":false,"scroll":true}"#)
                .unwrap();
        assert_eq!(
            message,
            DisplayMessage::Config(ScoreCounterCfg {
                brightness: 7,
                use_score: true,
                use_time: false,
                scroll: true,
            })
        );
    }

    #[test]
    fn test_parse_bad_config_json_is_an_error() {
        assert!(matches!(
            parse_line("CONFIG={not json"),
            Err(ProtocolError::MalformedConfig(_))
        ));
    }

    #[test]
    fn test_parse_persist_ack() {
        assert_eq!(
            parse_line("CFG_PERSIST_ACK").unwrap(),
            DisplayMessage::ConfigPersistAck
        );
    }

    #[test]
    fn test_parse_unknown_line() {
        assert!(matches!(
            parse_line("HELLO=1"),
            Err(ProtocolError::Unrecognized(_))
        ));
    }

    #[test]
    fn test_encode_set_score() {
        assert_eq!(
            encode_set_score(Score::new(12, 7), 1_700_000_000),
            "SET_SCORE=12:7T1700000000\r\n"
        );
    }

    #[test]
    fn test_encode_switches() {
        assert_eq!(encode_show_score(true), "SET_SHOW_SCORE=1\r\n");
        assert_eq!(encode_show_time(false), "SET_SHOW_TIME=0\r\n");
        assert_eq!(encode_show_date(true), "SET_SHOW_DATE=1\r\n");
        assert_eq!(encode_scroll(false), "SET_SCROLL=0\r\n");
        assert_eq!(encode_all_leds_on(true), "SET_ALL_LEDS_ON=1\r\n");
        assert_eq!(encode_brightness(7), "SET_BRIGHT=7\r\n");
        assert_eq!(encode_get_score(), "GET_SCORE\r\n");
        assert_eq!(encode_get_config(), "GET_CONFIG\r\n");
    }

    #[test]
    fn test_encode_set_time() {
        // Wednesday 2023-11-15 09:05:07.
        let time = Local.with_ymd_and_hms(2023, 11, 15, 9, 5, 7).unwrap();
        assert_eq!(encode_set_time(&time), "SET_TIME=3 15.11.23 9:5:7\r\n");
    }

    #[test]
    fn test_config_round_trip() {
        let config = ScoreCounterCfg {
            brightness: 7,
            use_score: true,
            use_time: false,
            scroll: true,
        };
        let line = encode_persist_config(&config).unwrap();
        let json = line
            .strip_prefix("PERSIST_CONFIG=")
            .unwrap()
            .trim_end_matches(CRLF);
        let decoded: ScoreCounterCfg = serde_json::from_str(json).unwrap();
        assert_eq!(decoded, config);
    }

    #[test]
    fn test_line_buffer_reassembles_fragments() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"SCORE=1").is_empty());
        assert!(buffer.push(b"2:7T170").is_empty());
        let lines = buffer.push(b"0000000\r\n");
        assert_eq!(lines, vec!["SCORE=12:7T1700000000".to_string()]);
    }

    #[test]
    fn test_line_buffer_splits_coalesced_lines() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(b"CFG_PERSIST_ACK\r\nSCORE=1:2T3\r\nGET_");
        assert_eq!(
            lines,
            vec!["CFG_PERSIST_ACK".to_string(), "SCORE=1:2T3".to_string()]
        );
        // Remainder stays buffered until its terminator arrives.
        let lines = buffer.push(b"IGNORED\r\n");
        assert_eq!(lines, vec!["GET_IGNORED".to_string()]);
    }
}
