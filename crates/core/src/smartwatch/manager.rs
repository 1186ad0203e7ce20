//! Companion device session.
//!
//! Thin request/response exchange with the wrist companion over an injected
//! transport. Validated (score, timestamp) tuples are forwarded to the
//! synchronizer, tagged by message kind.

use std::sync::Arc;

use tracing::{debug, info};

use crate::sync::{Score, ScoreSync, SmartwatchMessageSender};

use super::protocol::{self, WatchDict, WatchFrameError};

/// Delivery surface of the companion transport (Pebble-style store-and-
/// forward bridge, a test double, or nothing at all).
pub trait WatchTransport: Send + Sync {
    /// Hand a frame to the transport. Returns whether it was accepted.
    fn send(&self, dict: &WatchDict) -> bool;

    fn start_watch_app(&self);

    fn stop_watch_app(&self);
}

/// Transport used when no companion bridge is available.
pub struct NullWatchTransport;

impl WatchTransport for NullWatchTransport {
    fn send(&self, _dict: &WatchDict) -> bool {
        debug!("No watch transport, frame dropped");
        false
    }

    fn start_watch_app(&self) {}

    fn stop_watch_app(&self) {}
}

/// Handle to the companion session. Cheap to clone.
#[derive(Clone)]
pub struct SmartwatchManager {
    inner: Arc<WatchInner>,
}

struct WatchInner {
    transport: Arc<dyn WatchTransport>,
    sync: ScoreSync,
}

impl SmartwatchManager {
    pub fn new(transport: Arc<dyn WatchTransport>, sync: ScoreSync) -> Self {
        Self {
            inner: Arc::new(WatchInner { transport, sync }),
        }
    }

    pub fn send_score_to_watch(&self, score: Score, timestamp: u64) {
        info!(
            "Sending score {}:{} T={timestamp} to watch",
            score.left, score.right
        );
        self.inner
            .transport
            .send(&protocol::encode_score(score, timestamp));
    }

    pub fn send_sync_request_to_watch(&self) {
        info!("Sending sync request to watch");
        self.inner.transport.send(&protocol::encode_sync_request());
    }

    pub fn start_watch_app(&self) {
        self.inner.transport.start_watch_app();
    }

    pub fn stop_watch_app(&self) {
        self.inner.transport.stop_watch_app();
    }

    /// Entry point for dictionaries arriving from the transport.
    pub fn handle_received_data(&self, dict: &WatchDict) {
        match protocol::decode(dict) {
            Some((score, timestamp, kind)) => {
                self.inner.sync.on_watch_data_received(score, timestamp, kind);
            }
            None => {
                debug!("Dropping invalid watch dictionary: {dict:?}");
            }
        }
    }

    /// Entry point for raw frames arriving from the transport.
    pub fn handle_received_frame(&self, bytes: &[u8]) -> Result<(), WatchFrameError> {
        let dict = WatchDict::from_bytes(bytes)?;
        self.handle_received_data(&dict);
        Ok(())
    }
}

impl SmartwatchMessageSender for SmartwatchManager {
    fn send_score(&self, score: Score, timestamp: u64) {
        self.send_score_to_watch(score, timestamp);
    }

    fn request_score_sync(&self) {
        self.send_sync_request_to_watch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::watch::{CMD_KEY, SCORE_1_KEY};
    use crate::sync::{ScoreCounterMessageSender, ScoreManager};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<WatchDict>>,
    }

    impl WatchTransport for RecordingTransport {
        fn send(&self, dict: &WatchDict) -> bool {
            self.sent.lock().unwrap().push(dict.clone());
            true
        }
        fn start_watch_app(&self) {}
        fn stop_watch_app(&self) {}
    }

    #[derive(Default)]
    struct RecordingScSender {
        scores: Mutex<Vec<(Score, u64)>>,
    }

    impl ScoreCounterMessageSender for RecordingScSender {
        fn send_score(&self, score: Score, timestamp: u64) {
            self.scores.lock().unwrap().push((score, timestamp));
        }
        fn request_score_sync(&self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbound_frames_reach_the_transport() {
        let score_manager = ScoreManager::new();
        let sync = ScoreSync::new(score_manager);
        let transport = Arc::new(RecordingTransport::default());
        let manager = SmartwatchManager::new(transport.clone(), sync);

        manager.send_score_to_watch(Score::new(3, 4), 77);
        manager.send_sync_request_to_watch();

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].get(SCORE_1_KEY), Some(3));
        assert_eq!(sent[1].get(CMD_KEY), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_set_score_goes_straight_to_the_display() {
        let score_manager = ScoreManager::new();
        let sync = ScoreSync::new(score_manager.clone());
        let sc_sender = Arc::new(RecordingScSender::default());
        let transport = Arc::new(RecordingTransport::default());
        let manager = SmartwatchManager::new(transport, sync.clone());
        sync.bind_senders(sc_sender.clone(), Arc::new(manager.clone()));

        manager.handle_received_data(&protocol::encode_score(Score::new(7, 7), 500));

        assert_eq!(
            sc_sender.scores.lock().unwrap().as_slice(),
            &[(Score::new(7, 7), 500)]
        );
        assert_eq!(score_manager.timestamp(), 500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_dictionary_is_dropped() {
        let score_manager = ScoreManager::new();
        let sync = ScoreSync::new(score_manager.clone());
        let manager = SmartwatchManager::new(Arc::new(NullWatchTransport), sync);

        let mut dict = WatchDict::new();
        dict.insert(CMD_KEY, 1);
        // score and timestamp fields missing
        manager.handle_received_data(&dict);

        assert_eq!(score_manager.timestamp(), 0);
    }
}
