//! Score model and local score state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::constants::score::{MAX_SCORE, MIN_SCORE};

/// A left/right score pair, each side bounded to `MIN_SCORE..=MAX_SCORE`.
/// Increments and decrements wrap around the bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub left: u16,
    pub right: u16,
}

impl Score {
    pub fn new(left: u16, right: u16) -> Self {
        Self { left, right }
    }

    pub fn swapped(self) -> Self {
        Self {
            left: self.right,
            right: self.left,
        }
    }
}

impl Default for Score {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

fn wrapping_increment(value: u16) -> u16 {
    if value < MAX_SCORE {
        value + 1
    } else {
        MIN_SCORE
    }
}

fn wrapping_decrement(value: u16) -> u16 {
    if value > MIN_SCORE {
        value - 1
    } else {
        MAX_SCORE
    }
}

struct ScoreState {
    local: watch::Sender<Score>,
    /// Snapshot taken at the last confirm, restored by revert.
    prev_local: Mutex<Score>,
    /// Timestamp of the most recently confirmed local score; the value used
    /// when syncing score between all devices.
    timestamp: AtomicU64,
    /// Score received from a peer, kept apart from the local score so the
    /// owner can apply orientation mapping before adopting it.
    received: watch::Sender<Option<(Score, u64)>>,
}

/// Holder of the authoritative local score. Cheap to clone; all clones share
/// one state.
#[derive(Clone)]
pub struct ScoreManager {
    state: Arc<ScoreState>,
}

impl ScoreManager {
    pub fn new() -> Self {
        let (local, _) = watch::channel(Score::default());
        let (received, _) = watch::channel(None);
        Self {
            state: Arc::new(ScoreState {
                local,
                prev_local: Mutex::new(Score::default()),
                timestamp: AtomicU64::new(0),
                received,
            }),
        }
    }

    pub fn local_score(&self) -> Score {
        *self.state.local.borrow()
    }

    /// Observe local score changes.
    pub fn watch_local_score(&self) -> watch::Receiver<Score> {
        self.state.local.subscribe()
    }

    /// Observe scores reported by peers, before orientation mapping.
    pub fn watch_received_score(&self) -> watch::Receiver<Option<(Score, u64)>> {
        self.state.received.subscribe()
    }

    pub fn timestamp(&self) -> u64 {
        self.state.timestamp.load(Ordering::SeqCst)
    }

    pub fn set_timestamp(&self, timestamp: u64) {
        self.state.timestamp.store(timestamp, Ordering::SeqCst);
    }

    pub fn increment_left(&self) {
        self.state
            .local
            .send_modify(|s| s.left = wrapping_increment(s.left));
    }

    pub fn increment_right(&self) {
        self.state
            .local
            .send_modify(|s| s.right = wrapping_increment(s.right));
    }

    pub fn decrement_left(&self) {
        self.state
            .local
            .send_modify(|s| s.left = wrapping_decrement(s.left));
    }

    pub fn decrement_right(&self) {
        self.state
            .local
            .send_modify(|s| s.right = wrapping_decrement(s.right));
    }

    pub fn set_score(&self, left: u16, right: u16) {
        self.state.local.send_replace(Score::new(left, right));
    }

    pub fn reset_score(&self) {
        self.state.local.send_replace(Score::default());
    }

    pub fn swap_score(&self) {
        self.state.local.send_modify(|s| *s = s.swapped());
    }

    /// Accept the current local score: it becomes the revert point, and with
    /// `set_new_timestamp` it is stamped with the current wall clock.
    pub fn confirm_new_score(&self, set_new_timestamp: bool) {
        let mut prev = self.state.prev_local.lock().unwrap();
        *prev = *self.state.local.borrow();
        if set_new_timestamp {
            self.state.timestamp.store(now_secs(), Ordering::SeqCst);
        }
    }

    /// Restore the score snapshot captured at the last confirm.
    pub fn revert_score(&self) {
        let prev = *self.state.prev_local.lock().unwrap();
        self.state.local.send_replace(prev);
    }

    /// Record a score reported by a peer and adopt its timestamp. The score
    /// itself is published on the received channel; the owner decides how to
    /// fold it into the local score.
    pub fn save_received_score(&self, score: Score, timestamp: u64) {
        self.state.received.send_replace(Some((score, timestamp)));
        self.state.timestamp.store(timestamp, Ordering::SeqCst);
    }
}

impl Default for ScoreManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Seconds since the Unix epoch.
pub fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_wraps_at_max() {
        let manager = ScoreManager::new();
        manager.set_score(MAX_SCORE, 5);
        manager.increment_left();
        assert_eq!(manager.local_score(), Score::new(MIN_SCORE, 5));

        manager.set_score(3, MAX_SCORE);
        manager.increment_right();
        assert_eq!(manager.local_score(), Score::new(3, MIN_SCORE));
    }

    #[test]
    fn test_decrement_wraps_at_min() {
        let manager = ScoreManager::new();
        manager.set_score(MIN_SCORE, 5);
        manager.decrement_left();
        assert_eq!(manager.local_score(), Score::new(MAX_SCORE, 5));

        manager.set_score(3, MIN_SCORE);
        manager.decrement_right();
        assert_eq!(manager.local_score(), Score::new(3, MAX_SCORE));
    }

    #[test]
    fn test_revert_restores_last_confirmed_snapshot() {
        let manager = ScoreManager::new();
        manager.set_score(4, 2);
        manager.confirm_new_score(false);

        manager.increment_left();
        manager.increment_left();
        manager.decrement_right();
        assert_eq!(manager.local_score(), Score::new(6, 1));

        manager.revert_score();
        assert_eq!(manager.local_score(), Score::new(4, 2));
    }

    #[test]
    fn test_confirm_with_timestamp_stamps_wall_clock() {
        let manager = ScoreManager::new();
        assert_eq!(manager.timestamp(), 0);
        manager.increment_left();
        manager.confirm_new_score(true);
        assert!(manager.timestamp() > 0);
    }

    #[test]
    fn test_confirm_without_timestamp_keeps_old_stamp() {
        let manager = ScoreManager::new();
        manager.set_timestamp(42);
        manager.confirm_new_score(false);
        assert_eq!(manager.timestamp(), 42);
    }

    #[test]
    fn test_swap_score() {
        let manager = ScoreManager::new();
        manager.set_score(12, 7);
        manager.swap_score();
        assert_eq!(manager.local_score(), Score::new(7, 12));
    }

    #[test]
    fn test_received_score_adopts_timestamp() {
        let manager = ScoreManager::new();
        let mut received = manager.watch_received_score();
        manager.save_received_score(Score::new(9, 9), 1234);
        assert_eq!(manager.timestamp(), 1234);
        assert_eq!(
            *received.borrow_and_update(),
            Some((Score::new(9, 9), 1234))
        );
    }
}
