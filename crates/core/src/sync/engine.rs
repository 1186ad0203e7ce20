//! Three-way score synchronization.
//!
//! Reconciles the phone's authoritative (score, timestamp) against the
//! display's and the smartwatch's most recently reported values, with
//! timestamp recency as the only ordering rule. Each unreachable peer is
//! polled on a bounded budget (2 attempts, 1 s apart); whoever answers takes
//! part in the reconciliation, the rest of the round degrades to a partial
//! sync or a plain reset. A store-and-forward link cannot assume both peers
//! are reachable at once, so the protocol makes progress with whichever
//! subset responds.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tokio::task::JoinHandle;
use tracing::info;

use crate::constants::sync::{
    GET_SC_DATA_MAX_ATTEMPTS, GET_SC_DATA_TIMEOUT, GET_WATCH_DATA_MAX_ATTEMPTS,
    GET_WATCH_DATA_TIMEOUT,
};
use crate::smartwatch::WatchMessageKind;

use super::score::{Score, ScoreManager};

/// Outbound operations towards the score counter display.
pub trait ScoreCounterMessageSender: Send + Sync {
    fn send_score(&self, score: Score, timestamp: u64);
    fn request_score_sync(&self);
}

/// Outbound operations towards the smartwatch companion.
pub trait SmartwatchMessageSender: Send + Sync {
    fn send_score(&self, score: Score, timestamp: u64);
    fn request_score_sync(&self);
}

#[derive(Debug, Default, Clone, Copy)]
struct PeerSnapshots {
    watch_score: Score,
    watch_timestamp: u64,
    sc_score: Score,
    sc_timestamp: u64,
}

#[derive(Default)]
struct PollTimers {
    watch: Option<JoinHandle<()>>,
    sc: Option<JoinHandle<()>>,
}

struct SyncInner {
    score: ScoreManager,
    watch_sender: OnceLock<Arc<dyn SmartwatchMessageSender>>,
    sc_sender: OnceLock<Arc<dyn ScoreCounterMessageSender>>,

    waiting_for_watch_data: AtomicBool,
    waiting_for_sc_data: AtomicBool,
    watch_data_received: AtomicBool,
    sc_data_received: AtomicBool,
    get_watch_data_attempt: AtomicU32,
    get_sc_data_attempt: AtomicU32,

    peers: Mutex<PeerSnapshots>,
    timers: Mutex<PollTimers>,
    /// Serializes `try_sync` against concurrent triggers (UI action vs.
    /// inbound peer message).
    sync_guard: Mutex<()>,
}

/// The synchronization engine. Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct ScoreSync {
    inner: Arc<SyncInner>,
}

impl ScoreSync {
    pub fn new(score: ScoreManager) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                score,
                watch_sender: OnceLock::new(),
                sc_sender: OnceLock::new(),
                waiting_for_watch_data: AtomicBool::new(false),
                waiting_for_sc_data: AtomicBool::new(false),
                watch_data_received: AtomicBool::new(false),
                sc_data_received: AtomicBool::new(false),
                get_watch_data_attempt: AtomicU32::new(0),
                get_sc_data_attempt: AtomicU32::new(0),
                peers: Mutex::new(PeerSnapshots::default()),
                timers: Mutex::new(PollTimers::default()),
                sync_guard: Mutex::new(()),
            }),
        }
    }

    /// Attach the peer transports. The senders depend on the engine in turn,
    /// so they are bound after construction.
    pub fn bind_senders(
        &self,
        sc_sender: Arc<dyn ScoreCounterMessageSender>,
        watch_sender: Arc<dyn SmartwatchMessageSender>,
    ) {
        let _ = self.inner.sc_sender.set(sc_sender);
        let _ = self.inner.watch_sender.set(watch_sender);
    }

    /// Run one synchronization step. Re-entrant and idempotent; callable on
    /// app start, on reconnect, or whenever peer data arrives.
    pub fn try_sync(&self) {
        let _guard = self.inner.sync_guard.lock().unwrap();
        self.try_sync_locked();
    }

    fn try_sync_locked(&self) {
        let inner = &self.inner;
        if self.is_ready() {
            self.full_sync();
            self.reset();
            info!("Full sync done");
            return;
        }

        if !inner.watch_data_received.load(Ordering::SeqCst)
            && !inner.waiting_for_watch_data.load(Ordering::SeqCst)
        {
            self.start_watch_poll();
            inner.waiting_for_watch_data.store(true, Ordering::SeqCst);
        }
        if !inner.sc_data_received.load(Ordering::SeqCst)
            && !inner.waiting_for_sc_data.load(Ordering::SeqCst)
        {
            self.start_sc_poll();
            inner.waiting_for_sc_data.store(true, Ordering::SeqCst);
        }

        let watch_attempts = inner.get_watch_data_attempt.load(Ordering::SeqCst);
        let sc_attempts = inner.get_sc_data_attempt.load(Ordering::SeqCst);

        if inner.watch_data_received.load(Ordering::SeqCst)
            && sc_attempts > GET_SC_DATA_MAX_ATTEMPTS
        {
            self.sync_watch_and_phone();
            self.reset();
            info!("Partial sync done: watch and phone.");
        } else if inner.sc_data_received.load(Ordering::SeqCst)
            && watch_attempts > GET_WATCH_DATA_MAX_ATTEMPTS
        {
            self.sync_sc_and_phone();
            self.reset();
            info!("Partial sync done: score counter and phone.");
        } else if sc_attempts > GET_SC_DATA_MAX_ATTEMPTS
            && watch_attempts > GET_WATCH_DATA_MAX_ATTEMPTS
        {
            // Neither peer reachable this round; local state stands.
            self.reset();
        }
    }

    /// The display answered GET_SCORE.
    pub fn set_score_counter_data(&self, score: Score, timestamp: u64) {
        {
            let mut peers = self.inner.peers.lock().unwrap();
            peers.sc_score = score;
            peers.sc_timestamp = timestamp;
        }
        self.inner.sc_data_received.store(true, Ordering::SeqCst);
        self.inner.waiting_for_sc_data.store(false, Ordering::SeqCst);
        if let Some(timer) = self.inner.timers.lock().unwrap().sc.take() {
            timer.abort();
        }
        self.inner.get_sc_data_attempt.store(0, Ordering::SeqCst);
        self.try_sync();
    }

    fn set_smartwatch_data(&self, score: Score, timestamp: u64) {
        {
            let mut peers = self.inner.peers.lock().unwrap();
            peers.watch_score = score;
            peers.watch_timestamp = timestamp;
        }
        self.inner.watch_data_received.store(true, Ordering::SeqCst);
        self.inner
            .waiting_for_watch_data
            .store(false, Ordering::SeqCst);
        if let Some(timer) = self.inner.timers.lock().unwrap().watch.take() {
            timer.abort();
        }
        self.inner.get_watch_data_attempt.store(0, Ordering::SeqCst);
        self.try_sync();
    }

    /// Validated data from the smartwatch. A user-initiated score set on the
    /// watch bypasses reconciliation entirely: a direct user action always
    /// wins over an in-flight sync.
    pub fn on_watch_data_received(&self, score: Score, timestamp: u64, kind: WatchMessageKind) {
        match kind {
            WatchMessageKind::SetScore => {
                if let Some(sender) = self.inner.sc_sender.get() {
                    sender.send_score(score, timestamp);
                }
                self.inner.score.save_received_score(score, timestamp);
            }
            WatchMessageKind::Sync => {
                self.set_smartwatch_data(score, timestamp);
            }
        }
    }

    fn is_ready(&self) -> bool {
        self.inner.watch_data_received.load(Ordering::SeqCst)
            && self.inner.sc_data_received.load(Ordering::SeqCst)
    }

    /// Both peers reported in: pick the winner by highest timestamp and push
    /// its score to every peer with a strictly lower one. Ties are broken by
    /// the fixed precedence watch > phone > display; a peer already at the
    /// winning timestamp is not written to.
    fn full_sync(&self) {
        let local_timestamp = self.inner.score.timestamp();
        let local_score = self.inner.score.local_score();
        let peers = *self.inner.peers.lock().unwrap();

        if local_timestamp == peers.watch_timestamp && local_timestamp == peers.sc_timestamp {
            // Everything already in sync.
            return;
        }

        if peers.watch_timestamp >= local_timestamp && peers.watch_timestamp >= peers.sc_timestamp
        {
            // Smartwatch has the latest score, propagate it.
            if peers.watch_timestamp > local_timestamp {
                self.inner
                    .score
                    .save_received_score(peers.watch_score, peers.watch_timestamp);
            }
            if peers.watch_timestamp > peers.sc_timestamp {
                if let Some(sender) = self.inner.sc_sender.get() {
                    sender.send_score(peers.watch_score, peers.watch_timestamp);
                }
            }
        } else if local_timestamp >= peers.watch_timestamp
            && local_timestamp >= peers.sc_timestamp
        {
            // Smartphone has the latest score, propagate it to stale peers.
            if local_timestamp > peers.watch_timestamp {
                if let Some(sender) = self.inner.watch_sender.get() {
                    sender.send_score(local_score, local_timestamp);
                }
            }
            if local_timestamp > peers.sc_timestamp {
                if let Some(sender) = self.inner.sc_sender.get() {
                    sender.send_score(local_score, local_timestamp);
                }
            }
        } else {
            // Score counter has the latest score, propagate it.
            self.inner
                .score
                .save_received_score(peers.sc_score, peers.sc_timestamp);
            if peers.sc_timestamp > peers.watch_timestamp {
                if let Some(sender) = self.inner.watch_sender.get() {
                    sender.send_score(peers.sc_score, peers.sc_timestamp);
                }
            }
        }
    }

    fn sync_watch_and_phone(&self) {
        let local_timestamp = self.inner.score.timestamp();
        let peers = *self.inner.peers.lock().unwrap();
        if local_timestamp > peers.watch_timestamp {
            if let Some(sender) = self.inner.watch_sender.get() {
                sender.send_score(self.inner.score.local_score(), local_timestamp);
            }
        } else if local_timestamp < peers.watch_timestamp {
            self.inner
                .score
                .save_received_score(peers.watch_score, peers.watch_timestamp);
        }
    }

    fn sync_sc_and_phone(&self) {
        let local_timestamp = self.inner.score.timestamp();
        let peers = *self.inner.peers.lock().unwrap();
        if local_timestamp > peers.sc_timestamp {
            if let Some(sender) = self.inner.sc_sender.get() {
                sender.send_score(self.inner.score.local_score(), local_timestamp);
            }
        } else if local_timestamp < peers.sc_timestamp {
            self.inner
                .score
                .save_received_score(peers.sc_score, peers.sc_timestamp);
        }
    }

    /// Poll the smartwatch: one sync request per timeout tick until data
    /// arrives or the attempt budget is spent, then re-evaluate the round.
    fn start_watch_poll(&self) {
        let sync = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(GET_WATCH_DATA_TIMEOUT).await;
                let attempt = sync
                    .inner
                    .get_watch_data_attempt
                    .fetch_add(1, Ordering::SeqCst);
                if attempt < GET_WATCH_DATA_MAX_ATTEMPTS {
                    if let Some(sender) = sync.inner.watch_sender.get() {
                        sender.request_score_sync();
                    }
                } else {
                    break;
                }
            }
            sync.poll_budget_spent();
        });
        self.inner.timers.lock().unwrap().watch = Some(handle);
    }

    /// Poll the score counter display, same scheme as the watch poll.
    fn start_sc_poll(&self) {
        let sync = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(GET_SC_DATA_TIMEOUT).await;
                let attempt = sync
                    .inner
                    .get_sc_data_attempt
                    .fetch_add(1, Ordering::SeqCst);
                if attempt < GET_SC_DATA_MAX_ATTEMPTS {
                    if let Some(sender) = sync.inner.sc_sender.get() {
                        sender.request_score_sync();
                    }
                } else {
                    break;
                }
            }
            sync.poll_budget_spent();
        });
        self.inner.timers.lock().unwrap().sc = Some(handle);
    }

    /// A poll exhausted its budget: re-evaluate, unless a concurrent round
    /// already reset the counters.
    fn poll_budget_spent(&self) {
        let _guard = self.inner.sync_guard.lock().unwrap();
        let watch_attempts = self.inner.get_watch_data_attempt.load(Ordering::SeqCst);
        let sc_attempts = self.inner.get_sc_data_attempt.load(Ordering::SeqCst);
        if watch_attempts > GET_WATCH_DATA_MAX_ATTEMPTS
            || sc_attempts > GET_SC_DATA_MAX_ATTEMPTS
        {
            self.try_sync_locked();
        }
    }

    fn reset(&self) {
        let inner = &self.inner;
        inner.waiting_for_watch_data.store(false, Ordering::SeqCst);
        inner.waiting_for_sc_data.store(false, Ordering::SeqCst);
        inner.watch_data_received.store(false, Ordering::SeqCst);
        inner.sc_data_received.store(false, Ordering::SeqCst);

        let mut timers = inner.timers.lock().unwrap();
        if let Some(timer) = timers.sc.take() {
            timer.abort();
        }
        if let Some(timer) = timers.watch.take() {
            timer.abort();
        }

        inner.get_watch_data_attempt.store(0, Ordering::SeqCst);
        inner.get_sc_data_attempt.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingScSender {
        scores: Mutex<Vec<(Score, u64)>>,
        sync_requests: AtomicU32,
    }

    impl ScoreCounterMessageSender for RecordingScSender {
        fn send_score(&self, score: Score, timestamp: u64) {
            self.scores.lock().unwrap().push((score, timestamp));
        }
        fn request_score_sync(&self) {
            self.sync_requests.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct RecordingWatchSender {
        scores: Mutex<Vec<(Score, u64)>>,
        sync_requests: AtomicU32,
    }

    impl SmartwatchMessageSender for RecordingWatchSender {
        fn send_score(&self, score: Score, timestamp: u64) {
            self.scores.lock().unwrap().push((score, timestamp));
        }
        fn request_score_sync(&self) {
            self.sync_requests.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        score: ScoreManager,
        sync: ScoreSync,
        sc: Arc<RecordingScSender>,
        watch: Arc<RecordingWatchSender>,
    }

    fn fixture() -> Fixture {
        let score = ScoreManager::new();
        let sync = ScoreSync::new(score.clone());
        let sc = Arc::new(RecordingScSender::default());
        let watch = Arc::new(RecordingWatchSender::default());
        sync.bind_senders(sc.clone(), watch.clone());
        Fixture {
            score,
            sync,
            sc,
            watch,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_sync_propagates_newest_watch_score() {
        let f = fixture();
        f.score.set_score(1, 1);
        f.score.set_timestamp(100);

        // Display answers first with an older score, watch with the newest.
        f.sync.set_score_counter_data(Score::new(2, 2), 50);
        f.sync
            .on_watch_data_received(Score::new(5, 5), 200, WatchMessageKind::Sync);

        // Watch wins: local adopts it, display gets it pushed.
        assert_eq!(f.score.timestamp(), 200);
        assert_eq!(
            f.sc.scores.lock().unwrap().as_slice(),
            &[(Score::new(5, 5), 200)]
        );
        assert!(f.watch.scores.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_sync_with_equal_timestamps_writes_nothing() {
        let f = fixture();
        f.score.set_score(1, 1);
        f.score.set_timestamp(100);

        f.sync.set_score_counter_data(Score::new(1, 1), 100);
        f.sync
            .on_watch_data_received(Score::new(1, 1), 100, WatchMessageKind::Sync);

        assert!(f.sc.scores.lock().unwrap().is_empty());
        assert!(f.watch.scores.lock().unwrap().is_empty());
        assert_eq!(f.score.timestamp(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_sync_skips_peer_already_at_winning_timestamp() {
        let f = fixture();
        f.score.set_score(1, 1);
        f.score.set_timestamp(50);

        // Watch and display both already carry the winning timestamp.
        f.sync.set_score_counter_data(Score::new(5, 5), 200);
        f.sync
            .on_watch_data_received(Score::new(5, 5), 200, WatchMessageKind::Sync);

        // Local adopts the score, but neither peer is written to.
        assert_eq!(f.score.timestamp(), 200);
        assert!(f.sc.scores.lock().unwrap().is_empty());
        assert!(f.watch.scores.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_newest_propagates_to_stale_peers_only() {
        let f = fixture();
        f.score.set_score(9, 3);
        f.score.set_timestamp(300);

        f.sync.set_score_counter_data(Score::new(2, 2), 300);
        f.sync
            .on_watch_data_received(Score::new(1, 1), 100, WatchMessageKind::Sync);

        // Watch is stale, display is already at the winning timestamp.
        assert_eq!(
            f.watch.scores.lock().unwrap().as_slice(),
            &[(Score::new(9, 3), 300)]
        );
        assert!(f.sc.scores.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_sync_when_only_watch_responds() {
        let f = fixture();
        f.score.set_score(1, 1);
        f.score.set_timestamp(100);

        f.sync.try_sync();
        // Watch answers within budget.
        tokio::time::sleep(Duration::from_millis(100)).await;
        f.sync
            .on_watch_data_received(Score::new(3, 3), 150, WatchMessageKind::Sync);

        // Display never answers; its 2-attempt budget runs dry.
        tokio::time::sleep(Duration::from_millis(3500)).await;

        // Partial sync compared local vs. watch only; display untouched.
        assert_eq!(f.score.timestamp(), 150);
        assert!(f.sc.scores.lock().unwrap().is_empty());
        assert_eq!(f.sc.sync_requests.load(Ordering::SeqCst), 2);
        // Round is over: bookkeeping reset.
        assert!(!f.sync.inner.sc_data_received.load(Ordering::SeqCst));
        assert!(!f.sync.inner.watch_data_received.load(Ordering::SeqCst));
        assert_eq!(f.sync.inner.get_sc_data_attempt.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_peer_reachable_leaves_local_state_unchanged() {
        let f = fixture();
        f.score.set_score(3, 0);
        f.score.set_timestamp(100);

        f.sync.try_sync();
        tokio::time::sleep(Duration::from_millis(3500)).await;

        // Both polls spent their 2 attempts, nothing was propagated.
        assert_eq!(f.sc.sync_requests.load(Ordering::SeqCst), 2);
        assert_eq!(f.watch.sync_requests.load(Ordering::SeqCst), 2);
        assert!(f.sc.scores.lock().unwrap().is_empty());
        assert!(f.watch.scores.lock().unwrap().is_empty());
        assert_eq!(f.score.local_score(), Score::new(3, 0));
        assert_eq!(f.score.timestamp(), 100);
        // Bookkeeping is back to idle, ready for the next round.
        assert!(!f.sync.inner.waiting_for_watch_data.load(Ordering::SeqCst));
        assert!(!f.sync.inner.waiting_for_sc_data.load(Ordering::SeqCst));
        assert_eq!(f.sync.inner.get_watch_data_attempt.load(Ordering::SeqCst), 0);
        assert_eq!(f.sync.inner.get_sc_data_attempt.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_set_score_bypasses_reconciliation() {
        let f = fixture();
        f.score.set_score(1, 1);
        f.score.set_timestamp(100);

        f.sync
            .on_watch_data_received(Score::new(7, 7), 500, WatchMessageKind::SetScore);

        // Pushed straight to the display and adopted locally; no polling.
        assert_eq!(
            f.sc.scores.lock().unwrap().as_slice(),
            &[(Score::new(7, 7), 500)]
        );
        assert_eq!(f.score.timestamp(), 500);
        assert_eq!(f.sc.sync_requests.load(Ordering::SeqCst), 0);
        assert_eq!(f.watch.sync_requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_data_cancels_outstanding_poll() {
        let f = fixture();
        f.score.set_timestamp(100);

        f.sync.try_sync();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        // One request each so far.
        assert_eq!(f.sc.sync_requests.load(Ordering::SeqCst), 1);

        f.sync.set_score_counter_data(Score::new(1, 1), 100);
        tokio::time::sleep(Duration::from_millis(2000)).await;
        // The display poll was cancelled immediately; no further requests.
        assert_eq!(f.sc.sync_requests.load(Ordering::SeqCst), 1);
    }
}
