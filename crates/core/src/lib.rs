//! Score Counter RC core library
//!
//! Connection engine and score synchronization for a BLE score counter
//! display and an optional smartwatch companion. The presentation layer is a
//! collaborator: it drives the core through [`ScoreCounterCore`] and observes
//! it through [`CoreEvent`]s.

pub mod ble;
pub mod constants;
pub mod events;
pub mod scorecounter;
pub mod smartwatch;
pub mod storage;
pub mod sync;

// Re-export important types for easier access
pub use ble::{BleScanner, ConnectionEventListener, ConnectionManager, DeviceAddress, GattDriver};
pub use events::{ConnectionState, CoreEvent, CoreEventReceiver};
pub use scorecounter::{ScoreCounterCfg, ScoreCounterLink};
pub use smartwatch::{NullWatchTransport, SmartwatchManager, WatchTransport};
pub use storage::{FileStore, MemoryStore, SettingsStore};
pub use sync::{Score, ScoreManager, ScoreSync};

#[cfg(feature = "bluetooth")]
pub use ble::BtleplugDriver;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, info};

use ble::scanner::is_display_device;
use ble::GattEventReceiver;
use events::CoreEventSender;

/// The assembled core: one explicitly constructed service object owning the
/// connection engine, the display and watch links, the synchronizer and the
/// authoritative score.
#[derive(Clone)]
pub struct ScoreCounterCore {
    inner: Arc<CoreInner>,
}

struct CoreInner {
    score: ScoreManager,
    sync: ScoreSync,
    manager: ConnectionManager,
    link: ScoreCounterLink,
    watch: SmartwatchManager,
    scanner: BleScanner,
    store: Arc<dyn SettingsStore>,
    events: CoreEventSender,
    event_receiver: Mutex<Option<CoreEventReceiver>>,
    /// Current display orientation: true when the display faces the referee.
    facing_referee: AtomicBool,
    /// Orientation at the last confirm, restored by revert.
    prev_facing_referee: AtomicBool,
    /// Keeps the scan-result listener registered for the core's lifetime.
    scan_listener: Mutex<Option<Arc<ConnectionEventListener>>>,
}

impl ScoreCounterCore {
    /// Wire the core together around an injected driver, companion transport
    /// and settings store, restore persisted state, and auto-connect if so
    /// configured.
    pub fn new(
        driver: Arc<dyn GattDriver>,
        driver_events: GattEventReceiver,
        transport: Arc<dyn WatchTransport>,
        store: Arc<dyn SettingsStore>,
    ) -> Self {
        let (event_tx, event_rx) = events::channel();

        let score = ScoreManager::new();
        let sync = ScoreSync::new(score.clone());
        let manager = ConnectionManager::new(driver.clone(), driver_events);
        let link = ScoreCounterLink::new(
            manager.clone(),
            driver.clone(),
            sync.clone(),
            store.clone(),
            event_tx.clone(),
        );
        let watch = SmartwatchManager::new(transport, sync.clone());
        sync.bind_senders(Arc::new(link.clone()), Arc::new(watch.clone()));

        let scanner = BleScanner::new(driver);

        let core = Self {
            inner: Arc::new(CoreInner {
                score,
                sync,
                manager,
                link,
                watch,
                scanner,
                store,
                events: event_tx,
                event_receiver: Mutex::new(Some(event_rx)),
                facing_referee: AtomicBool::new(false),
                prev_facing_referee: AtomicBool::new(false),
                scan_listener: Mutex::new(None),
            }),
        };

        core.register_scan_listener();
        core.load_persisted_state();
        core.spawn_received_score_watcher();

        if core.inner.store.auto_connect_on_startup() {
            info!("Auto-connect enabled, trying persisted device");
            core.inner.link.start_connection_to_persisted_device();
        }

        core
    }

    /// Scan results are forwarded to the UI, filtered to score counters.
    fn register_scan_listener(&self) {
        let events = self.inner.events.clone();
        let listener = Arc::new(ConnectionEventListener::new().on_device_discovered(
            move |device, name, rssi| {
                if is_display_device(name) {
                    let _ = events.send(CoreEvent::DeviceDiscovered {
                        device: device.clone(),
                        name: name.map(str::to_string),
                        rssi,
                    });
                }
            },
        ));
        self.inner.manager.register_listener(&listener);
        *self.inner.scan_listener.lock().unwrap() = Some(listener);
    }

    fn load_persisted_state(&self) {
        let inner = &self.inner;
        let score = inner.store.score();
        let timestamp = inner.store.timestamp();
        let facing_referee = inner.store.orientation();

        inner.score.set_score(score.left, score.right);
        inner.score.set_timestamp(timestamp);
        inner.score.confirm_new_score(false);
        inner.facing_referee.store(facing_referee, Ordering::SeqCst);
        inner
            .prev_facing_referee
            .store(facing_referee, Ordering::SeqCst);
    }

    /// Peer-reported scores arrive on the received channel; fold them into
    /// the local score with the orientation mapping applied, confirm without
    /// re-stamping, and persist.
    fn spawn_received_score_watcher(&self) {
        let weak = Arc::downgrade(&self.inner);
        let mut received = self.inner.score.watch_received_score();
        tokio::spawn(async move {
            while received.changed().await.is_ok() {
                let Some(inner) = Weak::upgrade(&weak) else {
                    break;
                };
                let update = *received.borrow_and_update();
                if let Some((score, _timestamp)) = update {
                    Self::apply_received_score(&inner, score);
                }
            }
        });
    }

    fn apply_received_score(inner: &Arc<CoreInner>, score: Score) {
        // Which side is left and which is right from the phone's
        // perspective depends on the display orientation.
        let facing_referee = inner.facing_referee.load(Ordering::SeqCst);
        let oriented = if facing_referee { score } else { score.swapped() };

        inner.score.set_score(oriented.left, oriented.right);
        inner.score.confirm_new_score(false);

        let local = inner.score.local_score();
        Self::persist_score(inner, local, facing_referee, inner.score.timestamp());
        let _ = inner.events.send(CoreEvent::ScoreChanged(local));
    }

    fn persist_score(inner: &CoreInner, score: Score, facing_referee: bool, timestamp: u64) {
        inner.store.save_score(score);
        inner.store.save_orientation(facing_referee);
        inner.store.save_timestamp(timestamp);
    }

    // ------------------------------------------------------------------
    // Score commands (the UI surface)
    // ------------------------------------------------------------------

    pub fn increment_left(&self) {
        self.inner.score.increment_left();
        self.emit_score();
    }

    pub fn increment_right(&self) {
        self.inner.score.increment_right();
        self.emit_score();
    }

    pub fn decrement_left(&self) {
        self.inner.score.decrement_left();
        self.emit_score();
    }

    pub fn decrement_right(&self) {
        self.inner.score.decrement_right();
        self.emit_score();
    }

    pub fn swap_score(&self) {
        self.inner.score.swap_score();
        self.emit_score();
    }

    pub fn reset_score(&self) {
        self.inner.score.reset_score();
        self.emit_score();
    }

    pub fn toggle_orientation(&self) {
        let facing_referee = !self.inner.facing_referee.load(Ordering::SeqCst);
        self.inner
            .facing_referee
            .store(facing_referee, Ordering::SeqCst);
        let _ = self
            .inner
            .events
            .send(CoreEvent::OrientationChanged { facing_referee });
    }

    /// Confirm the pending score edit: stamp it, push it to both peers (the
    /// pair crosses the boundary swapped unless the display faces the
    /// referee), persist it and kick off a sync round. Returns whether the
    /// display write was issued.
    pub fn confirm_score(&self) -> bool {
        let inner = &self.inner;
        let score = inner.score.local_score();
        let facing_referee = inner.facing_referee.load(Ordering::SeqCst);
        let oriented = if facing_referee { score } else { score.swapped() };

        debug!("Confirming score {}:{}", oriented.left, oriented.right);

        inner.score.confirm_new_score(true);
        let timestamp = inner.score.timestamp();

        let sent_to_display = inner.link.send_score(oriented, timestamp);
        inner.watch.send_score_to_watch(oriented, timestamp);

        inner
            .prev_facing_referee
            .store(facing_referee, Ordering::SeqCst);
        Self::persist_score(inner, score, facing_referee, timestamp);
        self.emit_score();

        inner.sync.try_sync();

        sent_to_display
    }

    /// Abandon the pending score edit: restore the last confirmed score and
    /// orientation.
    pub fn revert_score(&self) {
        let inner = &self.inner;
        inner.score.revert_score();
        let facing_referee = inner.prev_facing_referee.load(Ordering::SeqCst);
        inner.facing_referee.store(facing_referee, Ordering::SeqCst);
        let _ = inner
            .events
            .send(CoreEvent::OrientationChanged { facing_referee });
        self.emit_score();
    }

    fn emit_score(&self) {
        let _ = self
            .inner
            .events
            .send(CoreEvent::ScoreChanged(self.inner.score.local_score()));
    }

    // ------------------------------------------------------------------
    // Connection commands
    // ------------------------------------------------------------------

    pub fn start_scan(&self) {
        self.inner.scanner.start_scan();
    }

    pub fn stop_scan(&self) {
        self.inner.scanner.stop_scan();
    }

    pub fn connect(&self, device: &DeviceAddress) {
        self.inner.link.connect(device);
    }

    pub fn disconnect(&self) {
        self.inner.link.disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.inner.link.is_connected()
    }

    pub fn try_sync(&self) {
        self.inner.sync.try_sync();
    }

    // ------------------------------------------------------------------
    // Display configuration commands
    // ------------------------------------------------------------------

    pub fn request_display_config(&self) -> bool {
        self.inner.link.send_get_config_request()
    }

    pub fn persist_display_config(&self, config: &ScoreCounterCfg) -> bool {
        self.inner.link.send_persist_config(config)
    }

    pub fn set_display_brightness(&self, brightness: u8) -> bool {
        self.inner
            .link
            .send_brightness_setting(brightness.min(scorecounter::config::MAX_BRIGHTNESS))
    }

    pub fn set_display_show_score(&self, show_score: bool) -> bool {
        self.inner.link.send_show_score_setting(show_score)
    }

    pub fn set_display_show_date(&self, show_date: bool) -> bool {
        self.inner.link.send_show_date_setting(show_date)
    }

    pub fn set_display_show_time(&self, show_time: bool) -> bool {
        self.inner.link.send_show_time_setting(show_time)
    }

    pub fn set_display_scroll(&self, scroll: bool) -> bool {
        self.inner.link.send_scroll_setting(scroll)
    }

    pub fn set_display_all_leds_on(&self, on: bool) -> bool {
        self.inner.link.send_all_leds_on(on)
    }

    // ------------------------------------------------------------------
    // Companion and app settings
    // ------------------------------------------------------------------

    pub fn start_watch_app(&self) {
        self.inner.watch.start_watch_app();
    }

    pub fn stop_watch_app(&self) {
        self.inner.watch.stop_watch_app();
    }

    pub fn set_auto_connect_on_startup(&self, auto_connect: bool) {
        self.inner.store.save_auto_connect_on_startup(auto_connect);
    }

    pub fn set_ask_to_bond(&self, ask_to_bond: bool) {
        self.inner.link.set_ask_to_bond(ask_to_bond);
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    pub fn local_score(&self) -> Score {
        self.inner.score.local_score()
    }

    pub fn is_facing_referee(&self) -> bool {
        self.inner.facing_referee.load(Ordering::SeqCst)
    }

    pub fn watch_local_score(&self) -> tokio::sync::watch::Receiver<Score> {
        self.inner.score.watch_local_score()
    }

    /// The UI's event stream; can be taken once.
    pub fn take_event_receiver(&self) -> Option<CoreEventReceiver> {
        self.inner.event_receiver.lock().unwrap().take()
    }

    /// Inbound surface for the host's companion transport glue.
    pub fn smartwatch(&self) -> &SmartwatchManager {
        &self.inner.watch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::testkit::{establish, settle, DriverCall, RecordingDriver};
    use crate::ble::{GattEvent, GattEventSender, GattStatus, PhyLinkState};
    use crate::constants::watch::{SCORE_1_KEY, SCORE_2_KEY, TIMESTAMP_KEY};
    use crate::smartwatch::WatchDict;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<WatchDict>>,
    }

    impl RecordingTransport {
        fn sent(&self) -> Vec<WatchDict> {
            self.sent.lock().unwrap().clone()
        }

        fn score_frames(&self) -> Vec<(u32, u32, u32)> {
            self.sent()
                .iter()
                .filter_map(|d| {
                    Some((
                        d.get(SCORE_1_KEY)?,
                        d.get(SCORE_2_KEY)?,
                        d.get(TIMESTAMP_KEY)?,
                    ))
                })
                .collect()
        }
    }

    impl WatchTransport for RecordingTransport {
        fn send(&self, dict: &WatchDict) -> bool {
            self.sent.lock().unwrap().push(dict.clone());
            true
        }
        fn start_watch_app(&self) {}
        fn stop_watch_app(&self) {}
    }

    struct Fixture {
        driver: Arc<RecordingDriver>,
        tx: GattEventSender,
        transport: Arc<RecordingTransport>,
        store: Arc<MemoryStore>,
        core: ScoreCounterCore,
    }

    fn fixture_with_store(store: Arc<MemoryStore>) -> Fixture {
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = Arc::new(RecordingDriver::new());
        let transport = Arc::new(RecordingTransport::default());
        let core = ScoreCounterCore::new(driver.clone(), rx, transport.clone(), store.clone());
        Fixture {
            driver,
            tx,
            transport,
            store,
            core,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_store(Arc::new(MemoryStore::new()))
    }

    /// Cold start with no peers in reach: three increments, a confirm, and a
    /// sync round that finds nobody - local state must stand unchanged.
    #[tokio::test(start_paused = true)]
    async fn test_cold_start_confirm_with_no_reachable_peers() {
        let f = fixture();

        // No persisted device and auto-connect disabled: no connect attempt.
        settle().await;
        assert_eq!(f.driver.count(|c| matches!(c, DriverCall::Connect(_))), 0);

        f.core.increment_left();
        f.core.increment_left();
        f.core.increment_left();
        assert_eq!(f.core.local_score(), Score::new(3, 0));

        assert!(!f.core.confirm_score());
        let timestamp = f.store.timestamp();
        assert!(timestamp > 0);
        assert_eq!(f.store.score(), Score::new(3, 0));

        // The sync round polls both peers twice each, then gives up.
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(f.core.local_score(), Score::new(3, 0));
        assert_eq!(f.store.timestamp(), timestamp);
        // Watch saw the confirm push plus two sync requests; display saw
        // nothing (not connected).
        assert_eq!(f.transport.sent().len(), 3);
        assert_eq!(f.driver.count(|c| matches!(c, DriverCall::WriteCharacteristic(..))), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirm_swaps_pair_unless_facing_referee() {
        let f = fixture();
        f.core.increment_left();
        f.core.increment_left();
        f.core.increment_right();
        // Local (2, 1); display faces away from the referee by default, so
        // peers receive the swapped pair.
        f.core.confirm_score();
        assert_eq!(f.transport.score_frames().last().unwrap().0, 1);
        assert_eq!(f.transport.score_frames().last().unwrap().1, 2);

        f.core.toggle_orientation();
        f.core.confirm_score();
        let &(score1, score2, _) = f.transport.score_frames().last().unwrap();
        assert_eq!((score1, score2), (2, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_received_score_applies_orientation_mapping_and_persists() {
        let f = fixture();

        // Watch user sets 7:2; with the display facing away, the local view
        // is the mirror image.
        f.core
            .smartwatch()
            .handle_received_data(&smartwatch::protocol::encode_score(Score::new(7, 2), 500));
        settle().await;

        assert_eq!(f.core.local_score(), Score::new(2, 7));
        assert_eq!(f.store.score(), Score::new(2, 7));
        assert_eq!(f.store.timestamp(), 500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persisted_state_restored_at_startup() {
        let store = Arc::new(MemoryStore::new());
        store.save_score(Score::new(5, 6));
        store.save_timestamp(99);
        store.save_orientation(true);

        let f = fixture_with_store(store);
        assert_eq!(f.core.local_score(), Score::new(5, 6));
        assert!(f.core.is_facing_referee());

        // Reverting immediately restores the loaded snapshot.
        f.core.increment_left();
        f.core.revert_score();
        assert_eq!(f.core.local_score(), Score::new(5, 6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_connect_uses_persisted_device() {
        let store = Arc::new(MemoryStore::new());
        store.save_device_address("AA:BB:CC:DD:EE:FF");
        store.save_auto_connect_on_startup(true);

        let f = fixture_with_store(store);
        // Settle delay plus the first reconnection-loop iteration.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            f.driver.count(|c| matches!(
                c,
                DriverCall::Connect(d) if d.as_str() == "AA:BB:CC:DD:EE:FF"
            )),
            1
        );
        drop(f.tx);
    }

    /// Full happy path: connect, sync round against a display that answers
    /// with a newer score, local adoption with orientation mapping.
    #[tokio::test(start_paused = true)]
    async fn test_connected_sync_round_adopts_newer_display_score() {
        let f = fixture();
        let device = DeviceAddress::from("AA:BB");

        establish(&f.core.inner.manager, &f.tx, &device).await;
        // Ack the CCCD write and the SET_TIME push queued by the pipeline.
        f.tx.send(GattEvent::DescriptorWrite {
            device: device.clone(),
            characteristic: constants::gatt::DISPLAY_WRITABLE_CHARACTERISTIC,
            descriptor: constants::gatt::CCC_DESCRIPTOR,
            status: GattStatus::Success,
        })
        .unwrap();
        settle().await;
        f.tx.send(GattEvent::CharacteristicWrite {
            device: device.clone(),
            characteristic: constants::gatt::DISPLAY_WRITABLE_CHARACTERISTIC,
            status: GattStatus::Success,
        })
        .unwrap();
        settle().await;
        assert!(f.core.is_connected());

        // The connect pipeline kicked off a sync round; the watch answers
        // older (a sync reply, not a user-initiated set), the display newer.
        let mut watch_reply = smartwatch::protocol::encode_score(Score::new(1, 1), 50);
        watch_reply.insert(constants::watch::CMD_KEY, constants::watch::CMD_SYNC_SCORE);
        f.core.smartwatch().handle_received_data(&watch_reply);
        f.tx.send(GattEvent::CharacteristicChanged {
            device: device.clone(),
            characteristic: constants::gatt::DISPLAY_WRITABLE_CHARACTERISTIC,
            value: b"SCORE=9:4T800\r\n".to_vec(),
        })
        .unwrap();
        settle().await;

        // Display wins; the local view is its mirror image (facing away),
        // and the stale watch got the winning score pushed.
        assert_eq!(f.core.local_score(), Score::new(4, 9));
        assert_eq!(f.store.timestamp(), 800);
        assert_eq!(f.transport.score_frames().last(), Some(&(9, 4, 800)));

        // An unexpected disconnect now triggers the reconnection loop.
        f.tx.send(GattEvent::ConnectionStateChanged {
            device: device.clone(),
            state: PhyLinkState::Disconnected,
            status: GattStatus::Success,
        })
        .unwrap();
        settle().await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(f.core.inner.link.is_reconnecting());
    }
}
