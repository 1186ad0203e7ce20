//! Display link: per-session logic for the score counter.
//!
//! Owns the single writable characteristic once a display is connected,
//! frames outgoing commands, reassembles inbound notification lines, runs
//! the on-connect pipeline (MTU, bonding, notifications, date/time push) and
//! the reconnect-with-backoff policy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::Local;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ble::{ConnectionEventListener, ConnectionManager, DeviceAddress, GattDriver};
use crate::constants::gatt::DISPLAY_WRITABLE_CHARACTERISTIC;
use crate::events::{ConnectionState, CoreEvent, CoreEventSender};
use crate::storage::SettingsStore;
use crate::sync::{Score, ScoreCounterMessageSender, ScoreSync};

use super::config::ScoreCounterCfg;
use super::protocol::{self, DisplayMessage, LineBuffer, ProtocolError};

/// Immediate connect attempts per reconnection burst before the cooldown.
const MAX_IMMEDIATE_RETRIES: u32 = 3;
const INITIAL_SETTLE_DELAY: Duration = Duration::from_millis(100);
const CONNECTION_CHECK_DELAY: Duration = Duration::from_millis(2000);
const RETRY_COOLDOWN: Duration = Duration::from_millis(24_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectionType {
    PersistedDevice,
    LastDevice,
}

struct DisplayState {
    device: Option<DeviceAddress>,
    writable_char: Option<Uuid>,
    line_buffer: LineBuffer,
}

struct LinkInner {
    manager: ConnectionManager,
    driver: Arc<dyn GattDriver>,
    sync: ScoreSync,
    store: Arc<dyn SettingsStore>,
    events: CoreEventSender,
    state: Mutex<DisplayState>,
    manually_disconnected: AtomicBool,
    should_try_connect: AtomicBool,
    /// Only one reconnection loop may run at a time.
    reconnect_running: AtomicBool,
    ask_to_bond: AtomicBool,
    /// Keeps the registered listener alive for the lifetime of the link.
    listener: Mutex<Option<Arc<ConnectionEventListener>>>,
}

/// Handle to the display session. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct ScoreCounterLink {
    inner: Arc<LinkInner>,
}

impl ScoreCounterLink {
    pub fn new(
        manager: ConnectionManager,
        driver: Arc<dyn GattDriver>,
        sync: ScoreSync,
        store: Arc<dyn SettingsStore>,
        events: CoreEventSender,
    ) -> Self {
        let ask_to_bond = store.ask_to_bond();
        let inner = Arc::new(LinkInner {
            manager,
            driver,
            sync,
            store,
            events,
            state: Mutex::new(DisplayState {
                device: None,
                writable_char: None,
                line_buffer: LineBuffer::new(),
            }),
            manually_disconnected: AtomicBool::new(false),
            should_try_connect: AtomicBool::new(false),
            reconnect_running: AtomicBool::new(false),
            ask_to_bond: AtomicBool::new(ask_to_bond),
            listener: Mutex::new(None),
        });

        let listener = Arc::new(Self::build_listener(&inner));
        inner.manager.register_listener(&listener);
        *inner.listener.lock().unwrap() = Some(listener);

        Self { inner }
    }

    /// Reconstruct a handle from the weak reference a callback holds; `None`
    /// once the link is gone.
    fn upgrade(weak: &Weak<LinkInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    fn build_listener(inner: &Arc<LinkInner>) -> ConnectionEventListener {
        let weak = Arc::downgrade(inner);
        let on_mtu = move |device: &DeviceAddress, _mtu: u16| {
            if let Some(link) = Self::upgrade(&weak) {
                link.on_display_ready(device);
            }
        };

        let weak = Arc::downgrade(inner);
        let on_disconnect = move |device: &DeviceAddress| {
            if let Some(link) = Self::upgrade(&weak) {
                link.on_display_disconnected(device);
            }
        };

        let weak = Arc::downgrade(inner);
        let on_changed = move |_device: &DeviceAddress, characteristic: Uuid, value: &[u8]| {
            if characteristic != DISPLAY_WRITABLE_CHARACTERISTIC {
                return;
            }
            if let Some(link) = Self::upgrade(&weak) {
                link.on_notification(value);
            }
        };

        let weak = Arc::downgrade(inner);
        let on_bond = move |device: &DeviceAddress, bonded: bool| {
            if let Some(link) = Self::upgrade(&weak) {
                link.on_bond_state_changed(device, bonded);
            }
        };

        let weak = Arc::downgrade(inner);
        let on_adapter = move |powered: bool| {
            if let Some(link) = Self::upgrade(&weak) {
                link.on_adapter_state_changed(powered);
            }
        };

        ConnectionEventListener::new()
            .on_mtu_changed(on_mtu)
            .on_disconnect(on_disconnect)
            .on_characteristic_changed(on_changed)
            .on_notifications_enabled(|_, _| info!("Enabled notification"))
            .on_bond_state_changed(on_bond)
            .on_adapter_state_changed(on_adapter)
    }

    /// MTU negotiation marks the end of the connect pipeline's GATT half;
    /// from here the link finishes its own setup in order: bonding,
    /// notifications, date/time push.
    fn on_display_ready(&self, device: &DeviceAddress) {
        let writable_char = self
            .inner
            .manager
            .find_characteristic(device, DISPLAY_WRITABLE_CHARACTERISTIC)
            .map(|c| c.uuid);
        {
            let mut state = self.inner.state.lock().unwrap();
            state.device = Some(device.clone());
            state.writable_char = writable_char;
        }

        if self.inner.ask_to_bond.load(Ordering::SeqCst) && !self.inner.driver.is_bonded(device) {
            self.inner.manager.request_bond(device);
        }

        if writable_char.is_some() {
            self.inner
                .manager
                .enable_notifications(device, DISPLAY_WRITABLE_CHARACTERISTIC);
            self.send_day_time();
        } else {
            warn!("Display {device} has no writable characteristic!");
        }

        self.inner.store.save_device_address(device.as_str());

        self.inner
            .manually_disconnected
            .store(false, Ordering::SeqCst);
        self.inner.should_try_connect.store(false, Ordering::SeqCst);

        let _ = self
            .inner
            .events
            .send(CoreEvent::ConnectionStateChanged(ConnectionState::Connected {
                device: device.clone(),
            }));

        // Fresh link; reconcile everyone's score.
        self.inner.sync.try_sync();
    }

    fn on_display_disconnected(&self, device: &DeviceAddress) {
        {
            let mut state = self.inner.state.lock().unwrap();
            state.writable_char = None;
        }

        let manual = self.inner.manually_disconnected.load(Ordering::SeqCst);
        if manual {
            let _ = self.inner.events.send(CoreEvent::ConnectionStateChanged(
                ConnectionState::ManuallyDisconnected,
            ));
        } else {
            info!("Unexpected disconnect from {device}, reconnecting");
            let _ = self
                .inner
                .events
                .send(CoreEvent::ConnectionStateChanged(ConnectionState::NotConnected));
            self.start_reconnection();
        }
    }

    fn on_notification(&self, value: &[u8]) {
        let lines = {
            let mut state = self.inner.state.lock().unwrap();
            state.line_buffer.push(value)
        };
        for line in lines {
            debug!("Full message: {line}");
            self.handle_line(&line);
        }
    }

    fn handle_line(&self, line: &str) {
        match protocol::parse_line(line) {
            Ok(DisplayMessage::Score { score, timestamp }) => {
                self.inner.sync.set_score_counter_data(score, timestamp);
            }
            Ok(DisplayMessage::Config(config)) => {
                let _ = self
                    .inner
                    .events
                    .send(CoreEvent::DisplayConfigReceived(config));
            }
            Ok(DisplayMessage::ConfigPersistAck) => {
                let _ = self.inner.events.send(CoreEvent::DisplayConfigPersisted);
            }
            Err(ProtocolError::Unrecognized(line)) => {
                debug!("Ignoring unrecognized line: {line}");
            }
            Err(e) => {
                warn!("Discarding inbound line: {e}");
            }
        }
    }

    /// Write one framed command to the display. Returns whether the write
    /// was handed to the operation queue.
    fn send_message(&self, message: &str) -> bool {
        let (device, writable_char) = {
            let state = self.inner.state.lock().unwrap();
            (state.device.clone(), state.writable_char)
        };

        let Some(device) = device else {
            debug!("Display not connected.");
            return false;
        };
        if !self.inner.manager.is_connected(&device) {
            debug!("Display not connected.");
            return false;
        }
        let Some(characteristic) = writable_char else {
            debug!("Display connected, but characteristic is missing!");
            return false;
        };

        debug!("Sending BLE message: {}", message.trim_end());
        self.inner
            .manager
            .write_characteristic(&device, characteristic, message.as_bytes().to_vec());
        true
    }

    pub fn send_score(&self, score: Score, timestamp: u64) -> bool {
        self.send_message(&protocol::encode_set_score(score, timestamp))
    }

    pub fn send_sync_request(&self) -> bool {
        self.send_message(&protocol::encode_get_score())
    }

    pub fn send_day_time(&self) -> bool {
        let message = protocol::encode_set_time(&Local::now());
        info!("{}", message.trim_end());
        self.send_message(&message)
    }

    pub fn send_get_config_request(&self) -> bool {
        self.send_message(&protocol::encode_get_config())
    }

    pub fn send_show_score_setting(&self, show_score: bool) -> bool {
        self.send_message(&protocol::encode_show_score(show_score))
    }

    pub fn send_show_date_setting(&self, show_date: bool) -> bool {
        self.send_message(&protocol::encode_show_date(show_date))
    }

    pub fn send_show_time_setting(&self, show_time: bool) -> bool {
        self.send_message(&protocol::encode_show_time(show_time))
    }

    pub fn send_scroll_setting(&self, scroll: bool) -> bool {
        self.send_message(&protocol::encode_scroll(scroll))
    }

    pub fn send_brightness_setting(&self, brightness: u8) -> bool {
        self.send_message(&protocol::encode_brightness(brightness))
    }

    pub fn send_all_leds_on(&self, on: bool) -> bool {
        self.send_message(&protocol::encode_all_leds_on(on))
    }

    pub fn send_persist_config(&self, config: &ScoreCounterCfg) -> bool {
        match protocol::encode_persist_config(config) {
            Ok(message) => self.send_message(&message),
            Err(e) => {
                warn!("Could not encode configuration: {e}");
                false
            }
        }
    }

    pub fn connect(&self, device: &DeviceAddress) {
        self.inner.manager.connect(device);
    }

    /// User-initiated disconnect; suppresses the reconnection policy.
    pub fn disconnect(&self) {
        self.inner
            .manually_disconnected
            .store(true, Ordering::SeqCst);
        self.inner.should_try_connect.store(false, Ordering::SeqCst);
        self.inner.manager.disconnect_all_devices();
    }

    pub fn is_connected(&self) -> bool {
        let device = self.inner.state.lock().unwrap().device.clone();
        device.is_some_and(|d| self.inner.manager.is_connected(&d))
    }

    pub fn connected_device(&self) -> Option<DeviceAddress> {
        self.inner.state.lock().unwrap().device.clone()
    }

    pub fn is_reconnecting(&self) -> bool {
        self.inner.reconnect_running.load(Ordering::SeqCst)
    }

    pub fn set_ask_to_bond(&self, ask_to_bond: bool) {
        self.inner.ask_to_bond.store(ask_to_bond, Ordering::SeqCst);
        self.inner.store.save_ask_to_bond(ask_to_bond);
    }

    /// Auto-connect to the device persisted from the last session. Only
    /// bonded devices qualify.
    pub fn start_connection_to_persisted_device(&self) {
        let Some(address) = self.inner.store.device_address() else {
            return;
        };
        if !self.inner.driver.is_powered() {
            return;
        }
        let device = DeviceAddress::new(address);
        if !self.inner.driver.is_bonded(&device) {
            info!("Last BLE device was not bonded, auto-connection canceled!");
            return;
        }
        self.spawn_try_connect(device, ReconnectionType::PersistedDevice);
    }

    fn start_reconnection(&self) {
        let device = self.inner.state.lock().unwrap().device.clone();
        let Some(device) = device else {
            info!("No display device to reconnect to!");
            return;
        };
        self.spawn_try_connect(device, ReconnectionType::LastDevice);
    }

    fn spawn_try_connect(&self, device: DeviceAddress, reconnection_type: ReconnectionType) {
        let link = self.clone();
        tokio::spawn(async move {
            link.try_connect(device, reconnection_type).await;
        });
    }

    /// Reconnection loop: a short settle delay, then bursts of
    /// [`MAX_IMMEDIATE_RETRIES`] connect attempts 2 s apart with a 24 s
    /// cooldown between bursts. Radio state, permissions and cancellation
    /// are re-checked every iteration.
    async fn try_connect(&self, device: DeviceAddress, reconnection_type: ReconnectionType) {
        if self.inner.reconnect_running.swap(true, Ordering::SeqCst) {
            info!("Some connection coroutine already running!");
            return;
        }

        self.inner.manager.disconnect_all_devices();

        let mut connection_attempts: u32 = 0;
        self.inner.should_try_connect.store(true, Ordering::SeqCst);

        tokio::time::sleep(INITIAL_SETTLE_DELAY).await;
        while self.inner.driver.is_powered()
            && self.inner.should_try_connect.load(Ordering::SeqCst)
        {
            if !self.inner.manager.pending_operation_is_connect() {
                self.inner.manager.connect(&device);
            }
            connection_attempts += 1;
            tokio::time::sleep(CONNECTION_CHECK_DELAY).await;

            if self.inner.manager.is_connected(&device) {
                match reconnection_type {
                    ReconnectionType::PersistedDevice => {
                        info!("Auto-connection to persisted device {device} successful!");
                    }
                    ReconnectionType::LastDevice => {
                        info!("Reconnected to last device {device}!");
                    }
                }
                break;
            }

            if connection_attempts % MAX_IMMEDIATE_RETRIES == 0 {
                tokio::time::sleep(RETRY_COOLDOWN).await;
            }
        }

        self.inner.reconnect_running.store(false, Ordering::SeqCst);
    }

    /// Bonding finished while no connection exists: re-issue the connect
    /// (unless one is already pending).
    fn on_bond_state_changed(&self, device: &DeviceAddress, bonded: bool) {
        if bonded
            && !self.inner.manager.is_connected(device)
            && !self.inner.manager.pending_operation_is_connect()
        {
            self.inner.manager.connect(device);
        }
    }

    fn on_adapter_state_changed(&self, powered: bool) {
        if !powered {
            self.inner.manager.disconnect_all_devices();
            return;
        }
        if self.inner.manually_disconnected.load(Ordering::SeqCst) {
            return;
        }
        // Radio is back; pick up where we left off.
        let has_device = self.inner.state.lock().unwrap().device.is_some();
        if has_device {
            self.start_reconnection();
        } else {
            self.start_connection_to_persisted_device();
        }
    }
}

impl ScoreCounterMessageSender for ScoreCounterLink {
    fn send_score(&self, score: Score, timestamp: u64) {
        ScoreCounterLink::send_score(self, score, timestamp);
    }

    fn request_score_sync(&self) {
        self.send_sync_request();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::testkit::{establish, manager_fixture, settle, DriverCall, RecordingDriver};
    use crate::ble::{GattEvent, GattEventSender, GattStatus, PhyLinkState};
    use crate::events::{self, CoreEventReceiver};
    use crate::storage::MemoryStore;
    use crate::sync::ScoreManager;

    struct Fixture {
        driver: Arc<RecordingDriver>,
        manager: ConnectionManager,
        tx: GattEventSender,
        link: ScoreCounterLink,
        score: ScoreManager,
        sync: ScoreSync,
        store: Arc<MemoryStore>,
        events: CoreEventReceiver,
    }

    fn fixture() -> Fixture {
        let (driver, manager, tx) = manager_fixture();
        let score = ScoreManager::new();
        let sync = ScoreSync::new(score.clone());
        let store = Arc::new(MemoryStore::new());
        let (event_tx, events) = events::channel();
        let link = ScoreCounterLink::new(
            manager.clone(),
            driver.clone(),
            sync.clone(),
            store.clone(),
            event_tx,
        );
        Fixture {
            driver,
            manager,
            tx,
            link,
            score,
            sync,
            store,
            events,
        }
    }

    fn drain(events: &mut CoreEventReceiver) -> Vec<CoreEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    async fn complete_setup_writes(f: &Fixture, device: &DeviceAddress) {
        // Notifications enable is pending; acknowledge the CCCD write, then
        // the queued SET_TIME characteristic write.
        f.tx.send(GattEvent::DescriptorWrite {
            device: device.clone(),
            characteristic: DISPLAY_WRITABLE_CHARACTERISTIC,
            descriptor: crate::constants::gatt::CCC_DESCRIPTOR,
            status: GattStatus::Success,
        })
        .unwrap();
        settle().await;
        f.tx.send(GattEvent::CharacteristicWrite {
            device: device.clone(),
            characteristic: DISPLAY_WRITABLE_CHARACTERISTIC,
            status: GattStatus::Success,
        })
        .unwrap();
        settle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_pipeline_enables_notifications_and_pushes_time() {
        let mut f = fixture();
        let device = DeviceAddress::from("AA:BB");

        establish(&f.manager, &f.tx, &device).await;
        complete_setup_writes(&f, &device).await;

        // CCCD sub-protocol ran.
        assert_eq!(
            f.driver
                .count(|c| matches!(c, DriverCall::SetNotification(_, _, true))),
            1
        );
        // The date/time push went out as the first framed command.
        let payloads = f.driver.written_payloads();
        assert_eq!(payloads.len(), 1);
        let message = String::from_utf8(payloads[0].clone()).unwrap();
        assert!(message.starts_with("SET_TIME="));
        assert!(message.ends_with("\r\n"));

        // Address persisted, connected event emitted.
        assert_eq!(f.store.device_address().as_deref(), Some("AA:BB"));
        assert!(f.link.is_connected());
        let events = drain(&mut f.events);
        assert!(events.iter().any(|e| matches!(
            e,
            CoreEvent::ConnectionStateChanged(ConnectionState::Connected { .. })
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_score_frames_line_when_connected() {
        let f = fixture();
        let device = DeviceAddress::from("AA:BB");

        assert!(!f.link.send_score(Score::new(1, 2), 42));

        establish(&f.manager, &f.tx, &device).await;
        complete_setup_writes(&f, &device).await;

        assert!(f.link.send_score(Score::new(12, 7), 1_700_000_000));
        settle().await;
        let payloads = f.driver.written_payloads();
        let message = String::from_utf8(payloads.last().unwrap().clone()).unwrap();
        assert_eq!(message, "SET_SCORE=12:7T1700000000\r\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_lines_are_dispatched_by_prefix() {
        let mut f = fixture();
        let device = DeviceAddress::from("AA:BB");
        establish(&f.manager, &f.tx, &device).await;
        complete_setup_writes(&f, &device).await;
        drain(&mut f.events);

        // Make the engine full-sync-ready so an inbound SCORE= resolves at
        // once: watch already reported older data.
        f.score.set_timestamp(100);
        f.sync
            .on_watch_data_received(Score::new(0, 0), 50, crate::smartwatch::WatchMessageKind::Sync);

        // Config answer, persist ack and score answer in one notification
        // burst, fragmented mid-line.
        f.tx.send(GattEvent::CharacteristicChanged {
            device: device.clone(),
            characteristic: DISPLAY_WRITABLE_CHARACTERISTIC,
            value: b"CONFIG={\"bright_lvl\":7,\"use_score\":true,\"use_time\":false,\"scroll\":true}\r\nCFG_PERSIST_A".to_vec(),
        })
        .unwrap();
        settle().await;
        f.tx.send(GattEvent::CharacteristicChanged {
            device: device.clone(),
            characteristic: DISPLAY_WRITABLE_CHARACTERISTIC,
            value: b"CK\r\nSCORE=9:9T200\r\n".to_vec(),
        })
        .unwrap();
        settle().await;

        let events = drain(&mut f.events);
        assert!(events.iter().any(|e| matches!(
            e,
            CoreEvent::DisplayConfigReceived(ScoreCounterCfg {
                brightness: 7,
                use_score: true,
                use_time: false,
                scroll: true,
            })
        )));
        assert!(events
            .iter()
            .any(|e| matches!(e, CoreEvent::DisplayConfigPersisted)));
        // The display's newer score won the full sync.
        assert_eq!(f.score.timestamp(), 200);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_score_line_is_discarded() {
        let f = fixture();
        let device = DeviceAddress::from("AA:BB");
        establish(&f.manager, &f.tx, &device).await;
        complete_setup_writes(&f, &device).await;

        f.score.set_timestamp(100);
        f.tx.send(GattEvent::CharacteristicChanged {
            device: device.clone(),
            characteristic: DISPLAY_WRITABLE_CHARACTERISTIC,
            value: b"SCORE=abc:7T100\r\n".to_vec(),
        })
        .unwrap();
        settle().await;

        // No state mutated, no crash.
        assert_eq!(f.score.timestamp(), 100);
        assert_eq!(f.score.local_score(), Score::new(0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_disconnect_starts_reconnection() {
        let f = fixture();
        let device = DeviceAddress::from("AA:BB");
        establish(&f.manager, &f.tx, &device).await;
        complete_setup_writes(&f, &device).await;

        let connects_before = f.driver.count(|c| matches!(c, DriverCall::Connect(_)));

        // Link drops without a user-initiated disconnect.
        f.tx.send(GattEvent::ConnectionStateChanged {
            device: device.clone(),
            state: PhyLinkState::Disconnected,
            status: GattStatus::Success,
        })
        .unwrap();
        settle().await;

        assert!(f.link.is_reconnecting());
        // Settle delay plus one loop iteration issues a fresh connect.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(
            f.driver.count(|c| matches!(c, DriverCall::Connect(_))) > connects_before
        );

        // Cancel; the loop observes it at its next iteration and exits.
        f.link.disconnect();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(!f.link.is_reconnecting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_disconnect_suppresses_reconnection() {
        let mut f = fixture();
        let device = DeviceAddress::from("AA:BB");
        establish(&f.manager, &f.tx, &device).await;
        complete_setup_writes(&f, &device).await;
        drain(&mut f.events);

        f.link.disconnect();
        settle().await;

        assert!(!f.link.is_reconnecting());
        let events = drain(&mut f.events);
        assert!(events.iter().any(|e| matches!(
            e,
            CoreEvent::ConnectionStateChanged(ConnectionState::ManuallyDisconnected)
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_one_reconnection_loop_runs() {
        let f = fixture();
        let device = DeviceAddress::from("AA:BB");
        establish(&f.manager, &f.tx, &device).await;
        complete_setup_writes(&f, &device).await;

        f.tx.send(GattEvent::ConnectionStateChanged {
            device: device.clone(),
            state: PhyLinkState::Disconnected,
            status: GattStatus::Success,
        })
        .unwrap();
        settle().await;
        assert!(f.link.is_reconnecting());

        // A second trigger while one loop runs is a no-op.
        f.link.start_reconnection();
        settle().await;
        assert!(f.link.is_reconnecting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_adapter_off_disconnects_and_on_reconnects() {
        let f = fixture();
        let device = DeviceAddress::from("AA:BB");
        establish(&f.manager, &f.tx, &device).await;
        complete_setup_writes(&f, &device).await;

        f.tx.send(GattEvent::AdapterStateChanged { powered: false })
            .unwrap();
        settle().await;
        assert_eq!(f.driver.count(|c| matches!(c, DriverCall::Disconnect(_))), 1);

        f.tx.send(GattEvent::AdapterStateChanged { powered: true })
            .unwrap();
        settle().await;
        assert!(f.link.is_reconnecting());
    }
}
