//! Connection manager: the serialized GATT operation engine.
//!
//! All GATT traffic, against any number of devices, flows through one bounded
//! queue with a single in-flight slot. Driver completions arrive as
//! [`GattEvent`] messages on a channel and are folded into the queue state
//! under one mutex, so the calling thread and the driver callback context can
//! never race. Operations that could hang the stack carry a deadline; when it
//! fires the operation is re-enqueued at the tail and the slot is freed, so a
//! silent driver can never starve the queue.
//!
//! Modeled after the PunchThrough BLE starter queue design.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::constants::gatt::{CCC_DESCRIPTOR, CUSTOM_MTU_SIZE, MAX_MTU_SIZE, MIN_MTU_SIZE};
use crate::constants::queue::MAX_CONNECT_ATTEMPTS;

use super::driver::{
    CharacteristicInfo, DeviceAddress, GattDriver, GattEvent, GattEventReceiver, GattStatus,
    PhyLinkState, WriteKind,
};
use super::listener::{ConnectionEventListener, ListenerRegistry};
use super::operation::BleOperation;
use super::queue::{OperationQueue, QueuedOperation};

pub const TIMEOUT_CONNECT: Duration = Duration::from_millis(1000);
pub const TIMEOUT_MTU_REQUEST: Duration = Duration::from_millis(1000);
pub const TIMEOUT_DISCONNECT: Duration = Duration::from_millis(1000);
pub const TIMEOUT_CHAR_WRITE: Duration = Duration::from_millis(500);

/// CCCD payloads (Bluetooth Core spec values).
const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];
const ENABLE_INDICATION_VALUE: [u8; 2] = [0x02, 0x00];
const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

/// Per-device connection record. Created on the first connect attempt,
/// destroyed on teardown.
#[derive(Debug, Default)]
struct DeviceRecord {
    /// Physical link established (GATT session usable).
    link_up: bool,
    /// Service discovery finished; the device counts as connected only then.
    services_discovered: bool,
    /// Transient-failure retry counter, reset on success.
    connect_attempts: u32,
    characteristics: Vec<CharacteristicInfo>,
}

struct ManagerState {
    queue: OperationQueue,
    devices: HashMap<DeviceAddress, DeviceRecord>,
}

struct ManagerInner {
    driver: Arc<dyn GattDriver>,
    state: Mutex<ManagerState>,
    listeners: ListenerRegistry,
}

/// Listener callbacks are fired only after the state mutex is released, so a
/// callback may synchronously call back into the manager.
enum Notification {
    Connect(DeviceAddress),
    Disconnect(DeviceAddress),
    ServicesDiscovered(DeviceAddress, Vec<CharacteristicInfo>),
    MtuChanged(DeviceAddress, u16),
    CharacteristicRead(DeviceAddress, Uuid, Vec<u8>),
    CharacteristicWrite(DeviceAddress, Uuid),
    CharacteristicChanged(DeviceAddress, Uuid, Vec<u8>),
    DescriptorRead(DeviceAddress, Uuid),
    DescriptorWrite(DeviceAddress, Uuid),
    NotificationsEnabled(DeviceAddress, Uuid),
    NotificationsDisabled(DeviceAddress, Uuid),
    BondStateChanged(DeviceAddress, bool),
    AdapterStateChanged(bool),
    DeviceDiscovered(DeviceAddress, Option<String>, Option<i16>),
}

enum OpOutcome {
    /// Waiting for a driver event (or a deadline) to complete the operation.
    InFlight,
    /// Operation finished synchronously; the slot can be reused right away.
    Finished,
}

/// Handle to the shared connection engine. Cheap to clone; all clones drive
/// the same queue.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    /// Build the manager around a driver and its event channel, and spawn the
    /// event pump task.
    pub fn new(driver: Arc<dyn GattDriver>, mut events: GattEventReceiver) -> Self {
        let manager = Self {
            inner: Arc::new(ManagerInner {
                driver,
                state: Mutex::new(ManagerState {
                    queue: OperationQueue::new(),
                    devices: HashMap::new(),
                }),
                listeners: ListenerRegistry::new(),
            }),
        };

        let pump = manager.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                pump.handle_gatt_event(event);
            }
        });

        manager
    }

    pub fn register_listener(&self, listener: &Arc<ConnectionEventListener>) {
        self.inner.listeners.register(listener);
    }

    pub fn unregister_listener(&self, listener: &Arc<ConnectionEventListener>) {
        self.inner.listeners.unregister(listener);
    }

    /// Connected means: link up and services discovered.
    pub fn is_connected(&self, device: &DeviceAddress) -> bool {
        let state = self.inner.state.lock().unwrap();
        Self::device_connected(&state, device)
    }

    pub fn find_characteristic(
        &self,
        device: &DeviceAddress,
        characteristic: Uuid,
    ) -> Option<CharacteristicInfo> {
        let state = self.inner.state.lock().unwrap();
        state
            .devices
            .get(device)?
            .characteristics
            .iter()
            .find(|c| c.uuid == characteristic)
            .cloned()
    }

    pub fn pending_operation(&self) -> Option<BleOperation> {
        let state = self.inner.state.lock().unwrap();
        state.queue.pending_operation().cloned()
    }

    pub fn pending_operation_is_connect(&self) -> bool {
        let state = self.inner.state.lock().unwrap();
        state
            .queue
            .pending_operation()
            .is_some_and(|op| op.is_connect())
    }

    /// Number of queued (not yet started) operations. Diagnostics only.
    pub fn queued_operations(&self) -> usize {
        self.inner.state.lock().unwrap().queue.len()
    }

    pub fn connect(&self, device: &DeviceAddress) {
        if self.is_connected(device) {
            warn!(
                "Already connected to {device}! Connect operation not enqueued!"
            );
            return;
        }
        self.enqueue_operation(BleOperation::Connect {
            device: device.clone(),
        });
    }

    pub fn teardown_connection(&self, device: &DeviceAddress) {
        if self.is_connected(device) {
            self.enqueue_operation(BleOperation::Disconnect {
                device: device.clone(),
            });
        } else {
            warn!("Not connected to {device}, cannot teardown connection!");
        }
    }

    pub fn disconnect_all_devices(&self) {
        info!("Disconnecting all devices.");
        let devices: Vec<DeviceAddress> = {
            let state = self.inner.state.lock().unwrap();
            state
                .devices
                .iter()
                .filter(|(_, record)| record.link_up)
                .map(|(device, _)| device.clone())
                .collect()
        };
        for device in devices {
            self.enqueue_operation(BleOperation::Disconnect { device });
        }
    }

    pub fn request_mtu(&self, device: &DeviceAddress, mtu: u16) {
        if !self.is_connected(device) {
            error!("Not connected to {device}, cannot request MTU update!");
            return;
        }
        self.enqueue_operation(BleOperation::MtuRequest {
            device: device.clone(),
            mtu: mtu.clamp(MIN_MTU_SIZE, MAX_MTU_SIZE),
        });
    }

    pub fn read_characteristic(&self, device: &DeviceAddress, characteristic: Uuid) {
        match self.find_characteristic(device, characteristic) {
            Some(info) if self.is_connected(device) && info.readable => {
                self.enqueue_operation(BleOperation::CharacteristicRead {
                    device: device.clone(),
                    characteristic,
                });
            }
            Some(info) if !info.readable => {
                error!("Attempting to read {characteristic} that isn't readable!");
            }
            _ => {
                error!("Not connected to {device}, cannot perform characteristic read!");
            }
        }
    }

    pub fn write_characteristic(
        &self,
        device: &DeviceAddress,
        characteristic: Uuid,
        payload: Vec<u8>,
    ) {
        let Some(info) = self.find_characteristic(device, characteristic) else {
            error!("Characteristic {characteristic} not discovered on {device}!");
            return;
        };
        let write_kind = if info.writable {
            WriteKind::WithResponse
        } else if info.writable_without_response {
            WriteKind::WithoutResponse
        } else {
            error!("Characteristic {characteristic} cannot be written to!");
            return;
        };
        if !self.is_connected(device) {
            error!("Not connected to {device}, cannot perform characteristic write!");
            return;
        }
        self.enqueue_operation(BleOperation::CharacteristicWrite {
            device: device.clone(),
            characteristic,
            write_kind,
            payload,
        });
    }

    pub fn read_descriptor(&self, device: &DeviceAddress, characteristic: Uuid, descriptor: Uuid) {
        if !self.is_connected(device) {
            error!("Not connected to {device}, cannot perform descriptor read!");
            return;
        }
        self.enqueue_operation(BleOperation::DescriptorRead {
            device: device.clone(),
            characteristic,
            descriptor,
        });
    }

    pub fn write_descriptor(
        &self,
        device: &DeviceAddress,
        characteristic: Uuid,
        descriptor: Uuid,
        payload: Vec<u8>,
    ) {
        if !self.is_connected(device) {
            error!("Not connected to {device}, cannot perform descriptor write!");
            return;
        }
        self.enqueue_operation(BleOperation::DescriptorWrite {
            device: device.clone(),
            characteristic,
            descriptor,
            payload,
        });
    }

    pub fn enable_notifications(&self, device: &DeviceAddress, characteristic: Uuid) {
        self.change_notifications(device, characteristic, true);
    }

    pub fn disable_notifications(&self, device: &DeviceAddress, characteristic: Uuid) {
        self.change_notifications(device, characteristic, false);
    }

    /// Ask the platform to bond with the device; the outcome arrives through
    /// the bond-state broadcast.
    pub fn request_bond(&self, device: &DeviceAddress) {
        self.inner.driver.request_bond(device);
    }

    fn change_notifications(&self, device: &DeviceAddress, characteristic: Uuid, enable: bool) {
        match self.find_characteristic(device, characteristic) {
            Some(info) if self.is_connected(device) && info.supports_notifications() => {
                let operation = if enable {
                    BleOperation::EnableNotifications {
                        device: device.clone(),
                        characteristic,
                    }
                } else {
                    BleOperation::DisableNotifications {
                        device: device.clone(),
                        characteristic,
                    }
                };
                self.enqueue_operation(operation);
            }
            Some(_) => {
                error!(
                    "Characteristic {characteristic} doesn't support notifications/indications!"
                );
            }
            None => {
                error!("Not connected to {device}, cannot change notifications!");
            }
        }
    }

    fn device_connected(state: &ManagerState, device: &DeviceAddress) -> bool {
        state
            .devices
            .get(device)
            .is_some_and(|record| record.link_up && record.services_discovered)
    }

    fn enqueue_operation(&self, operation: BleOperation) {
        let mut notifications = Vec::new();
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.queue.enqueue(operation) && !state.queue.has_pending() {
                self.advance_queue(&mut state, &mut notifications);
            }
        }
        self.dispatch(notifications);
    }

    /// Start queued operations until one stays in flight or the queue drains.
    /// Caller holds the state lock.
    fn advance_queue(&self, state: &mut ManagerState, notifications: &mut Vec<Notification>) {
        loop {
            if state.queue.has_pending() {
                return;
            }
            let Some(entry) = state.queue.take_next() else {
                return;
            };
            match self.start_operation(state, entry, notifications) {
                OpOutcome::InFlight => return,
                OpOutcome::Finished => {
                    state.queue.complete_pending();
                }
            }
        }
    }

    fn start_operation(
        &self,
        state: &mut ManagerState,
        entry: QueuedOperation,
        notifications: &mut Vec<Notification>,
    ) -> OpOutcome {
        let QueuedOperation { id, operation } = entry;

        // Connect is special-cased: it must work without an existing record.
        if let BleOperation::Connect { device } = &operation {
            if Self::device_connected(state, device) {
                // Already connected, nothing to do.
                return OpOutcome::Finished;
            }
            info!("Connecting to {device}");
            state.devices.entry(device.clone()).or_default();
            self.arm_deadline(id, TIMEOUT_CONNECT);
            self.inner.driver.connect(device);
            return OpOutcome::InFlight;
        }

        // Every other operation needs a live record.
        let device = operation.device().clone();
        if !state.devices.contains_key(&device) {
            error!(
                "Not connected to {device}! Aborting {} operation.",
                operation.kind()
            );
            return OpOutcome::Finished;
        }

        match operation {
            BleOperation::Disconnect { device } => {
                info!("Disconnecting from {device}");
                self.arm_deadline(id, TIMEOUT_DISCONNECT);
                self.inner.driver.disconnect(&device);
                state.devices.remove(&device);
                notifications.push(Notification::Disconnect(device));
                OpOutcome::Finished
            }
            BleOperation::MtuRequest { device, mtu } => {
                self.arm_deadline(id, TIMEOUT_MTU_REQUEST);
                self.inner.driver.request_mtu(&device, mtu);
                OpOutcome::InFlight
            }
            BleOperation::CharacteristicWrite {
                device,
                characteristic,
                write_kind,
                payload,
            } => {
                if Self::characteristic_known(state, &device, characteristic) {
                    self.arm_deadline(id, TIMEOUT_CHAR_WRITE);
                    self.inner
                        .driver
                        .write_characteristic(&device, characteristic, write_kind, payload);
                    OpOutcome::InFlight
                } else {
                    error!("Cannot find {characteristic} to write to");
                    OpOutcome::Finished
                }
            }
            BleOperation::CharacteristicRead {
                device,
                characteristic,
            } => {
                if Self::characteristic_known(state, &device, characteristic) {
                    self.inner.driver.read_characteristic(&device, characteristic);
                    OpOutcome::InFlight
                } else {
                    error!("Cannot find {characteristic} to read from");
                    OpOutcome::Finished
                }
            }
            BleOperation::DescriptorWrite {
                device,
                characteristic,
                descriptor,
                payload,
            } => {
                if Self::descriptor_known(state, &device, characteristic, descriptor) {
                    self.inner
                        .driver
                        .write_descriptor(&device, characteristic, descriptor, payload);
                    OpOutcome::InFlight
                } else {
                    error!("Cannot find {descriptor} to write to");
                    OpOutcome::Finished
                }
            }
            BleOperation::DescriptorRead {
                device,
                characteristic,
                descriptor,
            } => {
                if Self::descriptor_known(state, &device, characteristic, descriptor) {
                    self.inner
                        .driver
                        .read_descriptor(&device, characteristic, descriptor);
                    OpOutcome::InFlight
                } else {
                    error!("Cannot find {descriptor} to read from");
                    OpOutcome::Finished
                }
            }
            BleOperation::EnableNotifications {
                device,
                characteristic,
            } => self.start_notification_change(state, &device, characteristic, true),
            BleOperation::DisableNotifications {
                device,
                characteristic,
            } => self.start_notification_change(state, &device, characteristic, false),
            BleOperation::Connect { .. } => unreachable!("handled above"),
        }
    }

    /// Enabling or disabling notifications is a two-step driver sub-protocol:
    /// route notifications locally, then write the CCCD. The operation stays
    /// pending until the descriptor write completes.
    fn start_notification_change(
        &self,
        state: &mut ManagerState,
        device: &DeviceAddress,
        characteristic: Uuid,
        enable: bool,
    ) -> OpOutcome {
        let Some(info) = state
            .devices
            .get(device)
            .and_then(|r| r.characteristics.iter().find(|c| c.uuid == characteristic))
        else {
            error!("Cannot find {characteristic}! Failed to change notifications.");
            return OpOutcome::Finished;
        };

        if !info.has_descriptor(CCC_DESCRIPTOR) {
            error!("{characteristic} doesn't contain the CCC descriptor!");
            return OpOutcome::Finished;
        }

        let payload = if !enable {
            DISABLE_NOTIFICATION_VALUE
        } else if info.indicatable {
            ENABLE_INDICATION_VALUE
        } else {
            ENABLE_NOTIFICATION_VALUE
        };

        if !self
            .inner
            .driver
            .set_characteristic_notification(device, characteristic, enable)
        {
            error!("set_characteristic_notification failed for {characteristic}");
            return OpOutcome::Finished;
        }

        self.inner
            .driver
            .write_descriptor(device, characteristic, CCC_DESCRIPTOR, payload.to_vec());
        OpOutcome::InFlight
    }

    fn characteristic_known(
        state: &ManagerState,
        device: &DeviceAddress,
        characteristic: Uuid,
    ) -> bool {
        state
            .devices
            .get(device)
            .is_some_and(|r| r.characteristics.iter().any(|c| c.uuid == characteristic))
    }

    fn descriptor_known(
        state: &ManagerState,
        device: &DeviceAddress,
        characteristic: Uuid,
        descriptor: Uuid,
    ) -> bool {
        state
            .devices
            .get(device)
            .and_then(|r| r.characteristics.iter().find(|c| c.uuid == characteristic))
            .is_some_and(|c| c.has_descriptor(descriptor))
    }

    /// Deadlock prevention: if the operation is still pending when the
    /// deadline fires, re-enqueue it at the tail and free the slot.
    fn arm_deadline(&self, id: u64, timeout: Duration) {
        let manager = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            manager.on_operation_deadline(id);
        });
    }

    fn on_operation_deadline(&self, id: u64) {
        let mut notifications = Vec::new();
        {
            let mut state = self.inner.state.lock().unwrap();
            if !state.queue.is_pending(id) {
                return;
            }
            let Some(entry) = state.queue.complete_pending() else {
                return;
            };
            info!(
                "Cancelling pending operation {} after timeout! Adding it again to the end of the queue!",
                entry.operation.kind()
            );
            state.queue.enqueue(entry.operation);
            self.advance_queue(&mut state, &mut notifications);
        }
        self.dispatch(notifications);
    }

    /// End the pending operation and pull the next one from the queue.
    fn signal_end_of_operation(&self) {
        let mut notifications = Vec::new();
        {
            let mut state = self.inner.state.lock().unwrap();
            if let Some(entry) = state.queue.complete_pending() {
                info!("End of {}", entry.operation.kind());
            }
            self.advance_queue(&mut state, &mut notifications);
        }
        self.dispatch(notifications);
    }

    fn handle_gatt_event(&self, event: GattEvent) {
        let mut notifications = Vec::new();
        let mut end_of_operation = false;

        {
            let mut state = self.inner.state.lock().unwrap();
            match event {
                GattEvent::ConnectionStateChanged {
                    device,
                    state: link,
                    status,
                } => {
                    end_of_operation = self.on_connection_state_changed(
                        &mut state,
                        device,
                        link,
                        status,
                        &mut notifications,
                    );
                }
                GattEvent::ServicesDiscovered {
                    device,
                    status,
                    characteristics,
                } => {
                    if status.is_success() {
                        info!(
                            "Discovered {} characteristics for {device}.",
                            characteristics.len()
                        );
                        if let Some(record) = state.devices.get_mut(&device) {
                            record.services_discovered = true;
                            record.characteristics = characteristics.clone();
                        }
                        // Negotiate a larger MTU right away; the device is
                        // connected now, so this enqueues cleanly.
                        state.queue.enqueue(BleOperation::MtuRequest {
                            device: device.clone(),
                            mtu: CUSTOM_MTU_SIZE,
                        });
                        notifications
                            .push(Notification::ServicesDiscovered(device, characteristics));
                    } else {
                        error!("Service discovery failed due to status {status:?}");
                        Self::teardown_locked(&mut state, &device);
                    }
                    end_of_operation = matches!(
                        state.queue.pending_operation(),
                        Some(BleOperation::Connect { .. })
                    );
                }
                GattEvent::MtuChanged {
                    device,
                    mtu,
                    status,
                } => {
                    info!("ATT MTU changed to {mtu}, success: {}", status.is_success());
                    notifications.push(Notification::MtuChanged(device, mtu));
                    end_of_operation = matches!(
                        state.queue.pending_operation(),
                        Some(BleOperation::MtuRequest { .. })
                    );
                }
                GattEvent::CharacteristicRead {
                    device,
                    characteristic,
                    value,
                    status,
                } => {
                    if status.is_success() {
                        notifications.push(Notification::CharacteristicRead(
                            device,
                            characteristic,
                            value,
                        ));
                    } else {
                        error!("Characteristic read failed for {characteristic}, error: {status:?}");
                    }
                    end_of_operation = matches!(
                        state.queue.pending_operation(),
                        Some(BleOperation::CharacteristicRead { .. })
                    );
                }
                GattEvent::CharacteristicWrite {
                    device,
                    characteristic,
                    status,
                } => {
                    if status.is_success() {
                        notifications
                            .push(Notification::CharacteristicWrite(device, characteristic));
                    } else {
                        error!(
                            "Characteristic write failed for {characteristic}, error: {status:?}"
                        );
                    }
                    end_of_operation = matches!(
                        state.queue.pending_operation(),
                        Some(BleOperation::CharacteristicWrite { .. })
                    );
                }
                GattEvent::CharacteristicChanged {
                    device,
                    characteristic,
                    value,
                } => {
                    notifications.push(Notification::CharacteristicChanged(
                        device,
                        characteristic,
                        value,
                    ));
                }
                GattEvent::DescriptorRead {
                    device,
                    descriptor,
                    value: _,
                    status,
                    ..
                } => {
                    if status.is_success() {
                        notifications.push(Notification::DescriptorRead(device, descriptor));
                    } else {
                        error!("Descriptor read failed for {descriptor}, error: {status:?}");
                    }
                    end_of_operation = matches!(
                        state.queue.pending_operation(),
                        Some(BleOperation::DescriptorRead { .. })
                    );
                }
                GattEvent::DescriptorWrite {
                    device,
                    characteristic,
                    descriptor,
                    status,
                } => {
                    end_of_operation = self.on_descriptor_write(
                        &mut state,
                        device,
                        characteristic,
                        descriptor,
                        status,
                        &mut notifications,
                    );
                }
                GattEvent::BondStateChanged { device, bonded } => {
                    notifications.push(Notification::BondStateChanged(device, bonded));
                }
                GattEvent::AdapterStateChanged { powered } => {
                    notifications.push(Notification::AdapterStateChanged(powered));
                }
                GattEvent::DeviceDiscovered { device, name, rssi } => {
                    notifications.push(Notification::DeviceDiscovered(device, name, rssi));
                }
            }
        }

        self.dispatch(notifications);
        if end_of_operation {
            self.signal_end_of_operation();
        }
    }

    /// Returns whether the pending operation should be signalled as ended.
    fn on_connection_state_changed(
        &self,
        state: &mut ManagerState,
        device: DeviceAddress,
        link: PhyLinkState,
        status: GattStatus,
        notifications: &mut Vec<Notification>,
    ) -> bool {
        match status {
            GattStatus::Success => match link {
                PhyLinkState::Connected => {
                    info!("Connected to {device}");
                    let record = state.devices.entry(device.clone()).or_default();
                    record.link_up = true;
                    record.connect_attempts = 0;
                    notifications.push(Notification::Connect(device.clone()));
                    self.inner.driver.discover_services(&device);
                    // The Connect operation ends once services are discovered.
                    false
                }
                PhyLinkState::Disconnected => {
                    info!("Disconnected from {device}");
                    if Self::device_connected(state, &device) {
                        state.queue.enqueue(BleOperation::Disconnect { device });
                    } else if state.devices.remove(&device).is_some() {
                        // Link dropped before discovery finished.
                        notifications.push(Notification::Disconnect(device));
                    }
                    false
                }
            },
            GattStatus::InsufficientAuthentication => {
                // Requires pairing/bonding; bonding completion re-issues the
                // connect through the bond-state broadcast.
                self.inner.driver.request_bond(&device);
                true
            }
            GattStatus::TransientFailure(code) => {
                if matches!(
                    state.queue.pending_operation(),
                    Some(BleOperation::Connect { .. })
                ) {
                    let attempts = state
                        .devices
                        .get(&device)
                        .map(|r| r.connect_attempts)
                        .unwrap_or(0);
                    if attempts < MAX_CONNECT_ATTEMPTS {
                        let attempts = attempts + 1;
                        error!(
                            "Connect operation was not successful for {device} (status {code}), \
                             trying again. Attempt #{attempts}"
                        );
                        if let Some(record) = state.devices.get_mut(&device) {
                            record.connect_attempts = attempts;
                        }
                        state.queue.enqueue(BleOperation::Connect {
                            device: device.clone(),
                        });
                    } else {
                        error!("Max connect attempts reached for {device}, giving up");
                        state.devices.remove(&device);
                    }
                } else {
                    Self::teardown_locked(state, &device);
                }
                true
            }
            GattStatus::Failure(code) => {
                error!("Connection state change: status {code} encountered for {device}!");
                let end = matches!(
                    state.queue.pending_operation(),
                    Some(BleOperation::Connect { .. })
                );
                Self::teardown_locked(state, &device);
                end
            }
        }
    }

    fn on_descriptor_write(
        &self,
        state: &mut ManagerState,
        device: DeviceAddress,
        characteristic: Uuid,
        descriptor: Uuid,
        status: GattStatus,
        notifications: &mut Vec<Notification>,
    ) -> bool {
        let is_cccd = descriptor == CCC_DESCRIPTOR;
        let pending = state.queue.pending_operation();
        let is_notifications_operation = is_cccd
            && matches!(
                pending,
                Some(
                    BleOperation::EnableNotifications { .. }
                        | BleOperation::DisableNotifications { .. }
                )
            );
        let is_manual_write_operation =
            !is_cccd && matches!(pending, Some(BleOperation::DescriptorWrite { .. }));

        if status.is_success() {
            if is_notifications_operation {
                match pending {
                    Some(BleOperation::EnableNotifications { .. }) => {
                        info!("Notifications or indications ENABLED on {characteristic}");
                        notifications
                            .push(Notification::NotificationsEnabled(device, characteristic));
                    }
                    Some(BleOperation::DisableNotifications { .. }) => {
                        info!("Notifications or indications DISABLED on {characteristic}");
                        notifications
                            .push(Notification::NotificationsDisabled(device, characteristic));
                    }
                    _ => {}
                }
            } else {
                notifications.push(Notification::DescriptorWrite(device, descriptor));
            }
        } else {
            error!("Descriptor write failed for {descriptor}, error: {status:?}");
        }

        is_notifications_operation || is_manual_write_operation
    }

    /// Drop a device unconditionally: close the driver session, forget the
    /// record. Caller holds the state lock; no listener is notified here,
    /// the disconnect path takes care of that.
    fn teardown_locked(state: &mut ManagerState, device: &DeviceAddress) {
        if Self::device_connected(state, device) {
            state.queue.enqueue(BleOperation::Disconnect {
                device: device.clone(),
            });
        } else {
            state.devices.remove(device);
        }
    }

    fn dispatch(&self, notifications: Vec<Notification>) {
        if notifications.is_empty() {
            return;
        }
        let listeners = self.inner.listeners.alive();
        for notification in &notifications {
            for listener in &listeners {
                Self::deliver(listener, notification);
            }
        }
    }

    fn deliver(listener: &ConnectionEventListener, notification: &Notification) {
        match notification {
            Notification::Connect(device) => {
                if let Some(cb) = &listener.on_connect {
                    cb(device);
                }
            }
            Notification::Disconnect(device) => {
                if let Some(cb) = &listener.on_disconnect {
                    cb(device);
                }
            }
            Notification::ServicesDiscovered(device, characteristics) => {
                if let Some(cb) = &listener.on_services_discovered {
                    cb(device, characteristics);
                }
            }
            Notification::MtuChanged(device, mtu) => {
                if let Some(cb) = &listener.on_mtu_changed {
                    cb(device, *mtu);
                }
            }
            Notification::CharacteristicRead(device, characteristic, value) => {
                if let Some(cb) = &listener.on_characteristic_read {
                    cb(device, *characteristic, value);
                }
            }
            Notification::CharacteristicWrite(device, characteristic) => {
                if let Some(cb) = &listener.on_characteristic_write {
                    cb(device, *characteristic);
                }
            }
            Notification::CharacteristicChanged(device, characteristic, value) => {
                if let Some(cb) = &listener.on_characteristic_changed {
                    cb(device, *characteristic, value);
                }
            }
            Notification::DescriptorRead(device, descriptor) => {
                if let Some(cb) = &listener.on_descriptor_read {
                    cb(device, *descriptor);
                }
            }
            Notification::DescriptorWrite(device, descriptor) => {
                if let Some(cb) = &listener.on_descriptor_write {
                    cb(device, *descriptor);
                }
            }
            Notification::NotificationsEnabled(device, characteristic) => {
                if let Some(cb) = &listener.on_notifications_enabled {
                    cb(device, *characteristic);
                }
            }
            Notification::NotificationsDisabled(device, characteristic) => {
                if let Some(cb) = &listener.on_notifications_disabled {
                    cb(device, *characteristic);
                }
            }
            Notification::BondStateChanged(device, bonded) => {
                if let Some(cb) = &listener.on_bond_state_changed {
                    cb(device, *bonded);
                }
            }
            Notification::AdapterStateChanged(powered) => {
                if let Some(cb) = &listener.on_adapter_state_changed {
                    cb(*powered);
                }
            }
            Notification::DeviceDiscovered(device, name, rssi) => {
                if let Some(cb) = &listener.on_device_discovered {
                    cb(device, name.as_deref(), *rssi);
                }
            }
        }
    }
}
