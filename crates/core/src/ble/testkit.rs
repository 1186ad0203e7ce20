//! Test doubles for the BLE layer, shared by the unit tests across modules.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::constants::gatt::{CCC_DESCRIPTOR, CUSTOM_MTU_SIZE, DISPLAY_WRITABLE_CHARACTERISTIC};

use super::driver::{
    CharacteristicInfo, DeviceAddress, GattDriver, GattEvent, GattEventReceiver, GattEventSender,
    GattStatus, PhyLinkState, WriteKind,
};
use super::manager::ConnectionManager;

/// One recorded driver invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    Connect(DeviceAddress),
    Disconnect(DeviceAddress),
    DiscoverServices(DeviceAddress),
    RequestMtu(DeviceAddress, u16),
    ReadCharacteristic(DeviceAddress, Uuid),
    WriteCharacteristic(DeviceAddress, Uuid, Vec<u8>),
    ReadDescriptor(DeviceAddress, Uuid, Uuid),
    WriteDescriptor(DeviceAddress, Uuid, Uuid, Vec<u8>),
    SetNotification(DeviceAddress, Uuid, bool),
    RequestBond(DeviceAddress),
    StartScan,
    StopScan,
}

/// GattDriver that records every call and performs no I/O. Tests feed
/// completions through the event channel themselves.
pub struct RecordingDriver {
    calls: Mutex<Vec<DriverCall>>,
    pub bonded: AtomicBool,
    pub powered: AtomicBool,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            bonded: AtomicBool::new(true),
            powered: AtomicBool::new(true),
        }
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&DriverCall) -> bool) -> usize {
        self.calls().iter().filter(|c| predicate(c)).count()
    }

    /// Payloads of every characteristic write, in order.
    pub fn written_payloads(&self) -> Vec<Vec<u8>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                DriverCall::WriteCharacteristic(_, _, payload) => Some(payload),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: DriverCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl GattDriver for RecordingDriver {
    fn connect(&self, device: &DeviceAddress) {
        self.record(DriverCall::Connect(device.clone()));
    }

    fn disconnect(&self, device: &DeviceAddress) {
        self.record(DriverCall::Disconnect(device.clone()));
    }

    fn discover_services(&self, device: &DeviceAddress) {
        self.record(DriverCall::DiscoverServices(device.clone()));
    }

    fn request_mtu(&self, device: &DeviceAddress, mtu: u16) {
        self.record(DriverCall::RequestMtu(device.clone(), mtu));
    }

    fn read_characteristic(&self, device: &DeviceAddress, characteristic: Uuid) {
        self.record(DriverCall::ReadCharacteristic(device.clone(), characteristic));
    }

    fn write_characteristic(
        &self,
        device: &DeviceAddress,
        characteristic: Uuid,
        _kind: WriteKind,
        payload: Vec<u8>,
    ) {
        self.record(DriverCall::WriteCharacteristic(
            device.clone(),
            characteristic,
            payload,
        ));
    }

    fn read_descriptor(&self, device: &DeviceAddress, characteristic: Uuid, descriptor: Uuid) {
        self.record(DriverCall::ReadDescriptor(
            device.clone(),
            characteristic,
            descriptor,
        ));
    }

    fn write_descriptor(
        &self,
        device: &DeviceAddress,
        characteristic: Uuid,
        descriptor: Uuid,
        payload: Vec<u8>,
    ) {
        self.record(DriverCall::WriteDescriptor(
            device.clone(),
            characteristic,
            descriptor,
            payload,
        ));
    }

    fn set_characteristic_notification(
        &self,
        device: &DeviceAddress,
        characteristic: Uuid,
        enable: bool,
    ) -> bool {
        self.record(DriverCall::SetNotification(
            device.clone(),
            characteristic,
            enable,
        ));
        true
    }

    fn request_bond(&self, device: &DeviceAddress) {
        self.record(DriverCall::RequestBond(device.clone()));
    }

    fn is_bonded(&self, _device: &DeviceAddress) -> bool {
        self.bonded.load(Ordering::SeqCst)
    }

    fn start_scan(&self) {
        self.record(DriverCall::StartScan);
    }

    fn stop_scan(&self) {
        self.record(DriverCall::StopScan);
    }

    fn is_powered(&self) -> bool {
        self.powered.load(Ordering::SeqCst)
    }
}

/// The display's writable/notifiable characteristic, CCCD included.
pub fn display_characteristic() -> CharacteristicInfo {
    CharacteristicInfo {
        uuid: DISPLAY_WRITABLE_CHARACTERISTIC,
        readable: false,
        writable: true,
        writable_without_response: false,
        notifiable: true,
        indicatable: false,
        descriptors: vec![CCC_DESCRIPTOR],
    }
}

/// Driver, manager and the event channel tests inject completions through.
pub fn manager_fixture() -> (Arc<RecordingDriver>, ConnectionManager, GattEventSender) {
    let (tx, rx): (GattEventSender, GattEventReceiver) = mpsc::unbounded_channel();
    let driver = Arc::new(RecordingDriver::new());
    let manager = ConnectionManager::new(driver.clone(), rx);
    (driver, manager, tx)
}

/// Let spawned tasks and queued events run (timers paused, so this is
/// effectively a scheduler yield).
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Drive a device through the full connect pipeline: link up, services
/// discovered, MTU negotiated.
pub async fn establish(manager: &ConnectionManager, tx: &GattEventSender, device: &DeviceAddress) {
    manager.connect(device);
    tx.send(GattEvent::ConnectionStateChanged {
        device: device.clone(),
        state: PhyLinkState::Connected,
        status: GattStatus::Success,
    })
    .unwrap();
    settle().await;
    tx.send(GattEvent::ServicesDiscovered {
        device: device.clone(),
        status: GattStatus::Success,
        characteristics: vec![display_characteristic()],
    })
    .unwrap();
    settle().await;
    tx.send(GattEvent::MtuChanged {
        device: device.clone(),
        mtu: CUSTOM_MTU_SIZE,
        status: GattStatus::Success,
    })
    .unwrap();
    settle().await;
}
