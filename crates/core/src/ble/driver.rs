//! GATT driver boundary.
//!
//! The connection manager never talks to a platform Bluetooth stack directly.
//! It issues fire-and-forget commands through [`GattDriver`] and consumes the
//! asynchronous completions as [`GattEvent`] messages on a channel, so all
//! queue state stays inside one mutual-exclusion domain regardless of which
//! thread the platform delivers its callbacks on.

use std::fmt;

use tokio::sync::mpsc;
use uuid::Uuid;

/// Stable identity of a remote device (platform address string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceAddress(String);

impl DeviceAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceAddress {
    fn from(address: &str) -> Self {
        Self(address.to_string())
    }
}

/// How a characteristic write should be performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    WithResponse,
    WithoutResponse,
}

/// Outcome reported by the platform stack for a GATT callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattStatus {
    Success,
    /// The peripheral requires an encrypted/authenticated link first.
    InsufficientAuthentication,
    /// Sporadic stack error (the well-known 133/128 family); worth retrying.
    TransientFailure(u8),
    /// Any other error status.
    Failure(u8),
}

impl GattStatus {
    pub fn is_success(self) -> bool {
        matches!(self, GattStatus::Success)
    }
}

/// Physical link state reported by a connection-state callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhyLinkState {
    Connected,
    Disconnected,
}

/// A characteristic discovered on a remote device, with its properties and
/// descriptor set. This is all the manager needs to validate operations.
#[derive(Debug, Clone)]
pub struct CharacteristicInfo {
    pub uuid: Uuid,
    pub readable: bool,
    pub writable: bool,
    pub writable_without_response: bool,
    pub notifiable: bool,
    pub indicatable: bool,
    pub descriptors: Vec<Uuid>,
}

impl CharacteristicInfo {
    pub fn supports_notifications(&self) -> bool {
        self.notifiable || self.indicatable
    }

    pub fn has_descriptor(&self, uuid: Uuid) -> bool {
        self.descriptors.contains(&uuid)
    }
}

/// Events emitted by a [`GattDriver`] implementation.
///
/// Solicited events answer a previously issued driver command; unsolicited
/// ones (`CharacteristicChanged`, `BondStateChanged`, `AdapterStateChanged`,
/// `DeviceDiscovered`) can arrive at any time.
#[derive(Debug, Clone)]
pub enum GattEvent {
    ConnectionStateChanged {
        device: DeviceAddress,
        state: PhyLinkState,
        status: GattStatus,
    },
    ServicesDiscovered {
        device: DeviceAddress,
        status: GattStatus,
        characteristics: Vec<CharacteristicInfo>,
    },
    MtuChanged {
        device: DeviceAddress,
        mtu: u16,
        status: GattStatus,
    },
    CharacteristicRead {
        device: DeviceAddress,
        characteristic: Uuid,
        value: Vec<u8>,
        status: GattStatus,
    },
    CharacteristicWrite {
        device: DeviceAddress,
        characteristic: Uuid,
        status: GattStatus,
    },
    /// Unsolicited notification/indication payload.
    CharacteristicChanged {
        device: DeviceAddress,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    DescriptorRead {
        device: DeviceAddress,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Vec<u8>,
        status: GattStatus,
    },
    DescriptorWrite {
        device: DeviceAddress,
        characteristic: Uuid,
        descriptor: Uuid,
        status: GattStatus,
    },
    BondStateChanged {
        device: DeviceAddress,
        bonded: bool,
    },
    AdapterStateChanged {
        powered: bool,
    },
    DeviceDiscovered {
        device: DeviceAddress,
        name: Option<String>,
        rssi: Option<i16>,
    },
}

/// Channel used by drivers to hand events to the connection manager.
pub type GattEventSender = mpsc::UnboundedSender<GattEvent>;
pub type GattEventReceiver = mpsc::UnboundedReceiver<GattEvent>;

/// Platform GATT stack behind a message-passing boundary.
///
/// Every method is non-blocking: it only starts the platform operation.
/// Completion, success or failure, is reported later as a [`GattEvent`]
/// through the channel handed over at driver construction. Implementations
/// must never invoke the event channel synchronously from inside a command
/// call.
pub trait GattDriver: Send + Sync + 'static {
    fn connect(&self, device: &DeviceAddress);

    fn disconnect(&self, device: &DeviceAddress);

    fn discover_services(&self, device: &DeviceAddress);

    fn request_mtu(&self, device: &DeviceAddress, mtu: u16);

    fn read_characteristic(&self, device: &DeviceAddress, characteristic: Uuid);

    fn write_characteristic(
        &self,
        device: &DeviceAddress,
        characteristic: Uuid,
        kind: WriteKind,
        payload: Vec<u8>,
    );

    fn read_descriptor(&self, device: &DeviceAddress, characteristic: Uuid, descriptor: Uuid);

    fn write_descriptor(
        &self,
        device: &DeviceAddress,
        characteristic: Uuid,
        descriptor: Uuid,
        payload: Vec<u8>,
    );

    /// Locally route notification traffic for a characteristic. Returns false
    /// when the stack refuses, in which case no CCCD write should follow.
    fn set_characteristic_notification(
        &self,
        device: &DeviceAddress,
        characteristic: Uuid,
        enable: bool,
    ) -> bool;

    /// Start bonding with the device; completion arrives as
    /// [`GattEvent::BondStateChanged`].
    fn request_bond(&self, device: &DeviceAddress);

    fn is_bonded(&self, device: &DeviceAddress) -> bool;

    fn start_scan(&self);

    fn stop_scan(&self);

    /// Radio present, powered and usable (permissions granted).
    fn is_powered(&self) -> bool;
}
