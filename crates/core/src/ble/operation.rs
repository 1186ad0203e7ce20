//! Serialized GATT operations.
//!
//! Every interaction with a remote device is expressed as one of these
//! variants and pushed through the bounded operation queue; the dispatcher in
//! the connection manager matches exhaustively on them.

use uuid::Uuid;

use super::driver::{DeviceAddress, WriteKind};

/// A queued GATT command against one remote device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BleOperation {
    Connect {
        device: DeviceAddress,
    },
    Disconnect {
        device: DeviceAddress,
    },
    MtuRequest {
        device: DeviceAddress,
        mtu: u16,
    },
    CharacteristicRead {
        device: DeviceAddress,
        characteristic: Uuid,
    },
    CharacteristicWrite {
        device: DeviceAddress,
        characteristic: Uuid,
        write_kind: WriteKind,
        payload: Vec<u8>,
    },
    DescriptorRead {
        device: DeviceAddress,
        characteristic: Uuid,
        descriptor: Uuid,
    },
    DescriptorWrite {
        device: DeviceAddress,
        characteristic: Uuid,
        descriptor: Uuid,
        payload: Vec<u8>,
    },
    EnableNotifications {
        device: DeviceAddress,
        characteristic: Uuid,
    },
    DisableNotifications {
        device: DeviceAddress,
        characteristic: Uuid,
    },
}

impl BleOperation {
    /// Target device of this operation.
    pub fn device(&self) -> &DeviceAddress {
        match self {
            BleOperation::Connect { device }
            | BleOperation::Disconnect { device }
            | BleOperation::MtuRequest { device, .. }
            | BleOperation::CharacteristicRead { device, .. }
            | BleOperation::CharacteristicWrite { device, .. }
            | BleOperation::DescriptorRead { device, .. }
            | BleOperation::DescriptorWrite { device, .. }
            | BleOperation::EnableNotifications { device, .. }
            | BleOperation::DisableNotifications { device, .. } => device,
        }
    }

    /// Short name used in queue logging.
    pub fn kind(&self) -> &'static str {
        match self {
            BleOperation::Connect { .. } => "Connect",
            BleOperation::Disconnect { .. } => "Disconnect",
            BleOperation::MtuRequest { .. } => "MtuRequest",
            BleOperation::CharacteristicRead { .. } => "CharacteristicRead",
            BleOperation::CharacteristicWrite { .. } => "CharacteristicWrite",
            BleOperation::DescriptorRead { .. } => "DescriptorRead",
            BleOperation::DescriptorWrite { .. } => "DescriptorWrite",
            BleOperation::EnableNotifications { .. } => "EnableNotifications",
            BleOperation::DisableNotifications { .. } => "DisableNotifications",
        }
    }

    pub fn is_connect(&self) -> bool {
        matches!(self, BleOperation::Connect { .. })
    }
}
