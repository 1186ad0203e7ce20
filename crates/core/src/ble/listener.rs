//! Connection event listeners.
//!
//! Consumers register a [`ConnectionEventListener`] holding just the
//! callbacks they care about. The manager keeps only weak references, so a
//! listener dies with its owner; dead entries are purged lazily on every
//! registration pass.

use std::sync::{Arc, Mutex, Weak};

use tracing::debug;
use uuid::Uuid;

use super::driver::{CharacteristicInfo, DeviceAddress};

type DeviceCallback = Box<dyn Fn(&DeviceAddress) + Send + Sync>;
type MtuCallback = Box<dyn Fn(&DeviceAddress, u16) + Send + Sync>;
type CharacteristicCallback = Box<dyn Fn(&DeviceAddress, Uuid) + Send + Sync>;
type CharacteristicValueCallback = Box<dyn Fn(&DeviceAddress, Uuid, &[u8]) + Send + Sync>;
type DescriptorCallback = Box<dyn Fn(&DeviceAddress, Uuid) + Send + Sync>;
type ServicesCallback = Box<dyn Fn(&DeviceAddress, &[CharacteristicInfo]) + Send + Sync>;
type BondCallback = Box<dyn Fn(&DeviceAddress, bool) + Send + Sync>;
type AdapterCallback = Box<dyn Fn(bool) + Send + Sync>;
type DiscoveryCallback = Box<dyn Fn(&DeviceAddress, Option<&str>, Option<i16>) + Send + Sync>;

/// Callbacks invoked by the connection manager. All fields are optional;
/// construct with the builder-style setters and register the final value
/// wrapped in an [`Arc`].
#[derive(Default)]
pub struct ConnectionEventListener {
    pub(crate) on_connect: Option<DeviceCallback>,
    pub(crate) on_disconnect: Option<DeviceCallback>,
    pub(crate) on_services_discovered: Option<ServicesCallback>,
    pub(crate) on_mtu_changed: Option<MtuCallback>,
    pub(crate) on_characteristic_read: Option<CharacteristicValueCallback>,
    pub(crate) on_characteristic_write: Option<CharacteristicCallback>,
    pub(crate) on_characteristic_changed: Option<CharacteristicValueCallback>,
    pub(crate) on_descriptor_read: Option<DescriptorCallback>,
    pub(crate) on_descriptor_write: Option<DescriptorCallback>,
    pub(crate) on_notifications_enabled: Option<CharacteristicCallback>,
    pub(crate) on_notifications_disabled: Option<CharacteristicCallback>,
    pub(crate) on_bond_state_changed: Option<BondCallback>,
    pub(crate) on_adapter_state_changed: Option<AdapterCallback>,
    pub(crate) on_device_discovered: Option<DiscoveryCallback>,
}

impl ConnectionEventListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connect(mut self, f: impl Fn(&DeviceAddress) + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Box::new(f));
        self
    }

    pub fn on_disconnect(mut self, f: impl Fn(&DeviceAddress) + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Box::new(f));
        self
    }

    pub fn on_services_discovered(
        mut self,
        f: impl Fn(&DeviceAddress, &[CharacteristicInfo]) + Send + Sync + 'static,
    ) -> Self {
        self.on_services_discovered = Some(Box::new(f));
        self
    }

    pub fn on_mtu_changed(
        mut self,
        f: impl Fn(&DeviceAddress, u16) + Send + Sync + 'static,
    ) -> Self {
        self.on_mtu_changed = Some(Box::new(f));
        self
    }

    pub fn on_characteristic_read(
        mut self,
        f: impl Fn(&DeviceAddress, Uuid, &[u8]) + Send + Sync + 'static,
    ) -> Self {
        self.on_characteristic_read = Some(Box::new(f));
        self
    }

    pub fn on_characteristic_write(
        mut self,
        f: impl Fn(&DeviceAddress, Uuid) + Send + Sync + 'static,
    ) -> Self {
        self.on_characteristic_write = Some(Box::new(f));
        self
    }

    pub fn on_characteristic_changed(
        mut self,
        f: impl Fn(&DeviceAddress, Uuid, &[u8]) + Send + Sync + 'static,
    ) -> Self {
        self.on_characteristic_changed = Some(Box::new(f));
        self
    }

    pub fn on_descriptor_read(
        mut self,
        f: impl Fn(&DeviceAddress, Uuid) + Send + Sync + 'static,
    ) -> Self {
        self.on_descriptor_read = Some(Box::new(f));
        self
    }

    pub fn on_descriptor_write(
        mut self,
        f: impl Fn(&DeviceAddress, Uuid) + Send + Sync + 'static,
    ) -> Self {
        self.on_descriptor_write = Some(Box::new(f));
        self
    }

    pub fn on_notifications_enabled(
        mut self,
        f: impl Fn(&DeviceAddress, Uuid) + Send + Sync + 'static,
    ) -> Self {
        self.on_notifications_enabled = Some(Box::new(f));
        self
    }

    pub fn on_notifications_disabled(
        mut self,
        f: impl Fn(&DeviceAddress, Uuid) + Send + Sync + 'static,
    ) -> Self {
        self.on_notifications_disabled = Some(Box::new(f));
        self
    }

    pub fn on_bond_state_changed(
        mut self,
        f: impl Fn(&DeviceAddress, bool) + Send + Sync + 'static,
    ) -> Self {
        self.on_bond_state_changed = Some(Box::new(f));
        self
    }

    pub fn on_adapter_state_changed(mut self, f: impl Fn(bool) + Send + Sync + 'static) -> Self {
        self.on_adapter_state_changed = Some(Box::new(f));
        self
    }

    pub fn on_device_discovered(
        mut self,
        f: impl Fn(&DeviceAddress, Option<&str>, Option<i16>) + Send + Sync + 'static,
    ) -> Self {
        self.on_device_discovered = Some(Box::new(f));
        self
    }
}

/// Weak-reference listener registry.
pub(crate) struct ListenerRegistry {
    listeners: Mutex<Vec<Weak<ConnectionEventListener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&self, listener: &Arc<ConnectionEventListener>) {
        let mut listeners = self.listeners.lock().unwrap();
        let already_registered = listeners
            .iter()
            .any(|weak| weak.upgrade().is_some_and(|l| Arc::ptr_eq(&l, listener)));
        if !already_registered {
            listeners.push(Arc::downgrade(listener));
            listeners.retain(|weak| weak.upgrade().is_some());
            debug!("Added a listener, {} listeners total", listeners.len());
        }
    }

    pub fn unregister(&self, listener: &Arc<ConnectionEventListener>) {
        let mut listeners = self.listeners.lock().unwrap();
        listeners.retain(|weak| {
            weak.upgrade()
                .is_some_and(|l| !Arc::ptr_eq(&l, listener))
        });
        debug!("Removed a listener, {} listeners total", listeners.len());
    }

    /// Snapshot of the currently live listeners.
    pub fn alive(&self) -> Vec<Arc<ConnectionEventListener>> {
        self.listeners
            .lock()
            .unwrap()
            .iter()
            .filter_map(|weak| weak.upgrade())
            .collect()
    }
}
