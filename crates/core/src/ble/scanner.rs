//! BLE scanning for the score counter display.
//!
//! The platform scan itself runs in the driver; this wrapper owns the
//! start/stop policy and the display-name filter. Discovery results surface
//! through the connection manager's `on_device_discovered` callback; callers
//! use [`is_display_device`] to pick the score counter out of the noise.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::constants::DISPLAY_NAME;

use super::driver::GattDriver;

/// True if an advertised name identifies a score counter display.
pub fn is_display_device(name: Option<&str>) -> bool {
    name == Some(DISPLAY_NAME)
}

pub struct BleScanner {
    driver: Arc<dyn GattDriver>,
    scanning: AtomicBool,
}

impl BleScanner {
    pub fn new(driver: Arc<dyn GattDriver>) -> Self {
        Self {
            driver,
            scanning: AtomicBool::new(false),
        }
    }

    /// Permissions and radio state are assumed to be checked by the caller.
    pub fn start_scan(&self) {
        if self.scanning.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Starting BLE scan for {DISPLAY_NAME}");
        self.driver.start_scan();
    }

    pub fn stop_scan(&self) {
        if !self.scanning.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping BLE scan");
        self.driver.stop_scan();
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_filter() {
        assert!(is_display_device(Some("Score-counter-BLE")));
        assert!(!is_display_device(Some("Some-other-device")));
        assert!(!is_display_device(None));
    }
}
