use std::sync::Arc;

use parking_lot::RwLock;

use crate::models::device::Device;
use crate::models::error::TransportError;
use crate::traits::device_source::DeviceSource;

/// Device source backed by an in-memory list.
///
/// Clones share the list, so a test can keep a handle and simulate
/// hot-plug with [`set_devices`](Self::set_devices).
#[derive(Clone, Default)]
pub struct StaticDeviceSource {
    devices: Arc<RwLock<Vec<Device>>>,
}

impl StaticDeviceSource {
    pub fn new(devices: Vec<Device>) -> Self {
        Self {
            devices: Arc::new(RwLock::new(devices)),
        }
    }

    pub fn set_devices(&self, devices: Vec<Device>) {
        *self.devices.write() = devices;
    }
}

impl DeviceSource for StaticDeviceSource {
    fn enumerate(&self) -> Result<Vec<Device>, TransportError> {
        Ok(self.devices.read().clone())
    }
}
