use crate::models::device::Device;
use crate::models::error::TransportError;

/// Platform device enumeration.
///
/// Each call performs a fresh query so hot-plugged devices show up. Devices
/// are returned in platform enumeration order; the registry assigns ordinal
/// indices from that order.
pub trait DeviceSource: Send + Sync {
    fn enumerate(&self) -> Result<Vec<Device>, TransportError>;
}
