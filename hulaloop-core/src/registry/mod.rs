//! Device registry: enumeration snapshot and query resolution.

pub mod static_source;

use crate::models::device::{Device, DeviceCapabilities, DeviceCapability};
use crate::models::error::TransportError;
use crate::traits::device_source::DeviceSource;

pub use static_source::StaticDeviceSource;

/// Holds the last device enumeration and resolves queries against it.
///
/// One instance is owned by the transport; tests construct it around a
/// [`StaticDeviceSource`].
pub struct DeviceRegistry {
    source: Box<dyn DeviceSource>,
    snapshot: Vec<Device>,
}

impl DeviceRegistry {
    pub fn new(source: Box<dyn DeviceSource>) -> Self {
        Self {
            source,
            snapshot: Vec::new(),
        }
    }

    /// Re-enumerate through the platform source and return the new snapshot.
    ///
    /// Ordinal indices are reassigned from enumeration order.
    pub fn list(&mut self) -> Result<Vec<Device>, TransportError> {
        let mut devices = self.source.enumerate()?;
        for (index, device) in devices.iter_mut().enumerate() {
            device.index = index;
        }
        log::debug!("Enumerated {} audio devices", devices.len());
        self.snapshot = devices;
        Ok(self.snapshot.clone())
    }

    /// Re-enumerate and keep only devices with any of `capabilities`.
    pub fn list_by_capability(
        &mut self,
        capabilities: DeviceCapabilities,
    ) -> Result<Vec<Device>, TransportError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|d| d.capabilities.intersects(capabilities))
            .collect())
    }

    /// The last enumeration, without querying the platform.
    pub fn snapshot(&self) -> &[Device] {
        &self.snapshot
    }

    /// Resolve `query` against any device in the last enumeration.
    pub fn resolve(&self, query: &str) -> Result<Device, TransportError> {
        let any = DeviceCapabilities::INPUT | DeviceCapabilities::OUTPUT;
        self.resolve_for(query, any)
    }

    /// Resolve `query` among devices offering any of `capabilities`.
    ///
    /// Accepted forms, tried in order: ordinal index (`"2"`, `"Device #2"`),
    /// exact stable id, case-insensitive name substring. The first match in
    /// enumeration order wins; if other matches carry the same name, the
    /// one with the higher-priority capability is preferred.
    pub fn resolve_for(
        &self,
        query: &str,
        capabilities: DeviceCapabilities,
    ) -> Result<Device, TransportError> {
        let query = query.trim();
        let candidates = || {
            self.snapshot
                .iter()
                .filter(move |d| d.capabilities.intersects(capabilities))
        };

        if let Some(index) = parse_ordinal(query) {
            return candidates()
                .find(|d| d.index == index)
                .cloned()
                .ok_or_else(|| TransportError::DeviceNotFound(query.to_string()));
        }

        if let Some(device) = candidates().find(|d| d.id == query) {
            return Ok(device.clone());
        }

        let needle = query.to_lowercase();
        let matches: Vec<&Device> = candidates()
            .filter(|d| !needle.is_empty() && d.name.to_lowercase().contains(&needle))
            .collect();

        let first = matches
            .first()
            .ok_or_else(|| TransportError::DeviceNotFound(query.to_string()))?;

        let best = matches
            .iter()
            .filter(|d| d.name.eq_ignore_ascii_case(&first.name))
            .min_by_key(|d| (priority_within(d, capabilities), d.index))
            .unwrap_or(first);

        Ok((*best).clone())
    }

    /// Whether `device` is still present in the last enumeration.
    pub fn contains(&self, device: &Device) -> bool {
        self.snapshot
            .iter()
            .any(|d| d.id == device.id && d.capabilities == device.capabilities)
    }

    /// Default device for `capability`: the one flagged default, else the first capable one.
    pub fn default_for(&self, capability: DeviceCapability) -> Option<Device> {
        let capable = || self.snapshot.iter().filter(|d| d.supports(capability));
        capable()
            .find(|d| d.is_default)
            .or_else(|| capable().next())
            .cloned()
    }
}

/// Highest-priority capability the device offers among those requested.
fn priority_within(device: &Device, capabilities: DeviceCapabilities) -> u8 {
    device
        .capabilities
        .iter()
        .filter(|c| capabilities.contains(*c))
        .map(DeviceCapability::priority)
        .min()
        .unwrap_or(u8::MAX)
}

fn parse_ordinal(query: &str) -> Option<usize> {
    let lower = query.to_lowercase();
    let digits = lower
        .strip_prefix("device")
        .map(|rest| rest.trim_start().trim_start_matches('#').trim())
        .unwrap_or(lower.as_str());
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> DeviceRegistry {
        let speakers = DeviceCapabilities::LOOPBACK | DeviceCapabilities::OUTPUT;
        let source = StaticDeviceSource::new(vec![
            Device::new("mic-1", "Built-in Microphone", DeviceCapabilities::RECORD).as_default(),
            Device::new("spk-1", "Speakers", speakers),
            Device::new("usb-out", "USB Headset", DeviceCapabilities::OUTPUT),
            Device::new("usb-in", "USB Headset", DeviceCapabilities::RECORD),
        ]);
        let mut registry = DeviceRegistry::new(Box::new(source));
        registry.list().unwrap();
        registry
    }

    #[test]
    fn list_assigns_ordinals_in_enumeration_order() {
        let mut registry = registry();
        let devices = registry.list().unwrap();
        let indices: Vec<usize> = devices.iter().map(|d| d.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert_eq!(devices[1].label(), "Device #1: Speakers");
    }

    #[test]
    fn resolves_by_ordinal_forms() {
        let registry = registry();
        assert_eq!(registry.resolve("1").unwrap().id, "spk-1");
        assert_eq!(registry.resolve("Device #2").unwrap().id, "usb-out");
        assert_eq!(registry.resolve("device 0").unwrap().id, "mic-1");
        assert!(matches!(
            registry.resolve("9"),
            Err(TransportError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn resolves_by_id_and_case_insensitive_substring() {
        let registry = registry();
        assert_eq!(registry.resolve("usb-in").unwrap().name, "USB Headset");
        assert_eq!(registry.resolve("speak").unwrap().id, "spk-1");
        assert_eq!(registry.resolve("BUILT-IN").unwrap().id, "mic-1");
    }

    #[test]
    fn name_collision_prefers_record_capability() {
        let registry = registry();
        // usb-out enumerates first but usb-in is a record endpoint.
        assert_eq!(registry.resolve("usb headset").unwrap().id, "usb-in");
    }

    #[test]
    fn capability_filter_applies() {
        let registry = registry();
        let out = registry
            .resolve_for("USB", DeviceCapabilities::OUTPUT)
            .unwrap();
        assert_eq!(out.id, "usb-out");
        assert!(matches!(
            registry.resolve_for("Built-in", DeviceCapabilities::OUTPUT),
            Err(TransportError::DeviceNotFound(_))
        ));
        // Ordinal of a device without the capability is not a match.
        let hidden = registry.resolve_for("0", DeviceCapabilities::OUTPUT);
        assert!(hidden.is_err());
    }

    #[test]
    fn missing_name_is_not_found() {
        let registry = registry();
        assert_eq!(
            registry.resolve("Built-in Mic 2"),
            Err(TransportError::DeviceNotFound("Built-in Mic 2".into()))
        );
        assert!(registry.resolve("").is_err());
    }

    #[test]
    fn defaults_prefer_flagged_device() {
        let registry = registry();
        let record = registry.default_for(DeviceCapability::Record);
        assert_eq!(record.unwrap().id, "mic-1");
        let output = registry.default_for(DeviceCapability::Output);
        assert_eq!(output.unwrap().id, "spk-1");
    }

    #[test]
    fn hot_plug_is_visible_after_relist() {
        let mic_a = Device::new("a", "Mic A", DeviceCapabilities::RECORD);
        let source = StaticDeviceSource::new(vec![mic_a]);
        let handle = source.clone();
        let mut registry = DeviceRegistry::new(Box::new(source));
        registry.list().unwrap();
        let mic = registry.resolve("Mic A").unwrap();

        handle.set_devices(vec![Device::new("b", "Mic B", DeviceCapabilities::RECORD)]);
        assert!(registry.contains(&mic));
        registry.list().unwrap();
        assert!(!registry.contains(&mic));
        assert!(registry.resolve("Mic A").is_err());
        assert_eq!(registry.resolve("Mic B").unwrap().id, "b");
    }

    #[test]
    fn list_by_capability_filters() {
        let mut registry = registry();
        let outputs = registry
            .list_by_capability(DeviceCapabilities::OUTPUT)
            .unwrap();
        assert_eq!(outputs.len(), 2);
        let loopback = registry
            .list_by_capability(DeviceCapabilities::LOOPBACK)
            .unwrap();
        assert_eq!(loopback[0].id, "spk-1");
    }
}
