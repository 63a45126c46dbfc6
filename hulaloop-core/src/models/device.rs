use std::fmt;
use std::ops::{BitOr, RangeInclusive};

use serde::{Deserialize, Serialize};

/// A single direction an audio endpoint can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceCapability {
    /// Microphone-style capture endpoint.
    Record,
    /// Capture of the audio mix going to an output endpoint.
    Loopback,
    /// Render endpoint.
    Output,
}

impl DeviceCapability {
    /// Every capability, highest priority first.
    pub const ALL: [Self; 3] = [Self::Record, Self::Loopback, Self::Output];

    /// Tie-break priority when device names collide. Lower wins.
    pub fn priority(self) -> u8 {
        match self {
            Self::Record => 0,
            Self::Loopback => 1,
            Self::Output => 2,
        }
    }

    fn bit(self) -> u8 {
        1 << self.priority()
    }
}

/// Set of [`DeviceCapability`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DeviceCapabilities(u8);

impl DeviceCapabilities {
    pub const NONE: Self = Self(0);
    pub const RECORD: Self = Self(1);
    pub const LOOPBACK: Self = Self(1 << 1);
    pub const OUTPUT: Self = Self(1 << 2);
    /// Anything that can feed a recording.
    pub const INPUT: Self = Self(1 | (1 << 1));

    pub fn contains(self, capability: DeviceCapability) -> bool {
        self.0 & capability.bit() != 0
    }

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Highest-priority capability in the set.
    pub fn primary(self) -> Option<DeviceCapability> {
        self.iter().next()
    }

    pub fn iter(self) -> impl Iterator<Item = DeviceCapability> {
        DeviceCapability::ALL
            .into_iter()
            .filter(move |c| self.contains(*c))
    }
}

impl From<DeviceCapability> for DeviceCapabilities {
    fn from(capability: DeviceCapability) -> Self {
        Self(capability.bit())
    }
}

impl BitOr for DeviceCapabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for DeviceCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self
            .iter()
            .map(|c| match c {
                DeviceCapability::Record => "record",
                DeviceCapability::Loopback => "loopback",
                DeviceCapability::Output => "output",
            })
            .collect();
        f.write_str(&names.join("+"))
    }
}

/// Transport type for an audio device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioTransportType {
    BuiltIn,
    Bluetooth,
    BluetoothLE,
    Usb,
    Virtual,
    Unknown,
}

/// Immutable snapshot of an audio endpoint.
///
/// Produced by a [`DeviceSource`](crate::traits::device_source::DeviceSource)
/// and indexed by the [`DeviceRegistry`](crate::registry::DeviceRegistry).
/// Never mutated after enumeration; a later enumeration yields new values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Stable system identifier (endpoint id, ALSA hw name, ...).
    pub id: String,
    /// Human-readable system name.
    pub name: String,
    /// Ordinal position in the registry's last enumeration (`Device #<n>`).
    pub index: usize,
    pub capabilities: DeviceCapabilities,
    pub min_sample_rate: u32,
    pub max_sample_rate: u32,
    pub channels: u16,
    pub is_default: bool,
    pub transport_type: Option<AudioTransportType>,
}

impl Device {
    /// Creates a device that supports a single fixed sample rate.
    ///
    /// The ordinal index is assigned by the registry at enumeration time.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        capabilities: DeviceCapabilities,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            index: 0,
            capabilities,
            min_sample_rate: 48000,
            max_sample_rate: 48000,
            channels: 2,
            is_default: false,
            transport_type: None,
        }
    }

    pub fn with_sample_rates(mut self, rates: RangeInclusive<u32>) -> Self {
        self.min_sample_rate = *rates.start();
        self.max_sample_rate = *rates.end();
        self
    }

    pub fn with_channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self
    }

    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub fn supports(&self, capability: DeviceCapability) -> bool {
        self.capabilities.contains(capability)
    }

    pub fn supports_sample_rate(&self, sample_rate: u32) -> bool {
        (self.min_sample_rate..=self.max_sample_rate).contains(&sample_rate)
    }

    /// Display label including the ordinal, e.g. `Device #2: Speakers`.
    pub fn label(&self) -> String {
        format!("Device #{}: {}", self.index, self.name)
    }
}
