use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::TransportError;

/// Transport state machine.
///
/// State transitions:
/// ```text
///            record (after optional delay)
/// Ready ─────────────────────────────▶ Recording ◀──▶ Paused
///   ▲                                     │            │ │
///   │ discard                        stop │       stop │ │ resume
///   │                                     ▼            ▼ │
///   └──────────────────────────────── Stopped ◀──── Playing
///                                        │ playback  ▲
///                                        └───────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    Ready,
    Recording,
    Paused,
    Playing,
    Stopped,
}

impl TransportState {
    /// Numeric code used by persistence and IPC layers.
    pub fn code(self) -> u8 {
        match self {
            Self::Ready => 0,
            Self::Recording => 1,
            Self::Paused => 2,
            Self::Playing => 3,
            Self::Stopped => 4,
        }
    }

    /// Whether a session exists in this state.
    pub fn has_session(self) -> bool {
        !matches!(self, Self::Ready)
    }

    /// Whether a backend stream is actively delivering frames.
    pub fn is_streaming(self) -> bool {
        matches!(self, Self::Recording | Self::Playing)
    }
}

impl TryFrom<u8> for TransportState {
    type Error = TransportError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Ready),
            1 => Ok(Self::Recording),
            2 => Ok(Self::Paused),
            3 => Ok(Self::Playing),
            4 => Ok(Self::Stopped),
            other => Err(TransportError::UnknownState(other)),
        }
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ready => "Ready",
            Self::Recording => "Recording",
            Self::Paused => "Paused",
            Self::Playing => "Playing",
            Self::Stopped => "Stopped",
        };
        f.write_str(name)
    }
}

/// Commands accepted by the transport, used for transition errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Record,
    Pause,
    Resume,
    Stop,
    Playback,
    Export,
    Discard,
    SetInputDevice,
    SetOutputDevice,
    SetSampleRate,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Record => "record",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Stop => "stop",
            Self::Playback => "play back",
            Self::Export => "export",
            Self::Discard => "discard",
            Self::SetInputDevice => "set input device",
            Self::SetOutputDevice => "set output device",
            Self::SetSampleRate => "set sample rate",
        };
        f.write_str(name)
    }
}

/// A committed state change, as reported to observers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionEvent {
    pub from: TransportState,
    pub to: TransportState,
    /// Monotonic time since the transport was created.
    pub timestamp: Duration,
    /// Active (unpaused) time of the current session.
    pub elapsed: Duration,
}
