use thiserror::Error;

use super::state::{Command, TransportState};

/// Errors raised by the transport and its collaborators.
///
/// Caller-facing errors are reported synchronously and never retried
/// automatically. `Overrun` is only ever surfaced through diagnostics and
/// observers; no command returns it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("device open failed: {0}")]
    DeviceOpenFailed(String),

    #[error("cannot {command} while {state}")]
    InvalidTransition {
        command: Command,
        state: TransportState,
    },

    #[error("unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("export failed: {0}")]
    ExportFailed(String),

    #[error("overrun: {dropped_frames} frames dropped")]
    Overrun { dropped_frames: u64 },

    #[error("discard requires confirmation")]
    ConfirmationRequired,

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("unknown transport state code: {0}")]
    UnknownState(u8),

    #[error("stream failed: {0}")]
    StreamFailed(String),

    #[error("storage error: {0}")]
    StorageError(String),
}

impl TransportError {
    pub(crate) fn invalid(command: Command, state: TransportState) -> Self {
        Self::InvalidTransition { command, state }
    }
}
