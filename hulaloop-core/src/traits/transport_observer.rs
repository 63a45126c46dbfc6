use std::time::Duration;

use crate::models::audio_models::AudioLevels;
use crate::models::error::TransportError;
use crate::models::recording_result::ExportResult;
use crate::models::state::TransitionEvent;

/// Observer for transport notifications.
///
/// `on_state_changed` is called synchronously on the thread that committed
/// the transition, before the command returns. Timer-driven transitions
/// (delay elapsed, duration limit, end of playback) and stream failures are
/// reported from internal threads. Implementations should marshal to the UI
/// thread if needed.
pub trait TransportObserver: Send + Sync {
    /// Called after every committed state change.
    fn on_state_changed(&self, event: &TransitionEvent);

    /// Called when a delayed record is armed and on every meter tick while
    /// the countdown runs.
    fn on_countdown(&self, _remaining: Duration) {}

    /// Called when a pending countdown is cancelled by `stop`.
    fn on_countdown_cancelled(&self) {}

    /// Called periodically while recording or playing.
    fn on_levels_updated(&self, _levels: &AudioLevels, _elapsed: Duration) {}

    /// Called for asynchronous errors: stream failures, overruns, failed
    /// delayed starts.
    fn on_error(&self, _error: &TransportError) {}

    /// Called when an export is written.
    fn on_export_finished(&self, _result: &ExportResult) {}
}
