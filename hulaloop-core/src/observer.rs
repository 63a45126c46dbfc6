//! Channel adapter for transport notifications.

use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::models::audio_models::AudioLevels;
use crate::models::error::TransportError;
use crate::models::recording_result::ExportResult;
use crate::models::state::TransitionEvent;
use crate::traits::transport_observer::TransportObserver;

/// Handle returned by `Transport::add_observer`, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub(crate) u64);

/// Every notification a [`TransportObserver`] can receive, as a value.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    StateChanged(TransitionEvent),
    Countdown(Duration),
    CountdownCancelled,
    Levels {
        levels: AudioLevels,
        elapsed: Duration,
    },
    Error(TransportError),
    ExportFinished(ExportResult),
}

/// Observer that forwards notifications into a crossbeam channel.
///
/// Lets a front end consume events on its own thread instead of inside the
/// transport's callbacks. Sends never block; events are dropped once the
/// receiver is gone.
pub struct ChannelObserver {
    sender: Sender<TransportEvent>,
}

impl ChannelObserver {
    /// Create an observer and the receiving end of its unbounded channel.
    pub fn new() -> (Self, Receiver<TransportEvent>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self { sender }, receiver)
    }

    fn send(&self, event: TransportEvent) {
        let _ = self.sender.try_send(event);
    }
}

impl TransportObserver for ChannelObserver {
    fn on_state_changed(&self, event: &TransitionEvent) {
        self.send(TransportEvent::StateChanged(*event));
    }

    fn on_countdown(&self, remaining: Duration) {
        self.send(TransportEvent::Countdown(remaining));
    }

    fn on_countdown_cancelled(&self) {
        self.send(TransportEvent::CountdownCancelled);
    }

    fn on_levels_updated(&self, levels: &AudioLevels, elapsed: Duration) {
        self.send(TransportEvent::Levels {
            levels: *levels,
            elapsed,
        });
    }

    fn on_error(&self, error: &TransportError) {
        self.send(TransportEvent::Error(error.clone()));
    }

    fn on_export_finished(&self, result: &ExportResult) {
        self.send(TransportEvent::ExportFinished(result.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::state::TransportState;

    #[test]
    fn forwards_events_in_order() {
        let (observer, events) = ChannelObserver::new();
        let event = TransitionEvent {
            from: TransportState::Ready,
            to: TransportState::Recording,
            timestamp: Duration::from_millis(5),
            elapsed: Duration::ZERO,
        };

        observer.on_countdown(Duration::from_secs(1));
        observer.on_state_changed(&event);
        let overrun = TransportError::Overrun { dropped_frames: 3 };
        observer.on_error(&overrun);

        let countdown = TransportEvent::Countdown(Duration::from_secs(1));
        assert_eq!(events.try_recv(), Ok(countdown));
        assert_eq!(events.try_recv(), Ok(TransportEvent::StateChanged(event)));
        assert_eq!(events.try_recv(), Ok(TransportEvent::Error(overrun)));
    }

    #[test]
    fn dropped_receiver_is_ignored() {
        let (observer, events) = ChannelObserver::new();
        drop(events);
        observer.on_countdown_cancelled();
    }
}
