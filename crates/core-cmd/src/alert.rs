//! Audible/haptic cue vocabulary.
//!
//! The dispatcher and session logic announce events (boundary bounces,
//! toggle confirmations, clipboard milestones, …); what actually renders
//! them — a tune device, a beeper, nothing — is an external collaborator
//! behind `AlertSink`. Keeping the vocabulary here lets every crate raise
//! cues without depending on any audio stack.

/// Events that may be announced to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alert {
    ToggleOn,
    ToggleOff,
    CommandDone,
    CommandRejected,
    Bounce,
    WrapUp,
    WrapDown,
    SkipFirst,
    Skip,
    SkipMore,
    CopyBegin,
    CopyEnd,
    MarkSet,
    RoutingStarted,
    RoutingSucceeded,
    RoutingFailed,
    ScreenFrozen,
    ScreenUnfrozen,
    CursorLinked,
    CursorUnlinked,
}

pub trait AlertSink {
    fn alert(&mut self, alert: Alert);
}

/// Discards every cue. Useful as a default and in tests that don't care.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAlerts;

impl AlertSink for NullAlerts {
    fn alert(&mut self, _alert: Alert) {}
}

/// Records cues in order. Tests assert on the sequence.
#[derive(Debug, Default, Clone)]
pub struct RecordingAlerts {
    pub events: Vec<Alert>,
}

impl RecordingAlerts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&mut self) -> Vec<Alert> {
        std::mem::take(&mut self.events)
    }
}

impl AlertSink for RecordingAlerts {
    fn alert(&mut self, alert: Alert) {
        self.events.push(alert);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_preserves_order() {
        let mut sink = RecordingAlerts::new();
        sink.alert(Alert::SkipFirst);
        sink.alert(Alert::Skip);
        sink.alert(Alert::Bounce);
        assert_eq!(sink.take(), vec![Alert::SkipFirst, Alert::Skip, Alert::Bounce]);
        assert!(sink.events.is_empty());
    }
}
