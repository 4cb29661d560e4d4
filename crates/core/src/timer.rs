use crate::session::SessionEvent;
use crate::speech::{RecognitionId, UtteranceId};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// Delayed events the orchestrator schedules for itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    /// First question after code submission.
    StartInterview,
    /// Next question after a candidate answer settled.
    NextQuestion,
    SpeechGrace(UtteranceId),
    RecognitionGrace(RecognitionId),
    /// Carries the caption generation that was current when scheduled.
    CaptionDecay(u64),
    /// Feedback has been on screen long enough.
    ShowResults,
}

/// Posts [`Timer`] events back into the session queue after a delay.
#[derive(Debug, Clone)]
pub struct Scheduler {
    events: UnboundedSender<SessionEvent>,
}

impl Scheduler {
    pub fn new(events: UnboundedSender<SessionEvent>) -> Self {
        Self { events }
    }

    pub fn after(&self, delay: Duration, timer: Timer) {
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The queue is gone once the session has finished; nothing to do then.
            let _ = events.send(SessionEvent::Timer(timer));
        });
    }

    pub fn events(&self) -> UnboundedSender<SessionEvent> {
        self.events.clone()
    }
}
