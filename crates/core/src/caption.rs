use crate::ledger::Speaker;
use crate::timer::{Scheduler, Timer};
use std::time::Duration;

/// What the caption overlay currently mirrors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionState {
    pub speaker: Speaker,
    pub text: String,
    pub active: bool,
}

impl Default for CaptionState {
    fn default() -> Self {
        Self {
            speaker: Speaker::Interviewer,
            text: String::new(),
            active: false,
        }
    }
}

/// Derives the on-screen caption from whichever speech channel is active.
///
/// An inactive caption keeps its text on screen until the decay interval
/// passes without any newer caption update.
#[derive(Debug)]
pub struct CaptionPresenter {
    state: CaptionState,
    displayed: Option<String>,
    generation: u64,
    decay: Duration,
}

impl CaptionPresenter {
    pub fn new(decay: Duration) -> Self {
        Self {
            state: CaptionState::default(),
            displayed: None,
            generation: 0,
            decay,
        }
    }

    pub fn state(&self) -> &CaptionState {
        &self.state
    }

    /// Text currently on screen, if any.
    pub fn displayed(&self) -> Option<&str> {
        self.displayed.as_deref()
    }

    pub fn show(&mut self, speaker: Speaker, text: impl Into<String>) {
        let text = text.into();
        self.generation += 1;
        if !text.is_empty() {
            self.displayed = Some(text.clone());
        }
        self.state = CaptionState {
            speaker,
            text,
            active: true,
        };
    }

    pub fn deactivate(&mut self, scheduler: &Scheduler) {
        if !self.state.active {
            return;
        }
        self.state.active = false;
        self.start_decay(scheduler);
    }

    /// Blank, inactive interviewer caption; used when an answer is submitted.
    pub fn reset(&mut self, scheduler: &Scheduler) {
        self.state = CaptionState::default();
        self.start_decay(scheduler);
    }

    /// Clears an inactive caption unless something newer replaced it.
    pub fn on_decay(&mut self, generation: u64) {
        if generation == self.generation && !self.state.active {
            self.displayed = None;
            self.state.text.clear();
        }
    }

    fn start_decay(&mut self, scheduler: &Scheduler) {
        self.generation += 1;
        scheduler.after(self.decay, Timer::CaptionDecay(self.generation));
    }
}
