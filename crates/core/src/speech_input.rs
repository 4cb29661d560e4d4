use crate::caption::CaptionPresenter;
use crate::config::SpokenLanguage;
use crate::ledger::Speaker;
use crate::speech::{RecognitionId, RecognitionSegment, SpeechError, SpeechRecognizer};
use crate::timer::{Scheduler, Timer};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListenState {
    Idle,
    Listening(RecognitionId),
    /// Stop requested, waiting for the engine to report the end. Results that
    /// still arrive are committed only if the response has not been handed off.
    Stopping { id: RecognitionId, commit: bool },
}

/// Speech input channel: one listening session at a time, feeding a single
/// pending-response buffer that typed input edits as well.
pub struct SpeechInput {
    engine: Option<Box<dyn SpeechRecognizer>>,
    language: SpokenLanguage,
    grace: Duration,
    state: ListenState,
    next_id: u64,
    response: String,
}

impl SpeechInput {
    pub fn new(engine: Option<Box<dyn SpeechRecognizer>>, grace: Duration) -> Self {
        if engine.is_none() {
            tracing::info!("Speech recognition unavailable, typed input only");
        }
        Self {
            engine,
            language: SpokenLanguage::English,
            grace,
            state: ListenState::Idle,
            next_id: 0,
            response: String::new(),
        }
    }

    pub fn set_language(&mut self, language: SpokenLanguage) {
        self.language = language;
    }

    pub fn is_available(&self) -> bool {
        self.engine.is_some()
    }

    pub fn is_listening(&self) -> bool {
        !matches!(self.state, ListenState::Idle)
    }

    pub fn response(&self) -> &str {
        &self.response
    }

    /// Typed input replaces the buffer wholesale.
    pub fn set_response(&mut self, text: impl Into<String>) {
        self.response = text.into();
    }

    /// Adds a typed line to the end of the buffer.
    pub fn append_response(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        if !self.response.is_empty() {
            self.response.push('\n');
        }
        self.response.push_str(line);
    }

    /// Starts a listening session and clears the pending response.
    ///
    /// Returns `Ok(false)` without side effects when already listening.
    pub fn start(&mut self) -> Result<bool, SpeechError> {
        if self.is_listening() {
            return Ok(false);
        }
        let engine = self.engine.as_mut().ok_or(SpeechError::Unavailable)?;
        let id = RecognitionId(self.next_id + 1);
        engine.start(id, self.language.locale())?;
        self.next_id = id.0;
        self.response.clear();
        self.state = ListenState::Listening(id);
        tracing::debug!("Listening ({:?})", id);
        Ok(true)
    }

    /// Asks the engine to stop. Returns `false` (and does nothing) when not
    /// listening.
    pub fn stop(&mut self) -> bool {
        let ListenState::Listening(id) = self.state else {
            return false;
        };
        if let Some(engine) = self.engine.as_mut() {
            engine.stop();
        }
        self.state = ListenState::Stopping { id, commit: true };
        true
    }

    /// Stops any recognition and hands the pending response off, leaving the
    /// buffer empty. Late results from the stopped session are discarded.
    pub fn take_response(&mut self) -> String {
        match self.state {
            ListenState::Listening(id) => {
                if let Some(engine) = self.engine.as_mut() {
                    engine.stop();
                }
                self.state = ListenState::Stopping { id, commit: false };
            }
            ListenState::Stopping { id, .. } => {
                self.state = ListenState::Stopping { id, commit: false };
            }
            ListenState::Idle => {}
        }
        std::mem::take(&mut self.response)
    }

    /// Applies one batch of recognition results. Returns `true` when the
    /// pending response changed.
    pub fn on_result(
        &mut self,
        id: RecognitionId,
        segments: &[RecognitionSegment],
        caption: &mut CaptionPresenter,
    ) -> bool {
        let commit = match self.state {
            ListenState::Listening(current) if current == id => true,
            ListenState::Stopping { id: current, commit } if current == id => commit,
            _ => false,
        };
        if !commit {
            tracing::debug!("Dropping recognition results for {:?}", id);
            return false;
        }

        let mut finals = String::new();
        let mut interim = String::new();
        for segment in segments {
            if segment.is_final {
                finals.push_str(&segment.transcript);
                finals.push(' ');
            } else {
                interim.push_str(&segment.transcript);
            }
        }

        let finals = finals.trim();
        let changed = !finals.is_empty();
        if changed {
            self.response = format!("{} {}", self.response, finals).trim().to_string();
        }

        let live = format!("{} {}", finals, interim.trim());
        let live = live.trim();
        if !live.is_empty() {
            caption.show(Speaker::Candidate, live);
        }
        changed
    }

    /// Engine reported that session `id` ended. Returns `true` when that was
    /// the current session.
    pub fn on_end(&mut self, id: RecognitionId, scheduler: &Scheduler) -> bool {
        let current = match self.state {
            ListenState::Listening(current) | ListenState::Stopping { id: current, .. } => current,
            ListenState::Idle => return false,
        };
        if current != id {
            return false;
        }
        self.state = ListenState::Idle;
        scheduler.after(self.grace, Timer::RecognitionGrace(id));
        true
    }

    /// Grace delay after a session ended: hides the candidate caption unless
    /// someone else has taken the caption over in the meantime.
    pub fn on_grace_elapsed(&self, caption: &mut CaptionPresenter, scheduler: &Scheduler) {
        if !self.is_listening() && caption.state().speaker == Speaker::Candidate {
            caption.deactivate(scheduler);
        }
    }

    /// Releases the engine on every exit path.
    pub fn shutdown(&mut self) {
        if self.is_listening() {
            if let Some(engine) = self.engine.as_mut() {
                engine.stop();
            }
        }
        self.state = ListenState::Idle;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::session::SessionEvent;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum RecognizerCall {
        Start(RecognitionId, &'static str),
        Stop,
    }

    #[derive(Clone, Default)]
    pub(crate) struct RecordingRecognizer {
        pub calls: Arc<Mutex<Vec<RecognizerCall>>>,
    }

    impl SpeechRecognizer for RecordingRecognizer {
        fn start(&mut self, id: RecognitionId, locale: &'static str) -> Result<(), SpeechError> {
            self.calls
                .lock()
                .unwrap()
                .push(RecognizerCall::Start(id, locale));
            Ok(())
        }

        fn stop(&mut self) {
            self.calls.lock().unwrap().push(RecognizerCall::Stop);
        }
    }

    fn fixture() -> (SpeechInput, RecordingRecognizer, CaptionPresenter) {
        let recognizer = RecordingRecognizer::default();
        let input = SpeechInput::new(
            Some(Box::new(recognizer.clone())),
            Duration::from_millis(1500),
        );
        (input, recognizer, CaptionPresenter::new(Duration::from_secs(3)))
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let (mut input, recognizer, _caption) = fixture();

        assert!(!input.stop(), "stop while idle is a no-op");
        assert!(recognizer.calls.lock().unwrap().is_empty());

        assert_eq!(input.start(), Ok(true));
        assert_eq!(input.start(), Ok(false), "start while listening is a no-op");
        assert_eq!(
            *recognizer.calls.lock().unwrap(),
            vec![RecognizerCall::Start(RecognitionId(1), "en-US")]
        );

        assert!(input.stop());
        assert!(!input.stop());
        assert_eq!(recognizer.calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn finals_are_committed_and_interims_only_captioned() {
        let (mut input, _recognizer, mut caption) = fixture();
        input.start().unwrap();
        let id = RecognitionId(1);

        let changed = input.on_result(
            id,
            &[RecognitionSegment::interim("I would use")],
            &mut caption,
        );
        assert!(!changed);
        assert_eq!(input.response(), "");
        assert_eq!(caption.state().speaker, Speaker::Candidate);
        assert_eq!(caption.state().text, "I would use");

        let changed = input.on_result(
            id,
            &[
                RecognitionSegment::final_("I would use a hash map"),
                RecognitionSegment::interim("to store"),
            ],
            &mut caption,
        );
        assert!(changed);
        assert_eq!(input.response(), "I would use a hash map");
        assert_eq!(caption.state().text, "I would use a hash map to store");

        input.on_result(
            id,
            &[RecognitionSegment::final_("to store complements")],
            &mut caption,
        );
        assert_eq!(input.response(), "I would use a hash map to store complements");
    }

    #[test]
    fn results_after_hand_off_are_discarded() {
        let (mut input, _recognizer, mut caption) = fixture();
        input.start().unwrap();
        let id = RecognitionId(1);
        input.on_result(id, &[RecognitionSegment::final_("first answer")], &mut caption);

        assert_eq!(input.take_response(), "first answer");
        assert!(!input.on_result(id, &[RecognitionSegment::final_("late words")], &mut caption));
        assert_eq!(input.response(), "");
    }

    #[test]
    fn typed_lines_accumulate() {
        let (mut input, _recognizer, _caption) = fixture();
        input.append_response("I would sort the array");
        input.append_response("   ");
        input.append_response("  then use two pointers ");
        assert_eq!(input.response(), "I would sort the array\nthen use two pointers");
    }

    #[test]
    fn start_clears_previous_response() {
        let (mut input, _recognizer, _caption) = fixture();
        input.set_response("typed draft");
        input.start().unwrap();
        assert_eq!(input.response(), "");
    }

    #[test]
    fn missing_engine_degrades_to_typing() {
        let mut input = SpeechInput::new(None, Duration::from_millis(1500));
        assert!(!input.is_available());
        assert_eq!(input.start(), Err(SpeechError::Unavailable));
        assert!(!input.is_listening());
        input.set_response("typed answer");
        assert_eq!(input.take_response(), "typed answer");
    }

    #[tokio::test(start_paused = true)]
    async fn caption_is_held_then_released_after_end() {
        let (mut input, _recognizer, mut caption) = fixture();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let scheduler = Scheduler::new(tx);

        input.start().unwrap();
        let id = RecognitionId(1);
        input.on_result(id, &[RecognitionSegment::final_("done")], &mut caption);
        input.stop();

        assert!(!input.on_end(RecognitionId(42), &scheduler), "foreign session");
        assert!(input.on_end(id, &scheduler));
        assert!(!input.is_listening());
        assert!(caption.state().active, "held during grace");

        let Some(SessionEvent::Timer(Timer::RecognitionGrace(grace_id))) = rx.recv().await else {
            panic!("expected recognition grace timer");
        };
        assert_eq!(grace_id, id);
        input.on_grace_elapsed(&mut caption, &scheduler);
        assert!(!caption.state().active);
    }
}
