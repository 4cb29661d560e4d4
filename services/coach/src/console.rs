//! Terminal stand-ins for the speech engines.
//!
//! The synthesizer "plays" an utterance by waiting as long as it would take
//! to say it at a fixed pace. The recognizer turns lines typed while
//! listening into final recognition results.

use coach_core::SessionEvent;
use coach_core::speech::{
    RecognitionId, RecognitionSegment, SpeechError, SpeechEvent, SpeechRecognizer,
    SpeechSynthesizer, Utterance,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

const MIN_UTTERANCE: Duration = Duration::from_millis(300);

pub struct ConsoleSynthesizer {
    events: UnboundedSender<SessionEvent>,
    words_per_minute: u32,
    playing: Option<JoinHandle<()>>,
}

impl ConsoleSynthesizer {
    pub fn new(events: UnboundedSender<SessionEvent>, words_per_minute: u32) -> Self {
        Self {
            events,
            words_per_minute: words_per_minute.max(1),
            playing: None,
        }
    }

    /// Time it takes to say `text` at the configured pace, slowed by `rate`.
    pub fn duration(&self, text: &str, rate: f32) -> Duration {
        let words = text.split_whitespace().count() as f64;
        let rate = if rate > 0.0 { rate as f64 } else { 1.0 };
        let secs = words * 60.0 / (self.words_per_minute as f64 * rate);
        Duration::from_secs_f64(secs).max(MIN_UTTERANCE)
    }
}

impl SpeechSynthesizer for ConsoleSynthesizer {
    fn speak(&mut self, utterance: Utterance) -> Result<(), SpeechError> {
        self.cancel();
        let duration = self.duration(&utterance.text, utterance.rate);
        tracing::debug!(
            "Speaking {:?} ({}, {:?}): {}",
            utterance.id,
            utterance.locale,
            duration,
            utterance.text
        );
        let events = self.events.clone();
        let id = utterance.id;
        self.playing = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = events.send(SessionEvent::Speech(SpeechEvent::UtteranceEnded(id)));
        }));
        Ok(())
    }

    fn cancel(&mut self) {
        if let Some(playing) = self.playing.take() {
            playing.abort();
        }
    }
}

/// Routes typed lines to the active listening session, if any.
#[derive(Clone)]
pub struct DictationTap {
    events: UnboundedSender<SessionEvent>,
    active: Arc<Mutex<Option<RecognitionId>>>,
}

impl DictationTap {
    pub fn new(events: UnboundedSender<SessionEvent>) -> Self {
        Self {
            events,
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn recognizer(&self) -> ConsoleRecognizer {
        ConsoleRecognizer { tap: self.clone() }
    }

    pub fn is_listening(&self) -> bool {
        self.active.lock().map(|a| a.is_some()).unwrap_or(false)
    }

    /// Delivers `line` as dictation. Returns `false` when nobody is listening.
    pub fn deliver(&self, line: &str) -> bool {
        let Some(id) = self.active.lock().ok().and_then(|a| *a) else {
            return false;
        };
        let _ = self.events.send(SessionEvent::Speech(SpeechEvent::RecognitionResult {
            id,
            segments: vec![RecognitionSegment::final_(line.trim())],
        }));
        true
    }
}

pub struct ConsoleRecognizer {
    tap: DictationTap,
}

impl SpeechRecognizer for ConsoleRecognizer {
    fn start(&mut self, id: RecognitionId, locale: &'static str) -> Result<(), SpeechError> {
        let mut active = self
            .tap
            .active
            .lock()
            .map_err(|_| SpeechError::Engine("dictation state poisoned".into()))?;
        tracing::debug!("Dictation {:?} started ({})", id, locale);
        *active = Some(id);
        Ok(())
    }

    fn stop(&mut self) {
        let ended = self.tap.active.lock().ok().and_then(|mut a| a.take());
        if let Some(id) = ended {
            let _ = self
                .tap
                .events
                .send(SessionEvent::Speech(SpeechEvent::RecognitionEnded(id)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coach_core::speech::UtteranceId;
    use tokio::sync::mpsc;

    fn utterance(id: u64, text: &str) -> Utterance {
        Utterance {
            id: UtteranceId(id),
            text: text.into(),
            locale: "en-US",
            rate: 1.0,
        }
    }

    #[test]
    fn duration_follows_pace() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let synth = ConsoleSynthesizer::new(tx, 120);
        let ten_words = "one two three four five six seven eight nine ten";
        assert_eq!(synth.duration(ten_words, 1.0), Duration::from_secs(5));
        assert_eq!(synth.duration("hi", 1.0), Duration::from_millis(500));
        assert_eq!(synth.duration("", 1.0), MIN_UTTERANCE);
    }

    #[tokio::test(start_paused = true)]
    async fn utterance_ends_unless_cancelled() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut synth = ConsoleSynthesizer::new(tx, 150);

        synth.speak(utterance(1, "first")).unwrap();
        synth.speak(utterance(2, "second")).unwrap();

        match rx.recv().await {
            Some(SessionEvent::Speech(SpeechEvent::UtteranceEnded(id))) => {
                assert_eq!(id, UtteranceId(2))
            }
            other => panic!("unexpected event {:?}", other),
        }

        synth.speak(utterance(3, "third")).unwrap();
        synth.cancel();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn typed_lines_are_dictation_only_while_listening() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tap = DictationTap::new(tx);
        let mut recognizer = tap.recognizer();

        assert!(!tap.deliver("ignored"));

        recognizer.start(RecognitionId(4), "hi-IN").unwrap();
        assert!(tap.is_listening());
        assert!(tap.deliver("  I would sort first  "));
        match rx.try_recv() {
            Ok(SessionEvent::Speech(SpeechEvent::RecognitionResult { id, segments })) => {
                assert_eq!(id, RecognitionId(4));
                assert_eq!(segments, vec![RecognitionSegment::final_("I would sort first")]);
            }
            other => panic!("unexpected event {:?}", other),
        }

        recognizer.stop();
        assert!(!tap.is_listening());
        assert!(matches!(
            rx.try_recv(),
            Ok(SessionEvent::Speech(SpeechEvent::RecognitionEnded(RecognitionId(4))))
        ));

        // A second stop reports nothing.
        recognizer.stop();
        assert!(rx.try_recv().is_err());
    }
}
