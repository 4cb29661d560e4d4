//! Speech engine contracts.
//!
//! The host supplies a synthesizer and (optionally) a recognizer. Both are
//! fire-and-report: they accept a request synchronously and later post a
//! [`SpeechEvent`] into the session's event queue, tagged with the id they
//! were given so stale reports can be told apart from current ones.

/// Identifies one utterance handed to the synthesizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UtteranceId(pub u64);

/// Identifies one listening session of the recognizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecognitionId(pub u64);

/// Speaking rate used for every utterance.
pub const SPEECH_RATE: f32 = 0.9;

#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub id: UtteranceId,
    pub text: String,
    pub locale: &'static str,
    pub rate: f32,
}

/// Text-to-speech capability.
///
/// Implementations post [`SpeechEvent::UtteranceEnded`] when an utterance
/// finishes naturally. A cancelled utterance must not report an end.
pub trait SpeechSynthesizer: Send {
    fn speak(&mut self, utterance: Utterance) -> Result<(), SpeechError>;
    fn cancel(&mut self);
}

/// Continuous speech-to-text capability with interim results.
///
/// Implementations post [`SpeechEvent::RecognitionResult`] batches while
/// listening and [`SpeechEvent::RecognitionEnded`] once the session stops,
/// whether because `stop` was called or the engine timed out.
pub trait SpeechRecognizer: Send {
    fn start(&mut self, id: RecognitionId, locale: &'static str) -> Result<(), SpeechError>;
    fn stop(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionSegment {
    pub transcript: String,
    pub is_final: bool,
}

impl RecognitionSegment {
    pub fn interim(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            is_final: false,
        }
    }

    pub fn final_(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            is_final: true,
        }
    }
}

/// Reports from the speech engines.
#[derive(Debug, Clone, PartialEq)]
pub enum SpeechEvent {
    UtteranceEnded(UtteranceId),
    RecognitionResult {
        id: RecognitionId,
        segments: Vec<RecognitionSegment>,
    },
    RecognitionEnded(RecognitionId),
    RecognitionFailed {
        id: RecognitionId,
        message: String,
    },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SpeechError {
    #[error("speech engine is not available on this host")]
    Unavailable,
    #[error("speech engine rejected the request: {0}")]
    Engine(String),
}

/// Strips formatting that generation output may carry but that should never
/// be spoken or captioned.
pub fn clean_for_speech(text: &str) -> String {
    text.replace("###", "")
        .replace("##", "")
        .replace("**", "")
        .replace("---", "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
