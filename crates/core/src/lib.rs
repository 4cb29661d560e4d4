pub mod caption;
pub mod config;
pub mod ledger;
pub mod oracle;
pub mod problem;
pub mod session;
pub mod speech;
pub mod speech_input;
pub mod speech_output;
pub mod store;
pub mod timer;
pub mod turn;

pub use caption::CaptionState;
pub use config::{SessionConfiguration, SessionMode, SessionSetup, SessionTimings, SpokenLanguage};
pub use ledger::{ConversationTurn, MAX_QUESTIONS, Speaker};
pub use oracle::{GeminiOracle, KeyRing, Oracle};
pub use problem::{LearningMaterial, ProblemStatement};
pub use session::{
    Phase, SessionDeps, SessionEvent, SessionMachine, SessionOutcome, SessionView, SpeechCue,
    UserAction, run_session,
};
pub use speech::{SpeechEvent, SpeechRecognizer, SpeechSynthesizer};
pub use store::{HttpSessionStore, JsonDirSessionStore, SessionRecord, SessionStore, StoredSession};
pub use timer::Scheduler;

/// Represents commands that the session machine issues to the UI layer.
///
/// The machine decides, the runtime renders: nothing in the core prints,
/// navigates or plays audio directly except through the speech engines it
/// owns.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    PhaseChanged(session::Phase),
    /// A freshly generated problem to display.
    Problem(ProblemStatement),
    /// Learning mode reference material.
    Explanation { solution: String, explanation: String },
    Caption(CaptionState),
    TurnAppended(ConversationTurn),
    /// Current contents of the pending response.
    ResponseDraft(String),
    ListeningChanged(bool),
    /// Inline validation or capability message; nothing changed.
    Warning(String),
    QuestionFailed(String),
    SpeechFinished(SpeechCue),
    FeedbackReady(String),
    RedirectToSetup,
    /// Feedback has been shown long enough; navigate to results.
    ShowResults(SessionRecord),
}
