//! The session phase machine.
//!
//! Every input (user actions, oracle replies, speech engine callbacks and
//! timers) arrives as a [`SessionEvent`] on one ordered queue and is applied
//! by [`SessionMachine::handle`], which never blocks. Slow work is spawned
//! and reports back through the same queue, and everything the UI should do
//! is emitted as a [`Command`].

use crate::Command;
use crate::caption::{CaptionPresenter, CaptionState};
use crate::config::{SessionConfiguration, SessionMode, SessionSetup, SessionTimings};
use crate::ledger::ConversationTurn;
use crate::oracle::{Oracle, with_timeout};
use crate::problem::{LearningMaterial, ProblemStatement};
use crate::speech::{SpeechError, SpeechEvent, SpeechRecognizer, SpeechSynthesizer};
use crate::speech_input::SpeechInput;
use crate::speech_output::SpeechOutput;
use crate::store::{SessionRecord, SessionStore, persist_in_background};
use crate::timer::{Scheduler, Timer};
use crate::turn::{QuestionOutcome, TurnController, TurnStep};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    LoadingConfig,
    GeneratingProblem,
    /// Problem generation failed; retry or go back to setup.
    Error { message: String },
    /// Learning mode: reference solution and explanation on screen.
    Explaining,
    Coding,
    Interviewing,
    GeneratingFeedback,
    /// Feedback generation failed; retry is offered.
    FeedbackFailed { message: String },
    Complete,
    /// Configuration was unusable or the user went back to setup.
    ExitedToSetup,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Complete | Phase::ExitedToSetup)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::LoadingConfig => f.write_str("loading configuration"),
            Phase::GeneratingProblem => f.write_str("generating problem"),
            Phase::Error { message } => write!(f, "error: {message}"),
            Phase::Explaining => f.write_str("explaining"),
            Phase::Coding => f.write_str("coding"),
            Phase::Interviewing => f.write_str("interviewing"),
            Phase::GeneratingFeedback => f.write_str("generating feedback"),
            Phase::FeedbackFailed { message } => write!(f, "feedback failed: {message}"),
            Phase::Complete => f.write_str("complete"),
            Phase::ExitedToSetup => f.write_str("back to setup"),
        }
    }
}

/// Identifies what an utterance was reading once it has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechCue {
    Problem,
    Explanation,
    Question(usize),
}

/// Entry points available to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAction {
    /// The session screen became active. Only the first activation counts.
    Activate,
    RetryProblem,
    BackToSetup,
    SubmitCode(String),
    /// Learning mode: interview on the reference solution.
    BeginInterview,
    ReadExplanation,
    StartListening,
    StopListening,
    /// Typed input replaces the pending response.
    EditResponse(String),
    /// One more typed line of the pending response.
    AppendResponse(String),
    SubmitResponse,
    RetryQuestion,
    RetryFeedback,
    Teardown,
}

#[derive(Debug)]
pub enum OracleReply {
    Problem(anyhow::Result<ProblemStatement>),
    Learning(anyhow::Result<LearningMaterial>),
    Question {
        number: usize,
        result: anyhow::Result<String>,
    },
    Feedback(anyhow::Result<String>),
}

#[derive(Debug)]
pub enum SessionEvent {
    Action(UserAction),
    Oracle(OracleReply),
    Speech(SpeechEvent),
    Timer(Timer),
}

/// Collaborators a session runs against.
pub struct SessionDeps {
    pub oracle: Arc<dyn Oracle>,
    pub store: Arc<dyn SessionStore>,
    pub synthesizer: Option<Box<dyn SpeechSynthesizer>>,
    pub recognizer: Option<Box<dyn SpeechRecognizer>>,
}

/// Read-only snapshot for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub mode: SessionMode,
    pub phase: Phase,
    pub configuration: Option<SessionConfiguration>,
    pub problem: Option<ProblemStatement>,
    pub solution: Option<String>,
    pub explanation: Option<String>,
    pub conversation: Vec<ConversationTurn>,
    pub questions_asked: usize,
    pub awaiting_question: bool,
    pub question_error: Option<String>,
    pub response: String,
    pub listening: bool,
    pub speaking: bool,
    pub caption: CaptionState,
    pub caption_text: Option<String>,
    pub feedback: Option<String>,
}

/// What a finished session leaves behind.
#[derive(Debug)]
pub struct SessionOutcome {
    pub phase: Phase,
    pub record: Option<SessionRecord>,
    /// Pending background save; await it to flush before exiting.
    pub persistence: Option<JoinHandle<()>>,
}

pub struct SessionMachine {
    mode: SessionMode,
    timings: SessionTimings,
    setup: Option<SessionSetup>,
    configuration: Option<SessionConfiguration>,
    oracle: Arc<dyn Oracle>,
    store: Arc<dyn SessionStore>,
    scheduler: Scheduler,
    commands: UnboundedSender<Command>,

    phase: Phase,
    activated: bool,
    torn_down: bool,
    problem: Option<ProblemStatement>,
    material: Option<LearningMaterial>,
    turns: Option<TurnController>,
    /// A question step is scheduled but has not run yet.
    step_pending: bool,
    question_error: Option<String>,
    feedback: Option<String>,
    record: Option<SessionRecord>,
    persistence: Option<JoinHandle<()>>,

    output: SpeechOutput<SpeechCue>,
    input: SpeechInput,
    caption: CaptionPresenter,
}

impl SessionMachine {
    pub fn new(
        mode: SessionMode,
        setup: SessionSetup,
        timings: SessionTimings,
        deps: SessionDeps,
        scheduler: Scheduler,
        commands: UnboundedSender<Command>,
    ) -> Self {
        Self {
            mode,
            timings,
            setup: Some(setup),
            configuration: None,
            oracle: deps.oracle,
            store: deps.store,
            scheduler,
            commands,
            phase: Phase::LoadingConfig,
            activated: false,
            torn_down: false,
            problem: None,
            material: None,
            turns: None,
            step_pending: false,
            question_error: None,
            feedback: None,
            record: None,
            persistence: None,
            output: SpeechOutput::new(deps.synthesizer, timings.speech_grace),
            input: SpeechInput::new(deps.recognizer, timings.recognition_grace),
            caption: CaptionPresenter::new(timings.caption_decay),
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    /// No further events will change anything.
    pub fn is_finished(&self) -> bool {
        self.torn_down || self.phase.is_terminal()
    }

    pub fn record(&self) -> Option<&SessionRecord> {
        self.record.as_ref()
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            mode: self.mode,
            phase: self.phase.clone(),
            configuration: self.configuration.clone(),
            problem: self.problem.clone(),
            solution: self.material.as_ref().map(|m| m.solution.clone()),
            explanation: self.material.as_ref().map(|m| m.explanation.clone()),
            conversation: self
                .turns
                .as_ref()
                .map(|t| t.ledger().snapshot())
                .unwrap_or_default(),
            questions_asked: self.turns.as_ref().map_or(0, |t| t.questions_asked()),
            awaiting_question: self.step_pending
                || self.turns.as_ref().is_some_and(|t| t.is_awaiting_question()),
            question_error: self.question_error.clone(),
            response: self.input.response().to_string(),
            listening: self.input.is_listening(),
            speaking: self.output.is_speaking(),
            caption: self.caption.state().clone(),
            caption_text: self.caption.displayed().map(str::to_string),
            feedback: self.feedback.clone(),
        }
    }

    pub fn into_outcome(mut self) -> SessionOutcome {
        self.release_engines();
        SessionOutcome {
            phase: self.phase.clone(),
            record: self.record.take(),
            persistence: self.persistence.take(),
        }
    }

    /// Applies one event. Phase and caption changes are emitted afterwards.
    pub fn handle(&mut self, event: SessionEvent) {
        if self.torn_down {
            tracing::debug!("Session torn down, ignoring {:?}", event);
            return;
        }
        let phase_before = self.phase.clone();
        let caption_before = self.caption.state().clone();

        match event {
            SessionEvent::Action(action) => self.on_action(action),
            SessionEvent::Oracle(reply) => self.on_oracle(reply),
            SessionEvent::Speech(event) => self.on_speech(event),
            SessionEvent::Timer(timer) => self.on_timer(timer),
        }

        if self.phase != phase_before {
            tracing::info!("Session phase: {} -> {}", phase_before, self.phase);
            if self.phase.is_terminal() {
                self.release_engines();
            }
            self.emit(Command::PhaseChanged(self.phase.clone()));
        }
        if *self.caption.state() != caption_before {
            self.emit(Command::Caption(self.caption.state().clone()));
        }
    }

    fn on_action(&mut self, action: UserAction) {
        match action {
            UserAction::Activate => self.activate(),
            UserAction::RetryProblem => {
                if matches!(self.phase, Phase::Error { .. }) {
                    self.request_problem();
                }
            }
            UserAction::BackToSetup => {
                if matches!(self.phase, Phase::Error { .. }) {
                    self.exit_to_setup();
                }
            }
            UserAction::SubmitCode(code) => {
                if self.phase != Phase::Coding {
                    tracing::debug!("Code submitted outside the coding phase");
                    return;
                }
                if code.trim().is_empty() {
                    self.emit(Command::Warning(
                        "Please write some code before submitting".into(),
                    ));
                    return;
                }
                self.start_interview(code);
            }
            UserAction::BeginInterview => {
                if self.phase != Phase::Explaining {
                    return;
                }
                if let Some(solution) = self.material.as_ref().map(|m| m.solution.clone()) {
                    self.start_interview(solution);
                }
            }
            UserAction::ReadExplanation => {
                if self.phase != Phase::Explaining {
                    return;
                }
                if let Some(explanation) = self.material.as_ref().map(|m| m.explanation.clone()) {
                    self.output.speak(
                        &explanation,
                        Some(SpeechCue::Explanation),
                        &mut self.caption,
                        &self.scheduler,
                    );
                }
            }
            UserAction::StartListening => self.start_listening(),
            UserAction::StopListening => {
                self.input.stop();
            }
            UserAction::EditResponse(text) => {
                if self.phase == Phase::Interviewing {
                    self.input.set_response(text);
                    self.emit(Command::ResponseDraft(self.input.response().to_string()));
                }
            }
            UserAction::AppendResponse(line) => {
                if self.phase == Phase::Interviewing {
                    self.input.append_response(&line);
                    self.emit(Command::ResponseDraft(self.input.response().to_string()));
                }
            }
            UserAction::SubmitResponse => self.submit_response(),
            UserAction::RetryQuestion => {
                if self.phase == Phase::Interviewing && self.question_error.take().is_some() {
                    self.run_step();
                }
            }
            UserAction::RetryFeedback => {
                if matches!(self.phase, Phase::FeedbackFailed { .. }) {
                    self.request_feedback();
                }
            }
            UserAction::Teardown => {
                tracing::info!("Session torn down in phase {}", self.phase);
                self.release_engines();
                self.torn_down = true;
            }
        }
    }

    fn activate(&mut self) {
        if self.activated {
            tracing::debug!("Session already activated");
            return;
        }
        self.activated = true;

        let setup = self.setup.take().unwrap_or_default();
        match SessionConfiguration::try_from(setup) {
            Ok(configuration) => {
                tracing::info!(
                    "Starting {} session: {} / {} / {}",
                    self.mode,
                    configuration.code_language,
                    configuration.difficulty,
                    configuration.spoken_language
                );
                self.output.set_language(configuration.spoken_language);
                self.input.set_language(configuration.spoken_language);
                self.configuration = Some(configuration);
                self.request_problem();
            }
            Err(e) => {
                tracing::warn!("Cannot start session: {}", e);
                self.exit_to_setup();
            }
        }
    }

    fn exit_to_setup(&mut self) {
        self.phase = Phase::ExitedToSetup;
        self.emit(Command::RedirectToSetup);
    }

    fn request_problem(&mut self) {
        let Some(configuration) = self.configuration.clone() else {
            return;
        };
        self.phase = Phase::GeneratingProblem;
        let oracle = Arc::clone(&self.oracle);
        let limit = self.timings.oracle_timeout;
        match self.mode {
            SessionMode::Interview => self.dispatch(async move {
                OracleReply::Problem(
                    with_timeout(limit, oracle.generate_problem(&configuration)).await,
                )
            }),
            SessionMode::Learning => self.dispatch(async move {
                OracleReply::Learning(
                    with_timeout(limit, oracle.generate_learning_material(&configuration)).await,
                )
            }),
        }
    }

    fn start_interview(&mut self, code: String) {
        let (Some(problem), Some(spoken_language)) = (
            self.problem.clone(),
            self.configuration.as_ref().map(|c| c.spoken_language),
        ) else {
            return;
        };
        self.output.cancel();
        self.input.take_response();
        self.turns = Some(TurnController::new(problem, code, spoken_language));
        self.question_error = None;
        self.phase = Phase::Interviewing;
        self.step_pending = true;
        self.scheduler
            .after(self.timings.startup_delay, Timer::StartInterview);
    }

    fn start_listening(&mut self) {
        if self.phase != Phase::Interviewing {
            return;
        }
        match self.input.start() {
            Ok(true) => self.emit(Command::ListeningChanged(true)),
            Ok(false) => {}
            Err(SpeechError::Unavailable) => self.emit(Command::Warning(
                "Speech recognition is not available, type your answer instead".into(),
            )),
            Err(e) => {
                tracing::warn!("Could not start speech recognition: {}", e);
                self.emit(Command::Warning(
                    "Could not start listening, type your answer instead".into(),
                ));
            }
        }
    }

    fn submit_response(&mut self) {
        if self.phase != Phase::Interviewing {
            return;
        }
        let Some(turns) = self.turns.as_mut() else {
            return;
        };
        if self.step_pending || turns.is_awaiting_question() || self.question_error.is_some() {
            self.emit(Command::Warning("Wait for the next question".into()));
            return;
        }

        match turns.accept_response(self.input.response()) {
            Err(e) => {
                self.emit(Command::Warning(e.to_string()));
            }
            Ok(turn) => {
                self.input.take_response();
                self.emit(Command::TurnAppended(turn));
                self.emit(Command::ResponseDraft(String::new()));
                self.caption.reset(&self.scheduler);
                self.step_pending = true;
                self.scheduler
                    .after(self.timings.settle_delay, Timer::NextQuestion);
            }
        }
    }

    fn run_step(&mut self) {
        let Some(turns) = self.turns.as_mut() else {
            return;
        };
        match turns.next_step() {
            None => {}
            Some(TurnStep::Ask(request)) => {
                tracing::debug!("Requesting question {}", request.question_number);
                let oracle = Arc::clone(&self.oracle);
                let limit = self.timings.oracle_timeout;
                self.dispatch(async move {
                    let result = with_timeout(limit, oracle.ask_question(&request)).await;
                    OracleReply::Question {
                        number: request.question_number,
                        result,
                    }
                });
            }
            Some(TurnStep::Finish(_)) => self.request_feedback(),
        }
    }

    fn request_feedback(&mut self) {
        let Some(turns) = self.turns.as_ref() else {
            return;
        };
        let request = turns.feedback_request();
        self.input.shutdown();
        self.phase = Phase::GeneratingFeedback;
        let oracle = Arc::clone(&self.oracle);
        let limit = self.timings.oracle_timeout;
        self.dispatch(async move {
            OracleReply::Feedback(with_timeout(limit, oracle.generate_feedback(&request)).await)
        });
    }

    fn on_oracle(&mut self, reply: OracleReply) {
        match reply {
            OracleReply::Problem(result) => {
                if self.phase != Phase::GeneratingProblem {
                    tracing::debug!("Dropping problem reply in phase {}", self.phase);
                    return;
                }
                match result {
                    Ok(problem) => {
                        self.problem = Some(problem.clone());
                        self.phase = Phase::Coding;
                        self.emit(Command::Problem(problem.clone()));
                        self.output.speak(
                            &problem.read_aloud(),
                            Some(SpeechCue::Problem),
                            &mut self.caption,
                            &self.scheduler,
                        );
                    }
                    Err(e) => self.problem_failed(e),
                }
            }
            OracleReply::Learning(result) => {
                if self.phase != Phase::GeneratingProblem {
                    tracing::debug!("Dropping learning material in phase {}", self.phase);
                    return;
                }
                match result {
                    Ok(material) => {
                        self.problem = Some(material.problem.clone());
                        self.emit(Command::Problem(material.problem.clone()));
                        self.emit(Command::Explanation {
                            solution: material.solution.clone(),
                            explanation: material.explanation.clone(),
                        });
                        self.material = Some(material);
                        self.phase = Phase::Explaining;
                    }
                    Err(e) => self.problem_failed(e),
                }
            }
            OracleReply::Question { number, result } => {
                if self.phase != Phase::Interviewing {
                    tracing::debug!("Dropping question {} in phase {}", number, self.phase);
                    return;
                }
                let Some(turns) = self.turns.as_mut() else {
                    return;
                };
                match turns.on_question(number, result) {
                    QuestionOutcome::Appended(turn) => {
                        let text = turn.text.clone();
                        self.emit(Command::TurnAppended(turn));
                        self.output.speak(
                            &text,
                            Some(SpeechCue::Question(number)),
                            &mut self.caption,
                            &self.scheduler,
                        );
                    }
                    QuestionOutcome::Failed(message) => {
                        tracing::warn!("Question {} failed: {}", number, message);
                        self.question_error = Some(message.clone());
                        self.emit(Command::QuestionFailed(format!(
                            "Failed to generate next question: {message}"
                        )));
                    }
                    QuestionOutcome::Stale => {
                        tracing::debug!("Dropping stale reply for question {}", number);
                    }
                }
            }
            OracleReply::Feedback(result) => {
                if self.phase != Phase::GeneratingFeedback {
                    tracing::debug!("Dropping feedback reply in phase {}", self.phase);
                    return;
                }
                match result {
                    Ok(feedback) => self.feedback_ready(feedback),
                    Err(e) => {
                        let message = format!("{e:#}");
                        tracing::warn!("Feedback generation failed: {}", message);
                        self.phase = Phase::FeedbackFailed { message };
                    }
                }
            }
        }
    }

    fn problem_failed(&mut self, error: anyhow::Error) {
        let message = format!("{error:#}");
        tracing::warn!("Problem generation failed: {}", message);
        self.phase = Phase::Error { message };
    }

    fn feedback_ready(&mut self, feedback: String) {
        self.feedback = Some(feedback.clone());
        self.emit(Command::FeedbackReady(feedback.clone()));

        match self.build_record(feedback) {
            Some(record) => {
                self.persistence = Some(persist_in_background(
                    Arc::clone(&self.store),
                    record.clone(),
                ));
                self.record = Some(record);
            }
            None => tracing::error!("Feedback arrived without a complete session to record"),
        }
        self.scheduler
            .after(self.timings.feedback_display, Timer::ShowResults);
    }

    fn build_record(&self, feedback: String) -> Option<SessionRecord> {
        let turns = self.turns.as_ref()?;
        Some(SessionRecord {
            mode: self.mode,
            configuration: self.configuration.clone()?,
            problem: self.problem.clone()?,
            submitted_code: turns.code().to_string(),
            explanation: self.material.as_ref().map(|m| m.explanation.clone()),
            conversation: turns.ledger().snapshot(),
            feedback,
        })
    }

    fn on_speech(&mut self, event: SpeechEvent) {
        match event {
            SpeechEvent::UtteranceEnded(id) => self.output.on_utterance_end(id, &self.scheduler),
            SpeechEvent::RecognitionResult { id, segments } => {
                if self.input.on_result(id, &segments, &mut self.caption) {
                    self.emit(Command::ResponseDraft(self.input.response().to_string()));
                }
            }
            SpeechEvent::RecognitionEnded(id) => {
                if self.input.on_end(id, &self.scheduler) {
                    self.emit(Command::ListeningChanged(false));
                }
            }
            SpeechEvent::RecognitionFailed { id, message } => {
                tracing::warn!("Speech recognition error: {}", message);
                if self.input.on_end(id, &self.scheduler) {
                    self.emit(Command::ListeningChanged(false));
                }
            }
        }
    }

    fn on_timer(&mut self, timer: Timer) {
        match timer {
            Timer::StartInterview | Timer::NextQuestion => {
                if self.phase == Phase::Interviewing && self.step_pending {
                    self.step_pending = false;
                    self.run_step();
                }
            }
            Timer::SpeechGrace(id) => {
                if let Some(cue) = self
                    .output
                    .on_grace_elapsed(id, &mut self.caption, &self.scheduler)
                {
                    self.emit(Command::SpeechFinished(cue));
                }
            }
            Timer::RecognitionGrace(_) => {
                self.input.on_grace_elapsed(&mut self.caption, &self.scheduler)
            }
            Timer::CaptionDecay(generation) => self.caption.on_decay(generation),
            Timer::ShowResults => {
                if self.phase != Phase::GeneratingFeedback {
                    return;
                }
                if let Some(record) = self.record.clone() {
                    self.phase = Phase::Complete;
                    self.emit(Command::ShowResults(record));
                }
            }
        }
    }

    fn dispatch<F>(&self, call: F)
    where
        F: Future<Output = OracleReply> + Send + 'static,
    {
        let events = self.scheduler.events();
        tokio::spawn(async move {
            let reply = call.await;
            if events.send(SessionEvent::Oracle(reply)).is_err() {
                tracing::debug!("Session gone before the oracle replied");
            }
        });
    }

    fn emit(&self, command: Command) {
        // A closed receiver means the UI has gone away; the session keeps
        // its own state regardless.
        let _ = self.commands.send(command);
    }

    fn release_engines(&mut self) {
        self.output.cancel();
        self.input.shutdown();
    }
}

impl Drop for SessionMachine {
    fn drop(&mut self) {
        self.release_engines();
    }
}

/// Drives a machine until it finishes, applying events in arrival order.
pub async fn run_session(
    mut machine: SessionMachine,
    mut events: UnboundedReceiver<SessionEvent>,
) -> SessionOutcome {
    while let Some(event) = events.recv().await {
        machine.handle(event);
        if machine.is_finished() {
            break;
        }
    }
    machine.into_outcome()
}
