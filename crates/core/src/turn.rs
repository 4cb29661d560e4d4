use crate::config::SpokenLanguage;
use crate::ledger::{ConversationLedger, ConversationTurn, MAX_QUESTIONS};
use crate::problem::ProblemStatement;

/// Parameters for one question request.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionRequest {
    pub code: String,
    pub problem: ProblemStatement,
    pub conversation: Vec<ConversationTurn>,
    pub question_number: usize,
    pub spoken_language: SpokenLanguage,
}

/// Parameters for the closing feedback request.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackRequest {
    pub code: String,
    pub problem: ProblemStatement,
    pub conversation: Vec<ConversationTurn>,
    pub spoken_language: SpokenLanguage,
}

/// What the loop should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnStep {
    Ask(QuestionRequest),
    Finish(FeedbackRequest),
}

/// Result of applying a question reply.
#[derive(Debug, Clone, PartialEq)]
pub enum QuestionOutcome {
    Appended(ConversationTurn),
    Failed(String),
    /// Reply for a request that is no longer outstanding.
    Stale,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ResponseError {
    #[error("Please provide a response before submitting")]
    Empty,
}

/// Drives the bounded question loop over a ledger it owns exclusively.
#[derive(Debug)]
pub struct TurnController {
    ledger: ConversationLedger,
    code: String,
    problem: ProblemStatement,
    spoken_language: SpokenLanguage,
    in_flight: Option<usize>,
}

impl TurnController {
    /// Starts a loop with a fresh, empty ledger.
    pub fn new(problem: ProblemStatement, code: String, spoken_language: SpokenLanguage) -> Self {
        Self {
            ledger: ConversationLedger::new(),
            code,
            problem,
            spoken_language,
            in_flight: None,
        }
    }

    pub fn ledger(&self) -> &ConversationLedger {
        &self.ledger
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn questions_asked(&self) -> usize {
        self.ledger.interviewer_turns()
    }

    pub fn is_awaiting_question(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Decides the next step from the ledger alone. Returns `None` while a
    /// question request is still outstanding.
    pub fn next_step(&mut self) -> Option<TurnStep> {
        if let Some(number) = self.in_flight {
            tracing::debug!("Question {} still in flight, not issuing another", number);
            return None;
        }
        let asked = self.ledger.interviewer_turns();
        if asked >= MAX_QUESTIONS {
            return Some(TurnStep::Finish(self.feedback_request()));
        }
        let question_number = asked + 1;
        self.in_flight = Some(question_number);
        Some(TurnStep::Ask(QuestionRequest {
            code: self.code.clone(),
            problem: self.problem.clone(),
            conversation: self.ledger.snapshot(),
            question_number,
            spoken_language: self.spoken_language,
        }))
    }

    pub fn feedback_request(&self) -> FeedbackRequest {
        FeedbackRequest {
            code: self.code.clone(),
            problem: self.problem.clone(),
            conversation: self.ledger.snapshot(),
            spoken_language: self.spoken_language,
        }
    }

    pub fn on_question(
        &mut self,
        question_number: usize,
        result: anyhow::Result<String>,
    ) -> QuestionOutcome {
        if self.in_flight != Some(question_number) {
            return QuestionOutcome::Stale;
        }
        self.in_flight = None;
        match result {
            Ok(question) => {
                let turn = self.ledger.append(ConversationTurn::interviewer(question));
                QuestionOutcome::Appended(turn.clone())
            }
            Err(e) => QuestionOutcome::Failed(format!("{e:#}")),
        }
    }

    /// Records the candidate's answer. Blank answers leave the ledger untouched.
    pub fn accept_response(&mut self, text: &str) -> Result<ConversationTurn, ResponseError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ResponseError::Empty);
        }
        Ok(self.ledger.append(ConversationTurn::candidate(text)).clone())
    }
}
