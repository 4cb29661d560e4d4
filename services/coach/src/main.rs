mod config;
mod console;

use crate::config::{Config, StoreTarget};
use crate::console::{ConsoleSynthesizer, DictationTap};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use coach_core::store::DEFAULT_HISTORY_LIMIT;
use coach_core::{
    Command, GeminiOracle, HttpSessionStore, JsonDirSessionStore, KeyRing, Phase, Scheduler,
    SessionDeps, SessionEvent, SessionMachine, SessionMode, SessionSetup, SessionStore,
    SessionTimings, StoredSession, UserAction, run_session,
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(version, about = "Practice coding interviews by voice, in the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Solve a generated problem, then answer the interviewer's questions about it
    Interview(SessionArgs),
    /// Study a generated problem with a reference solution, then get interviewed on it
    Learn(SessionArgs),
    /// List recently saved sessions
    History {
        #[arg(long, default_value_t = DEFAULT_HISTORY_LIMIT)]
        limit: usize,
    },
    /// Show one saved session
    Show { id: String },
}

#[derive(Args)]
struct SessionArgs {
    /// Programming language to solve the problem in
    #[arg(long)]
    language: Option<String>,
    /// Problem difficulty, e.g. Easy, Medium, Hard
    #[arg(long)]
    difficulty: Option<String>,
    /// Language the interviewer speaks: English or Hindi
    #[arg(long)]
    spoken: Option<String>,
}

impl From<SessionArgs> for SessionSetup {
    fn from(args: SessionArgs) -> Self {
        SessionSetup {
            code_language: args.language,
            difficulty: args.difficulty,
            spoken_language: args.spoken,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load application configuration")?;

    // --- 2. Initialize Logging ---
    // Logs go to stderr so they do not interleave with the conversation.
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    // --- 3. Parse Command-Line Arguments ---
    let cli = Cli::parse();

    let store: Arc<dyn SessionStore> = match &config.store {
        StoreTarget::Remote { url, token } => {
            tracing::info!("Saving sessions to {}", url);
            Arc::new(HttpSessionStore::new(url.clone(), token.clone()))
        }
        StoreTarget::Local(dir) => {
            tracing::info!("Saving sessions under {}", dir.display());
            Arc::new(JsonDirSessionStore::new(dir.clone()))
        }
    };

    match cli.command {
        Mode::Interview(args) => {
            practice(SessionMode::Interview, args.into(), &config, store).await
        }
        Mode::Learn(args) => practice(SessionMode::Learning, args.into(), &config, store).await,
        Mode::History { limit } => history(store, limit).await,
        Mode::Show { id } => show(store, &id).await,
    }
}

async fn practice(
    mode: SessionMode,
    setup: SessionSetup,
    config: &Config,
    store: Arc<dyn SessionStore>,
) -> Result<()> {
    let keys = KeyRing::new(config.gemini_api_keys.clone())
        .context("Set GEMINI_API_KEY_1 (or GEMINI_API_KEY) to generate problems")?;
    tracing::info!("Using {} with {} API key(s)", config.gemini_model, keys.len());
    let oracle = Arc::new(GeminiOracle::new(keys, config.gemini_model.clone()));

    // One ordered queue for everything the session reacts to, and one
    // channel for everything it wants the terminal to show.
    let (event_tx, event_rx) = mpsc::unbounded_channel::<SessionEvent>();
    let (command_tx, mut command_rx) = mpsc::unbounded_channel::<Command>();
    let (phase_tx, phase_rx) = watch::channel(Phase::LoadingConfig);

    let tap = DictationTap::new(event_tx.clone());
    let deps = SessionDeps {
        oracle,
        store,
        synthesizer: Some(Box::new(ConsoleSynthesizer::new(
            event_tx.clone(),
            config.speech_wpm,
        ))),
        recognizer: Some(Box::new(tap.recognizer())),
    };
    let timings = SessionTimings::for_mode(mode).with_oracle_timeout(config.oracle_timeout);
    let machine = SessionMachine::new(
        mode,
        setup,
        timings,
        deps,
        Scheduler::new(event_tx.clone()),
        command_tx,
    );

    // This task renders commands from the session, the only place that prints.
    let command_handler = tokio::spawn(async move {
        while let Some(command) = command_rx.recv().await {
            if let Command::PhaseChanged(phase) = &command {
                phase_tx.send_replace(phase.clone());
            }
            render(&command);
        }
    });

    // Interactive stdin gets a dedicated thread; the lines are handled on the runtime.
    let (line_tx, line_rx) = mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });
    let input_handle = tokio::spawn(handle_input(line_rx, event_tx.clone(), tap, phase_rx));

    let mut session = tokio::spawn(run_session(machine, event_rx));
    event_tx
        .send(SessionEvent::Action(UserAction::Activate))
        .context("Session stopped before it started")?;

    let outcome = tokio::select! {
        outcome = &mut session => outcome.context("Session task failed")?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl-C, shutting down...");
            let _ = event_tx.send(SessionEvent::Action(UserAction::Teardown));
            session.await.context("Session task failed")?
        }
    };
    input_handle.abort();
    // The session's command sender is gone now; flush what it left behind.
    let _ = command_handler.await;

    if let Some(save) = outcome.persistence {
        println!("Saving session...");
        if let Err(e) = save.await {
            tracing::warn!("Session save task failed: {}", e);
        }
    }
    tracing::info!("Session ended in phase {}", outcome.phase);
    Ok(())
}

/// Translates typed lines into session actions.
async fn handle_input(
    mut lines: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<SessionEvent>,
    tap: DictationTap,
    phase: watch::Receiver<Phase>,
) {
    let mut code: Option<Vec<String>> = None;

    while let Some(line) = lines.recv().await {
        if let Some(buffer) = code.as_mut() {
            if line.trim() == ":done" {
                let source = buffer.join("\n");
                code = None;
                send(&events, UserAction::SubmitCode(source));
            } else {
                buffer.push(line);
            }
            continue;
        }

        let current = phase.borrow().clone();
        let action = match line.trim() {
            "" => None,
            ":quit" => {
                send(&events, UserAction::Teardown);
                break;
            }
            ":retry" => Some(match current {
                Phase::Error { .. } => UserAction::RetryProblem,
                Phase::FeedbackFailed { .. } => UserAction::RetryFeedback,
                _ => UserAction::RetryQuestion,
            }),
            ":back" => Some(UserAction::BackToSetup),
            ":begin" => Some(UserAction::BeginInterview),
            ":explain" => Some(UserAction::ReadExplanation),
            ":listen" => Some(UserAction::StartListening),
            ":stop" => Some(UserAction::StopListening),
            ":submit" => Some(UserAction::SubmitResponse),
            // Nothing recorded yet; the session warns about the empty submission.
            ":done" if current == Phase::Coding => Some(UserAction::SubmitCode(String::new())),
            _ if current == Phase::Coding => {
                code = Some(vec![line.clone()]);
                println!("(recording code, finish with :done)");
                None
            }
            text if tap.deliver(text) => None,
            text => Some(UserAction::AppendResponse(text.to_string())),
        };
        if let Some(action) = action {
            send(&events, action);
        }
    }
}

fn send(events: &mpsc::UnboundedSender<SessionEvent>, action: UserAction) {
    if events.send(SessionEvent::Action(action)).is_err() {
        tracing::debug!("Session already finished");
    }
}

fn render(command: &Command) {
    match command {
        Command::PhaseChanged(phase) => match phase {
            Phase::LoadingConfig | Phase::ExitedToSetup => {}
            Phase::GeneratingProblem => println!("Generating a problem..."),
            Phase::Error { message } => {
                println!("Could not generate a problem: {message}");
                println!("  :retry to try again, :back to return to setup");
            }
            Phase::Explaining => {
                println!(":explain reads the explanation aloud, :begin starts the interview")
            }
            Phase::Coding => println!("Type your solution, then :done on its own line."),
            Phase::Interviewing => println!(
                "Interview started. Type your answer (one or more lines) or :listen to dictate, then :submit."
            ),
            Phase::GeneratingFeedback => println!("Generating feedback..."),
            Phase::FeedbackFailed { message } => {
                println!("Could not generate feedback: {message}");
                println!("  :retry to try again");
            }
            Phase::Complete => println!("Session complete."),
        },
        Command::Problem(problem) => {
            println!("\n== {} ==\n{}", problem.title, problem.description);
            if !problem.input_spec.is_empty() {
                println!("Input: {}", problem.input_spec);
            }
            if !problem.output_spec.is_empty() {
                println!("Output: {}", problem.output_spec);
            }
            println!();
        }
        Command::Explanation {
            solution,
            explanation,
        } => {
            println!("-- Reference solution --\n{solution}\n");
            println!("-- Explanation --\n{explanation}\n");
        }
        Command::TurnAppended(turn) => println!("{}: {}", turn.speaker.label(), turn.text),
        Command::ResponseDraft(draft) => {
            if !draft.is_empty() {
                println!("  (draft) {draft}");
            }
        }
        Command::ListeningChanged(true) => {
            println!("Listening. Speak by typing lines, :stop when finished.")
        }
        Command::ListeningChanged(false) => println!("Stopped listening."),
        Command::Warning(message) => println!("! {message}"),
        Command::QuestionFailed(message) => println!("! {message}. :retry to ask again."),
        Command::FeedbackReady(feedback) => println!("\n-- Feedback --\n{feedback}\n"),
        Command::RedirectToSetup => println!(
            "Session setup is incomplete. Pass --language, --difficulty and --spoken (English or Hindi)."
        ),
        Command::ShowResults(record) => println!(
            "Results: {} turns recorded for \"{}\".",
            record.conversation.len(),
            record.problem.title
        ),
        Command::Caption(caption) => tracing::trace!("Caption: {:?}", caption),
        Command::SpeechFinished(cue) => tracing::debug!("Finished speaking {:?}", cue),
    }
}

async fn history(store: Arc<dyn SessionStore>, limit: usize) -> Result<()> {
    let sessions = store
        .recent(limit)
        .await
        .context("Failed to load session history")?;
    if sessions.is_empty() {
        println!("No saved sessions yet.");
    }
    for session in sessions {
        println!("{}", summary_line(&session));
    }
    Ok(())
}

fn summary_line(session: &StoredSession) -> String {
    let when = session
        .created_at
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    let record = &session.record;
    format!(
        "{}  {}  {:<9} {} ({}, {}, {})",
        session.id,
        when,
        record.mode.to_string(),
        record.problem.title,
        record.configuration.code_language,
        record.configuration.difficulty,
        record.configuration.spoken_language
    )
}

async fn show(store: Arc<dyn SessionStore>, id: &str) -> Result<()> {
    let session = store
        .get(id)
        .await
        .context("Failed to load session")?
        .with_context(|| format!("No saved session with id {id}"))?;
    let record = &session.record;

    println!("{}", summary_line(&session));
    println!("\n== {} ==\n{}", record.problem.title, record.problem.description);
    println!("\n-- Code --\n{}", record.submitted_code);
    if let Some(explanation) = &record.explanation {
        println!("\n-- Explanation --\n{explanation}");
    }
    println!("\n-- Conversation --");
    for turn in &record.conversation {
        println!("{}: {}", turn.speaker.label(), turn.text);
    }
    println!("\n-- Feedback --\n{}", record.feedback);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn actions_for(phase: Phase, lines: &[&str]) -> Vec<UserAction> {
        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (_phase_tx, phase_rx) = watch::channel(phase);
        let tap = DictationTap::new(event_tx.clone());
        for line in lines {
            line_tx.send(line.to_string()).unwrap();
        }
        drop(line_tx);

        handle_input(line_rx, event_tx, tap, phase_rx).await;

        let mut actions = Vec::new();
        while let Ok(event) = event_rx.try_recv() {
            if let SessionEvent::Action(action) = event {
                actions.push(action);
            }
        }
        actions
    }

    #[tokio::test]
    async fn done_without_code_submits_empty_code() {
        let actions = actions_for(Phase::Coding, &[":done"]).await;
        assert_eq!(actions, vec![UserAction::SubmitCode(String::new())]);
    }

    #[tokio::test]
    async fn code_lines_keep_their_indentation() {
        let actions = actions_for(
            Phase::Coding,
            &["def two_sum(nums, target):", "    return []", ":done"],
        )
        .await;
        assert_eq!(
            actions,
            vec![UserAction::SubmitCode(
                "def two_sum(nums, target):\n    return []".into()
            )]
        );
    }

    #[tokio::test]
    async fn typed_answer_lines_are_appended() {
        let actions = actions_for(
            Phase::Interviewing,
            &["I sort first", "then walk two pointers", ":submit"],
        )
        .await;
        assert_eq!(
            actions,
            vec![
                UserAction::AppendResponse("I sort first".into()),
                UserAction::AppendResponse("then walk two pointers".into()),
                UserAction::SubmitResponse,
            ]
        );
    }
}
