use crate::caption::CaptionPresenter;
use crate::config::SpokenLanguage;
use crate::ledger::Speaker;
use crate::speech::{SPEECH_RATE, SpeechSynthesizer, Utterance, UtteranceId, clean_for_speech};
use crate::timer::{Scheduler, Timer};
use std::time::Duration;

struct ActiveUtterance<C> {
    id: UtteranceId,
    on_complete: Option<C>,
    ended: bool,
}

/// Speech output channel: at most one audible utterance, no queueing.
///
/// `C` is the completion token handed back once an utterance has finished
/// and its caption grace delay has passed. Preempted utterances never hand
/// their token back.
pub struct SpeechOutput<C> {
    engine: Option<Box<dyn SpeechSynthesizer>>,
    language: SpokenLanguage,
    grace: Duration,
    next_id: u64,
    active: Option<ActiveUtterance<C>>,
}

impl<C> SpeechOutput<C> {
    pub fn new(engine: Option<Box<dyn SpeechSynthesizer>>, grace: Duration) -> Self {
        Self {
            engine,
            language: SpokenLanguage::English,
            grace,
            next_id: 0,
            active: None,
        }
    }

    pub fn set_language(&mut self, language: SpokenLanguage) {
        self.language = language;
    }

    pub fn is_speaking(&self) -> bool {
        self.active.as_ref().is_some_and(|a| !a.ended)
    }

    pub fn active_utterance(&self) -> Option<UtteranceId> {
        self.active.as_ref().map(|a| a.id)
    }

    /// Speaks `text` after cancelling whatever is currently playing.
    ///
    /// Returns `None` when nothing is left to say once formatting is stripped;
    /// the previous utterance is silenced either way.
    pub fn speak(
        &mut self,
        text: &str,
        on_complete: Option<C>,
        caption: &mut CaptionPresenter,
        scheduler: &Scheduler,
    ) -> Option<UtteranceId> {
        let preempted = self.active.is_some();
        self.cancel();

        let cleaned = clean_for_speech(text);
        if cleaned.is_empty() {
            tracing::debug!("Nothing to speak after cleaning");
            if preempted && caption.state().speaker == Speaker::Interviewer {
                caption.deactivate(scheduler);
            }
            return None;
        }

        self.next_id += 1;
        let id = UtteranceId(self.next_id);
        caption.show(Speaker::Interviewer, cleaned.clone());
        self.active = Some(ActiveUtterance {
            id,
            on_complete,
            ended: false,
        });

        let utterance = Utterance {
            id,
            text: cleaned,
            locale: self.language.locale(),
            rate: SPEECH_RATE,
        };
        let started = match self.engine.as_mut() {
            Some(engine) => engine.speak(utterance).map_err(|e| {
                tracing::warn!("Speech synthesis failed, showing caption only: {}", e);
            }),
            None => {
                tracing::debug!("No speech synthesizer, showing caption only");
                Err(())
            }
        };
        if started.is_err() {
            // Nothing will report an end, so finish the utterance right away.
            self.on_utterance_end(id, scheduler);
        }
        Some(id)
    }

    /// Engine reported that `id` finished playing.
    pub fn on_utterance_end(&mut self, id: UtteranceId, scheduler: &Scheduler) {
        match self.active.as_mut() {
            Some(active) if active.id == id && !active.ended => {
                active.ended = true;
                scheduler.after(self.grace, Timer::SpeechGrace(id));
            }
            _ => tracing::debug!("Ignoring end of superseded utterance {:?}", id),
        }
    }

    /// Grace delay for `id` elapsed; releases the caption and hands back the
    /// completion token.
    pub fn on_grace_elapsed(
        &mut self,
        id: UtteranceId,
        caption: &mut CaptionPresenter,
        scheduler: &Scheduler,
    ) -> Option<C> {
        let finished = self.active.as_ref().is_some_and(|a| a.id == id && a.ended);
        if !finished {
            return None;
        }
        let active = self.active.take()?;
        if caption.state().speaker == Speaker::Interviewer {
            caption.deactivate(scheduler);
        }
        active.on_complete
    }

    /// Silences the current utterance; its completion token is dropped.
    pub fn cancel(&mut self) {
        if let Some(active) = self.active.take() {
            tracing::debug!("Cancelling utterance {:?}", active.id);
            if let Some(engine) = self.engine.as_mut() {
                engine.cancel();
            }
        }
    }
}
