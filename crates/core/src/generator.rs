//! Produces the interviewer's next line.
//!
//! The opening and closing prompts are spoken verbatim. Everything in
//! between is personalised by the text-generation collaborator, with a
//! templated fallback whenever that collaborator fails, times out or returns
//! nothing. [`ResponseGenerator::generate`] never fails.

use crate::conversation::{Role, SharedConversation, Step, begin_turn};
use crate::error::GenerationError;
use crate::llm_client::TextGenerator;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Where an utterance's text came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UtteranceSource {
    /// An agenda prompt spoken as written.
    Scripted,
    /// Personalised by the text-generation collaborator.
    Generated,
    /// The templated acknowledgment used when generation failed.
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Utterance {
    pub text: String,
    pub source: UtteranceSource,
}

impl Utterance {
    fn scripted(text: String) -> Self {
        Self {
            text,
            source: UtteranceSource::Scripted,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    /// Who the model is asked to play.
    pub persona: String,
    /// Upper bound on the personalised reply, passed to the model.
    pub max_words: usize,
    /// How long to wait for the text-generation collaborator.
    pub timeout: Duration,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            persona: "a backend development interviewer".to_string(),
            max_words: 80,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Builds the request asking the model to acknowledge an answer and then ask
/// the next question.
pub fn build_prompt(settings: &GeneratorSettings, answer: &str, question: &str) -> String {
    format!(
        "You are {persona}.\n\
         The candidate just said: \"{answer}\"\n\n\
         Give a brief (1-2 sentences) acknowledgment of their answer, then ask this question word for word:\n\
         {question}\n\n\
         Keep the total response under {max_words} words and conversational.",
        persona = settings.persona,
        answer = answer.trim(),
        question = question,
        max_words = settings.max_words,
    )
}

/// The line spoken when generation is unavailable.
pub fn fallback_text(question: &str) -> String {
    format!("That's interesting. {question}")
}

#[derive(Clone)]
pub struct ResponseGenerator {
    llm: Arc<dyn TextGenerator>,
    settings: GeneratorSettings,
}

impl ResponseGenerator {
    pub fn new(llm: Arc<dyn TextGenerator>, settings: GeneratorSettings) -> Self {
        Self { llm, settings }
    }

    pub fn settings(&self) -> &GeneratorSettings {
        &self.settings
    }

    /// Advances the conversation by one step and returns what to say.
    ///
    /// Calls on the same conversation run one at a time, in the order they
    /// arrive, from the advance through to recording both turns. The state
    /// lock itself is released while the model is consulted.
    pub async fn generate(&self, conversation: &SharedConversation, user_input: &str) -> Utterance {
        let _turn = begin_turn(conversation).await;
        let step = conversation.lock().await.advance();

        let utterance = match step {
            Step::Opening { prompt } | Step::Closing { prompt } => Utterance::scripted(prompt),
            Step::Question { index, prompt } => match self.personalise(user_input, &prompt).await {
                Ok(text) => {
                    debug!(index, "Generated personalised question");
                    Utterance {
                        text,
                        source: UtteranceSource::Generated,
                    }
                }
                Err(e) => {
                    warn!(index, error = %e, "Text generation failed, using fallback");
                    Utterance {
                        text: fallback_text(&prompt),
                        source: UtteranceSource::Fallback,
                    }
                }
            },
        };

        let mut state = conversation.lock().await;
        state.record(Role::Candidate, user_input);
        state.record(Role::Interviewer, &utterance.text);
        utterance
    }

    async fn personalise(&self, answer: &str, question: &str) -> Result<String, GenerationError> {
        let prompt = build_prompt(&self.settings, answer, question);
        let text = tokio::time::timeout(self.settings.timeout, self.llm.generate(&prompt))
            .await
            .map_err(|_| GenerationError::Timeout(self.settings.timeout))??;
        let text = text.trim();
        if text.is_empty() {
            return Err(GenerationError::Empty);
        }
        Ok(text.to_string())
    }
}
