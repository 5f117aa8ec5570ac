//! Text-generation collaborator.
//!
//! The generator only ever needs "prompt in, completion out", so the trait is
//! deliberately narrow. [`OpenAICompatibleClient`] talks to any
//! OpenAI-compatible chat completions endpoint (OpenAI itself, or Gemini via
//! its compatibility layer).

use crate::error::GenerationError;
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
    },
};
use async_trait::async_trait;

const SYSTEM_PROMPT: &str = "You are a friendly, concise technical interviewer speaking out loud. \
     Reply with plain sentences only: no markdown, no lists, no stage directions.";

/// Produces a completion for a single prompt.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Returns the trimmed completion text. An empty completion is an error.
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// An implementation of `TextGenerator` for any OpenAI-compatible API.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the OpenAI client, including API key and base URL.
    /// * `model` - The chat model identifier (e.g., "gpt-4o-mini" or "gemini-1.5-flash").
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAICompatibleClient {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(SYSTEM_PROMPT)
                    .build()
                    .map_err(|e| GenerationError::Request(e.to_string()))?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(prompt)
                    .build()
                    .map_err(|e| GenerationError::Request(e.to_string()))?
                    .into(),
            ])
            .build()
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        let response: CreateChatCompletionResponse = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        completion_text(&response)
    }
}

fn completion_text(response: &CreateChatCompletionResponse) -> Result<String, GenerationError> {
    let text = response
        .choices
        .first()
        .and_then(|choice| choice.message.content.as_deref())
        .map(str::trim)
        .unwrap_or_default();
    if text.is_empty() {
        return Err(GenerationError::Empty);
    }
    Ok(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_with(content: Option<&str>) -> CreateChatCompletionResponse {
        let json = serde_json::json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 0,
            "model": "test",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }]
        });
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_completion_text_is_trimmed() {
        let response = response_with(Some("  Nice answer. Next question?\n"));
        assert_eq!(
            completion_text(&response).unwrap(),
            "Nice answer. Next question?"
        );
    }

    #[test]
    fn test_blank_or_missing_completion_is_empty_error() {
        assert!(matches!(
            completion_text(&response_with(Some("   "))),
            Err(GenerationError::Empty)
        ));
        assert!(matches!(
            completion_text(&response_with(None)),
            Err(GenerationError::Empty)
        ));
    }
}
