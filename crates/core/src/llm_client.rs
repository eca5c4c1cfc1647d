use anyhow::{Context, Result, anyhow};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
    },
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Text substituted for model output whenever a generation call fails.
pub const APOLOGY: &str = "I apologize, but I'm having trouble generating a response right now.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One role-tagged message sent to the language model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A generic client for interacting with an LLM.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Produces generated text for an ordered list of role-tagged messages.
    async fn generate(&self, messages: Vec<ChatMessage>) -> Result<String>;
}

/// An implementation of `LLMClient` for any OpenAI-compatible API.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the OpenAI client, including API key and base URL.
    /// * `model` - The model identifier to use for chat completions (e.g., "gemini-2.5-flash").
    /// * `temperature` - Sampling temperature passed with every request.
    pub fn new(config: OpenAIConfig, model: String, temperature: f32) -> Self {
        Self {
            client: Client::with_config(config),
            model,
            temperature,
        }
    }

    fn to_request_message(message: ChatMessage) -> Result<ChatCompletionRequestMessage> {
        Ok(match message.role {
            ChatRole::System => ChatCompletionRequestSystemMessageArgs::default()
                .content(message.content)
                .build()?
                .into(),
            ChatRole::User => ChatCompletionRequestUserMessageArgs::default()
                .content(message.content)
                .build()?
                .into(),
            ChatRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                .content(message.content)
                .build()?
                .into(),
        })
    }
}

#[async_trait]
impl LLMClient for OpenAICompatibleClient {
    async fn generate(&self, messages: Vec<ChatMessage>) -> Result<String> {
        let messages = messages
            .into_iter()
            .map(Self::to_request_message)
            .collect::<Result<Vec<_>>>()?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(self.temperature)
            .build()?;

        let response: CreateChatCompletionResponse = self.client.chat().create(request).await?;

        response
            .choices
            .first()
            .context("No response choice from LLM")?
            .message
            .content
            .clone()
            .ok_or_else(|| anyhow!("LLM response had no text content."))
    }
}

/// Wraps an `LLMClient` with a uniform timeout and the apology fallback.
#[derive(Clone)]
pub struct Generator {
    client: Arc<dyn LLMClient>,
    timeout: Duration,
}

impl Generator {
    pub fn new(client: Arc<dyn LLMClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Calls the model, failing on error, timeout, or blank output.
    pub async fn try_generate(&self, messages: Vec<ChatMessage>) -> Result<String> {
        let text = tokio::time::timeout(self.timeout, self.client.generate(messages))
            .await
            .map_err(|_| anyhow!("LLM call timed out after {:?}", self.timeout))??;
        let text = text.trim();
        if text.is_empty() {
            return Err(anyhow!("LLM returned an empty response"));
        }
        Ok(text.to_string())
    }

    /// Calls the model, substituting `APOLOGY` for any failure.
    pub async fn generate(&self, messages: Vec<ChatMessage>) -> String {
        match self.try_generate(messages).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "LLM generation failed; using fallback text");
                APOLOGY.to_string()
            }
        }
    }

    /// Convenience for the common system-instruction + prompt pair.
    pub async fn generate_from_prompt(&self, system: &str, prompt: String) -> String {
        debug!(system, "Generating from prompt");
        self.generate(vec![ChatMessage::system(system), ChatMessage::user(prompt)])
            .await
    }

    /// Like `generate_from_prompt`, but leaves the fallback to the caller.
    pub async fn try_generate_from_prompt(&self, system: &str, prompt: String) -> Result<String> {
        self.try_generate(vec![ChatMessage::system(system), ChatMessage::user(prompt)])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn generate_trims_model_output() {
        let mut mock = MockLLMClient::new();
        mock.expect_generate()
            .returning(|_| Ok("  Hello there \n".to_string()));
        let generator = Generator::new(Arc::new(mock), Duration::from_secs(1));

        assert_eq!(
            generator.generate(vec![ChatMessage::user("hi")]).await,
            "Hello there"
        );
    }

    #[tokio::test]
    async fn generate_falls_back_to_apology_on_error() {
        let mut mock = MockLLMClient::new();
        mock.expect_generate()
            .returning(|_| Err(anyhow!("network down")));
        let generator = Generator::new(Arc::new(mock), Duration::from_secs(1));

        assert_eq!(generator.generate(vec![]).await, APOLOGY);
        assert!(generator.try_generate(vec![]).await.is_err());
    }

    #[tokio::test]
    async fn blank_output_counts_as_failure() {
        let mut mock = MockLLMClient::new();
        mock.expect_generate().returning(|_| Ok("   ".to_string()));
        let generator = Generator::new(Arc::new(mock), Duration::from_secs(1));

        assert!(generator.try_generate(vec![]).await.is_err());
    }

    struct HangingClient;

    #[async_trait]
    impl LLMClient for HangingClient {
        async fn generate(&self, _messages: Vec<ChatMessage>) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("too late".to_string())
        }
    }

    #[tokio::test]
    async fn hung_calls_time_out() {
        let generator = Generator::new(Arc::new(HangingClient), Duration::from_millis(50));
        assert_eq!(generator.generate(vec![]).await, APOLOGY);
    }

    #[test]
    fn system_message_builder_sets_role() {
        let msg = ChatMessage::system("rules");
        assert_eq!(msg.role, ChatRole::System);
        assert_eq!(msg.content, "rules");
        assert_eq!(
            serde_json::to_string(&ChatMessage::assistant("x")).unwrap(),
            r#"{"role":"assistant","content":"x"}"#
        );
    }
}
