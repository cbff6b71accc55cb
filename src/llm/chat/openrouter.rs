use async_trait::async_trait;
use std::error::Error as StdError;

use super::{ ChatClient, CompletionResponse, TokenStream };
use super::openai::OpenAIChatClient;
use crate::llm::LlmConfig;

/// OpenRouter speaks the OpenAI chat-completions wire format, so this client
/// only swaps in OpenRouter defaults and delegates the rest.
pub struct OpenRouterChatClient {
    inner: OpenAIChatClient,
}

impl OpenRouterChatClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>
    ) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let chat_model = model.unwrap_or_else(|| "meta-llama/llama-3.1-8b-instruct".to_string());
        let api_url = base_url.unwrap_or_else(||
            "https://openrouter.ai/api/v1/chat/completions".to_string()
        );

        let inner = OpenAIChatClient::new(api_key, Some(chat_model), Some(api_url))?;
        Ok(Self { inner })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let api_key = config.api_key
            .clone()
            .ok_or_else(|| "OpenRouter API key is required".to_string())?;

        Self::new(api_key, config.completion_model.clone(), config.base_url.clone())
    }
}

#[async_trait]
impl ChatClient for OpenRouterChatClient {
    async fn complete(
        &self,
        prompt: &str
    ) -> Result<CompletionResponse, Box<dyn StdError + Send + Sync>> {
        self.inner.complete(prompt).await
    }

    async fn stream_completion(
        &self,
        prompt: &str
    ) -> Result<TokenStream, Box<dyn StdError + Send + Sync>> {
        self.inner.stream_completion(prompt).await
    }
}
