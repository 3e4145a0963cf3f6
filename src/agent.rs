use crate::ai_sdk::{MessageParam, MessageRequest};
use crate::error::{ChatError, ChatResult};
use crate::protocol::WireMessage;
use reqwest::Client;

pub const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";

pub struct AgentConfig {
    pub api_key: String,
    pub api_url: String,
    pub model: String,
    pub max_tokens: u32,
}

/// Upstream model the `/api/chat` route streams answers from.
pub struct Agent {
    client: Client,
    config: AgentConfig,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Opens a streaming Messages request. The body is left unread.
    pub(crate) async fn stream_inference(
        &self,
        system: String,
        conversation: &[WireMessage],
    ) -> ChatResult<reqwest::Response> {
        let request = MessageRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            system,
            messages: conversation.iter().map(MessageParam::from).collect(),
            stream: true,
        };

        let response = self
            .client
            .post(&self.config.api_url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Status { status, body });
        }

        Ok(response)
    }
}
