use crate::error::{ChatError, ChatResult};
use crate::protocol::{ChatRequest, StreamEvent, WireMessage};
use crate::stream::read_events;
use reqwest::Client as HttpClient;

pub const LOOPDESK_SYSTEM_PROMPT: &str = "Du är LoopDesk Assistant, en hjälpsam AI-assistent för LoopDesk - en svensk business intelligence-plattform.

LoopDesk hjälper användare med:
- **Nyheter**: Aggregerat nyhetsflöde från valda källor
- **Bolagsinformation**: Sök företag, se nyckeltal, styrelse, ägare och finansiell historik
- **Bevakningslista**: Spåra bolag och få notiser vid förändringar
- **Bolagshändelser**: Kungörelser och registreringar från Bolagsverket

Svara koncist på svenska. Var hjälpsam och vänlig. Om du inte vet svaret, säg det ärligt.";

pub struct ClientConfig {
    pub base_url: String,
    pub system_prompt: Option<String>,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            system_prompt: Some(LOOPDESK_SYSTEM_PROMPT.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct ChatClient {
    base_url: String,
    system_prompt: Option<String>,
    http: HttpClient,
}

impl ChatClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            base_url: normalize_base_url(&config.base_url),
            system_prompt: config.system_prompt,
            http: HttpClient::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Posts `history` to `/api/chat` and feeds every streamed event to
    /// `on_event` until the response body ends.
    pub async fn stream_chat<F>(&self, history: Vec<WireMessage>, on_event: F) -> ChatResult<()>
    where
        F: FnMut(StreamEvent),
    {
        let request = ChatRequest {
            messages: history,
            system_prompt: self.system_prompt.clone(),
        };
        tracing::debug!(messages = request.messages.len(), "sending chat request");

        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Status { status, body });
        }

        read_events(response.bytes_stream(), on_event).await
    }
}

fn normalize_base_url(value: &str) -> String {
    value.trim_end_matches('/').to_string()
}
