use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: String,
}

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<WireMessage>,
    #[serde(
        rename = "systemPrompt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub system_prompt: Option<String>,
}

/// One `data: ` line of the chat stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Tool(String),
    Text(String),
    Error(String),
    Done,
}

impl StreamEvent {
    /// Decodes the text after the `data: ` prefix.
    ///
    /// Returns `None` for payloads that are not JSON or carry none of the
    /// known fields. When several fields are present, `tool` wins over `text`,
    /// which wins over `error`. An empty tool name counts as absent.
    pub fn from_payload(payload: &str) -> Option<Self> {
        if payload == DONE_SENTINEL {
            return Some(StreamEvent::Done);
        }

        let value: Value = serde_json::from_str(payload).ok()?;
        let field = |name: &str| value.get(name).and_then(Value::as_str).map(str::to_owned);

        field("tool")
            .filter(|name| !name.is_empty())
            .map(StreamEvent::Tool)
            .or_else(|| field("text").map(StreamEvent::Text))
            .or_else(|| field("error").map(StreamEvent::Error))
    }

    pub fn to_payload(&self) -> String {
        match self {
            StreamEvent::Tool(name) => json!({ "tool": name }).to_string(),
            StreamEvent::Text(text) => json!({ "text": text }).to_string(),
            StreamEvent::Error(message) => json!({ "error": message }).to_string(),
            StreamEvent::Done => DONE_SENTINEL.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_shapes_map_to_variants() {
        assert_eq!(
            StreamEvent::from_payload(r#"{"tool":"web_search"}"#),
            Some(StreamEvent::Tool("web_search".to_string()))
        );
        assert_eq!(
            StreamEvent::from_payload(r#"{"text":"Hej"}"#),
            Some(StreamEvent::Text("Hej".to_string()))
        );
        assert_eq!(
            StreamEvent::from_payload(r#"{"error":"rate_limited"}"#),
            Some(StreamEvent::Error("rate_limited".to_string()))
        );
        assert_eq!(StreamEvent::from_payload("[DONE]"), Some(StreamEvent::Done));
    }

    #[test]
    fn tool_field_takes_precedence() {
        assert_eq!(
            StreamEvent::from_payload(r#"{"text":"x","tool":"vinnova","error":"e"}"#),
            Some(StreamEvent::Tool("vinnova".to_string()))
        );
    }

    #[test]
    fn empty_tool_name_is_ignored() {
        assert_eq!(StreamEvent::from_payload(r#"{"tool":""}"#), None);
        assert_eq!(
            StreamEvent::from_payload(r#"{"tool":"","text":"Hej"}"#),
            Some(StreamEvent::Text("Hej".to_string()))
        );
    }

    #[test]
    fn unknown_or_malformed_payloads_are_rejected() {
        assert_eq!(StreamEvent::from_payload("{not json"), None);
        assert_eq!(StreamEvent::from_payload("{}"), None);
        assert_eq!(StreamEvent::from_payload("42"), None);
        assert_eq!(StreamEvent::from_payload(r#"{"text":7}"#), None);
        assert_eq!(StreamEvent::from_payload(" [DONE]"), None);
    }

    #[test]
    fn payload_encoding_escapes_text() {
        let event = StreamEvent::Text("rad 1\nrad \"2\"".to_string());
        let payload = event.to_payload();
        assert!(!payload.contains('\n'));
        assert_eq!(StreamEvent::from_payload(&payload), Some(event));
        assert_eq!(StreamEvent::Done.to_payload(), "[DONE]");
    }

    #[test]
    fn chat_request_uses_camel_case_system_prompt() {
        let request = ChatRequest {
            messages: vec![WireMessage {
                role: Role::User,
                content: "Hej".to_string(),
            }],
            system_prompt: Some("Svara på svenska.".to_string()),
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["systemPrompt"], "Svara på svenska.");
        assert_eq!(value["messages"][0]["role"], "user");
    }
}
