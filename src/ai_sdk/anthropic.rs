use serde::{Deserialize, Serialize};

use crate::protocol::{DATA_PREFIX, Role, StreamEvent, WireMessage};

#[derive(Debug, Serialize)]
pub(crate) struct MessageRequest {
    pub(crate) model: String,
    pub(crate) max_tokens: u32,
    pub(crate) system: String,
    pub(crate) messages: Vec<MessageParam>,
    pub(crate) stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageParam {
    role: Role,
    content: String,
}

impl From<&WireMessage> for MessageParam {
    fn from(message: &WireMessage) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

/// Server-sent event of the Messages streaming API.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum StreamingEvent {
    ContentBlockStart { content_block: ContentBlockStart },
    ContentBlockDelta { delta: ContentDelta },
    MessageStop,
    Error { error: ApiError },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ContentBlockStart {
    ToolUse { name: String },
    ServerToolUse { name: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ContentDelta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiError {
    #[serde(rename = "type")]
    pub(crate) kind: String,
    pub(crate) message: String,
}

/// Parses one upstream SSE line; `event:` lines and noise yield `None`.
pub(crate) fn decode_line(line: &str) -> Option<StreamingEvent> {
    let data = line.strip_prefix(DATA_PREFIX)?;
    match serde_json::from_str(data) {
        Ok(event) => Some(event),
        Err(err) => {
            tracing::debug!(%err, data, "skipping unrecognised upstream event");
            None
        }
    }
}

/// Maps an upstream event onto the LoopDesk chat protocol.
pub(crate) fn chat_event(event: StreamingEvent) -> Option<StreamEvent> {
    match event {
        StreamingEvent::ContentBlockStart {
            content_block:
                ContentBlockStart::ToolUse { name } | ContentBlockStart::ServerToolUse { name },
        } => Some(StreamEvent::Tool(name)),
        StreamingEvent::ContentBlockDelta {
            delta: ContentDelta::TextDelta { text },
        } => Some(StreamEvent::Text(text)),
        StreamingEvent::MessageStop => Some(StreamEvent::Done),
        StreamingEvent::Error { error } => {
            Some(StreamEvent::Error(format!("{}: {}", error.kind, error.message)))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relay(line: &str) -> Option<StreamEvent> {
        decode_line(line).and_then(chat_event)
    }

    #[test]
    fn text_deltas_become_text_events() {
        let line = r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hej"}}"#;
        assert_eq!(relay(line), Some(StreamEvent::Text("Hej".to_string())));
    }

    #[test]
    fn tool_blocks_become_tool_events() {
        let line = r#"data: {"type":"content_block_start","index":1,"content_block":{"type":"server_tool_use","id":"srvtoolu_1","name":"web_search","input":{}}}"#;
        assert_eq!(relay(line), Some(StreamEvent::Tool("web_search".to_string())));

        let line = r#"data: {"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"toolu_1","name":"allabolag","input":{}}}"#;
        assert_eq!(relay(line), Some(StreamEvent::Tool("allabolag".to_string())));
    }

    #[test]
    fn message_stop_and_errors_are_relayed() {
        assert_eq!(
            relay(r#"data: {"type":"message_stop"}"#),
            Some(StreamEvent::Done)
        );
        assert_eq!(
            relay(r#"data: {"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#),
            Some(StreamEvent::Error("overloaded_error: Overloaded".to_string()))
        );
    }

    #[test]
    fn bookkeeping_events_are_ignored() {
        assert_eq!(relay("event: message_start"), None);
        assert_eq!(relay(r#"data: {"type":"ping"}"#), None);
        assert_eq!(
            relay(r#"data: {"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#),
            None
        );
        assert_eq!(
            relay(r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{"}}"#),
            None
        );
        assert_eq!(relay(r#"data: {"type":"message_delta","delta":{"stop_reason":"end_turn"}}"#), None);
    }

    #[test]
    fn message_request_serializes_stream_flag() {
        let request = MessageRequest {
            model: "claude-sonnet-4-5".to_string(),
            max_tokens: 1024,
            system: "Svara på svenska.".to_string(),
            messages: vec![MessageParam::from(&WireMessage {
                role: Role::User,
                content: "Hej".to_string(),
            })],
            stream: true,
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["stream"], true);
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["messages"][0]["content"], "Hej");
    }
}
