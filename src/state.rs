//! Chat session state and its transition function.

use std::fmt;

use uuid::Uuid;

use crate::protocol::{Role, StreamEvent, WireMessage};

/// Shown in place of an answer when a turn fails before any text arrived.
pub const FALLBACK_REPLY: &str = "Något gick fel. Försök igen senare.";

/// Generation number of a submitted turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TurnId(u64);

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    Streaming,
    Complete,
    Failed,
    /// Superseded by a newer turn or cancelled by the user.
    Interrupted,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Tool names in order of first use, without repeats.
    pub tools_used: Vec<String>,
    pub status: MessageStatus,
}

impl ChatMessage {
    fn new(role: Role, content: String, status: MessageStatus) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            tools_used: Vec::new(),
            status,
        }
    }

    fn record_tool(&mut self, name: &str) {
        if !self.tools_used.iter().any(|used| used == name) {
            self.tools_used.push(name.to_string());
        }
    }
}

impl From<&ChatMessage> for WireMessage {
    fn from(message: &ChatMessage) -> Self {
        WireMessage {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

/// Input to [`ChatState::apply`]. Every action names the turn it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatAction {
    Event { turn: TurnId, event: StreamEvent },
    Completed { turn: TurnId },
    Failed { turn: TurnId, reason: String },
}

impl ChatAction {
    pub fn turn(&self) -> TurnId {
        match self {
            ChatAction::Event { turn, .. }
            | ChatAction::Completed { turn }
            | ChatAction::Failed { turn, .. } => *turn,
        }
    }
}

/// What the caller needs to start streaming a freshly submitted turn.
#[derive(Debug, Clone)]
pub struct Submission {
    pub turn: TurnId,
    pub message_id: String,
    pub history: Vec<WireMessage>,
}

#[derive(Debug, Default)]
enum Phase {
    #[default]
    Idle,
    Streaming {
        turn: TurnId,
        index: usize,
        active_tool: Option<String>,
    },
}

#[derive(Debug, Default)]
pub struct ChatState {
    messages: Vec<ChatMessage>,
    phase: Phase,
    last_turn: u64,
}

impl ChatState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.phase, Phase::Streaming { .. })
    }

    pub fn active_tool(&self) -> Option<&str> {
        match &self.phase {
            Phase::Streaming { active_tool, .. } => active_tool.as_deref(),
            Phase::Idle => None,
        }
    }

    pub fn current_turn(&self) -> Option<TurnId> {
        match self.phase {
            Phase::Streaming { turn, .. } => Some(turn),
            Phase::Idle => None,
        }
    }

    /// The assistant message the current turn streams into.
    pub fn streaming_message(&self) -> Option<&ChatMessage> {
        match self.phase {
            Phase::Streaming { index, .. } => self.messages.get(index),
            Phase::Idle => None,
        }
    }

    /// Starts a new turn for `input`, superseding any turn still streaming.
    ///
    /// Returns `None` for blank input.
    pub fn submit(&mut self, input: &str) -> Option<Submission> {
        let content = input.trim();
        if content.is_empty() {
            return None;
        }

        if let Some(turn) = self.cancel() {
            tracing::debug!(%turn, "turn superseded by new submission");
        }

        let mut history: Vec<WireMessage> = self
            .messages
            .iter()
            .filter(|m| !m.content.is_empty() && m.status != MessageStatus::Failed)
            .map(WireMessage::from)
            .collect();

        let user = ChatMessage::new(Role::User, content.to_string(), MessageStatus::Complete);
        history.push(WireMessage::from(&user));
        self.messages.push(user);

        let assistant = ChatMessage::new(Role::Assistant, String::new(), MessageStatus::Streaming);
        let message_id = assistant.id.clone();
        self.messages.push(assistant);

        self.last_turn += 1;
        let turn = TurnId(self.last_turn);
        self.phase = Phase::Streaming {
            turn,
            index: self.messages.len() - 1,
            active_tool: None,
        };

        Some(Submission {
            turn,
            message_id,
            history,
        })
    }

    /// Ends the current turn as interrupted, keeping any partial answer.
    pub fn cancel(&mut self) -> Option<TurnId> {
        let turn = self.current_turn()?;
        self.end_turn(MessageStatus::Interrupted);
        Some(turn)
    }

    /// Applies one action. Returns `false` when the action belongs to a turn
    /// that is no longer current and was therefore ignored.
    pub fn apply(&mut self, action: ChatAction) -> bool {
        let Phase::Streaming {
            turn,
            index,
            active_tool,
        } = &mut self.phase
        else {
            tracing::trace!(turn = %action.turn(), "no turn streaming, action dropped");
            return false;
        };
        if *turn != action.turn() {
            tracing::debug!(stale = %action.turn(), current = %turn, "stale turn action dropped");
            return false;
        }

        let message = &mut self.messages[*index];
        let terminal = match action {
            ChatAction::Event {
                event: StreamEvent::Tool(name),
                ..
            } => {
                message.record_tool(&name);
                *active_tool = Some(name);
                None
            }
            ChatAction::Event {
                event: StreamEvent::Text(text),
                ..
            } => {
                *active_tool = None;
                message.content.push_str(&text);
                None
            }
            ChatAction::Event {
                event: StreamEvent::Done,
                ..
            } => {
                *active_tool = None;
                None
            }
            ChatAction::Event {
                event: StreamEvent::Error(reason),
                ..
            }
            | ChatAction::Failed { reason, .. } => {
                tracing::warn!(turn = %turn, %reason, "chat turn failed");
                Some(MessageStatus::Failed)
            }
            ChatAction::Completed { .. } => Some(MessageStatus::Complete),
        };

        if let Some(status) = terminal {
            self.end_turn(status);
        }
        true
    }

    fn end_turn(&mut self, status: MessageStatus) {
        let Phase::Streaming { index, .. } = std::mem::take(&mut self.phase) else {
            return;
        };
        let message = &mut self.messages[index];
        message.status = status;
        if status == MessageStatus::Failed && message.content.is_empty() {
            message.content = FALLBACK_REPLY.to_string();
        }
    }
}
