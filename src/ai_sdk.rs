mod anthropic;

pub(crate) use anthropic::{MessageParam, MessageRequest, chat_event, decode_line};
