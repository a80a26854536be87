use serde::Serialize;

/// One logical event recovered from the Coze event stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Frame {
    /// Value of the last `event:` line, trimmed. May be empty.
    pub event_name: String,
    /// Trimmed remainders of the `data:` lines, in arrival order.
    pub data_lines: Vec<String>,
}

impl Frame {
    pub fn is_empty(&self) -> bool {
        self.event_name.is_empty() && self.data_lines.is_empty()
    }

    /// The data lines joined with `\n` and trimmed.
    pub fn payload(&self) -> String {
        self.data_lines.join("\n").trim().to_string()
    }
}

/// Outcome of one chat run against Coze.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ChatResult {
    pub answer: String,
    pub conversation_id: String,
    /// Diagnostic text, set only when something went wrong upstream.
    pub debug_info: String,
}

impl ChatResult {
    /// An empty-answer result that keeps the caller's conversation id.
    pub fn unanswered(conversation_id: &str, debug_info: impl Into<String>) -> Self {
        Self {
            answer: String::new(),
            conversation_id: conversation_id.to_string(),
            debug_info: debug_info.into(),
        }
    }
}

/// Body of `POST /v3/chat`.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ChatRequestBody<'a> {
    pub bot_id: &'a str,
    pub user_id: &'a str,
    pub stream: bool,
    pub auto_save_history: bool,
    pub additional_messages: Vec<AdditionalMessage<'a>>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct AdditionalMessage<'a> {
    pub role: &'a str,
    pub content: &'a str,
    pub content_type: &'a str,
}

impl<'a> ChatRequestBody<'a> {
    /// A streaming request carrying a single plain-text user message.
    pub fn user_text(bot_id: &'a str, user_id: &'a str, text: &'a str) -> Self {
        Self {
            bot_id,
            user_id,
            stream: true,
            auto_save_history: true,
            additional_messages: vec![AdditionalMessage {
                role: "user",
                content: text,
                content_type: "text",
            }],
        }
    }
}
