// Answer assembly over Coze chat events.
//
// Coze interleaves lifecycle events, incremental answer deltas, completed
// messages and failure reports in one stream. Every event is routed by name;
// a missing or malformed payload only ever drops that one event.

use serde_json::Value;

use super::types::{ChatResult, Frame};
use crate::json::first_string_at;

pub(crate) const EVENT_CHAT_CREATED: &str = "conversation.chat.created";
pub(crate) const EVENT_MESSAGE_DELTA: &str = "conversation.message.delta";
pub(crate) const EVENT_MESSAGE_COMPLETED: &str = "conversation.message.completed";
pub(crate) const EVENT_DONE: &str = "done";

const FAILURE_EVENTS: [&str; 3] = [
    "conversation.chat.failed",
    "conversation.chat.requires_action",
    "error",
];

const DONE_PAYLOADS: [&str; 2] = ["[DONE]", "\"[DONE]\""];

const LOG_PREVIEW_CHARS: usize = 300;

/// Accumulation state for one chat run.
#[derive(Debug, Clone, Default)]
pub(crate) struct StreamState {
    answer_delta: String,
    completed_answer: String,
    conversation_id: String,
    failure_info: String,
    terminated: bool,
}

impl StreamState {
    /// Start a run, seeded with the conversation id the caller already knows.
    pub fn new(conversation_id: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            ..Self::default()
        }
    }

    /// True once the `done` sentinel has been seen.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Close a run whose stream broke off (read error, timeout). Partial text
    /// is discarded; only the conversation id learned so far survives.
    pub fn abort(self, reason: impl Into<String>) -> ChatResult {
        ChatResult::unanswered(&self.conversation_id, reason)
    }

    /// Apply one frame.
    pub fn dispatch(&mut self, frame: Frame) {
        if frame.event_name.trim().is_empty() {
            return;
        }

        let event = frame.event_name.as_str();
        let payload = frame.payload();
        tracing::debug!(
            event,
            data = %preview(&payload, LOG_PREVIEW_CHARS),
            "coze event"
        );

        if event == EVENT_DONE {
            if DONE_PAYLOADS.contains(&payload.as_str()) {
                self.terminated = true;
            }
            return;
        }

        if payload.is_empty() {
            return;
        }

        if FAILURE_EVENTS.contains(&event) {
            self.failure_info = format!("{event}: {payload}");
        }

        let data: Value = match serde_json::from_str(&payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(event, error = %e, "ignoring unparseable event payload");
                return;
            }
        };

        match event {
            EVENT_CHAT_CREATED => {
                if let Some(id) = data.get("conversation_id").and_then(Value::as_str) {
                    self.conversation_id = id.to_string();
                }
            }
            EVENT_MESSAGE_DELTA | EVENT_MESSAGE_COMPLETED => {
                if !is_assistant_answer(&data) {
                    return;
                }
                let text = extract_assistant_text(&data);
                if text.trim().is_empty() {
                    return;
                }
                if event == EVENT_MESSAGE_DELTA {
                    self.answer_delta.push_str(text);
                } else {
                    self.completed_answer = text.to_string();
                }
            }
            _ => {}
        }
    }

    /// Close the run: the completed message wins over the accumulated deltas.
    pub fn finish(self) -> ChatResult {
        let answer = if self.completed_answer.trim().is_empty() {
            self.answer_delta.trim().to_string()
        } else {
            self.completed_answer.trim().to_string()
        };

        ChatResult {
            answer,
            conversation_id: self.conversation_id,
            debug_info: self.failure_info,
        }
    }
}

fn is_assistant_answer(data: &Value) -> bool {
    data.get("role").and_then(Value::as_str) == Some("assistant")
        && data.get("type").and_then(Value::as_str) == Some("answer")
}

/// Candidate locations of the assistant text, highest priority first.
const TEXT_PATHS: [&[&str]; 3] = [&["content"], &["delta", "content"], &["content", "text"]];

/// Pull the assistant text out of a message event, or `""` if none of the
/// known shapes match.
fn extract_assistant_text(data: &Value) -> &str {
    first_string_at(data, &TEXT_PATHS).unwrap_or("")
}

/// Single-line preview of at most `max_chars` characters, for logs.
pub(crate) fn preview(s: &str, max_chars: usize) -> String {
    let single_line = s.replace('\n', " ");
    if single_line.chars().count() <= max_chars {
        single_line
    } else {
        let truncated: String = single_line.chars().take(max_chars).collect();
        format!("{truncated}...")
    }
}
