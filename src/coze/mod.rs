// Coze chat API client.
//
// Sends one streaming `POST /v3/chat` per user message and assembles the
// event stream into a single answer plus the (possibly new) conversation id.
// Upstream trouble is reported through `ChatResult::debug_info`; only a
// request that cannot be sent at all comes back as an error.

pub(crate) mod dispatch;
pub(crate) mod streaming;
pub(crate) mod types;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Response, Url};

use self::dispatch::{preview, StreamState};
use self::streaming::parse_frame_stream;
pub(crate) use self::types::ChatResult;
use self::types::ChatRequestBody;
use crate::config::schema::CozeConfig;

const EVENT_STREAM: &str = "text/event-stream";
const ERROR_BODY_CHARS: usize = 800;

/// Anything that can answer a user message. The webhook handlers only see
/// this trait.
#[async_trait]
pub(crate) trait ChatBackend: Send + Sync {
    async fn ask(&self, user_id: &str, text: &str, conversation_id: &str) -> Result<ChatResult>;
}

pub(crate) struct CozeClient {
    client: reqwest::Client,
    base_url: String,
    pat: String,
    bot_id: String,
    timeout: Duration,
}

impl CozeClient {
    pub fn new(config: &CozeConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to create Coze HTTP client: {}", e))?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            pat: config.pat.clone().unwrap_or_default(),
            bot_id: config.bot_id.clone().unwrap_or_default(),
            timeout,
        })
    }

    fn chat_url(&self, conversation_id: &str) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/v3/chat", self.base_url))?;
        if !conversation_id.trim().is_empty() {
            url.query_pairs_mut()
                .append_pair("conversation_id", conversation_id);
        }
        Ok(url)
    }
}

/// Drive the frame reader over an event-stream response until `done` or end of
/// stream. A broken-off stream yields no answer, only the reason.
async fn read_event_stream(response: Response, conversation_id: &str) -> ChatResult {
    let mut state = StreamState::new(conversation_id);
    let mut frames = parse_frame_stream(response.bytes_stream());

    while let Some(frame) = frames.next().await {
        match frame {
            Ok(frame) => {
                state.dispatch(frame);
                if state.is_terminated() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "coze stream read failed");
                return state.abort(format!("stream read failed: {e:#}"));
            }
        }
    }

    state.finish()
}

#[async_trait]
impl ChatBackend for CozeClient {
    async fn ask(&self, user_id: &str, text: &str, conversation_id: &str) -> Result<ChatResult> {
        if self.pat.trim().is_empty() || self.bot_id.trim().is_empty() {
            return Ok(ChatResult::unanswered(
                conversation_id,
                "Missing Coze config (coze.pat / coze.bot_id)",
            ));
        }

        let url = self.chat_url(conversation_id)?;
        let body = ChatRequestBody::user_text(&self.bot_id, user_id, text);

        let response = match self
            .client
            .post(url)
            .header(ACCEPT, EVENT_STREAM)
            .header(AUTHORIZATION, format!("Bearer {}", self.pat))
            .json(&body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => {
                tracing::warn!(error = %e, "coze request timed out");
                return Ok(ChatResult::unanswered(
                    conversation_id,
                    format!("Coze request timed out after {}s", self.timeout.as_secs()),
                ));
            }
            Err(e) => return Err(anyhow::anyhow!("Coze request failed: {}", e)),
        };

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();
        tracing::info!(status = status.as_u16(), content_type = %content_type, "coze response");

        if !status.is_success() {
            let body = match response.text().await {
                Ok(b) if b.trim().is_empty() => "(no content)".to_string(),
                Ok(b) => preview(&b, ERROR_BODY_CHARS),
                Err(e) => format!("(unreadable body: {e})"),
            };
            return Ok(ChatResult::unanswered(
                conversation_id,
                format!("HTTP {}: {}", status.as_u16(), body),
            ));
        }

        if !content_type.contains(EVENT_STREAM) {
            let body = match response.text().await {
                Ok(b) => b,
                Err(e) => format!("(unreadable body: {e})"),
            };
            tracing::warn!(body = %preview(&body, ERROR_BODY_CHARS), "coze returned a non-streaming body");
            return Ok(ChatResult::unanswered(
                conversation_id,
                format!("Coze returned a non-streaming body: {body}"),
            ));
        }

        Ok(read_event_stream(response, conversation_id).await)
    }
}
