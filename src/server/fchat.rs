// FChat adapter.
//
// FChat posts `{ message: { text, user: { email } } }` and expects `{ok: true}`
// back no matter what; the answer goes out separately through the FChat user
// messaging webhook. The user's Coze conversation id is kept in the cache.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{answer_or_fallback, AppState};
use crate::cache::ConversationCache;
use crate::config::schema::FChatConfig;
use crate::coze::dispatch::preview;
use crate::json::string_at;

const NO_ANSWER: &str = "Mình chưa có câu trả lời phù hợp. Bạn thử lại nhé.";
const DEBUG_PREFIX: &str = "Coze lỗi/không trả answer. Debug: ";
const LOG_PREVIEW_CHARS: usize = 800;

/// Delivers an answer back to a messaging platform user.
#[async_trait]
pub(crate) trait ReplySender: Send + Sync {
    async fn send_reply(&self, email: &str, text: &str) -> Result<()>;
}

/// Client for the FChat user messaging webhook.
pub(crate) struct FChatClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl FChatClient {
    pub fn new(config: &FChatConfig) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to create FChat HTTP client: {}", e))?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone().filter(|t| !t.trim().is_empty()),
        })
    }

    fn send_url(&self, token: &str) -> String {
        format!("{}/{}/fchat", self.base_url, token)
    }
}

#[async_trait]
impl ReplySender for FChatClient {
    async fn send_reply(&self, email: &str, text: &str) -> Result<()> {
        let token = self
            .token
            .as_deref()
            .context("Missing fchat.token config")?;

        let response = self
            .client
            .post(self.send_url(token))
            .json(&json!({ "email": email, "text": text }))
            .send()
            .await
            .context("sending reply to FChat")?;

        let status = response.status();
        info!(status = status.as_u16(), "fchat reply sent");
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("FChat returned {}: {}", status.as_u16(), body);
        }
        Ok(())
    }
}

/// An inbound FChat message that is worth answering.
#[derive(Debug, PartialEq, Eq)]
struct IncomingMessage {
    email: String,
    text: String,
}

/// Pull email and text out of an FChat payload. `Ok(None)` when either is
/// missing or blank.
fn parse_incoming(raw: &[u8]) -> Result<Option<IncomingMessage>> {
    let root: Value = serde_json::from_slice(raw).context("parsing FChat payload")?;
    let text = string_at(&root, &["message", "text"]).unwrap_or("");
    let email = string_at(&root, &["message", "user", "email"]).unwrap_or("");

    if email.trim().is_empty() || text.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(IncomingMessage {
        email: email.to_string(),
        text: text.to_string(),
    }))
}

#[tracing::instrument(name = "fchat", skip_all, fields(request_id = %uuid::Uuid::new_v4()))]
pub(crate) async fn fchat_webhook(State(state): State<AppState>, body: Bytes) -> Json<Value> {
    let ok = Json(json!({ "ok": true }));

    info!(
        body = %preview(&String::from_utf8_lossy(&body), LOG_PREVIEW_CHARS),
        "incoming fchat webhook"
    );
    if body.iter().all(u8::is_ascii_whitespace) {
        return ok;
    }

    let message = match parse_incoming(&body) {
        Ok(Some(m)) => m,
        Ok(None) => {
            warn!("missing email/text, ignoring");
            return ok;
        }
        Err(e) => {
            warn!(error = %format!("{e:#}"), "invalid fchat payload");
            return ok;
        }
    };
    info!(email = %message.email, text = %preview(&message.text, 120), "fchat message");

    let cache_key = ConversationCache::user_key(&message.email);
    let existing = state.cache.get(&cache_key).unwrap_or_default();
    info!(conversation_id = %existing, "existing conversation");

    let result = state.ask(&message.email, &message.text, &existing).await;
    info!(
        answer = %preview(&result.answer, 120),
        conversation_id = %result.conversation_id,
        "coze answered"
    );

    if !result.conversation_id.trim().is_empty() {
        state
            .cache
            .set(&cache_key, &result.conversation_id, state.conversation_ttl);
    }

    let answer = answer_or_fallback(&result, NO_ANSWER, DEBUG_PREFIX);
    if let Err(e) = state.replies.send_reply(&message.email, &answer).await {
        warn!(error = %format!("{e:#}"), "fchat reply failed");
    }

    ok
}

pub(crate) async fn fchat_hint() -> Json<Value> {
    Json(json!({ "ok": true, "hint": "Use POST /webhook/fchat" }))
}
