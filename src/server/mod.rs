//! Webhook server: the FChat and FPT bot adapters in front of Coze.

pub(crate) mod fchat;
pub(crate) mod fpt;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::info;

use crate::cache::ConversationCache;
use crate::config::Config;
use crate::coze::{ChatBackend, ChatResult, CozeClient};
use fchat::{FChatClient, ReplySender};

const SERVICE_NAME: &str = "coze-relay";
const CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(600);

/// Shared state handed to every handler.
#[derive(Clone)]
pub(crate) struct AppState {
    pub backend: Arc<dyn ChatBackend>,
    pub replies: Arc<dyn ReplySender>,
    pub cache: ConversationCache,
    pub conversation_ttl: Duration,
    pub webhook_secret: Option<String>,
}

impl AppState {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            backend: Arc::new(CozeClient::new(&config.coze)?),
            replies: Arc::new(FChatClient::new(&config.fchat)?),
            cache: ConversationCache::new(),
            conversation_ttl: Duration::from_secs(config.conversation_ttl_secs),
            webhook_secret: config.fpt.webhook_secret.clone(),
        })
    }

    /// Ask the backend, folding a hard failure into a debug-tagged result so
    /// the adapters can always answer their platform.
    async fn ask(&self, user_id: &str, text: &str, conversation_id: &str) -> ChatResult {
        match self.backend.ask(user_id, text, conversation_id).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "coze call failed");
                ChatResult::unanswered(conversation_id, format!("{e:#}"))
            }
        }
    }
}

/// Rejections produced by the webhook handlers.
#[derive(Debug, thiserror::Error)]
pub(crate) enum WebhookError {
    #[error("Missing fpt.webhook_secret config")]
    MissingSecret,
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match self {
            WebhookError::MissingSecret => StatusCode::INTERNAL_SERVER_ERROR,
            WebhookError::Unauthorized => StatusCode::UNAUTHORIZED,
            WebhookError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };
        let body = Json(json!({
            "title": self.to_string(),
            "status": status.as_u16(),
        }));
        (status, body).into_response()
    }
}

/// The reply text for a chat result: the answer itself, or a fallback that
/// carries the debug info when there is any.
pub(crate) fn answer_or_fallback(result: &ChatResult, no_answer: &str, debug_prefix: &str) -> String {
    if !result.answer.trim().is_empty() {
        result.answer.clone()
    } else if result.debug_info.trim().is_empty() {
        no_answer.to_string()
    } else {
        format!("{debug_prefix}{}", result.debug_info)
    }
}

pub(crate) fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route(
            "/webhook/fchat",
            get(fchat::fchat_hint).post(fchat::fchat_webhook),
        )
        .route("/webhook/fpt", axum::routing::post(fpt::fpt_webhook))
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({ "ok": true, "service": SERVICE_NAME }))
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

/// Periodically drop expired conversation ids.
fn spawn_cache_purge(cache: ConversationCache) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CACHE_PURGE_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            let removed = cache.purge_expired();
            if removed > 0 {
                tracing::debug!(removed, remaining = cache.len(), "purged expired conversation ids");
            }
        }
    })
}

/// Run the webhook server until Ctrl+C.
pub(crate) async fn serve(config: &Config) -> Result<()> {
    let state = AppState::from_config(config)?;
    if config.coze.pat.is_none() || config.coze.bot_id.is_none() {
        tracing::warn!("coze.pat / coze.bot_id not configured; chats will return debug replies");
    }
    if config.fpt.webhook_secret.is_none() {
        tracing::warn!("fpt.webhook_secret not configured; /webhook/fpt will reject requests");
    }

    let purge = spawn_cache_purge(state.cache.clone());
    let router = build_router(state);

    let bind_addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    info!("coze-relay listening on {}", bind_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("webhook server failed")?;

    purge.abort();
    info!("coze-relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
