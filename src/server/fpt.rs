// FPT bot platform adapter.
//
// The platform calls us with a shared secret header and expects the reply in
// the response body. It keeps the Coze conversation id itself, as a user
// attribute we hand back in `set_attributes`.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};
use subtle::ConstantTimeEq;
use tracing::info;

use super::{answer_or_fallback, AppState, WebhookError};
use crate::coze::dispatch::preview;
use crate::json::first_non_blank;

const SECRET_HEADER: &str = "x-webhook-secret";

const SENDER_KEYS: [&str; 4] = ["sender_id", "senderId", "user_id", "userId"];
const TEXT_KEYS: [&str; 4] = ["sender_input", "text", "message", "query"];
const CONVERSATION_KEYS: [&str; 2] = ["coze_conversation_id", "conversation_id"];

const ANONYMOUS: &str = "anonymous";
const EMPTY_BODY: &str = "Body rỗng.";
const EMPTY_TEXT: &str = "Bạn vui lòng nhập nội dung câu hỏi.";
const NO_ANSWER: &str = "Mình chưa có câu trả lời phù hợp. Bạn thử hỏi lại theo cách khác nhé.";
const DEBUG_PREFIX: &str = "Coze không trả answer. Debug: ";

/// A single text message in the platform's reply format.
fn text_messages(text: &str) -> Value {
    json!([{ "type": "text", "content": { "text": text } }])
}

/// Check the shared secret header against the configured secret.
fn verify_secret(expected: Option<&str>, headers: &HeaderMap) -> Result<(), WebhookError> {
    let expected = expected
        .filter(|s| !s.trim().is_empty())
        .ok_or(WebhookError::MissingSecret)?;

    let provided = headers
        .get(SECRET_HEADER)
        .map(|v| v.as_bytes())
        .ok_or(WebhookError::Unauthorized)?;

    if bool::from(provided.ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        Err(WebhookError::Unauthorized)
    }
}

#[tracing::instrument(name = "fpt", skip_all, fields(request_id = %uuid::Uuid::new_v4()))]
pub(crate) async fn fpt_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, WebhookError> {
    info!("incoming fpt webhook");
    verify_secret(state.webhook_secret.as_deref(), &headers)?;

    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Json(json!({ "messages": text_messages(EMPTY_BODY) })));
    }

    let root: Value = serde_json::from_slice(&body)
        .map_err(|e| WebhookError::BadRequest(format!("invalid JSON: {e}")))?;
    if !root.is_object() {
        return Err(WebhookError::BadRequest("expected a JSON object".to_string()));
    }

    let sender_id = first_non_blank(&root, &SENDER_KEYS).unwrap_or(ANONYMOUS);
    let text = first_non_blank(&root, &TEXT_KEYS).unwrap_or("");
    let conversation_id = first_non_blank(&root, &CONVERSATION_KEYS).unwrap_or("");
    info!(
        sender_id,
        text = %preview(text, 120),
        conversation_id,
        "fpt message"
    );

    if text.is_empty() {
        return Ok(Json(json!({ "messages": text_messages(EMPTY_TEXT) })));
    }

    let result = state.ask(sender_id, text, conversation_id).await;
    let answer = answer_or_fallback(&result, NO_ANSWER, DEBUG_PREFIX);
    info!(
        answer = %preview(&answer, 120),
        conversation_id = %result.conversation_id,
        "fpt reply"
    );

    Ok(Json(json!({
        "set_attributes": { "coze_conversation_id": result.conversation_id },
        "messages": text_messages(&answer),
    })))
}

#[cfg(test)]
mod tests {
    use super::super::build_router;
    use super::super::test_support::*;
    use super::*;
    use axum::http::{HeaderName, HeaderValue};
    use axum_test::TestServer;
    use std::sync::Arc;

    fn server(backend: Arc<MockBackend>) -> TestServer {
        TestServer::new(build_router(state(backend, Arc::new(MockReplies::default())))).unwrap()
    }

    fn secret(value: &'static str) -> (HeaderName, HeaderValue) {
        (
            HeaderName::from_static(SECRET_HEADER),
            HeaderValue::from_static(value),
        )
    }

    #[tokio::test]
    async fn test_answer_with_attributes() {
        let backend = MockBackend::answering(result("Xin chào!", "conv-2", ""));
        let server = server(backend.clone());
        let (name, value) = secret("s3cret");

        let response = server
            .post("/webhook/fpt")
            .add_header(name, value)
            .json(&json!({
                "senderId": "fb-123",
                "sender_input": "hello",
                "conversation_id": "conv-1"
            }))
            .await;

        assert_eq!(response.status_code(), 200);
        assert_eq!(
            response.json::<Value>(),
            json!({
                "set_attributes": { "coze_conversation_id": "conv-2" },
                "messages": [{ "type": "text", "content": { "text": "Xin chào!" } }]
            })
        );
        assert_eq!(
            backend.calls.lock().unwrap()[0],
            (
                "fb-123".to_string(),
                "hello".to_string(),
                "conv-1".to_string()
            )
        );
    }

    #[tokio::test]
    async fn test_key_fallbacks_and_anonymous() {
        let backend = MockBackend::answering(result("ok", "", ""));
        let server = server(backend.clone());
        let (name, value) = secret("s3cret");

        server
            .post("/webhook/fpt")
            .add_header(name, value)
            .json(&json!({
                "sender_id": "",
                "text": "  ",
                "query": "what?",
                "coze_conversation_id": "c-9",
                "conversation_id": "ignored"
            }))
            .await;

        assert_eq!(
            backend.calls.lock().unwrap()[0],
            (
                "anonymous".to_string(),
                "what?".to_string(),
                "c-9".to_string()
            )
        );
    }

    #[tokio::test]
    async fn test_rejects_wrong_or_missing_secret() {
        let backend = MockBackend::answering(result("ok", "", ""));
        let server = server(backend.clone());

        let response = server
            .post("/webhook/fpt")
            .json(&json!({"text": "hi"}))
            .await;
        assert_eq!(response.status_code(), 401);

        let (name, value) = secret("wrong");
        let response = server
            .post("/webhook/fpt")
            .add_header(name, value)
            .json(&json!({"text": "hi"}))
            .await;
        assert_eq!(response.status_code(), 401);
        assert!(backend.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_secret_is_server_error() {
        let mut app_state = state(
            MockBackend::answering(result("ok", "", "")),
            Arc::new(MockReplies::default()),
        );
        app_state.webhook_secret = None;
        let server = TestServer::new(build_router(app_state)).unwrap();
        let (name, value) = secret("s3cret");

        let response = server
            .post("/webhook/fpt")
            .add_header(name, value)
            .json(&json!({"text": "hi"}))
            .await;
        assert_eq!(response.status_code(), 500);
        assert_eq!(
            response.json::<Value>()["title"],
            "Missing fpt.webhook_secret config"
        );
    }

    #[tokio::test]
    async fn test_empty_body_and_empty_text() {
        let backend = MockBackend::answering(result("ok", "", ""));
        let server = server(backend.clone());

        let (name, value) = secret("s3cret");
        let response = server.post("/webhook/fpt").add_header(name, value).text("").await;
        assert_eq!(
            response.json::<Value>(),
            json!({ "messages": [{ "type": "text", "content": { "text": "Body rỗng." } }] })
        );

        let (name, value) = secret("s3cret");
        let response = server
            .post("/webhook/fpt")
            .add_header(name, value)
            .json(&json!({"sender_id": "u"}))
            .await;
        assert_eq!(
            response.json::<Value>()["messages"][0]["content"]["text"],
            EMPTY_TEXT
        );
        assert!(response.json::<Value>().get("set_attributes").is_none());
        assert!(backend.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bad_json_is_bad_request() {
        let server = server(MockBackend::answering(result("ok", "", "")));
        let (name, value) = secret("s3cret");
        let response = server
            .post("/webhook/fpt")
            .add_header(name, value)
            .text("[1, 2")
            .await;
        assert_eq!(response.status_code(), 400);
    }

    #[tokio::test]
    async fn test_fallback_with_debug() {
        let backend = MockBackend::answering(result("", "conv-1", "error: {\"code\":5000}"));
        let server = server(backend);
        let (name, value) = secret("s3cret");

        let response = server
            .post("/webhook/fpt")
            .add_header(name, value)
            .json(&json!({"text": "hi", "conversation_id": "conv-1"}))
            .await;
        let body = response.json::<Value>();
        assert_eq!(body["set_attributes"]["coze_conversation_id"], "conv-1");
        assert_eq!(
            body["messages"][0]["content"]["text"],
            "Coze không trả answer. Debug: error: {\"code\":5000}"
        );
    }

    #[test]
    fn test_verify_secret() {
        let mut headers = HeaderMap::new();
        assert!(matches!(
            verify_secret(None, &headers),
            Err(WebhookError::MissingSecret)
        ));
        assert!(matches!(
            verify_secret(Some("abc"), &headers),
            Err(WebhookError::Unauthorized)
        ));
        headers.insert(SECRET_HEADER, HeaderValue::from_static("abcd"));
        assert!(matches!(
            verify_secret(Some("abc"), &headers),
            Err(WebhookError::Unauthorized)
        ));
        headers.insert(SECRET_HEADER, HeaderValue::from_static("abc"));
        assert!(verify_secret(Some("abc"), &headers).is_ok());
    }
}
