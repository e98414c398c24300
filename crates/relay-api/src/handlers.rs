//! Route handler functions for all API endpoints.
//!
//! Each handler extracts query/path parameters via axum extractors,
//! interacts with AppState services, and returns JSON responses. The chat
//! page handlers return rendered HTML instead.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::{Form, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use relay_chat::{ExchangeRequest, StoredTranscript};
use relay_core::types::{format_timestamp, new_id, parse_timestamp, Speaker};

use crate::error::ApiError;
use crate::page::{render_page, Notice, PageView};
use crate::state::AppState;

// =============================================================================
// Request types
// =============================================================================

/// Body for POST /users.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    #[serde(alias = "user_id")]
    pub id: String,
    #[serde(alias = "pw")]
    pub secret: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionsParams {
    #[serde(alias = "valid_key")]
    pub key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationParams {
    #[serde(alias = "user_id")]
    pub owner_id: String,
}

/// Body for POST and PUT /messages.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    #[serde(default, alias = "system_msg")]
    pub system_prompt: Option<String>,
    #[serde(alias = "user_msg")]
    pub user_text: String,
    #[serde(alias = "conv_id")]
    pub conversation_id: String,
    /// When the user sent the message (ISO-8601).
    pub timestamp: String,
    /// Accepted for compatibility; never stored.
    #[serde(default, alias = "user_ip")]
    pub user_ip: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub session: Option<String>,
}

/// Form posted by the chat page.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatForm {
    #[serde(default, alias = "system_msg")]
    pub system_prompt: String,
    #[serde(alias = "user_msg")]
    pub user_text: String,
    #[serde(default)]
    pub session: Option<String>,
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub conversations: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    fn success() -> Self {
        Self {
            status: "success".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub speaker: Speaker,
    pub content: String,
    pub timestamp: String,
    pub message_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub reply_text: String,
    pub conversation_id: String,
    pub timestamp: String,
    pub message_id: String,
    pub input_token_count: u32,
}

// =============================================================================
// Health
// =============================================================================

/// GET /health - health check.
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let conversations = state.conversations().count()?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        conversations,
    }))
}

// =============================================================================
// Users
// =============================================================================

/// POST /users - register a user. `false` when the id is already taken.
pub async fn create_user(
    State(state): State<AppState>,
    Json(body): Json<CreateUserRequest>,
) -> Result<Json<bool>, ApiError> {
    let users = state.users();
    // Argon2 hashing is CPU-bound; keep it off the async workers.
    let created = tokio::task::spawn_blocking(move || users.create(&body.id, &body.secret))
        .await
        .map_err(|e| ApiError::Internal(format!("User registration task failed: {}", e)))??;

    Ok(Json(created))
}

/// DELETE /users/{user_id} - remove a user that owns no conversations.
pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.users().delete(&user_id)?;
    Ok(Json(StatusResponse::success()))
}

/// PATCH /users/{user_id}/permissions - acknowledge a permission key.
///
/// No permission state exists; the call only checks that the user exists.
pub async fn update_permissions(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(params): Query<PermissionsParams>,
) -> Result<Json<StatusResponse>, ApiError> {
    if !state.users().exists(&user_id)? {
        return Err(ApiError::NotFound(format!("user '{}'", user_id)));
    }
    debug!(user_id = %user_id, key_len = params.key.len(), "Permission update acknowledged");
    Ok(Json(StatusResponse::success()))
}

// =============================================================================
// Conversations
// =============================================================================

/// POST /conversations?ownerId= - create an empty conversation.
pub async fn create_conversation(
    State(state): State<AppState>,
    Query(params): Query<CreateConversationParams>,
) -> Result<Json<String>, ApiError> {
    let id = state.conversations().create(&params.owner_id)?;
    Ok(Json(id))
}

/// GET /conversations/{user_id} - list a user's conversations, newest first.
pub async fn list_conversations(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    if !state.users().exists(&user_id)? {
        return Err(ApiError::NotFound(format!("user '{}'", user_id)));
    }

    let summaries = state
        .conversations()
        .list_for_owner(&user_id)?
        .into_iter()
        .map(|c| ConversationSummary {
            conversation_id: c.id,
            created_at: format_timestamp(&c.created_at),
        })
        .collect();

    Ok(Json(summaries))
}

/// GET /conversations/{user_id}/{conversation_id} - ordered messages.
pub async fn get_conversation(
    State(state): State<AppState>,
    Path((user_id, conversation_id)): Path<(String, String)>,
) -> Result<Json<Vec<MessageView>>, ApiError> {
    let owned = state
        .conversations()
        .find(&conversation_id)?
        .filter(|c| c.user_id == user_id)
        .ok_or_else(|| ApiError::NotFound(format!("conversation '{}'", conversation_id)))?;

    let messages = state
        .messages()
        .list(&owned.id)?
        .into_iter()
        .map(|m| MessageView {
            speaker: m.speaker,
            timestamp: format_timestamp(&m.timestamp),
            content: m.content,
            message_id: m.id,
        })
        .collect();

    Ok(Json(messages))
}

/// DELETE /conversations/{user_id}/{conversation_id} - delete with messages.
pub async fn delete_conversation(
    State(state): State<AppState>,
    Path((user_id, conversation_id)): Path<(String, String)>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.conversations().delete(&user_id, &conversation_id)?;
    Ok(Json(StatusResponse::success()))
}

// =============================================================================
// Messages
// =============================================================================

/// POST /messages (and PUT /messages) - exchange one turn with the model.
///
/// PUT is an alias: it appends a new exchange and never updates anything.
pub async fn post_message(
    State(state): State<AppState>,
    Json(body): Json<MessageRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let user_timestamp = parse_timestamp(&body.timestamp)?;

    let mut transcript =
        StoredTranscript::new(Arc::clone(&state.database), body.conversation_id.clone());
    let outcome = transcript
        .exchange(
            &state.exchange,
            ExchangeRequest {
                system_prompt: body.system_prompt,
                user_text: body.user_text,
                user_timestamp,
            },
        )
        .await?;

    info!(
        conversation_id = %body.conversation_id,
        message_id = %outcome.assistant_message_id,
        input_tokens = outcome.input_tokens,
        "Message exchanged"
    );

    Ok(Json(MessageResponse {
        reply_text: outcome.reply_text,
        conversation_id: body.conversation_id,
        timestamp: format_timestamp(&outcome.assistant_timestamp),
        message_id: outcome.assistant_message_id,
        input_token_count: outcome.input_tokens,
    }))
}

// =============================================================================
// Chat page
// =============================================================================

fn session_or_new(session: Option<String>) -> String {
    session
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(new_id)
}

/// GET /chat - render the page for a (possibly new) session.
pub async fn chat_page(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> (StatusCode, Html<String>) {
    let session_id = session_or_new(params.session);
    let system_prompt = state.config.model.default_system_prompt.clone();

    let (status, transcript, notice) = match state.page_sessions.transcript(&session_id).await {
        Ok(transcript) => (StatusCode::OK, transcript, None),
        Err(e) => {
            let err = ApiError::from(e);
            err.log();
            (err.status(), Vec::new(), Some(Notice::Error(err.message().to_string())))
        }
    };

    let html = render_page(&PageView {
        session_id: &session_id,
        system_prompt: &system_prompt,
        transcript: &transcript,
        notice,
    });
    (status, Html(html))
}

/// POST /chat - run an exchange against the session's in-memory history.
///
/// Failures are rendered inline with the matching status code.
pub async fn chat_submit(
    State(state): State<AppState>,
    Form(form): Form<ChatForm>,
) -> (StatusCode, Html<String>) {
    let session_id = session_or_new(form.session);
    let system_prompt = if form.system_prompt.trim().is_empty() {
        state.config.model.default_system_prompt.clone()
    } else {
        form.system_prompt
    };

    let request = ExchangeRequest {
        system_prompt: Some(system_prompt.clone()),
        user_text: form.user_text,
        user_timestamp: Utc::now(),
    };

    let (status, transcript, notice) = match state
        .page_sessions
        .exchange(&state.exchange, &session_id, request)
        .await
    {
        Ok(page) => {
            info!(session_id = %session_id, input_tokens = page.outcome.input_tokens, "Page exchange complete");
            (
                StatusCode::OK,
                page.transcript,
                Notice::InputTokens(page.outcome.input_tokens),
            )
        }
        Err(e) => {
            let err = ApiError::from(e);
            err.log();
            let transcript = state
                .page_sessions
                .transcript(&session_id)
                .await
                .unwrap_or_default();
            (err.status(), transcript, Notice::Error(err.message().to_string()))
        }
    };

    let html = render_page(&PageView {
        session_id: &session_id,
        system_prompt: &system_prompt,
        transcript: &transcript,
        notice: Some(notice),
    });
    (status, Html(html))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_request_accepts_legacy_names() {
        let body = r#"{
            "system_msg": "Be brief.",
            "user_msg": "hello",
            "conv_id": "c1",
            "timestamp": "2024-07-01T12:00:00",
            "user_ip": "10.0.0.1"
        }"#;
        let req: MessageRequest = serde_json::from_str(body).unwrap();
        assert_eq!(req.system_prompt.as_deref(), Some("Be brief."));
        assert_eq!(req.user_text, "hello");
        assert_eq!(req.conversation_id, "c1");
    }

    #[test]
    fn test_message_request_camel_case() {
        let body = r#"{"userText": "hi", "conversationId": "c2", "timestamp": "2024-07-01T12:00:00Z"}"#;
        let req: MessageRequest = serde_json::from_str(body).unwrap();
        assert!(req.system_prompt.is_none());
        assert!(req.user_ip.is_none());
        assert_eq!(req.conversation_id, "c2");
    }

    #[test]
    fn test_create_user_accepts_pw_alias() {
        let req: CreateUserRequest = serde_json::from_str(r#"{"id": "alice", "pw": "x"}"#).unwrap();
        assert_eq!(req.secret, "x");
    }

    #[test]
    fn test_message_response_is_camel_case() {
        let json = serde_json::to_value(MessageResponse {
            reply_text: "r".into(),
            conversation_id: "c".into(),
            timestamp: "t".into(),
            message_id: "m".into(),
            input_token_count: 5,
        })
        .unwrap();
        assert_eq!(json["replyText"], "r");
        assert_eq!(json["inputTokenCount"], 5);
    }

    #[test]
    fn test_session_or_new() {
        assert_eq!(session_or_new(Some("abc".into())), "abc");
        assert_eq!(session_or_new(Some("  ".into())).len(), 36);
        assert_eq!(session_or_new(None).len(), 36);
    }
}
