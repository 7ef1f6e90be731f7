use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::middleware::guards::User;
use crate::models::conversation::ConversationSummary;
use crate::models::message::MessageView;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    pub peer_user_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationResponse {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Idempotent: repeat calls for the same pair, in either order, return the
/// same conversation.
pub async fn create_or_get(
    State(state): State<AppState>,
    user: User,
    Json(req): Json<CreateConversationRequest>,
) -> AppResult<(StatusCode, Json<ConversationResponse>)> {
    let conversation = state
        .conversations
        .get_or_create(user.id, req.peer_user_id)
        .await?;
    Ok((
        StatusCode::OK,
        Json(ConversationResponse {
            id: conversation.id,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
        }),
    ))
}

pub async fn list(
    State(state): State<AppState>,
    user: User,
) -> AppResult<Json<Vec<ConversationSummary>>> {
    let summaries = state.conversations.list_for_user(user.id).await?;
    Ok(Json(summaries))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Cursor: only messages with a strictly smaller id are returned.
    pub before: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDetail {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Newest first.
    pub messages: Vec<MessageView>,
}

pub async fn get_detail(
    State(state): State<AppState>,
    user: User,
    Path(conversation_id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<ConversationDetail>> {
    let conversation = state.conversations.get(conversation_id, user.id).await?;
    let messages = state
        .pipeline
        .list(conversation_id, user.id, query.before, query.limit)
        .await?;
    Ok(Json(ConversationDetail {
        id: conversation.id,
        created_at: conversation.created_at,
        updated_at: conversation.updated_at,
        messages,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub body: String,
}

pub async fn send_message(
    State(state): State<AppState>,
    user: User,
    Path(conversation_id): Path<i64>,
    Json(req): Json<SendMessageRequest>,
) -> AppResult<(StatusCode, Json<MessageView>)> {
    let view = state
        .pipeline
        .send(conversation_id, user.id, &req.body)
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub last_message_id: i64,
}

pub async fn mark_read(
    State(state): State<AppState>,
    user: User,
    Path(conversation_id): Path<i64>,
    Json(req): Json<MarkReadRequest>,
) -> AppResult<StatusCode> {
    state
        .pipeline
        .mark_read(conversation_id, user.id, req.last_message_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
