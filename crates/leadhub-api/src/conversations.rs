use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use leadhub_db::conversations::OutboundRecord;
use leadhub_db::models::encode_ts;
use leadhub_types::api::{Claims, SendMessageRequest};
use leadhub_types::events::GatewayEvent;
use leadhub_types::models::{ChatMessage, Conversation};

use crate::auth::AppState;
use crate::error::{ApiError, blocking};

const MAX_PAGE: u32 = 200;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor: `created_at` of the oldest message on the previous page.
    pub before: Option<DateTime<Utc>>,
}

fn default_limit() -> u32 {
    50
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let owner = claims.sub.to_string();
    let rows = blocking(move || db.list_conversations(&owner)).await?;

    let conversations = rows
        .into_iter()
        .map(|row| row.into_conversation())
        .collect::<anyhow::Result<Vec<Conversation>>>()?;
    Ok(Json(conversations))
}

/// Newest first, at most 200 per page.
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let owner = claims.sub.to_string();
    let cid = conversation_id.to_string();
    let limit = query.limit.clamp(1, MAX_PAGE);
    let before = query.before.as_ref().map(encode_ts);

    let rows = blocking(move || {
        if db.get_conversation(&owner, &cid)?.is_none() {
            return Ok(None);
        }
        db.get_messages(&cid, limit, before.as_deref()).map(Some)
    })
    .await?
    .ok_or(ApiError::NotFound)?;

    let messages = rows
        .into_iter()
        .map(|row| row.into_message())
        .collect::<anyhow::Result<Vec<ChatMessage>>>()?;
    Ok(Json(messages))
}

/// Store an outbound message. Delivery to the provider is simulated: the
/// message goes straight from `sending` to `sent`.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = req.content.trim().to_string();
    if content.is_empty() && req.media_url.is_none() {
        return Err(ApiError::invalid("message needs content or a media_url"));
    }

    let db = state.db.clone();
    let owner = claims.sub.to_string();
    let cid = conversation_id.to_string();
    let message_id = Uuid::new_v4();
    let mid = message_id.to_string();
    let now = encode_ts(&Utc::now());
    let preview = if content.is_empty() { "[media]".to_string() } else { content.clone() };

    let row = blocking(move || {
        db.record_outbound(&OutboundRecord {
            owner_id: &owner,
            conversation_id: &cid,
            message_id: &mid,
            content: &content,
            media_url: req.media_url.as_deref(),
            media_type: req.media_type.as_deref(),
            preview: &preview,
            now: &now,
        })
    })
    .await?
    .ok_or(ApiError::NotFound)?;

    let message = row.into_message()?;
    info!("Message {} sent in conversation {}", message_id, conversation_id);

    state.dispatcher.publish(
        claims.sub,
        &GatewayEvent::MessageCreate {
            conversation_id,
            message_id,
        },
    );
    state
        .dispatcher
        .publish(claims.sub, &GatewayEvent::ConversationChanged { conversation_id });

    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let owner = claims.sub.to_string();
    let cid = conversation_id.to_string();
    if !blocking(move || db.mark_conversation_read(&owner, &cid)).await? {
        return Err(ApiError::NotFound);
    }

    state
        .dispatcher
        .publish(claims.sub, &GatewayEvent::ConversationChanged { conversation_id });
    Ok(StatusCode::NO_CONTENT)
}
