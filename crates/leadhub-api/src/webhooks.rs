use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use leadhub_db::conversations::InboundRecord;
use leadhub_db::models::encode_ts;
use leadhub_types::api::{WebhookAck, WhatsappWebhookPayload};
use leadhub_types::events::GatewayEvent;
use leadhub_types::models::{ChannelStatus, ChannelType};

use crate::auth::AppState;
use crate::error::{ApiError, blocking};

pub const SECRET_HEADER: &str = "x-webhook-secret";
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

type HmacSha256 = Hmac<Sha256>;

/// Accepts either the shared secret verbatim in `X-Webhook-Secret`, or
/// `X-Webhook-Signature: sha256=<hex>` over the raw body.
pub fn verify_delivery(secret: &str, headers: &HeaderMap, body: &[u8]) -> bool {
    if let Some(signature) = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("sha256="))
    {
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(body);
        return mac.verify_slice(&expected).is_ok();
    }

    match headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok()) {
        // Compare digests so timing does not depend on the secret's bytes.
        Some(given) => Sha256::digest(given.as_bytes()) == Sha256::digest(secret.as_bytes()),
        None => false,
    }
}

/// Inbound WhatsApp message for a connected channel.
pub async fn whatsapp_inbound(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(secret) = &state.webhook_secret {
        if !verify_delivery(secret, &headers, &body) {
            warn!("Rejected webhook delivery with bad credentials");
            return Err(ApiError::Unauthenticated);
        }
    }

    let payload: WhatsappWebhookPayload =
        serde_json::from_slice(&body).map_err(|e| ApiError::invalid(format!("bad payload: {}", e)))?;

    let Some(message) = payload.message else {
        debug!("Webhook for channel {} carried no message", payload.channel_id);
        return Ok(Json(WebhookAck {
            success: true,
            conversation_id: None,
        }));
    };
    let contact = message.from.trim().to_string();
    if contact.is_empty() {
        return Err(ApiError::invalid("message.from is required"));
    }

    let db = state.db.clone();
    let cid = payload.channel_id.to_string();
    let channel = blocking(move || db.get_channel_by_id(&cid))
        .await?
        .ok_or(ApiError::NotFound)?
        .into_channel()?;

    if channel.channel_type != ChannelType::Whatsapp {
        return Err(ApiError::invalid("channel is not a whatsapp channel"));
    }
    if channel.status != ChannelStatus::Connected {
        return Err(ApiError::Conflict {
            code: "channel_not_connected",
            message: format!("channel is {}", channel.status),
        });
    }

    let db = state.db.clone();
    let owner_id = channel.owner_id;
    let message_id = Uuid::new_v4();
    let (candidate, mid) = (Uuid::new_v4().to_string(), message_id.to_string());
    let (owner, cid) = (owner_id.to_string(), channel.id.to_string());
    let external_id = payload.message_id.unwrap_or_else(|| mid.clone());
    let contact_name = payload.contact_name.unwrap_or_else(|| contact.clone());
    let now = encode_ts(&Utc::now());

    let conversation_id = blocking(move || {
        db.record_inbound(&InboundRecord {
            candidate_conversation_id: &candidate,
            owner_id: &owner,
            channel_id: &cid,
            contact_id: &contact,
            contact_name: &contact_name,
            contact_avatar: payload.contact_avatar.as_deref(),
            message_id: &mid,
            external_id: &external_id,
            body: &message.body,
            media_url: message.media_url.as_deref(),
            media_type: message.media_type.as_deref(),
            now: &now,
        })
    })
    .await?;

    let conversation_id: Uuid = conversation_id
        .parse()
        .map_err(|e| anyhow::anyhow!("bad conversation id '{}': {}", conversation_id, e))?;
    info!("Inbound message {} on channel {} -> conversation {}", message_id, channel.id, conversation_id);

    state
        .dispatcher
        .publish(owner_id, &GatewayEvent::ConversationChanged { conversation_id });
    state.dispatcher.publish(
        owner_id,
        &GatewayEvent::MessageCreate {
            conversation_id,
            message_id,
        },
    );

    Ok(Json(WebhookAck {
        success: true,
        conversation_id: Some(conversation_id),
    }))
}
