use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChannelStatus, ChannelType};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the gateway upgrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

// -- Session --

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionResponse {
    pub user_id: Uuid,
    pub username: String,
    pub onboarding_complete: bool,
}

// -- Channels --

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectWhatsappRequest {
    pub phone: String,
}

/// Instagram connections only carry the handle. Passwords are refused at
/// the parsing layer and never reach storage.
#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectInstagramRequest {
    pub username: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectResponse {
    pub channel_id: Uuid,
    pub channel_type: ChannelType,
    pub status: ChannelStatus,
    pub transient_credential: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DisconnectResponse {
    pub channel_id: Uuid,
    pub status: ChannelStatus,
    /// False when the channel was already disconnected.
    pub changed: bool,
}

// -- Webhooks --

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsappWebhookPayload {
    pub channel_id: Uuid,
    pub message: Option<InboundMessage>,
    pub message_id: Option<String>,
    pub contact_name: Option<String>,
    pub contact_avatar: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct InboundMessage {
    pub from: String,
    pub body: String,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WebhookAck {
    pub success: bool,
    pub conversation_id: Option<Uuid>,
}

// -- Messages --

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub content: String,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
}

// -- Errors --

#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}
