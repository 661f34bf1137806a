/// Database row types: these map directly to SQLite rows.
/// Distinct from leadhub-types models to keep the DB layer independent.
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use uuid::Uuid;

use leadhub_types::models::{Channel, ChatMessage, Conversation};

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub onboarding_complete: bool,
    pub created_at: String,
}

pub struct ChannelRow {
    pub id: String,
    pub owner_id: String,
    pub channel_type: String,
    pub address: Option<String>,
    pub status: String,
    pub attempt_id: Option<String>,
    pub transient_credential: Option<String>,
    pub completion_due_at: Option<String>,
    pub error_reason: Option<String>,
    pub last_connected_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub struct ConversationRow {
    pub id: String,
    pub owner_id: String,
    pub channel_id: String,
    pub contact_id: String,
    pub contact_name: String,
    pub contact_avatar: Option<String>,
    pub last_message: Option<String>,
    pub last_message_at: Option<String>,
    pub unread_count: i64,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub external_id: Option<String>,
    pub sender: String,
    pub content: String,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
    pub status: String,
    pub created_at: String,
}

/// A connecting row whose completion deadline has passed.
#[derive(Debug, Clone)]
pub struct DueCompletion {
    pub id: String,
    pub owner_id: String,
    pub channel_type: String,
    pub attempt_id: String,
    pub due_at: String,
}

/// Encode a timestamp so that lexical order equals chronological order.
pub fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp. SQLite defaults produce "YYYY-MM-DD HH:MM:SS"
/// without a timezone, which is read as UTC.
pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc()))
        .map_err(|e| anyhow!("Corrupt timestamp '{}': {}", raw, e))
}

fn parse_uuid(raw: &str, column: &str) -> Result<Uuid> {
    raw.parse().with_context(|| format!("Corrupt {} '{}'", column, raw))
}

fn parse_opt_ts(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    raw.map(parse_ts).transpose()
}

impl ChannelRow {
    pub fn into_channel(self) -> Result<Channel> {
        Ok(Channel {
            id: parse_uuid(&self.id, "channel id")?,
            owner_id: parse_uuid(&self.owner_id, "owner_id")?,
            channel_type: self.channel_type.parse()?,
            address: self.address,
            status: self.status.parse()?,
            transient_credential: self.transient_credential,
            error_reason: self.error_reason,
            last_connected_at: parse_opt_ts(self.last_connected_at.as_deref())?,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

impl ConversationRow {
    pub fn into_conversation(self) -> Result<Conversation> {
        Ok(Conversation {
            id: parse_uuid(&self.id, "conversation id")?,
            owner_id: parse_uuid(&self.owner_id, "owner_id")?,
            channel_id: parse_uuid(&self.channel_id, "channel_id")?,
            contact_id: self.contact_id,
            contact_name: self.contact_name,
            contact_avatar: self.contact_avatar,
            last_message: self.last_message,
            last_message_at: parse_opt_ts(self.last_message_at.as_deref())?,
            unread_count: u32::try_from(self.unread_count).unwrap_or(0),
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

impl MessageRow {
    pub fn into_message(self) -> Result<ChatMessage> {
        Ok(ChatMessage {
            id: parse_uuid(&self.id, "message id")?,
            conversation_id: parse_uuid(&self.conversation_id, "conversation_id")?,
            external_id: self.external_id,
            sender: self.sender.parse()?,
            content: self.content,
            media_url: self.media_url,
            media_type: self.media_type,
            status: self.status.parse()?,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}
