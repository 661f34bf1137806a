use crate::Database;
use crate::models::{ConversationRow, MessageRow};
use crate::queries::OptionalExt;
use anyhow::Result;
use leadhub_types::models::{DeliveryStatus, SenderType};
use rusqlite::Row;

const CONVERSATION_COLUMNS: &str = "id, owner_id, channel_id, contact_id, contact_name, contact_avatar, \
     last_message, last_message_at, unread_count, created_at";

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, external_id, sender, content, media_url, media_type, status, created_at";

/// An inbound message from a contact, as delivered by a provider webhook.
pub struct InboundRecord<'a> {
    pub candidate_conversation_id: &'a str,
    pub owner_id: &'a str,
    pub channel_id: &'a str,
    pub contact_id: &'a str,
    pub contact_name: &'a str,
    pub contact_avatar: Option<&'a str>,
    pub message_id: &'a str,
    pub external_id: &'a str,
    pub body: &'a str,
    pub media_url: Option<&'a str>,
    pub media_type: Option<&'a str>,
    pub now: &'a str,
}

/// A message written by the channel owner.
pub struct OutboundRecord<'a> {
    pub owner_id: &'a str,
    pub conversation_id: &'a str,
    pub message_id: &'a str,
    pub content: &'a str,
    pub media_url: Option<&'a str>,
    pub media_type: Option<&'a str>,
    /// Conversation preview text.
    pub preview: &'a str,
    pub now: &'a str,
}

impl Database {
    /// Record an inbound message: upsert the conversation for
    /// `(channel, contact)`, bump its unread counter and store the message,
    /// all in one transaction. Returns the conversation id.
    pub fn record_inbound(&self, record: &InboundRecord<'_>) -> Result<String> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let conversation_id: String = tx.query_row(
                "INSERT INTO conversations (id, owner_id, channel_id, contact_id, contact_name,
                                            contact_avatar, last_message, last_message_at,
                                            unread_count, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?8)
                 ON CONFLICT (channel_id, contact_id) DO UPDATE SET
                     last_message = excluded.last_message,
                     last_message_at = excluded.last_message_at,
                     contact_avatar = COALESCE(excluded.contact_avatar, conversations.contact_avatar),
                     unread_count = conversations.unread_count + 1
                 RETURNING id",
                rusqlite::params![
                    record.candidate_conversation_id,
                    record.owner_id,
                    record.channel_id,
                    record.contact_id,
                    record.contact_name,
                    record.contact_avatar,
                    record.body,
                    record.now,
                ],
                |row| row.get(0),
            )?;

            tx.execute(
                "INSERT INTO messages (id, conversation_id, external_id, sender, content,
                                       media_url, media_type, status, created_at)
                 VALUES (?1, ?2, ?3, 'contact', ?4, ?5, ?6, 'delivered', ?7)",
                rusqlite::params![
                    record.message_id,
                    conversation_id,
                    record.external_id,
                    record.body,
                    record.media_url,
                    record.media_type,
                    record.now,
                ],
            )?;

            tx.commit()?;
            Ok(conversation_id)
        })
    }

    /// Store an outbound message in one transaction: insert it as `sending`,
    /// mark it `sent` and update the conversation preview. Returns `None`,
    /// writing nothing, when the conversation does not belong to the owner.
    pub fn record_outbound(&self, record: &OutboundRecord<'_>) -> Result<Option<MessageRow>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let owned = tx
                .query_row(
                    "SELECT 1 FROM conversations WHERE id = ?1 AND owner_id = ?2",
                    [record.conversation_id, record.owner_id],
                    |_| Ok(()),
                )
                .optional()?;
            if owned.is_none() {
                return Ok(None);
            }

            tx.execute(
                "INSERT INTO messages (id, conversation_id, external_id, sender, content,
                                       media_url, media_type, status, created_at)
                 VALUES (?1, ?2, NULL, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    record.message_id,
                    record.conversation_id,
                    SenderType::User.as_str(),
                    record.content,
                    record.media_url,
                    record.media_type,
                    DeliveryStatus::Sending.as_str(),
                    record.now,
                ],
            )?;
            // No provider to hand off to: delivery succeeds immediately.
            tx.execute(
                "UPDATE messages SET status = ?1 WHERE id = ?2",
                [DeliveryStatus::Sent.as_str(), record.message_id],
            )?;
            tx.execute(
                "UPDATE conversations SET last_message = ?1, last_message_at = ?2 WHERE id = ?3",
                [record.preview, record.now, record.conversation_id],
            )?;

            let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
            let row = tx.query_row(&sql, [record.message_id], message_from_row)?;

            tx.commit()?;
            Ok(Some(row))
        })
    }

    pub fn get_conversation(&self, owner_id: &str, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM conversations WHERE id = ?1 AND owner_id = ?2",
                CONVERSATION_COLUMNS
            );
            conn.query_row(&sql, [id, owner_id], conversation_from_row).optional()
        })
    }

    /// Conversations for an owner, most recently active first.
    pub fn list_conversations(&self, owner_id: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM conversations
                 WHERE owner_id = ?1
                 ORDER BY COALESCE(last_message_at, created_at) DESC",
                CONVERSATION_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([owner_id], conversation_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Returns false when the conversation does not belong to `owner_id`.
    pub fn mark_conversation_read(&self, owner_id: &str, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE conversations SET unread_count = 0 WHERE id = ?1 AND owner_id = ?2",
                [id, owner_id],
            )?;
            Ok(updated == 1)
        })
    }

    /// Newest messages first. `before` is a cursor: the `created_at` of the
    /// oldest message from the previous page.
    pub fn get_messages(&self, conversation_id: &str, limit: u32, before: Option<&str>) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages
                 WHERE conversation_id = ?1 AND (?2 IS NULL OR created_at < ?2)
                 ORDER BY created_at DESC
                 LIMIT ?3",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![conversation_id, before, limit], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        channel_id: row.get(2)?,
        contact_id: row.get(3)?,
        contact_name: row.get(4)?,
        contact_avatar: row.get(5)?,
        last_message: row.get(6)?,
        last_message_at: row.get(7)?,
        unread_count: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        external_id: row.get(2)?,
        sender: row.get(3)?,
        content: row.get(4)?,
        media_url: row.get(5)?,
        media_type: row.get(6)?,
        status: row.get(7)?,
        created_at: row.get(8)?,
    })
}
