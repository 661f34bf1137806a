use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChannelStatus, ChannelType};

/// Row-level change kind, mirroring insert/update/delete on the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Events sent over the WebSocket gateway.
///
/// Every event except `Ready` is scoped to the owner of the affected rows;
/// the gateway never delivers one owner's events to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, username: String },

    /// A channel row was inserted, updated or deleted
    ChannelChanged {
        change: ChangeKind,
        channel_id: Uuid,
        channel_type: ChannelType,
        status: Option<ChannelStatus>,
    },

    /// A conversation preview or unread counter changed
    ConversationChanged { conversation_id: Uuid },

    /// A message was stored in a conversation
    MessageCreate {
        conversation_id: Uuid,
        message_id: Uuid,
    },

    /// The connection fell behind and events were dropped; reload everything
    Resync { skipped: u64 },
}

impl GatewayEvent {
    /// Events that should make a channel list view reload.
    pub fn touches_channels(&self) -> bool {
        matches!(self, Self::ChannelChanged { .. } | Self::Resync { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_changed_wire_shape() {
        let id = Uuid::nil();
        let event = GatewayEvent::ChannelChanged {
            change: ChangeKind::Update,
            channel_id: id,
            channel_type: ChannelType::Whatsapp,
            status: Some(ChannelStatus::Connected),
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "ChannelChanged");
        assert_eq!(value["data"]["change"], "update");
        assert_eq!(value["data"]["status"], "connected");
        assert!(event.touches_channels());
    }
}
