use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use leadhub_types::events::GatewayEvent;

/// A pre-serialised event tagged with the owner allowed to see it.
#[derive(Debug, Clone)]
pub struct OwnerMessage {
    pub owner_id: Uuid,
    pub json: Arc<str>,
}

/// Fans store changes out to every open gateway connection.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Every connection receives every message and filters on `owner_id`.
    broadcast_tx: broadcast::Sender<OwnerMessage>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner { broadcast_tx }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OwnerMessage> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Publish an event to the connections of `owner_id`. Serialised once
    /// here rather than once per connection.
    pub fn publish(&self, owner_id: Uuid, event: &GatewayEvent) {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialise gateway event: {}", e);
                return;
            }
        };

        // No receivers is fine: nobody has the panel open.
        let _ = self.inner.broadcast_tx.send(OwnerMessage {
            owner_id,
            json: json.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadhub_types::events::ChangeKind;
    use leadhub_types::models::ChannelType;

    #[tokio::test]
    async fn publish_tags_owner() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();
        let owner = Uuid::new_v4();

        dispatcher.publish(
            owner,
            &GatewayEvent::ChannelChanged {
                change: ChangeKind::Delete,
                channel_id: Uuid::nil(),
                channel_type: ChannelType::Instagram,
                status: None,
            },
        );

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.owner_id, owner);
        let event: GatewayEvent = serde_json::from_str(&msg.json).unwrap();
        assert!(event.touches_channels());
    }
}
