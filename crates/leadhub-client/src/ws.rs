use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use leadhub_types::events::GatewayEvent;

use crate::error::ClientError;
use crate::subscriber::{ChangeFeed, EventStream};

/// The server's `/gateway` WebSocket as a change feed.
#[derive(Debug, Clone)]
pub struct GatewayFeed {
    url: String,
}

impl GatewayFeed {
    /// `url` must carry the token, e.g. `ws://host/gateway?token=...`.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl ChangeFeed for GatewayFeed {
    async fn open(&self) -> Result<EventStream, ClientError> {
        let (socket, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| ClientError::Feed(e.to_string()))?;

        let events = socket.filter_map(|msg| async move {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<GatewayEvent>(&text) {
                    Ok(event) => Some(Ok(event)),
                    Err(e) => {
                        warn!("Ignoring unreadable gateway frame: {}", e);
                        None
                    }
                },
                Ok(Message::Close(frame)) => {
                    debug!("Gateway closed: {:?}", frame);
                    Some(Err(ClientError::Feed("closed by server".into())))
                }
                // Pings are answered by tungstenite itself.
                Ok(_) => None,
                Err(e) => Some(Err(ClientError::Feed(e.to_string()))),
            }
        });

        Ok(Box::pin(events))
    }
}
