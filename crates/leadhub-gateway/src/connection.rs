use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use leadhub_types::events::GatewayEvent;

use crate::dispatcher::{Dispatcher, OwnerMessage};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a WebSocket connection whose JWT was already validated at the
/// HTTP upgrade. Sends `Ready`, then relays the owner's events until either
/// side goes away.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, user_id: Uuid, username: String) {
    let (mut sender, receiver) = socket.split();

    // Subscribe before Ready so nothing published after the client's first
    // reload can slip through.
    let broadcast_rx = dispatcher.subscribe();

    let ready = GatewayEvent::Ready {
        user_id,
        username: username.clone(),
    };
    if !send_event(&mut sender, &ready).await {
        return;
    }

    info!("{} ({}) connected to gateway", username, user_id);

    run_connection_loop(sender, receiver, broadcast_rx, user_id).await;

    info!("{} ({}) disconnected from gateway", username, user_id);
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut broadcast_rx: broadcast::Receiver<OwnerMessage>,
    user_id: Uuid,
) {
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received;

    // Forward this owner's events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                frame = next_frame(&mut broadcast_rx, user_id) => {
                    let Some(text) = frame else { break };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout for {} (missed {} pongs), dropping connection", user_id, missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // The feed is push-only; the client only talks back with control frames.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Pong(_) => pong_flag_recv.store(true, Ordering::Release),
                Message::Close(_) => break,
                Message::Text(text) => {
                    debug!("Ignoring client text frame from {} ({} bytes)", user_id, text.len());
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

/// The next text frame for `user_id`: one of their own events, or a
/// `Resync` once the receiver has fallen behind. `None` when the dispatcher
/// is gone. Other owners' events are skipped.
async fn next_frame(broadcast_rx: &mut broadcast::Receiver<OwnerMessage>, user_id: Uuid) -> Option<String> {
    loop {
        match broadcast_rx.recv().await {
            Ok(msg) if msg.owner_id == user_id => return Some(msg.json.to_string()),
            Ok(_) => {}
            Err(RecvError::Lagged(n)) => {
                warn!("Gateway receiver for {} lagged by {} messages", user_id, n);
                match serde_json::to_string(&GatewayEvent::Resync { skipped: n }) {
                    Ok(text) => return Some(text),
                    Err(e) => warn!("Failed to serialise gateway event: {}", e),
                }
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

/// Returns false once the socket is gone.
async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &GatewayEvent) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to serialise gateway event: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadhub_types::events::ChangeKind;
    use leadhub_types::models::{ChannelStatus, ChannelType};

    fn changed(channel_id: Uuid) -> GatewayEvent {
        GatewayEvent::ChannelChanged {
            change: ChangeKind::Update,
            channel_id,
            channel_type: ChannelType::Whatsapp,
            status: Some(ChannelStatus::Connected),
        }
    }

    fn parse(frame: Option<String>) -> GatewayEvent {
        serde_json::from_str(&frame.expect("feed closed")).unwrap()
    }

    #[tokio::test]
    async fn other_owners_events_are_never_relayed() {
        let dispatcher = Dispatcher::new();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let mut bob_rx = dispatcher.subscribe();

        let alice_channel = Uuid::new_v4();
        let bob_channel = Uuid::new_v4();
        dispatcher.publish(alice, &changed(alice_channel));
        dispatcher.publish(bob, &changed(bob_channel));

        match parse(next_frame(&mut bob_rx, bob).await) {
            GatewayEvent::ChannelChanged { channel_id, .. } => assert_eq!(channel_id, bob_channel),
            other => panic!("unexpected event {:?}", other),
        }

        // Only Alice's traffic left: Bob's feed stays silent.
        dispatcher.publish(alice, &changed(alice_channel));
        let pending = tokio::time::timeout(Duration::from_millis(50), next_frame(&mut bob_rx, bob)).await;
        assert!(pending.is_err(), "received another owner's event");
    }

    #[tokio::test]
    async fn lagging_receiver_gets_resync() {
        let (tx, mut rx) = broadcast::channel(2);
        let owner = Uuid::new_v4();
        for _ in 0..5 {
            tx.send(OwnerMessage {
                owner_id: owner,
                json: serde_json::to_string(&changed(Uuid::new_v4())).unwrap().into(),
            })
            .unwrap();
        }

        assert!(matches!(parse(next_frame(&mut rx, owner).await), GatewayEvent::Resync { skipped: 3 }));
        assert!(matches!(
            parse(next_frame(&mut rx, owner).await),
            GatewayEvent::ChannelChanged { .. }
        ));
    }

    #[tokio::test]
    async fn closed_dispatcher_ends_the_feed() {
        let (tx, mut rx) = broadcast::channel::<OwnerMessage>(4);
        drop(tx);
        assert!(next_frame(&mut rx, Uuid::new_v4()).await.is_none());
    }
}
