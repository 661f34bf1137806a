use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures_util::stream;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use leadhub_client::subscriber::EventStream;
use leadhub_client::{
    ChangeFeed, ChannelSource, ClientError, RealtimeSubscriber, SubscriberConfig, SubscriberState,
};
use leadhub_types::events::{ChangeKind, GatewayEvent};
use leadhub_types::models::{Channel, ChannelStatus, ChannelType};

type EventTx = mpsc::UnboundedSender<Result<GatewayEvent, ClientError>>;

#[derive(Clone, Default)]
struct FakeSource {
    channels: Arc<Mutex<Vec<Channel>>>,
    loads: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

impl FakeSource {
    fn set(&self, channels: Vec<Channel>) {
        *self.channels.lock().unwrap() = channels;
    }

    fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ChannelSource for FakeSource {
    async fn list_channels(&self, channel_type: Option<ChannelType>) -> Result<Vec<Channel>, ClientError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ClientError::Feed("store unavailable".into()));
        }
        let channels = self.channels.lock().unwrap().clone();
        Ok(channels
            .into_iter()
            .filter(|c| channel_type.is_none_or(|t| t == c.channel_type))
            .collect())
    }
}

/// Each `open` hands out the next queued stream; once the queue is empty,
/// opening fails.
#[derive(Clone, Default)]
struct FakeFeed {
    queue: Arc<Mutex<VecDeque<mpsc::UnboundedReceiver<Result<GatewayEvent, ClientError>>>>>,
    opens: Arc<AtomicUsize>,
}

impl FakeFeed {
    fn push_stream(&self) -> EventTx {
        let (tx, rx) = mpsc::unbounded_channel();
        self.queue.lock().unwrap().push_back(rx);
        tx
    }
}

impl ChangeFeed for FakeFeed {
    async fn open(&self) -> Result<EventStream, ClientError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let rx = self
            .queue
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ClientError::Feed("refused".into()))?;
        let events = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|ev| (ev, rx)) });
        Ok(Box::pin(events))
    }
}

fn fast_config() -> SubscriberConfig {
    SubscriberConfig {
        debounce: Duration::from_millis(50),
        min_backoff: Duration::from_millis(20),
        max_backoff: Duration::from_millis(80),
    }
}

fn channel(channel_type: ChannelType, status: ChannelStatus) -> Channel {
    let now = Utc::now();
    Channel {
        id: Uuid::new_v4(),
        owner_id: Uuid::new_v4(),
        channel_type,
        address: Some("+5511999999999".into()),
        status,
        transient_credential: None,
        error_reason: None,
        last_connected_at: None,
        created_at: now,
        updated_at: now,
    }
}

fn changed(channel: &Channel) -> GatewayEvent {
    GatewayEvent::ChannelChanged {
        change: ChangeKind::Update,
        channel_id: channel.id,
        channel_type: channel.channel_type,
        status: Some(channel.status),
    }
}

async fn wait_until(
    rx: &mut watch::Receiver<SubscriberState>,
    what: &str,
    f: impl FnMut(&SubscriberState) -> bool,
) -> SubscriberState {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(f))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", what))
        .expect("subscriber stopped")
        .clone()
}

#[tokio::test]
async fn initial_load_then_live_reload() {
    let source = FakeSource::default();
    let feed = FakeFeed::default();
    let events = feed.push_stream();
    let wa = channel(ChannelType::Whatsapp, ChannelStatus::Connecting);
    source.set(vec![wa.clone()]);

    let sub = RealtimeSubscriber::spawn(source.clone(), feed, None, fast_config());
    let mut rx = sub.watch();
    let state = wait_until(&mut rx, "feed open", |s| s.connected && s.generation >= 2).await;
    assert_eq!(state.channels[0].status, ChannelStatus::Connecting);

    let mut done = wa.clone();
    done.status = ChannelStatus::Connected;
    source.set(vec![done.clone()]);
    events.send(Ok(changed(&done))).unwrap();

    let state = wait_until(&mut rx, "reload", |s| {
        s.channels.first().is_some_and(|c| c.status == ChannelStatus::Connected)
    })
    .await;
    assert!(state.last_error.is_none());
}

#[tokio::test]
async fn bursts_are_debounced_into_one_reload() {
    let source = FakeSource::default();
    let feed = FakeFeed::default();
    let events = feed.push_stream();
    let wa = channel(ChannelType::Whatsapp, ChannelStatus::Connected);
    source.set(vec![wa.clone()]);

    let sub = RealtimeSubscriber::spawn(source.clone(), feed, None, fast_config());
    let mut rx = sub.watch();
    let ready = wait_until(&mut rx, "feed open", |s| s.connected && s.generation >= 2).await;
    let before = source.loads();

    for _ in 0..5 {
        events.send(Ok(changed(&wa))).unwrap();
    }
    let after = wait_until(&mut rx, "debounced reload", |s| s.generation > ready.generation).await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(after.generation, ready.generation + 1);
    assert_eq!(source.loads(), before + 1);
}

#[tokio::test]
async fn events_for_other_types_are_ignored() {
    let source = FakeSource::default();
    let feed = FakeFeed::default();
    let events = feed.push_stream();
    source.set(vec![channel(ChannelType::Whatsapp, ChannelStatus::Connected)]);

    let sub = RealtimeSubscriber::spawn(source.clone(), feed, Some(ChannelType::Whatsapp), fast_config());
    let mut rx = sub.watch();
    wait_until(&mut rx, "feed open", |s| s.connected && s.generation >= 2).await;
    let before = source.loads();

    let ig = channel(ChannelType::Instagram, ChannelStatus::Connecting);
    events.send(Ok(changed(&ig))).unwrap();
    events
        .send(Ok(GatewayEvent::ConversationChanged { conversation_id: Uuid::new_v4() }))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(source.loads(), before);

    // A resync always reloads.
    events.send(Ok(GatewayEvent::Resync { skipped: 3 })).unwrap();
    wait_until(&mut rx, "resync reload", |_| source.loads() > before).await;
}

#[tokio::test]
async fn lost_feed_is_resubscribed_and_reloaded() {
    let source = FakeSource::default();
    let feed = FakeFeed::default();
    let first = feed.push_stream();
    let _second = feed.push_stream();
    let wa = channel(ChannelType::Whatsapp, ChannelStatus::Connecting);
    source.set(vec![wa.clone()]);

    let sub = RealtimeSubscriber::spawn(source.clone(), feed.clone(), None, fast_config());
    let mut rx = sub.watch();
    let ready = wait_until(&mut rx, "feed open", |s| s.connected && s.generation >= 2).await;

    // A change lands while the feed is down.
    let mut done = wa.clone();
    done.status = ChannelStatus::Connected;
    source.set(vec![done]);
    drop(first);

    let state = wait_until(&mut rx, "reconnect reload", |s| {
        s.connected && s.channels[0].status == ChannelStatus::Connected
    })
    .await;
    assert!(state.generation > ready.generation);
    assert_eq!(feed.opens.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn reload_failure_is_surfaced_then_cleared() {
    let source = FakeSource::default();
    let feed = FakeFeed::default();
    let events = feed.push_stream();
    let wa = channel(ChannelType::Whatsapp, ChannelStatus::Connected);
    source.set(vec![wa.clone()]);

    let sub = RealtimeSubscriber::spawn(source.clone(), feed, None, fast_config());
    let mut rx = sub.watch();
    wait_until(&mut rx, "feed open", |s| s.connected && s.generation >= 2).await;

    source.failing.store(true, Ordering::SeqCst);
    events.send(Ok(changed(&wa))).unwrap();
    let state = wait_until(&mut rx, "error", |s| s.last_error.is_some()).await;
    // Previous list stays visible.
    assert_eq!(state.channels.len(), 1);

    source.failing.store(false, Ordering::SeqCst);
    events.send(Ok(changed(&wa))).unwrap();
    wait_until(&mut rx, "recovery", |s| s.last_error.is_none()).await;
}

#[tokio::test]
async fn dropping_the_subscription_stops_it() {
    let source = FakeSource::default();
    let feed = FakeFeed::default();
    let events = feed.push_stream();

    let sub = RealtimeSubscriber::spawn(source.clone(), feed, None, fast_config());
    let mut rx = sub.watch();
    wait_until(&mut rx, "feed open", |s| s.connected).await;

    drop(sub);
    // The task owns the sender; once it exits, `changed` reports closure.
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        while rx.changed().await.is_ok() {}
    })
    .await;
    assert!(closed.is_ok(), "subscriber task did not stop");

    let before = source.loads();
    let _ = events.send(Ok(GatewayEvent::Resync { skipped: 0 }));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(source.loads(), before);
}

#[tokio::test]
async fn close_waits_for_the_task() {
    let source = FakeSource::default();
    let sub = RealtimeSubscriber::spawn(source.clone(), FakeFeed::default(), None, fast_config());
    let mut rx = sub.watch();
    // No stream queued: the subscriber keeps retrying with backoff.
    wait_until(&mut rx, "open failure", |s| s.last_error.is_some()).await;
    let snapshot = sub.snapshot();
    assert!(!snapshot.connected);
    assert_eq!(snapshot.generation, 1);

    sub.close().await;
    assert!(rx.has_changed().is_err());
}
