use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use leadhub_types::events::GatewayEvent;
use leadhub_types::models::{Channel, ChannelType};

use crate::backoff::Backoff;
use crate::error::ClientError;

/// Events as they arrive from an open feed. Ends when the feed closes.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<GatewayEvent, ClientError>> + Send>>;

/// Where the full channel list is loaded from.
pub trait ChannelSource: Send + Sync + 'static {
    fn list_channels(
        &self,
        channel_type: Option<ChannelType>,
    ) -> impl Future<Output = Result<Vec<Channel>, ClientError>> + Send;
}

/// Opens a stream of change notifications.
pub trait ChangeFeed: Send + Sync + 'static {
    fn open(&self) -> impl Future<Output = Result<EventStream, ClientError>> + Send;
}

#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Events arriving within this window trigger one reload.
    pub debounce: Duration,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(150),
            min_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// What a view renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriberState {
    pub channels: Vec<Channel>,
    /// Whether the change feed is currently open.
    pub connected: bool,
    /// Last reload or feed failure. Cleared by the next successful reload.
    pub last_error: Option<String>,
    /// Number of successful reloads so far.
    pub generation: u64,
}

/// Keeps a channel list in sync with the server: one full load, then a full
/// reload whenever the feed reports a relevant change.
pub struct RealtimeSubscriber;

impl RealtimeSubscriber {
    pub fn spawn<S, F>(
        source: S,
        feed: F,
        channel_type: Option<ChannelType>,
        config: SubscriberConfig,
    ) -> Subscription
    where
        S: ChannelSource,
        F: ChangeFeed,
    {
        let (tx, rx) = watch::channel(SubscriberState::default());
        let cancel = CancellationToken::new();

        let worker = Worker {
            source,
            feed,
            filter: channel_type,
            config,
            tx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(worker.run());

        Subscription {
            state: rx,
            cancel,
            task: Some(task),
        }
    }
}

/// Handle to a running subscriber. Dropping it stops the subscriber.
pub struct Subscription {
    state: watch::Receiver<SubscriberState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// A receiver that is notified on every state change.
    pub fn watch(&self) -> watch::Receiver<SubscriberState> {
        self.state.clone()
    }

    pub fn snapshot(&self) -> SubscriberState {
        self.state.borrow().clone()
    }

    /// Stop the subscriber and wait for its task to exit.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum FeedEnd {
    Cancelled,
    Lost,
}

struct Worker<S, F> {
    source: S,
    feed: F,
    filter: Option<ChannelType>,
    config: SubscriberConfig,
    tx: watch::Sender<SubscriberState>,
    cancel: CancellationToken,
}

impl<S: ChannelSource, F: ChangeFeed> Worker<S, F> {
    async fn run(self) {
        let mut backoff = Backoff::new(self.config.min_backoff, self.config.max_backoff);

        if !self.reload().await {
            return;
        }

        loop {
            let opened = tokio::select! {
                _ = self.cancel.cancelled() => return,
                opened = self.feed.open() => opened,
            };

            match opened {
                Ok(stream) => {
                    backoff.reset();
                    self.tx.send_modify(|s| s.connected = true);
                    debug!("Channel feed open");

                    // Anything published while we were away is only visible
                    // through a fresh load.
                    if !self.reload().await {
                        return;
                    }
                    if let FeedEnd::Cancelled = self.pump(stream).await {
                        return;
                    }
                    self.tx.send_modify(|s| s.connected = false);
                }
                Err(e) => {
                    warn!("Opening channel feed failed: {}", e);
                    self.tx.send_modify(|s| {
                        s.connected = false;
                        s.last_error = Some(e.to_string());
                    });
                }
            }

            let delay = backoff.next_delay();
            info!("Resubscribing to channel feed in {:?}", delay);
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Consume the stream until it ends or we are cancelled, coalescing
    /// bursts of relevant events into one reload.
    async fn pump(&self, mut stream: EventStream) -> FeedEnd {
        let mut flush_at: Option<Instant> = None;

        loop {
            let deadline = flush_at;
            let flush = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = self.cancel.cancelled() => return FeedEnd::Cancelled,
                _ = flush => {
                    flush_at = None;
                    if !self.reload().await {
                        return FeedEnd::Cancelled;
                    }
                }
                next = stream.next() => match next {
                    Some(Ok(event)) => {
                        if self.is_relevant(&event) {
                            flush_at.get_or_insert_with(|| Instant::now() + self.config.debounce);
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Channel feed failed: {}", e);
                        break;
                    }
                    None => {
                        debug!("Channel feed closed");
                        break;
                    }
                },
            }
        }

        // Do not lose a change that arrived just before the feed dropped.
        if flush_at.is_some() && !self.reload().await {
            return FeedEnd::Cancelled;
        }
        FeedEnd::Lost
    }

    fn is_relevant(&self, event: &GatewayEvent) -> bool {
        match event {
            GatewayEvent::ChannelChanged { channel_type, .. } => self.filter.is_none_or(|t| t == *channel_type),
            other => other.touches_channels(),
        }
    }

    /// Fetch the full list. Returns false if cancelled mid-flight.
    async fn reload(&self) -> bool {
        let result = tokio::select! {
            _ = self.cancel.cancelled() => return false,
            result = self.source.list_channels(self.filter) => result,
        };

        match result {
            Ok(channels) => self.tx.send_modify(|s| {
                s.channels = channels;
                s.last_error = None;
                s.generation += 1;
            }),
            Err(e) => {
                warn!("Reloading channels failed: {}", e);
                self.tx.send_modify(|s| s.last_error = Some(e.to_string()));
            }
        }
        true
    }
}
