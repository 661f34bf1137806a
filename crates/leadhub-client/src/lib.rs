//! Client side of the channel lifecycle: a typed HTTP client, the realtime
//! feed, a self-healing channel subscriber and the panel view model.

pub mod backoff;
pub mod error;
pub mod http;
pub mod panel;
pub mod subscriber;
pub mod ws;

pub use error::ClientError;
pub use http::ApiClient;
pub use subscriber::{ChangeFeed, ChannelSource, RealtimeSubscriber, SubscriberConfig, SubscriberState, Subscription};
pub use ws::GatewayFeed;
