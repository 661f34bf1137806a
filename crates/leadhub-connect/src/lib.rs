//! Channel connection lifecycle: validating and starting connection
//! attempts, and the durable worker that completes them.

pub mod address;
pub mod config;
pub mod credential;
pub mod error;
pub mod service;
pub mod worker;

pub use config::LifecycleConfig;
pub use error::ConnectError;
pub use service::{ChannelService, ConnectRequest, Disconnected, Initiated};
pub use worker::{CompletionWorker, FailureReason, WorkerReport};
