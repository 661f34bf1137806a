use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tracing::{error, info};
use uuid::Uuid;

use leadhub_db::Database;
use leadhub_db::channels::{DisconnectOutcome, NewAttempt, RestartOutcome, UpsertOutcome};
use leadhub_db::models::encode_ts;
use leadhub_gateway::dispatcher::Dispatcher;
use leadhub_types::events::{ChangeKind, GatewayEvent};
use leadhub_types::models::{Channel, ChannelStatus, ChannelType};

use crate::address::{normalize_phone, normalize_username};
use crate::config::LifecycleConfig;
use crate::credential;
use crate::error::ConnectError;

/// What the caller wants to connect.
#[derive(Debug, Clone)]
pub enum ConnectRequest {
    Whatsapp { phone: String },
    Instagram { username: String },
}

impl ConnectRequest {
    pub fn channel_type(&self) -> ChannelType {
        match self {
            Self::Whatsapp { .. } => ChannelType::Whatsapp,
            Self::Instagram { .. } => ChannelType::Instagram,
        }
    }

    fn normalized_address(&self) -> Result<String, ConnectError> {
        match self {
            Self::Whatsapp { phone } => normalize_phone(phone),
            Self::Instagram { username } => normalize_username(username),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Initiated {
    pub channel: Channel,
    /// False when an existing row for the same address was re-issued.
    pub created: bool,
}

#[derive(Debug, Clone)]
pub struct Disconnected {
    pub channel: Channel,
    /// False when the channel was already disconnected.
    pub changed: bool,
}

/// Entry point for every channel lifecycle operation. Cheap to clone.
#[derive(Clone)]
pub struct ChannelService {
    db: Arc<Database>,
    dispatcher: Dispatcher,
    config: LifecycleConfig,
}

impl ChannelService {
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher, config: LifecycleConfig) -> Self {
        Self {
            db,
            dispatcher,
            config,
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Create or re-issue a connection attempt for `(owner, type, address)`
    /// and schedule its completion.
    pub async fn initiate_connection(
        &self,
        owner_id: Uuid,
        request: ConnectRequest,
    ) -> Result<Initiated, ConnectError> {
        self.require_owner(owner_id).await?;
        let channel_type = request.channel_type();
        let address = request.normalized_address()?;

        let now = Utc::now();
        let attempt = Attempt::new(&self.config, channel_type, &address, now);
        let candidate_id = Uuid::new_v4().to_string();
        let owner = owner_id.to_string();

        let outcome = {
            let address = address.clone();
            let attempt = attempt.clone();
            self.blocking(move |db| {
                db.upsert_connecting(&NewAttempt {
                    candidate_id: &candidate_id,
                    owner_id: &owner,
                    channel_type: channel_type.as_str(),
                    address: &address,
                    attempt_id: &attempt.id,
                    transient_credential: attempt.credential.as_deref(),
                    due_at: &attempt.due_at,
                    now: &attempt.now,
                })
            })
            .await?
        };

        let (row, created) = match outcome {
            UpsertOutcome::Inserted(row) => (row, true),
            UpsertOutcome::Updated(row) => (row, false),
            UpsertOutcome::AlreadyConnected => {
                info!("{} {} for {} is already connected", channel_type, address, owner_id);
                return Err(ConnectError::DuplicateAttempt(ChannelStatus::Connected));
            }
        };

        let channel = row.into_channel()?;
        info!(
            "Connection attempt {} started for {} {} (channel {}, owner {}, due {})",
            attempt.id, channel_type, address, channel.id, owner_id, attempt.due_at
        );
        self.publish(&channel, if created { ChangeKind::Insert } else { ChangeKind::Update });

        Ok(Initiated { channel, created })
    }

    /// Current record for a channel owned by `owner_id`.
    pub async fn check_status(&self, owner_id: Uuid, channel_id: Uuid) -> Result<Channel, ConnectError> {
        let (owner, id) = (owner_id.to_string(), channel_id.to_string());
        let row = self
            .blocking(move |db| db.get_channel(&owner, &id))
            .await?
            .ok_or(ConnectError::NotFound)?;
        Ok(row.into_channel()?)
    }

    pub async fn list(&self, owner_id: Uuid, channel_type: Option<ChannelType>) -> Result<Vec<Channel>, ConnectError> {
        let owner = owner_id.to_string();
        let rows = self
            .blocking(move |db| db.list_channels(&owner, channel_type.map(ChannelType::as_str)))
            .await?;
        rows.into_iter()
            .map(|row| row.into_channel().map_err(ConnectError::from))
            .collect()
    }

    /// Disconnect a channel. Disconnecting twice is not an error.
    pub async fn disconnect(&self, owner_id: Uuid, channel_id: Uuid) -> Result<Disconnected, ConnectError> {
        let (owner, id) = (owner_id.to_string(), channel_id.to_string());
        let now = encode_ts(&Utc::now());
        let outcome = self
            .blocking(move |db| db.disconnect_channel(&owner, &id, &now))
            .await?;

        match outcome {
            DisconnectOutcome::Disconnected(row) => {
                let channel = row.into_channel()?;
                info!("Channel {} disconnected by {}", channel.id, owner_id);
                self.publish(&channel, ChangeKind::Update);
                Ok(Disconnected { channel, changed: true })
            }
            DisconnectOutcome::AlreadyDisconnected(row) => Ok(Disconnected {
                channel: row.into_channel()?,
                changed: false,
            }),
            DisconnectOutcome::NotFound => Err(ConnectError::NotFound),
        }
    }

    /// Start a new attempt on a channel that failed or was disconnected.
    pub async fn retry(&self, owner_id: Uuid, channel_id: Uuid) -> Result<Channel, ConnectError> {
        let current = self.check_status(owner_id, channel_id).await?;
        if matches!(current.status, ChannelStatus::Connecting | ChannelStatus::Connected) {
            return Err(ConnectError::DuplicateAttempt(current.status));
        }
        let address = current
            .address
            .clone()
            .ok_or_else(|| ConnectError::InvalidInput("channel has no address to reconnect".into()))?;

        let now = Utc::now();
        let attempt = Attempt::new(&self.config, current.channel_type, &address, now);
        let (owner, id) = (owner_id.to_string(), channel_id.to_string());
        let outcome = {
            let attempt = attempt.clone();
            self.blocking(move |db| {
                db.restart_attempt(
                    &owner,
                    &id,
                    &attempt.id,
                    attempt.credential.as_deref(),
                    &attempt.due_at,
                    &attempt.now,
                )
            })
            .await?
        };

        match outcome {
            RestartOutcome::Restarted(row) => {
                let channel = row.into_channel()?;
                info!("Connection attempt {} restarted for channel {}", attempt.id, channel.id);
                self.publish(&channel, ChangeKind::Update);
                Ok(channel)
            }
            // Someone else moved it between our read and the write.
            RestartOutcome::Blocked(row) => Err(ConnectError::DuplicateAttempt(row.into_channel()?.status)),
            RestartOutcome::NotFound => Err(ConnectError::NotFound),
        }
    }

    /// Delete a channel record outright.
    pub async fn remove(&self, owner_id: Uuid, channel_id: Uuid) -> Result<(), ConnectError> {
        let (owner, id) = (owner_id.to_string(), channel_id.to_string());
        let row = self
            .blocking(move |db| db.delete_channel(&owner, &id))
            .await?
            .ok_or(ConnectError::NotFound)?;

        let channel = row.into_channel()?;
        info!("Channel {} removed by {}", channel.id, owner_id);
        self.dispatcher.publish(
            owner_id,
            &GatewayEvent::ChannelChanged {
                change: ChangeKind::Delete,
                channel_id: channel.id,
                channel_type: channel.channel_type,
                status: None,
            },
        );
        Ok(())
    }

    // -- Internals shared with the completion worker --

    pub(crate) fn publish(&self, channel: &Channel, change: ChangeKind) {
        self.dispatcher.publish(
            channel.owner_id,
            &GatewayEvent::ChannelChanged {
                change,
                channel_id: channel.id,
                channel_type: channel.channel_type,
                status: Some(channel.status),
            },
        );
    }

    /// Run a store call off the async runtime.
    pub(crate) async fn blocking<F, T>(&self, f: F) -> Result<T, ConnectError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ConnectError::StoreFailure(anyhow!("store task failed: {}", e))
            })?
            .map_err(ConnectError::StoreFailure)
    }

    async fn require_owner(&self, owner_id: Uuid) -> Result<(), ConnectError> {
        let owner = owner_id.to_string();
        match self.blocking(move |db| db.get_user_by_id(&owner)).await? {
            Some(_) => Ok(()),
            None => Err(ConnectError::Unauthenticated),
        }
    }
}

/// Identity, credential and deadline of one connection attempt.
#[derive(Clone)]
struct Attempt {
    id: String,
    credential: Option<String>,
    due_at: String,
    now: String,
}

impl Attempt {
    fn new(config: &LifecycleConfig, channel_type: ChannelType, address: &str, now: DateTime<Utc>) -> Self {
        let credential = match channel_type {
            ChannelType::Whatsapp => Some(credential::whatsapp_qr_payload(address, &credential::pairing_code())),
            ChannelType::Instagram => None,
        };
        let delay = chrono::Duration::from_std(config.delay_for(channel_type)).unwrap_or(chrono::Duration::zero());

        Self {
            id: Uuid::new_v4().to_string(),
            credential,
            due_at: encode_ts(&(now + delay)),
            now: encode_ts(&now),
        }
    }
}
