use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use leadhub_db::models::{DueCompletion, encode_ts, parse_ts};
use leadhub_types::events::ChangeKind;

use crate::error::ConnectError;
use crate::service::ChannelService;

/// Why an attempt ended in `error`. Stored as the channel's reason text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Found so long after its deadline that the pairing code has expired,
    /// e.g. because no worker was running.
    StaleConnectionAttempt,
    /// The completion write itself was rejected by the store.
    CompletionFailed,
}

impl FailureReason {
    pub fn message(self) -> &'static str {
        match self {
            Self::StaleConnectionAttempt => {
                "Connection attempt expired before it could complete. Retry to get a new code."
            }
            Self::CompletionFailed => "Could not record the completed connection. Retry to connect again.",
        }
    }
}

/// Counts from one worker tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerReport {
    pub completed: usize,
    pub stale: usize,
    pub failed: usize,
    /// Rows that changed under us (disconnected, deleted, re-issued).
    pub skipped: usize,
}

/// Polls the store for connecting rows whose deadline has passed and moves
/// them to `connected` (or `error`). Deadlines live in the rows themselves,
/// so a restart resumes exactly where the last process stopped.
pub struct CompletionWorker {
    service: ChannelService,
}

impl CompletionWorker {
    pub fn new(service: ChannelService) -> Self {
        Self { service }
    }

    /// Poll until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.service.config().poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Completion worker stopped");
                    return;
                }
                _ = interval.tick() => {}
            }

            match self.run_once(Utc::now()).await {
                Ok(report) if report != WorkerReport::default() => {
                    debug!("Completion worker tick: {:?}", report);
                }
                Ok(_) => {}
                Err(e) => warn!("Completion worker error: {}", e),
            }
        }
    }

    /// Process every attempt due at `now`.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<WorkerReport, ConnectError> {
        let now_ts = encode_ts(&now);
        let batch = self.service.config().batch_size;
        let due = self
            .service
            .blocking(move |db| db.due_completions(&now_ts, batch))
            .await?;

        let mut report = WorkerReport::default();
        for task in due {
            if self.is_stale(&task, now) {
                match self.fail(&task, FailureReason::StaleConnectionAttempt, now).await {
                    Ok(true) => report.stale += 1,
                    Ok(false) => report.skipped += 1,
                    Err(e) => warn!("Failed to mark stale attempt on channel {}: {}", task.id, e),
                }
                continue;
            }

            match self.complete(&task, now).await {
                Ok(true) => report.completed += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    warn!("Completing channel {} failed: {}", task.id, e);
                    match self.fail(&task, FailureReason::CompletionFailed, now).await {
                        Ok(true) => report.failed += 1,
                        Ok(false) => report.skipped += 1,
                        // Still due; the next tick tries again.
                        Err(e) => warn!("Recording failure for channel {} failed: {}", task.id, e),
                    }
                }
            }
        }

        Ok(report)
    }

    fn is_stale(&self, task: &DueCompletion, now: DateTime<Utc>) -> bool {
        let Ok(due_at) = parse_ts(&task.due_at) else {
            warn!("Channel {} has unreadable deadline '{}'", task.id, task.due_at);
            return true;
        };
        // Negative lateness fails `to_std`; those rows are not even due.
        (now - due_at)
            .to_std()
            .is_ok_and(|late| late > self.service.config().stale_after)
    }

    async fn complete(&self, task: &DueCompletion, now: DateTime<Utc>) -> Result<bool, ConnectError> {
        let (id, attempt_id, now_ts) = (task.id.clone(), task.attempt_id.clone(), encode_ts(&now));
        let row = self
            .service
            .blocking(move |db| db.complete_attempt(&id, &attempt_id, &now_ts))
            .await?;

        let Some(row) = row else {
            debug!("Attempt {} on channel {} no longer pending", task.attempt_id, task.id);
            return Ok(false);
        };

        let channel = row.into_channel()?;
        info!(
            "Channel {} ({} {}) connected for owner {}",
            channel.id,
            channel.channel_type,
            channel.address.as_deref().unwrap_or("-"),
            channel.owner_id
        );
        self.service.publish(&channel, ChangeKind::Update);
        Ok(true)
    }

    async fn fail(&self, task: &DueCompletion, reason: FailureReason, now: DateTime<Utc>) -> Result<bool, ConnectError> {
        let (id, attempt_id, now_ts) = (task.id.clone(), task.attempt_id.clone(), encode_ts(&now));
        let row = self
            .service
            .blocking(move |db| db.fail_attempt(&id, &attempt_id, reason.message(), &now_ts))
            .await?;

        let Some(row) = row else {
            return Ok(false);
        };

        let channel = row.into_channel()?;
        warn!("Channel {} moved to error: {:?}", channel.id, reason);
        self.service.publish(&channel, ChangeKind::Update);
        Ok(true)
    }
}
