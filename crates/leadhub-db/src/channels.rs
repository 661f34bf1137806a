use crate::Database;
use crate::models::{ChannelRow, DueCompletion};
use crate::queries::OptionalExt;
use anyhow::Result;
use rusqlite::Row;

const CHANNEL_COLUMNS: &str = "id, owner_id, channel_type, address, status, attempt_id, \
     transient_credential, completion_due_at, error_reason, last_connected_at, created_at, updated_at";

/// Everything needed to start (or re-issue) a connection attempt.
pub struct NewAttempt<'a> {
    /// Used only if no row exists yet for the natural key.
    pub candidate_id: &'a str,
    pub owner_id: &'a str,
    pub channel_type: &'a str,
    pub address: &'a str,
    pub attempt_id: &'a str,
    pub transient_credential: Option<&'a str>,
    pub due_at: &'a str,
    pub now: &'a str,
}

pub enum UpsertOutcome {
    Inserted(ChannelRow),
    Updated(ChannelRow),
    /// The key already resolves to a connected channel; nothing was written.
    AlreadyConnected,
}

pub enum DisconnectOutcome {
    Disconnected(ChannelRow),
    AlreadyDisconnected(ChannelRow),
    NotFound,
}

pub enum RestartOutcome {
    Restarted(ChannelRow),
    /// The row exists but its status does not allow a new attempt.
    Blocked(ChannelRow),
    NotFound,
}

impl Database {
    /// Start a connection attempt for `(owner, type, address)` in a single
    /// statement: insert when absent, otherwise move the existing row back to
    /// `connecting` with a fresh attempt. Connected rows are left untouched.
    pub fn upsert_connecting(&self, attempt: &NewAttempt<'_>) -> Result<UpsertOutcome> {
        self.with_conn(|conn| {
            let sql = format!(
                "INSERT INTO channels (id, owner_id, channel_type, address, status, attempt_id,
                                       transient_credential, completion_due_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'connecting', ?5, ?6, ?7, ?8, ?8)
                 ON CONFLICT (owner_id, channel_type, address) DO UPDATE SET
                     status = 'connecting',
                     attempt_id = excluded.attempt_id,
                     transient_credential = excluded.transient_credential,
                     completion_due_at = excluded.completion_due_at,
                     error_reason = NULL,
                     updated_at = excluded.updated_at
                 WHERE channels.status <> 'connected'
                 RETURNING {}",
                CHANNEL_COLUMNS
            );

            let row = conn
                .query_row(
                    &sql,
                    rusqlite::params![
                        attempt.candidate_id,
                        attempt.owner_id,
                        attempt.channel_type,
                        attempt.address,
                        attempt.attempt_id,
                        attempt.transient_credential,
                        attempt.due_at,
                        attempt.now,
                    ],
                    channel_from_row,
                )
                .optional()?;

            Ok(match row {
                Some(row) if row.id == attempt.candidate_id => UpsertOutcome::Inserted(row),
                Some(row) => UpsertOutcome::Updated(row),
                None => UpsertOutcome::AlreadyConnected,
            })
        })
    }

    /// Fetch a channel only if it belongs to `owner_id`.
    pub fn get_channel(&self, owner_id: &str, id: &str) -> Result<Option<ChannelRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM channels WHERE id = ?1 AND owner_id = ?2", CHANNEL_COLUMNS);
            conn.query_row(&sql, [id, owner_id], channel_from_row).optional()
        })
    }

    /// Fetch a channel without an ownership check (webhooks, workers).
    pub fn get_channel_by_id(&self, id: &str) -> Result<Option<ChannelRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM channels WHERE id = ?1", CHANNEL_COLUMNS);
            conn.query_row(&sql, [id], channel_from_row).optional()
        })
    }

    pub fn list_channels(&self, owner_id: &str, channel_type: Option<&str>) -> Result<Vec<ChannelRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM channels
                 WHERE owner_id = ?1 AND (?2 IS NULL OR channel_type = ?2)
                 ORDER BY created_at DESC, id",
                CHANNEL_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![owner_id, channel_type], channel_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Move a channel to `disconnected`, clearing everything tied to a
    /// pending attempt. Idempotent.
    pub fn disconnect_channel(&self, owner_id: &str, id: &str, now: &str) -> Result<DisconnectOutcome> {
        self.with_conn(|conn| {
            let sql = format!(
                "UPDATE channels SET
                     status = 'disconnected',
                     transient_credential = NULL,
                     completion_due_at = NULL,
                     error_reason = NULL,
                     updated_at = ?3
                 WHERE id = ?1 AND owner_id = ?2 AND status <> 'disconnected'
                 RETURNING {}",
                CHANNEL_COLUMNS
            );
            if let Some(row) = conn.query_row(&sql, [id, owner_id, now], channel_from_row).optional()? {
                return Ok(DisconnectOutcome::Disconnected(row));
            }

            let sql = format!("SELECT {} FROM channels WHERE id = ?1 AND owner_id = ?2", CHANNEL_COLUMNS);
            Ok(match conn.query_row(&sql, [id, owner_id], channel_from_row).optional()? {
                Some(row) => DisconnectOutcome::AlreadyDisconnected(row),
                None => DisconnectOutcome::NotFound,
            })
        })
    }

    /// Start a new attempt on an existing `error` or `disconnected` row.
    pub fn restart_attempt(
        &self,
        owner_id: &str,
        id: &str,
        attempt_id: &str,
        transient_credential: Option<&str>,
        due_at: &str,
        now: &str,
    ) -> Result<RestartOutcome> {
        self.with_conn(|conn| {
            let sql = format!(
                "UPDATE channels SET
                     status = 'connecting',
                     attempt_id = ?3,
                     transient_credential = ?4,
                     completion_due_at = ?5,
                     error_reason = NULL,
                     updated_at = ?6
                 WHERE id = ?1 AND owner_id = ?2 AND status IN ('error', 'disconnected')
                 RETURNING {}",
                CHANNEL_COLUMNS
            );
            let restarted = conn
                .query_row(
                    &sql,
                    rusqlite::params![id, owner_id, attempt_id, transient_credential, due_at, now],
                    channel_from_row,
                )
                .optional()?;
            if let Some(row) = restarted {
                return Ok(RestartOutcome::Restarted(row));
            }

            let sql = format!("SELECT {} FROM channels WHERE id = ?1 AND owner_id = ?2", CHANNEL_COLUMNS);
            Ok(match conn.query_row(&sql, [id, owner_id], channel_from_row).optional()? {
                Some(row) => RestartOutcome::Blocked(row),
                None => RestartOutcome::NotFound,
            })
        })
    }

    pub fn delete_channel(&self, owner_id: &str, id: &str) -> Result<Option<ChannelRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "DELETE FROM channels WHERE id = ?1 AND owner_id = ?2 RETURNING {}",
                CHANNEL_COLUMNS
            );
            conn.query_row(&sql, [id, owner_id], channel_from_row).optional()
        })
    }

    // -- Completion tasks --

    /// Connecting rows whose deadline is at or before `now`, oldest first.
    pub fn due_completions(&self, now: &str, limit: u32) -> Result<Vec<DueCompletion>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, owner_id, channel_type, attempt_id, completion_due_at
                 FROM channels
                 WHERE status = 'connecting'
                   AND completion_due_at IS NOT NULL
                   AND attempt_id IS NOT NULL
                   AND completion_due_at <= ?1
                 ORDER BY completion_due_at
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![now, limit], |row| {
                    Ok(DueCompletion {
                        id: row.get(0)?,
                        owner_id: row.get(1)?,
                        channel_type: row.get(2)?,
                        attempt_id: row.get(3)?,
                        due_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Mark an attempt connected. Returns `None` when the row is gone, no
    /// longer connecting, or belongs to a newer attempt.
    pub fn complete_attempt(&self, id: &str, attempt_id: &str, now: &str) -> Result<Option<ChannelRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "UPDATE channels SET
                     status = 'connected',
                     transient_credential = NULL,
                     completion_due_at = NULL,
                     error_reason = NULL,
                     last_connected_at = ?3,
                     updated_at = ?3
                 WHERE id = ?1 AND attempt_id = ?2 AND status = 'connecting'
                 RETURNING {}",
                CHANNEL_COLUMNS
            );
            conn.query_row(&sql, [id, attempt_id, now], channel_from_row).optional()
        })
    }

    /// Mark an attempt failed with a human-readable reason. Same guard as
    /// `complete_attempt`.
    pub fn fail_attempt(&self, id: &str, attempt_id: &str, reason: &str, now: &str) -> Result<Option<ChannelRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "UPDATE channels SET
                     status = 'error',
                     transient_credential = NULL,
                     completion_due_at = NULL,
                     error_reason = ?3,
                     updated_at = ?4
                 WHERE id = ?1 AND attempt_id = ?2 AND status = 'connecting'
                 RETURNING {}",
                CHANNEL_COLUMNS
            );
            conn.query_row(&sql, [id, attempt_id, reason, now], channel_from_row).optional()
        })
    }
}

fn channel_from_row(row: &Row<'_>) -> rusqlite::Result<ChannelRow> {
    Ok(ChannelRow {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        channel_type: row.get(2)?,
        address: row.get(3)?,
        status: row.get(4)?,
        attempt_id: row.get(5)?,
        transient_credential: row.get(6)?,
        completion_due_at: row.get(7)?,
        error_reason: row.get(8)?,
        last_connected_at: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}
