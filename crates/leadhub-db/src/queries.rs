use crate::Database;
use crate::models::UserRow;
use anyhow::Result;
use rusqlite::{Connection, Row};

impl Database {
    // -- Users --

    /// Returns false when the username is already taken.
    pub fn create_user(&self, id: &str, username: &str, password_hash: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (id, username, password) VALUES (?1, ?2, ?3)
                 ON CONFLICT (username) DO NOTHING",
                (id, username, password_hash),
            )?;
            Ok(inserted == 1)
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    /// Returns false when the user does not exist.
    pub fn set_onboarding_complete(&self, id: &str, complete: bool) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE users SET onboarding_complete = ?1 WHERE id = ?2",
                rusqlite::params![complete, id],
            )?;
            Ok(updated == 1)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    // `column` is always one of our own literals, never caller input.
    let sql = format!(
        "SELECT id, username, password, onboarding_complete, created_at FROM users WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt.query_row([value], user_from_row).optional()?;
    Ok(row)
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        onboarding_complete: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn onboarding_flag_round_trip() {
        let db = Database::open_in_memory().unwrap();
        db.create_user("u1", "alice", "hash").unwrap();

        let user = db.get_user_by_username("alice").unwrap().unwrap();
        assert!(!user.onboarding_complete);

        assert!(db.set_onboarding_complete("u1", true).unwrap());
        assert!(db.get_user_by_id("u1").unwrap().unwrap().onboarding_complete);
        assert!(!db.set_onboarding_complete("missing", true).unwrap());
    }

    #[test]
    fn duplicate_username_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.create_user("u1", "alice", "hash").unwrap());
        assert!(!db.create_user("u2", "alice", "hash").unwrap());
        assert!(db.get_user_by_id("u2").unwrap().is_none());
    }
}
