//! Server-side session records. Only token hashes are ever stored.

use super::{decode_ts, encode_ts, Storage, StorageError};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

/// Hard cap on live sessions per user; the oldest by `refreshed_at` is
/// evicted inside the same transaction that inserts a new one.
pub const MAX_SESSIONS_PER_USER: i64 = 3;

#[derive(Debug, Clone)]
pub struct Session {
    pub id: i64,
    pub user_id: i64,
    pub token_hash: String,
    pub refresh_token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub refreshed_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

pub struct NewSession {
    pub user_id: i64,
    pub token_hash: String,
    pub refresh_token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub refreshed_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

fn map_session(row: &Row<'_>) -> rusqlite::Result<(Session, String, String)> {
    Ok((
        Session {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            token_hash: row.get("token_hash")?,
            refresh_token_hash: row.get("refresh_token_hash")?,
            expires_at: Utc::now(),
            refreshed_at: Utc::now(),
            ip_address: row.get("ip_address")?,
            user_agent: row.get("user_agent")?,
        },
        row.get("expires_at")?,
        row.get("refreshed_at")?,
    ))
}

fn finish_session(parts: (Session, String, String)) -> Result<Session, StorageError> {
    let (mut session, expires_at, refreshed_at) = parts;
    session.expires_at = decode_ts(&expires_at)?;
    session.refreshed_at = decode_ts(&refreshed_at)?;
    Ok(session)
}

const SESSION_COLUMNS: &str =
    "id, user_id, token_hash, refresh_token_hash, expires_at, refreshed_at, ip_address, user_agent";

impl Storage {
    /// Insert a session; when the user already holds [MAX_SESSIONS_PER_USER]
    /// sessions, the oldest by `refreshed_at` is deleted first. Both steps
    /// happen in one transaction.
    pub async fn insert_session_with_eviction(
        &self,
        new: NewSession,
    ) -> Result<Session, StorageError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let live: i64 = tx.query_row(
                "SELECT count(*) FROM sessions WHERE user_id = ?1",
                [new.user_id],
                |row| row.get(0),
            )?;
            if live >= MAX_SESSIONS_PER_USER {
                tx.execute(
                    "DELETE FROM sessions WHERE id IN (
                         SELECT id FROM sessions WHERE user_id = ?1
                         ORDER BY refreshed_at ASC
                         LIMIT ?2
                     )",
                    params![new.user_id, live - MAX_SESSIONS_PER_USER + 1],
                )?;
            }
            tx.execute(
                "INSERT INTO sessions
                     (user_id, token_hash, refresh_token_hash, expires_at, refreshed_at,
                      ip_address, user_agent)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    new.user_id,
                    new.token_hash,
                    new.refresh_token_hash,
                    encode_ts(new.expires_at),
                    encode_ts(new.refreshed_at),
                    new.ip_address,
                    new.user_agent
                ],
            )?;
            let id = tx.last_insert_rowid();
            let parts = tx.query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                [id],
                map_session,
            )?;
            tx.commit()?;
            finish_session(parts)
        })
        .await
    }

    pub async fn session_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<Session>, StorageError> {
        let token_hash = token_hash.to_string();
        self.call(move |conn| {
            conn.query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE token_hash = ?1"),
                [&token_hash],
                map_session,
            )
            .optional()?
            .map(finish_session)
            .transpose()
        })
        .await
    }

    pub async fn session_by_refresh_token_hash(
        &self,
        refresh_token_hash: &str,
    ) -> Result<Option<Session>, StorageError> {
        let refresh_token_hash = refresh_token_hash.to_string();
        self.call(move |conn| {
            conn.query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE refresh_token_hash = ?1"),
                [&refresh_token_hash],
                map_session,
            )
            .optional()?
            .map(finish_session)
            .transpose()
        })
        .await
    }

    /// Token rotation: replaces both hashes and bumps the lifetime.
    pub async fn rotate_session_tokens(
        &self,
        session_id: i64,
        token_hash: String,
        refresh_token_hash: String,
        refreshed_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE sessions
                 SET token_hash = ?2, refresh_token_hash = ?3,
                     refreshed_at = ?4, expires_at = ?5
                 WHERE id = ?1",
                params![
                    session_id,
                    token_hash,
                    refresh_token_hash,
                    encode_ts(refreshed_at),
                    encode_ts(expires_at)
                ],
            )?;
            if n == 0 {
                return Err(StorageError::NotFound);
            }
            Ok(())
        })
        .await
    }

    pub async fn delete_session(&self, session_id: i64) -> Result<(), StorageError> {
        self.call(move |conn| {
            conn.execute("DELETE FROM sessions WHERE id = ?1", [session_id])?;
            Ok(())
        })
        .await
    }

    pub async fn delete_session_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<(), StorageError> {
        let token_hash = token_hash.to_string();
        self.call(move |conn| {
            conn.execute("DELETE FROM sessions WHERE token_hash = ?1", [&token_hash])?;
            Ok(())
        })
        .await
    }

    pub async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        self.call(move |conn| {
            Ok(conn.execute(
                "DELETE FROM sessions WHERE expires_at <= ?1",
                [encode_ts(now)],
            )?)
        })
        .await
    }

    pub async fn count_sessions(&self, user_id: i64) -> Result<i64, StorageError> {
        self.call(move |conn| {
            Ok(conn.query_row(
                "SELECT count(*) FROM sessions WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )?)
        })
        .await
    }

    // --- recovery codes -----------------------------------------------------

    pub async fn insert_recovery_codes(
        &self,
        user_id: i64,
        hashes: Vec<String>,
    ) -> Result<(), StorageError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            // Enrollment replaces any previous set.
            tx.execute("DELETE FROM recovery_codes WHERE user_id = ?1", [user_id])?;
            for hash in &hashes {
                tx.execute(
                    "INSERT INTO recovery_codes (user_id, hash) VALUES (?1, ?2)",
                    params![user_id, hash],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Unused recovery-code hashes for the user, with row ids for consumption.
    pub async fn unused_recovery_codes(
        &self,
        user_id: i64,
    ) -> Result<Vec<(i64, String)>, StorageError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, hash FROM recovery_codes
                 WHERE user_id = ?1 AND used_at IS NULL",
            )?;
            let rows = stmt
                .query_map([user_id], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Marks a recovery code used. Returns `Conflict` if it was already
    /// consumed; the check and the write share one transaction so a code can
    /// never authenticate twice.
    pub async fn consume_recovery_code(&self, code_id: i64) -> Result<(), StorageError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let used: Option<String> = tx.query_row(
                "SELECT used_at FROM recovery_codes WHERE id = ?1",
                [code_id],
                |row| row.get(0),
            )?;
            if used.is_some() {
                return Err(StorageError::Conflict("recovery code already used".into()));
            }
            tx.execute(
                "UPDATE recovery_codes SET used_at = ?2 WHERE id = ?1",
                params![code_id, encode_ts(Utc::now())],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::users::{NewUser, Role, UserStatus};
    use chrono::Duration;

    async fn seed(storage: &Storage) -> i64 {
        storage
            .create_user(NewUser {
                username: "alice".into(),
                password_hash: "x".into(),
                role: Role::User,
                status: UserStatus::Active,
            })
            .await
            .unwrap()
            .id
    }

    fn session_at(user_id: i64, token: &str, refreshed_at: DateTime<Utc>) -> NewSession {
        NewSession {
            user_id,
            token_hash: format!("t-{token}"),
            refresh_token_hash: format!("r-{token}"),
            expires_at: refreshed_at + Duration::days(14),
            refreshed_at,
            ip_address: None,
            user_agent: None,
        }
    }

    #[tokio::test]
    async fn fourth_session_evicts_oldest() {
        let storage = Storage::open_in_memory().unwrap();
        let user_id = seed(&storage).await;
        for (i, day) in ["01", "02", "03"].iter().enumerate() {
            let at = decode_ts(&format!("2025-01-{day}T00:00:00Z")).unwrap();
            storage
                .insert_session_with_eviction(session_at(user_id, &i.to_string(), at))
                .await
                .unwrap();
        }
        storage
            .insert_session_with_eviction(session_at(user_id, "new", Utc::now()))
            .await
            .unwrap();

        assert_eq!(storage.count_sessions(user_id).await.unwrap(), 3);
        // The 2025-01-01 session is gone; the newest authenticates.
        assert!(storage.session_by_token_hash("t-0").await.unwrap().is_none());
        assert!(storage
            .session_by_token_hash("t-new")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn recovery_code_single_use() {
        let storage = Storage::open_in_memory().unwrap();
        let user_id = seed(&storage).await;
        storage
            .insert_recovery_codes(user_id, vec!["h1".into(), "h2".into()])
            .await
            .unwrap();
        let codes = storage.unused_recovery_codes(user_id).await.unwrap();
        assert_eq!(codes.len(), 2);
        storage.consume_recovery_code(codes[0].0).await.unwrap();
        let again = storage.consume_recovery_code(codes[0].0).await;
        assert!(matches!(again, Err(StorageError::Conflict(_))));
        assert_eq!(storage.unused_recovery_codes(user_id).await.unwrap().len(), 1);
    }
}
