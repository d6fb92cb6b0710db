//! Audit log of authentication attempts. Retention is 7 days; the reaper
//! runs from the maintenance task.

use super::{encode_ts, Storage, StorageError};
use chrono::{DateTime, Utc};
use rusqlite::params;

impl Storage {
    pub async fn record_login_attempt(
        &self,
        username: &str,
        ip_address: &str,
        success: bool,
    ) -> Result<(), StorageError> {
        let username = username.to_lowercase();
        let ip_address = ip_address.to_string();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO login_attempts (username, ip_address, success, inserted_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![username, ip_address, success, encode_ts(Utc::now())],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn reap_login_attempts(
        &self,
        before: DateTime<Utc>,
    ) -> Result<usize, StorageError> {
        self.call(move |conn| {
            Ok(conn.execute(
                "DELETE FROM login_attempts WHERE inserted_at < ?1",
                [encode_ts(before)],
            )?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn reaper_keeps_recent_rows() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .record_login_attempt("Alice", "192.0.2.1", false)
            .await
            .unwrap();
        let reaped = storage
            .reap_login_attempts(Utc::now() - Duration::days(7))
            .await
            .unwrap();
        assert_eq!(reaped, 0);
        let reaped = storage
            .reap_login_attempts(Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(reaped, 1);
    }
}
