//! Likes and announces. Undo is always scoped to the acting remote actor so
//! a third party cannot spoof a revocation.

use super::{encode_ts, Storage, StorageError};
use chrono::Utc;
use rusqlite::params;

impl Storage {
    /// Returns false when the like already existed.
    pub async fn insert_article_like(
        &self,
        article_id: i64,
        user_id: Option<i64>,
        remote_actor_id: Option<i64>,
        ap_id: Option<String>,
    ) -> Result<bool, StorageError> {
        self.call(move |conn| {
            let n = conn.execute(
                "INSERT OR IGNORE INTO article_likes
                     (article_id, user_id, remote_actor_id, ap_id, inserted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    article_id,
                    user_id,
                    remote_actor_id,
                    ap_id,
                    encode_ts(Utc::now())
                ],
            )?;
            Ok(n > 0)
        })
        .await
    }

    pub async fn delete_article_like_by_ap_id(
        &self,
        ap_id: &str,
        remote_actor_id: i64,
    ) -> Result<usize, StorageError> {
        let ap_id = ap_id.to_string();
        self.call(move |conn| {
            Ok(conn.execute(
                "DELETE FROM article_likes WHERE ap_id = ?1 AND remote_actor_id = ?2",
                params![ap_id, remote_actor_id],
            )?)
        })
        .await
    }

    pub async fn count_article_likes(&self, article_id: i64) -> Result<i64, StorageError> {
        self.call(move |conn| {
            Ok(conn.query_row(
                "SELECT count(*) FROM article_likes WHERE article_id = ?1",
                [article_id],
                |row| row.get(0),
            )?)
        })
        .await
    }

    /// Returns false on a re-delivered Announce.
    pub async fn insert_announce(
        &self,
        object_ap_id: &str,
        article_id: Option<i64>,
        remote_actor_id: i64,
        ap_id: &str,
    ) -> Result<bool, StorageError> {
        let object_ap_id = object_ap_id.to_string();
        let ap_id = ap_id.to_string();
        self.call(move |conn| {
            let n = conn.execute(
                "INSERT OR IGNORE INTO announces
                     (object_ap_id, article_id, remote_actor_id, ap_id, inserted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    object_ap_id,
                    article_id,
                    remote_actor_id,
                    ap_id,
                    encode_ts(Utc::now())
                ],
            )?;
            Ok(n > 0)
        })
        .await
    }

    pub async fn delete_announce_by_ap_id(
        &self,
        ap_id: &str,
        remote_actor_id: i64,
    ) -> Result<usize, StorageError> {
        let ap_id = ap_id.to_string();
        self.call(move |conn| {
            Ok(conn.execute(
                "DELETE FROM announces WHERE ap_id = ?1 AND remote_actor_id = ?2",
                params![ap_id, remote_actor_id],
            )?)
        })
        .await
    }
}
