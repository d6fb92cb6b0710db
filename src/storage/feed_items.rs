//! Materialized remote Creates that have no local board or thread anchor.

use super::{decode_ts, decode_ts_opt, encode_ts, Storage, StorageError};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

#[derive(Debug, Clone)]
pub struct FeedItem {
    pub id: i64,
    pub ap_id: String,
    pub remote_actor_id: i64,
    /// Inline article object as received.
    pub article_json: String,
    pub published_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

fn map_item(row: &Row<'_>) -> rusqlite::Result<(FeedItem, String, Option<String>)> {
    Ok((
        FeedItem {
            id: row.get("id")?,
            ap_id: row.get("ap_id")?,
            remote_actor_id: row.get("remote_actor_id")?,
            article_json: row.get("article_json")?,
            published_at: Utc::now(),
            deleted_at: None,
        },
        row.get("published_at")?,
        row.get("deleted_at")?,
    ))
}

fn finish_item(parts: (FeedItem, String, Option<String>)) -> Result<FeedItem, StorageError> {
    let (mut item, published_at, deleted_at) = parts;
    item.published_at = decode_ts(&published_at)?;
    item.deleted_at = decode_ts_opt(deleted_at)?;
    Ok(item)
}

const ITEM_COLUMNS: &str = "id, ap_id, remote_actor_id, article_json, published_at, deleted_at";

impl Storage {
    /// Insert keyed by ap_id; the duplicate from a re-delivered Create is
    /// ignored and the existing row returned.
    pub async fn insert_feed_item(
        &self,
        ap_id: &str,
        remote_actor_id: i64,
        article_json: String,
        published_at: DateTime<Utc>,
    ) -> Result<FeedItem, StorageError> {
        let ap_id = ap_id.to_string();
        self.call(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO feed_items
                     (ap_id, remote_actor_id, article_json, published_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![ap_id, remote_actor_id, article_json, encode_ts(published_at)],
            )?;
            let parts = conn.query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM feed_items WHERE ap_id = ?1"),
                [&ap_id],
                map_item,
            )?;
            finish_item(parts)
        })
        .await
    }

    pub async fn feed_item_by_ap_id(&self, ap_id: &str) -> Result<Option<FeedItem>, StorageError> {
        let ap_id = ap_id.to_string();
        self.call(move |conn| {
            conn.query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM feed_items WHERE ap_id = ?1"),
                [&ap_id],
                map_item,
            )
            .optional()?
            .map(finish_item)
            .transpose()
        })
        .await
    }

    pub async fn soft_delete_feed_item_by_ap_id(&self, ap_id: &str) -> Result<usize, StorageError> {
        let ap_id = ap_id.to_string();
        self.call(move |conn| {
            Ok(conn.execute(
                "UPDATE feed_items SET deleted_at = ?2 WHERE ap_id = ?1 AND deleted_at IS NULL",
                params![ap_id, encode_ts(Utc::now())],
            )?)
        })
        .await
    }

    /// Feed source 1: live items from remote actors the user follows with
    /// accepted state.
    pub async fn feed_items_for_user(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<FeedItem>, StorageError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ITEM_COLUMNS} FROM feed_items fi
                 WHERE fi.deleted_at IS NULL
                   AND fi.remote_actor_id IN (
                        SELECT remote_actor_id FROM user_follows
                        WHERE user_id = ?1 AND state = 'accepted'
                          AND remote_actor_id IS NOT NULL)
                 ORDER BY fi.published_at DESC
                 LIMIT ?2"
            ))?;
            let rows = stmt
                .query_map(params![user_id, limit], map_item)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(finish_item).collect()
        })
        .await
    }

    pub async fn count_feed_items_for_user(&self, user_id: i64) -> Result<i64, StorageError> {
        self.call(move |conn| {
            Ok(conn.query_row(
                "SELECT count(*) FROM feed_items fi
                 WHERE fi.deleted_at IS NULL
                   AND fi.remote_actor_id IN (
                        SELECT remote_actor_id FROM user_follows
                        WHERE user_id = ?1 AND state = 'accepted'
                          AND remote_actor_id IS NOT NULL)",
                [user_id],
                |row| row.get(0),
            )?)
        })
        .await
    }
}
