//! Notification rows with tuple-dedup unique indexes.

use super::{decode_ts, encode_ts, Storage, StorageError};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

#[derive(Debug, Clone)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub kind: String,
    pub actor_user_id: Option<i64>,
    pub actor_remote_actor_id: Option<i64>,
    pub article_id: Option<i64>,
    pub comment_id: Option<i64>,
    pub data: serde_json::Value,
    pub read: bool,
    pub inserted_at: DateTime<Utc>,
}

pub struct NewNotification {
    pub user_id: i64,
    pub kind: String,
    pub actor_user_id: Option<i64>,
    pub actor_remote_actor_id: Option<i64>,
    pub article_id: Option<i64>,
    pub comment_id: Option<i64>,
    pub data: serde_json::Value,
}

/// Insert result distinguishing the dedup hit, which callers treat as
/// success.
pub enum NotificationInsert {
    Created(Notification),
    Duplicate,
}

fn map_notification(row: &Row<'_>) -> rusqlite::Result<(Notification, String, String)> {
    Ok((
        Notification {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            kind: row.get("kind")?,
            actor_user_id: row.get("actor_user_id")?,
            actor_remote_actor_id: row.get("actor_remote_actor_id")?,
            article_id: row.get("article_id")?,
            comment_id: row.get("comment_id")?,
            data: serde_json::Value::Null,
            read: row.get("read")?,
            inserted_at: Utc::now(),
        },
        row.get("data")?,
        row.get("inserted_at")?,
    ))
}

fn finish_notification(
    parts: (Notification, String, String),
) -> Result<Notification, StorageError> {
    let (mut notification, data, inserted_at) = parts;
    notification.data = serde_json::from_str(&data)?;
    notification.inserted_at = decode_ts(&inserted_at)?;
    Ok(notification)
}

const NOTIFICATION_COLUMNS: &str = "id, user_id, kind, actor_user_id, actor_remote_actor_id, \
     article_id, comment_id, data, read, inserted_at";

impl Storage {
    /// Insert honoring the dedup indexes; a constraint hit maps to
    /// [NotificationInsert::Duplicate] rather than an error.
    pub async fn insert_notification(
        &self,
        new: NewNotification,
    ) -> Result<NotificationInsert, StorageError> {
        self.call(move |conn| {
            let data = serde_json::to_string(&new.data)?;
            let result = conn.execute(
                "INSERT INTO notifications
                     (user_id, kind, actor_user_id, actor_remote_actor_id, article_id,
                      comment_id, data, inserted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    new.user_id,
                    new.kind,
                    new.actor_user_id,
                    new.actor_remote_actor_id,
                    new.article_id,
                    new.comment_id,
                    data,
                    encode_ts(Utc::now())
                ],
            );
            match result {
                Ok(_) => {
                    let id = conn.last_insert_rowid();
                    let parts = conn.query_row(
                        &format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?1"),
                        [id],
                        map_notification,
                    )?;
                    Ok(NotificationInsert::Created(finish_notification(parts)?))
                }
                Err(e) => match StorageError::from(e) {
                    StorageError::Conflict(_) => Ok(NotificationInsert::Duplicate),
                    other => Err(other),
                },
            }
        })
        .await
    }

    pub async fn notification_by_id(
        &self,
        id: i64,
    ) -> Result<Option<Notification>, StorageError> {
        self.call(move |conn| {
            conn.query_row(
                &format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?1"),
                [id],
                map_notification,
            )
            .optional()?
            .map(finish_notification)
            .transpose()
        })
        .await
    }

    pub async fn list_notifications(
        &self,
        user_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Notification>, StorageError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {NOTIFICATION_COLUMNS} FROM notifications
                 WHERE user_id = ?1
                 ORDER BY inserted_at DESC
                 LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt
                .query_map(params![user_id, limit, offset], map_notification)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(finish_notification).collect()
        })
        .await
    }

    pub async fn mark_notification_read(
        &self,
        notification_id: i64,
        user_id: i64,
    ) -> Result<(), StorageError> {
        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE notifications SET read = 1 WHERE id = ?1 AND user_id = ?2",
                params![notification_id, user_id],
            )?;
            if n == 0 {
                return Err(StorageError::NotFound);
            }
            Ok(())
        })
        .await
    }

    pub async fn mark_all_notifications_read(&self, user_id: i64) -> Result<usize, StorageError> {
        self.call(move |conn| {
            Ok(conn.execute(
                "UPDATE notifications SET read = 1 WHERE user_id = ?1 AND read = 0",
                [user_id],
            )?)
        })
        .await
    }

    pub async fn delete_notifications_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, StorageError> {
        self.call(move |conn| {
            Ok(conn.execute(
                "DELETE FROM notifications WHERE inserted_at < ?1",
                [encode_ts(cutoff)],
            )?)
        })
        .await
    }

    pub async fn unread_notification_count(&self, user_id: i64) -> Result<i64, StorageError> {
        self.call(move |conn| {
            Ok(conn.query_row(
                "SELECT count(*) FROM notifications WHERE user_id = ?1 AND read = 0",
                [user_id],
                |row| row.get(0),
            )?)
        })
        .await
    }
}
