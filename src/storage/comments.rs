//! Hierarchical comments.

use super::{decode_ts, decode_ts_opt, encode_ts, Storage, StorageError};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;

/// Reply depth beyond which ancestor authors no longer get notified.
pub const MAX_NOTIFIED_REPLY_DEPTH: usize = 5;

#[derive(Debug, Clone)]
pub struct Comment {
    pub id: i64,
    pub body: String,
    pub body_html: Option<String>,
    pub parent_id: Option<i64>,
    pub article_id: i64,
    pub user_id: Option<i64>,
    pub remote_actor_id: Option<i64>,
    pub ap_id: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub struct NewComment {
    pub body: String,
    pub body_html: Option<String>,
    pub parent_id: Option<i64>,
    pub article_id: i64,
    pub user_id: Option<i64>,
    pub remote_actor_id: Option<i64>,
    pub ap_id: Option<String>,
}

fn map_comment(row: &Row<'_>) -> rusqlite::Result<(Comment, Option<String>, String)> {
    Ok((
        Comment {
            id: row.get("id")?,
            body: row.get("body")?,
            body_html: row.get("body_html")?,
            parent_id: row.get("parent_id")?,
            article_id: row.get("article_id")?,
            user_id: row.get("user_id")?,
            remote_actor_id: row.get("remote_actor_id")?,
            ap_id: row.get("ap_id")?,
            deleted_at: None,
            created_at: Utc::now(),
        },
        row.get("deleted_at")?,
        row.get("created_at")?,
    ))
}

fn finish_comment(parts: (Comment, Option<String>, String)) -> Result<Comment, StorageError> {
    let (mut comment, deleted_at, created_at) = parts;
    comment.deleted_at = decode_ts_opt(deleted_at)?;
    comment.created_at = decode_ts(&created_at)?;
    Ok(comment)
}

const COMMENT_COLUMNS: &str = "id, body, body_html, parent_id, article_id, user_id, \
     remote_actor_id, ap_id, deleted_at, created_at";

fn select_one<P: rusqlite::Params>(
    conn: &Connection,
    where_clause: &str,
    params: P,
) -> Result<Option<Comment>, StorageError> {
    conn.query_row(
        &format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE {where_clause}"),
        params,
        map_comment,
    )
    .optional()?
    .map(finish_comment)
    .transpose()
}

impl Storage {
    pub async fn create_comment(&self, new: NewComment) -> Result<Comment, StorageError> {
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO comments
                     (body, body_html, parent_id, article_id, user_id, remote_actor_id,
                      ap_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    new.body,
                    new.body_html,
                    new.parent_id,
                    new.article_id,
                    new.user_id,
                    new.remote_actor_id,
                    new.ap_id,
                    encode_ts(Utc::now())
                ],
            )?;
            let id = conn.last_insert_rowid();
            select_one(conn, "id = ?1", [id])?.ok_or(StorageError::NotFound)
        })
        .await
    }

    pub async fn comment_by_id(&self, id: i64) -> Result<Option<Comment>, StorageError> {
        self.call(move |conn| select_one(conn, "id = ?1", [id])).await
    }

    pub async fn comment_by_ap_id(&self, ap_id: &str) -> Result<Option<Comment>, StorageError> {
        let ap_id = ap_id.to_string();
        self.call(move |conn| select_one(conn, "ap_id = ?1", [&ap_id]))
            .await
    }

    pub async fn update_comment_content(
        &self,
        comment_id: i64,
        body: String,
        body_html: Option<String>,
    ) -> Result<(), StorageError> {
        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE comments SET body = ?2, body_html = ?3 WHERE id = ?1",
                params![comment_id, body, body_html],
            )?;
            if n == 0 {
                return Err(StorageError::NotFound);
            }
            Ok(())
        })
        .await
    }

    pub async fn soft_delete_comment(&self, comment_id: i64) -> Result<(), StorageError> {
        self.call(move |conn| {
            conn.execute(
                "UPDATE comments SET deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
                params![comment_id, encode_ts(Utc::now())],
            )?;
            Ok(())
        })
        .await
    }

    /// All live comments of an article ordered by insertion time. Readers
    /// build the tree from the parent → children adjacency; the store never
    /// recurses.
    pub async fn comments_for_article(
        &self,
        article_id: i64,
    ) -> Result<Vec<Comment>, StorageError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COMMENT_COLUMNS} FROM comments
                 WHERE article_id = ?1 AND deleted_at IS NULL
                 ORDER BY created_at ASC"
            ))?;
            let rows = stmt
                .query_map([article_id], map_comment)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(finish_comment).collect()
        })
        .await
    }

    pub async fn count_comments(&self, article_id: i64) -> Result<i64, StorageError> {
        self.call(move |conn| {
            Ok(conn.query_row(
                "SELECT count(*) FROM comments WHERE article_id = ?1 AND deleted_at IS NULL",
                [article_id],
                |row| row.get(0),
            )?)
        })
        .await
    }

    /// Depth of a comment in its thread, walking at most
    /// [MAX_NOTIFIED_REPLY_DEPTH] parent links.
    pub async fn comment_depth(&self, comment_id: i64) -> Result<usize, StorageError> {
        self.call(move |conn| {
            let mut depth = 0;
            let mut cursor = Some(comment_id);
            while let Some(id) = cursor {
                if depth > MAX_NOTIFIED_REPLY_DEPTH {
                    break;
                }
                let parent: Option<i64> = conn
                    .query_row("SELECT parent_id FROM comments WHERE id = ?1", [id], |row| {
                        row.get(0)
                    })
                    .optional()?
                    .flatten();
                if parent.is_some() {
                    depth += 1;
                }
                cursor = parent;
            }
            Ok(depth)
        })
        .await
    }

    /// Feed source 3: comments on articles the user authored or previously
    /// commented on, excluding their own, soft-deleted rows, and
    /// blocked/muted commenters.
    pub async fn feed_comments_for_user(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<Comment>, StorageError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COMMENT_COLUMNS} FROM comments c
                 WHERE c.deleted_at IS NULL
                   AND (c.user_id IS NULL OR c.user_id <> ?1)
                   AND c.article_id IN (
                        SELECT id FROM articles WHERE user_id = ?1 AND deleted_at IS NULL
                        UNION
                        SELECT article_id FROM comments WHERE user_id = ?1)
                   AND (c.user_id IS NULL OR c.user_id NOT IN (
                        SELECT target_user_id FROM user_blocks
                        WHERE user_id = ?1 AND target_user_id IS NOT NULL
                        UNION
                        SELECT target_user_id FROM user_mutes
                        WHERE user_id = ?1 AND target_user_id IS NOT NULL))
                   AND (c.remote_actor_id IS NULL OR c.remote_actor_id NOT IN (
                        SELECT target_remote_actor_id FROM user_blocks
                        WHERE user_id = ?1 AND target_remote_actor_id IS NOT NULL
                        UNION
                        SELECT target_remote_actor_id FROM user_mutes
                        WHERE user_id = ?1 AND target_remote_actor_id IS NOT NULL))
                 ORDER BY c.created_at DESC
                 LIMIT ?2"
            ))?;
            let rows = stmt
                .query_map(params![user_id, limit], map_comment)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(finish_comment).collect()
        })
        .await
    }

    pub async fn count_feed_comments_for_user(&self, user_id: i64) -> Result<i64, StorageError> {
        self.call(move |conn| {
            Ok(conn.query_row(
                "SELECT count(*) FROM comments c
                 WHERE c.deleted_at IS NULL
                   AND (c.user_id IS NULL OR c.user_id <> ?1)
                   AND c.article_id IN (
                        SELECT id FROM articles WHERE user_id = ?1 AND deleted_at IS NULL
                        UNION
                        SELECT article_id FROM comments WHERE user_id = ?1)",
                [user_id],
                |row| row.get(0),
            )?)
        })
        .await
    }
}

/// Parent → children adjacency for thread rendering.
pub fn adjacency(comments: &[Comment]) -> BTreeMap<Option<i64>, Vec<i64>> {
    let mut map: BTreeMap<Option<i64>, Vec<i64>> = BTreeMap::new();
    for comment in comments {
        map.entry(comment.parent_id).or_default().push(comment.id);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::articles::NewArticle;
    use crate::storage::users::{NewUser, Role, UserStatus};

    async fn seed(storage: &Storage) -> (i64, i64) {
        let user_id = storage
            .create_user(NewUser {
                username: "alice".into(),
                password_hash: "x".into(),
                role: Role::User,
                status: UserStatus::Active,
            })
            .await
            .unwrap()
            .id;
        let article_id = storage
            .create_article(
                NewArticle {
                    title: "t".into(),
                    body: "b".into(),
                    body_html: None,
                    slug: "t".into(),
                    user_id: Some(user_id),
                    remote_actor_id: None,
                    ap_id: None,
                    forwardable: true,
                },
                vec![],
            )
            .await
            .unwrap()
            .id;
        (user_id, article_id)
    }

    fn reply(article_id: i64, user_id: i64, parent_id: Option<i64>) -> NewComment {
        NewComment {
            body: "hi".into(),
            body_html: None,
            parent_id,
            article_id,
            user_id: Some(user_id),
            remote_actor_id: None,
            ap_id: None,
        }
    }

    #[tokio::test]
    async fn depth_walks_parents() {
        let storage = Storage::open_in_memory().unwrap();
        let (user_id, article_id) = seed(&storage).await;
        let root = storage
            .create_comment(reply(article_id, user_id, None))
            .await
            .unwrap();
        let child = storage
            .create_comment(reply(article_id, user_id, Some(root.id)))
            .await
            .unwrap();
        let grandchild = storage
            .create_comment(reply(article_id, user_id, Some(child.id)))
            .await
            .unwrap();
        assert_eq!(storage.comment_depth(root.id).await.unwrap(), 0);
        assert_eq!(storage.comment_depth(grandchild.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn adjacency_groups_children() {
        let storage = Storage::open_in_memory().unwrap();
        let (user_id, article_id) = seed(&storage).await;
        let root = storage
            .create_comment(reply(article_id, user_id, None))
            .await
            .unwrap();
        storage
            .create_comment(reply(article_id, user_id, Some(root.id)))
            .await
            .unwrap();
        storage
            .create_comment(reply(article_id, user_id, Some(root.id)))
            .await
            .unwrap();
        let comments = storage.comments_for_article(article_id).await.unwrap();
        let map = adjacency(&comments);
        assert_eq!(map[&None], vec![root.id]);
        assert_eq!(map[&Some(root.id)].len(), 2);
    }
}
