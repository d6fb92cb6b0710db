//! Articles: local posts and their federated mirrors.

use super::{decode_ts, decode_ts_opt, encode_ts, Storage, StorageError};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

#[derive(Debug, Clone)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub body_html: Option<String>,
    pub slug: String,
    pub pinned: bool,
    pub locked: bool,
    pub forwardable: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub user_id: Option<i64>,
    pub remote_actor_id: Option<i64>,
    pub ap_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct NewArticle {
    pub title: String,
    pub body: String,
    pub body_html: Option<String>,
    pub slug: String,
    pub user_id: Option<i64>,
    pub remote_actor_id: Option<i64>,
    pub ap_id: Option<String>,
    pub forwardable: bool,
}

fn map_article(row: &Row<'_>) -> rusqlite::Result<(Article, Option<String>, String, String)> {
    Ok((
        Article {
            id: row.get("id")?,
            title: row.get("title")?,
            body: row.get("body")?,
            body_html: row.get("body_html")?,
            slug: row.get("slug")?,
            pinned: row.get("pinned")?,
            locked: row.get("locked")?,
            forwardable: row.get("forwardable")?,
            deleted_at: None,
            user_id: row.get("user_id")?,
            remote_actor_id: row.get("remote_actor_id")?,
            ap_id: row.get("ap_id")?,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        },
        row.get("deleted_at")?,
        row.get("created_at")?,
        row.get("updated_at")?,
    ))
}

fn finish_article(
    parts: (Article, Option<String>, String, String),
) -> Result<Article, StorageError> {
    let (mut article, deleted_at, created_at, updated_at) = parts;
    article.deleted_at = decode_ts_opt(deleted_at)?;
    article.created_at = decode_ts(&created_at)?;
    article.updated_at = decode_ts(&updated_at)?;
    Ok(article)
}

const ARTICLE_COLUMNS: &str = "id, title, body, body_html, slug, pinned, locked, forwardable, \
     deleted_at, user_id, remote_actor_id, ap_id, created_at, updated_at";

fn select_one<P: rusqlite::Params>(
    conn: &Connection,
    where_clause: &str,
    params: P,
) -> Result<Option<Article>, StorageError> {
    conn.query_row(
        &format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE {where_clause}"),
        params,
        map_article,
    )
    .optional()?
    .map(finish_article)
    .transpose()
}

impl Storage {
    /// Insert an article and its board links atomically.
    pub async fn create_article(
        &self,
        new: NewArticle,
        board_ids: Vec<i64>,
    ) -> Result<Article, StorageError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let now = encode_ts(Utc::now());
            let search_text = format!("{}\n{}", new.title, new.body);
            tx.execute(
                "INSERT INTO articles
                     (title, body, body_html, slug, user_id, remote_actor_id, ap_id,
                      forwardable, search_text, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                params![
                    new.title,
                    new.body,
                    new.body_html,
                    new.slug,
                    new.user_id,
                    new.remote_actor_id,
                    new.ap_id,
                    new.forwardable,
                    search_text,
                    now
                ],
            )?;
            let id = tx.last_insert_rowid();
            for board_id in &board_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO article_boards (article_id, board_id) VALUES (?1, ?2)",
                    params![id, board_id],
                )?;
            }
            let parts = tx.query_row(
                &format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ?1"),
                [id],
                map_article,
            )?;
            tx.commit()?;
            finish_article(parts)
        })
        .await
    }

    pub async fn article_by_id(&self, id: i64) -> Result<Option<Article>, StorageError> {
        self.call(move |conn| select_one(conn, "id = ?1", [id])).await
    }

    pub async fn article_by_slug(&self, slug: &str) -> Result<Option<Article>, StorageError> {
        let slug = slug.to_string();
        self.call(move |conn| select_one(conn, "slug = ?1", [&slug]))
            .await
    }

    pub async fn article_by_ap_id(&self, ap_id: &str) -> Result<Option<Article>, StorageError> {
        let ap_id = ap_id.to_string();
        self.call(move |conn| select_one(conn, "ap_id = ?1", [&ap_id]))
            .await
    }

    /// Cross-post handling: attach an existing article to more boards.
    pub async fn add_article_to_boards(
        &self,
        article_id: i64,
        board_ids: Vec<i64>,
    ) -> Result<(), StorageError> {
        self.call(move |conn| {
            for board_id in &board_ids {
                conn.execute(
                    "INSERT OR IGNORE INTO article_boards (article_id, board_id) VALUES (?1, ?2)",
                    params![article_id, board_id],
                )?;
            }
            Ok(())
        })
        .await
    }

    pub async fn article_board_ids(&self, article_id: i64) -> Result<Vec<i64>, StorageError> {
        self.call(move |conn| {
            let mut stmt =
                conn.prepare("SELECT board_id FROM article_boards WHERE article_id = ?1")?;
            let rows = stmt
                .query_map([article_id], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn update_article_content(
        &self,
        article_id: i64,
        title: String,
        body: String,
        body_html: Option<String>,
    ) -> Result<Article, StorageError> {
        self.call(move |conn| {
            let search_text = format!("{title}\n{body}");
            let n = conn.execute(
                "UPDATE articles
                 SET title = ?2, body = ?3, body_html = ?4, search_text = ?5, updated_at = ?6
                 WHERE id = ?1",
                params![
                    article_id,
                    title,
                    body,
                    body_html,
                    search_text,
                    encode_ts(Utc::now())
                ],
            )?;
            if n == 0 {
                return Err(StorageError::NotFound);
            }
            select_one(conn, "id = ?1", [article_id])?.ok_or(StorageError::NotFound)
        })
        .await
    }

    /// Soft delete: hidden from every listing, kept for federation Delete
    /// idempotence.
    pub async fn soft_delete_article(&self, article_id: i64) -> Result<(), StorageError> {
        self.call(move |conn| {
            conn.execute(
                "UPDATE articles SET deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
                params![article_id, encode_ts(Utc::now())],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn count_local_articles(&self) -> Result<i64, StorageError> {
        self.call(|conn| {
            Ok(conn.query_row(
                "SELECT count(*) FROM articles WHERE user_id IS NOT NULL AND deleted_at IS NULL",
                [],
                |row| row.get(0),
            )?)
        })
        .await
    }

    /// Articles authored by a local user, newest first (outbox source).
    pub async fn articles_by_user(
        &self,
        user_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Article>, StorageError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ARTICLE_COLUMNS} FROM articles
                 WHERE user_id = ?1 AND deleted_at IS NULL
                 ORDER BY created_at DESC
                 LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt
                .query_map(params![user_id, limit, offset], map_article)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(finish_article).collect()
        })
        .await
    }

    pub async fn count_articles_by_user(&self, user_id: i64) -> Result<i64, StorageError> {
        self.call(move |conn| {
            Ok(conn.query_row(
                "SELECT count(*) FROM articles WHERE user_id = ?1 AND deleted_at IS NULL",
                [user_id],
                |row| row.get(0),
            )?)
        })
        .await
    }

    /// Articles posted to a board, newest first (board outbox source).
    pub async fn articles_by_board(
        &self,
        board_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Article>, StorageError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ARTICLE_COLUMNS} FROM articles a
                 JOIN article_boards ab ON ab.article_id = a.id
                 WHERE ab.board_id = ?1 AND a.deleted_at IS NULL
                 ORDER BY a.created_at DESC
                 LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt
                .query_map(params![board_id, limit, offset], map_article)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(finish_article).collect()
        })
        .await
    }

    pub async fn count_articles_by_board(&self, board_id: i64) -> Result<i64, StorageError> {
        self.call(move |conn| {
            Ok(conn.query_row(
                "SELECT count(*) FROM articles a
                 JOIN article_boards ab ON ab.article_id = a.id
                 WHERE ab.board_id = ?1 AND a.deleted_at IS NULL",
                [board_id],
                |row| row.get(0),
            )?)
        })
        .await
    }

    /// Substring search over the denormalized text column.
    pub async fn search_articles(
        &self,
        query: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Article>, StorageError> {
        let pattern = format!("%{}%", query.replace('%', "\\%").replace('_', "\\_"));
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ARTICLE_COLUMNS} FROM articles
                 WHERE deleted_at IS NULL AND search_text LIKE ?1 ESCAPE '\\'
                 ORDER BY created_at DESC
                 LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt
                .query_map(params![pattern, limit, offset], map_article)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(finish_article).collect()
        })
        .await
    }

    /// Feed source 2: articles by the user or by local users the user
    /// follows (accepted), excluding soft-deleted and blocked/muted authors.
    pub async fn feed_articles_for_user(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<Article>, StorageError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ARTICLE_COLUMNS} FROM articles a
                 WHERE a.deleted_at IS NULL
                   AND a.user_id IS NOT NULL
                   AND (a.user_id = ?1 OR a.user_id IN (
                        SELECT followed_user_id FROM user_follows
                        WHERE user_id = ?1 AND state = 'accepted'
                          AND followed_user_id IS NOT NULL))
                   AND a.user_id NOT IN (
                        SELECT target_user_id FROM user_blocks
                        WHERE user_id = ?1 AND target_user_id IS NOT NULL)
                   AND a.user_id NOT IN (
                        SELECT target_user_id FROM user_mutes
                        WHERE user_id = ?1 AND target_user_id IS NOT NULL)
                 ORDER BY a.created_at DESC
                 LIMIT ?2"
            ))?;
            let rows = stmt
                .query_map(params![user_id, limit], map_article)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(finish_article).collect()
        })
        .await
    }

    pub async fn count_feed_articles_for_user(&self, user_id: i64) -> Result<i64, StorageError> {
        self.call(move |conn| {
            Ok(conn.query_row(
                "SELECT count(*) FROM articles a
                 WHERE a.deleted_at IS NULL
                   AND a.user_id IS NOT NULL
                   AND (a.user_id = ?1 OR a.user_id IN (
                        SELECT followed_user_id FROM user_follows
                        WHERE user_id = ?1 AND state = 'accepted'
                          AND followed_user_id IS NOT NULL))
                   AND a.user_id NOT IN (
                        SELECT target_user_id FROM user_blocks
                        WHERE user_id = ?1 AND target_user_id IS NOT NULL)
                   AND a.user_id NOT IN (
                        SELECT target_user_id FROM user_mutes
                        WHERE user_id = ?1 AND target_user_id IS NOT NULL)",
                [user_id],
                |row| row.get(0),
            )?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::boards::tests::test_board;
    use crate::storage::users::{NewUser, Role, UserStatus};

    async fn seed_user(storage: &Storage, name: &str) -> i64 {
        storage
            .create_user(NewUser {
                username: name.into(),
                password_hash: "x".into(),
                role: Role::User,
                status: UserStatus::Active,
            })
            .await
            .unwrap()
            .id
    }

    fn local_article(user_id: i64, slug: &str) -> NewArticle {
        NewArticle {
            title: format!("Title {slug}"),
            body: "body text".into(),
            body_html: None,
            slug: slug.to_string(),
            user_id: Some(user_id),
            remote_actor_id: None,
            ap_id: None,
            forwardable: true,
        }
    }

    #[tokio::test]
    async fn create_links_boards_atomically() {
        let storage = Storage::open_in_memory().unwrap();
        let user_id = seed_user(&storage, "alice").await;
        let board = storage.create_board(test_board("rust")).await.unwrap();
        let article = storage
            .create_article(local_article(user_id, "hello-world"), vec![board.id])
            .await
            .unwrap();
        assert_eq!(
            storage.article_board_ids(article.id).await.unwrap(),
            vec![board.id]
        );
    }

    #[tokio::test]
    async fn soft_delete_hides_from_listings_but_keeps_row() {
        let storage = Storage::open_in_memory().unwrap();
        let user_id = seed_user(&storage, "alice").await;
        let article = storage
            .create_article(local_article(user_id, "gone-soon"), vec![])
            .await
            .unwrap();
        storage.soft_delete_article(article.id).await.unwrap();

        assert!(storage
            .articles_by_user(user_id, 0, 10)
            .await
            .unwrap()
            .is_empty());
        let kept = storage.article_by_slug("gone-soon").await.unwrap().unwrap();
        assert!(kept.deleted_at.is_some());
    }

    #[tokio::test]
    async fn search_matches_title_and_body() {
        let storage = Storage::open_in_memory().unwrap();
        let user_id = seed_user(&storage, "alice").await;
        storage
            .create_article(local_article(user_id, "searchable"), vec![])
            .await
            .unwrap();
        let hits = storage.search_articles("Title search", 0, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        let misses = storage.search_articles("absent", 0, 10).await.unwrap();
        assert!(misses.is_empty());
    }
}
