//! Boards: local groups that federate as `Group` actors.

use super::{encode_ts, users::Role, Storage, StorageError};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

/// Whether a remote Follow is accepted automatically or held for a
/// moderator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptPolicy {
    Open,
    FollowersOnly,
}

impl AcceptPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcceptPolicy::Open => "open",
            AcceptPolicy::FollowersOnly => "followers_only",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, StorageError> {
        match raw {
            "open" => Ok(AcceptPolicy::Open),
            "followers_only" => Ok(AcceptPolicy::FollowersOnly),
            other => Err(StorageError::Internal(format!("unknown policy {other:?}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Board {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub description: String,
    pub parent_id: Option<i64>,
    pub position: i64,
    pub min_role_to_view: Role,
    pub ap_enabled: bool,
    pub ap_accept_policy: AcceptPolicy,
    pub public_key_pem: Option<String>,
    pub private_key_enc: Option<Vec<u8>>,
}

impl Board {
    /// Private boards (anything above guest visibility) are invisible to
    /// federation.
    pub fn is_public(&self) -> bool {
        self.min_role_to_view == Role::Guest
    }
}

pub struct NewBoard {
    pub slug: String,
    pub name: String,
    pub description: String,
    pub parent_id: Option<i64>,
    pub position: i64,
    pub min_role_to_view: Role,
    pub ap_enabled: bool,
    pub ap_accept_policy: AcceptPolicy,
}

/// Slugs are lowercase alphanumeric runs joined by single dashes; they end
/// up in actor URIs, so nothing else is allowed in.
pub fn valid_board_slug(slug: &str) -> bool {
    if slug.is_empty() {
        return false;
    }
    let mut previous_dash = true;
    for c in slug.chars() {
        match c {
            'a'..='z' | '0'..='9' => previous_dash = false,
            '-' if !previous_dash => previous_dash = true,
            _ => return false,
        }
    }
    !previous_dash
}

fn map_board(row: &Row<'_>) -> rusqlite::Result<(Board, String, String)> {
    Ok((
        Board {
            id: row.get("id")?,
            slug: row.get("slug")?,
            name: row.get("name")?,
            description: row.get("description")?,
            parent_id: row.get("parent_id")?,
            position: row.get("position")?,
            min_role_to_view: Role::Guest,
            ap_enabled: row.get("ap_enabled")?,
            ap_accept_policy: AcceptPolicy::Open,
            public_key_pem: row.get("public_key_pem")?,
            private_key_enc: row.get("private_key_enc")?,
        },
        row.get("min_role_to_view")?,
        row.get("ap_accept_policy")?,
    ))
}

fn finish_board(parts: (Board, String, String)) -> Result<Board, StorageError> {
    let (mut board, role, policy) = parts;
    board.min_role_to_view = Role::parse(&role)?;
    board.ap_accept_policy = AcceptPolicy::parse(&policy)?;
    Ok(board)
}

const BOARD_COLUMNS: &str = "id, slug, name, description, parent_id, position, \
     min_role_to_view, ap_enabled, ap_accept_policy, public_key_pem, private_key_enc";

impl Storage {
    pub async fn create_board(&self, new: NewBoard) -> Result<Board, StorageError> {
        if !valid_board_slug(&new.slug) {
            return Err(StorageError::Conflict(format!(
                "invalid board slug {:?}",
                new.slug
            )));
        }
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO boards
                     (slug, name, description, parent_id, position, min_role_to_view,
                      ap_enabled, ap_accept_policy, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    new.slug,
                    new.name,
                    new.description,
                    new.parent_id,
                    new.position,
                    new.min_role_to_view.as_str(),
                    new.ap_enabled,
                    new.ap_accept_policy.as_str(),
                    encode_ts(Utc::now())
                ],
            )?;
            let id = conn.last_insert_rowid();
            let parts = conn.query_row(
                &format!("SELECT {BOARD_COLUMNS} FROM boards WHERE id = ?1"),
                [id],
                map_board,
            )?;
            finish_board(parts)
        })
        .await
    }

    pub async fn board_by_id(&self, id: i64) -> Result<Option<Board>, StorageError> {
        self.call(move |conn| {
            conn.query_row(
                &format!("SELECT {BOARD_COLUMNS} FROM boards WHERE id = ?1"),
                [id],
                map_board,
            )
            .optional()?
            .map(finish_board)
            .transpose()
        })
        .await
    }

    pub async fn board_by_slug(&self, slug: &str) -> Result<Option<Board>, StorageError> {
        let slug = slug.to_string();
        self.call(move |conn| {
            conn.query_row(
                &format!("SELECT {BOARD_COLUMNS} FROM boards WHERE slug = ?1"),
                [&slug],
                map_board,
            )
            .optional()?
            .map(finish_board)
            .transpose()
        })
        .await
    }

    pub async fn set_board_keypair(
        &self,
        board_id: i64,
        public_key_pem: String,
        private_key_enc: Vec<u8>,
    ) -> Result<(), StorageError> {
        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE boards SET public_key_pem = ?2, private_key_enc = ?3 WHERE id = ?1",
                params![board_id, public_key_pem, private_key_enc],
            )?;
            if n == 0 {
                return Err(StorageError::NotFound);
            }
            Ok(())
        })
        .await
    }

    /// Public, federation-enabled boards ordered by position.
    pub async fn list_public_boards(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Board>, StorageError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {BOARD_COLUMNS} FROM boards
                 WHERE min_role_to_view = 'guest' AND ap_enabled = 1
                 ORDER BY position ASC, slug ASC
                 LIMIT ?1 OFFSET ?2"
            ))?;
            let rows = stmt
                .query_map([limit, offset], map_board)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(finish_board).collect()
        })
        .await
    }

    pub async fn count_public_boards(&self) -> Result<i64, StorageError> {
        self.call(|conn| {
            Ok(conn.query_row(
                "SELECT count(*) FROM boards
                 WHERE min_role_to_view = 'guest' AND ap_enabled = 1",
                [],
                |row| row.get(0),
            )?)
        })
        .await
    }

    pub async fn sub_board_slugs(&self, board_id: i64) -> Result<Vec<String>, StorageError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT slug FROM boards WHERE parent_id = ?1 ORDER BY position ASC",
            )?;
            let rows = stmt
                .query_map([board_id], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_board(slug: &str) -> NewBoard {
        NewBoard {
            slug: slug.to_string(),
            name: slug.to_string(),
            description: String::new(),
            parent_id: None,
            position: 0,
            min_role_to_view: Role::Guest,
            ap_enabled: true,
            ap_accept_policy: AcceptPolicy::Open,
        }
    }

    #[test]
    fn slug_validation() {
        assert!(valid_board_slug("rust"));
        assert!(valid_board_slug("rust-lang-2024"));
        assert!(!valid_board_slug(""));
        assert!(!valid_board_slug("Rust"));
        assert!(!valid_board_slug("-rust"));
        assert!(!valid_board_slug("rust-"));
        assert!(!valid_board_slug("rust--lang"));
    }

    #[tokio::test]
    async fn slug_is_unique() {
        let storage = Storage::open_in_memory().unwrap();
        storage.create_board(test_board("rust")).await.unwrap();
        let dup = storage.create_board(test_board("rust")).await;
        assert!(matches!(dup, Err(StorageError::Conflict(_))));
    }

    #[tokio::test]
    async fn private_boards_are_not_listed() {
        let storage = Storage::open_in_memory().unwrap();
        storage.create_board(test_board("open")).await.unwrap();
        let mut private = test_board("members");
        private.min_role_to_view = Role::User;
        storage.create_board(private).await.unwrap();

        let listed = storage.list_public_boards(0, 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].slug, "open");
        assert_eq!(storage.count_public_boards().await.unwrap(), 1);
    }
}
