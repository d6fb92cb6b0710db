//! Follow rows: inbound followers of local actors, outbound/local user
//! follows, and local board memberships.

use super::{decode_ts, encode_ts, Storage, StorageError};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowState {
    Pending,
    Accepted,
    Rejected,
}

impl FollowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FollowState::Pending => "pending",
            FollowState::Accepted => "accepted",
            FollowState::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, StorageError> {
        match raw {
            "pending" => Ok(FollowState::Pending),
            "accepted" => Ok(FollowState::Accepted),
            "rejected" => Ok(FollowState::Rejected),
            other => Err(StorageError::Internal(format!("unknown state {other:?}"))),
        }
    }
}

/// Inbound follow: a remote actor following a local user or board.
#[derive(Debug, Clone)]
pub struct Follower {
    pub id: i64,
    pub remote_actor_id: i64,
    pub user_id: Option<i64>,
    pub board_id: Option<i64>,
    pub state: FollowState,
    pub ap_id: String,
    pub created_at: DateTime<Utc>,
}

/// One entry of a user's following collection.
#[derive(Debug, Clone)]
pub enum FollowTarget {
    Remote(String),
    LocalUser(String),
}

/// Outbound or local follow created by a local user. Exactly one of
/// `remote_actor_id` / `followed_user_id` is set.
#[derive(Debug, Clone)]
pub struct UserFollow {
    pub id: i64,
    pub user_id: i64,
    pub remote_actor_id: Option<i64>,
    pub followed_user_id: Option<i64>,
    pub state: FollowState,
    pub ap_id: String,
    pub created_at: DateTime<Utc>,
}

fn map_follower(row: &Row<'_>) -> rusqlite::Result<(Follower, String, String)> {
    Ok((
        Follower {
            id: row.get("id")?,
            remote_actor_id: row.get("remote_actor_id")?,
            user_id: row.get("user_id")?,
            board_id: row.get("board_id")?,
            state: FollowState::Pending,
            ap_id: row.get("ap_id")?,
            created_at: Utc::now(),
        },
        row.get("state")?,
        row.get("created_at")?,
    ))
}

fn finish_follower(parts: (Follower, String, String)) -> Result<Follower, StorageError> {
    let (mut follower, state, created_at) = parts;
    follower.state = FollowState::parse(&state)?;
    follower.created_at = decode_ts(&created_at)?;
    Ok(follower)
}

fn map_user_follow(row: &Row<'_>) -> rusqlite::Result<(UserFollow, String, String)> {
    Ok((
        UserFollow {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            remote_actor_id: row.get("remote_actor_id")?,
            followed_user_id: row.get("followed_user_id")?,
            state: FollowState::Pending,
            ap_id: row.get("ap_id")?,
            created_at: Utc::now(),
        },
        row.get("state")?,
        row.get("created_at")?,
    ))
}

fn finish_user_follow(parts: (UserFollow, String, String)) -> Result<UserFollow, StorageError> {
    let (mut follow, state, created_at) = parts;
    follow.state = FollowState::parse(&state)?;
    follow.created_at = decode_ts(&created_at)?;
    Ok(follow)
}

const FOLLOWER_COLUMNS: &str =
    "id, remote_actor_id, user_id, board_id, state, ap_id, created_at";
const USER_FOLLOW_COLUMNS: &str =
    "id, user_id, remote_actor_id, followed_user_id, state, ap_id, created_at";

impl Storage {
    // --- inbound followers --------------------------------------------------

    /// Upsert an inbound follower row. Re-delivered Follow activities land on
    /// the unique (actor, target) index and return the existing row, which
    /// keeps the handler idempotent.
    pub async fn upsert_follower(
        &self,
        remote_actor_id: i64,
        user_id: Option<i64>,
        board_id: Option<i64>,
        state: FollowState,
        ap_id: &str,
    ) -> Result<Follower, StorageError> {
        let ap_id = ap_id.to_string();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let existing = tx
                .query_row(
                    &format!(
                        "SELECT {FOLLOWER_COLUMNS} FROM followers
                         WHERE remote_actor_id = ?1
                           AND (user_id = ?2 OR board_id = ?3)"
                    ),
                    params![remote_actor_id, user_id, board_id],
                    map_follower,
                )
                .optional()?;
            let row = match existing {
                Some(parts) => parts,
                None => {
                    tx.execute(
                        "INSERT INTO followers
                             (remote_actor_id, user_id, board_id, state, ap_id, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![
                            remote_actor_id,
                            user_id,
                            board_id,
                            state.as_str(),
                            ap_id,
                            encode_ts(Utc::now())
                        ],
                    )?;
                    let id = tx.last_insert_rowid();
                    tx.query_row(
                        &format!("SELECT {FOLLOWER_COLUMNS} FROM followers WHERE id = ?1"),
                        [id],
                        map_follower,
                    )?
                }
            };
            tx.commit()?;
            finish_follower(row)
        })
        .await
    }

    pub async fn follower_by_ap_id(&self, ap_id: &str) -> Result<Option<Follower>, StorageError> {
        let ap_id = ap_id.to_string();
        self.call(move |conn| {
            conn.query_row(
                &format!("SELECT {FOLLOWER_COLUMNS} FROM followers WHERE ap_id = ?1"),
                [&ap_id],
                map_follower,
            )
            .optional()?
            .map(finish_follower)
            .transpose()
        })
        .await
    }

    pub async fn set_follower_state(
        &self,
        follower_id: i64,
        state: FollowState,
    ) -> Result<(), StorageError> {
        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE followers SET state = ?2 WHERE id = ?1",
                params![follower_id, state.as_str()],
            )?;
            if n == 0 {
                return Err(StorageError::NotFound);
            }
            Ok(())
        })
        .await
    }

    /// Undo(Follow) from the remote side: scoped to the actor so a third
    /// party cannot revoke someone else's follow.
    pub async fn delete_follower_by_ap_id(
        &self,
        ap_id: &str,
        remote_actor_id: i64,
    ) -> Result<usize, StorageError> {
        let ap_id = ap_id.to_string();
        self.call(move |conn| {
            Ok(conn.execute(
                "DELETE FROM followers WHERE ap_id = ?1 AND remote_actor_id = ?2",
                params![ap_id, remote_actor_id],
            )?)
        })
        .await
    }

    pub async fn delete_follower_of_target(
        &self,
        remote_actor_id: i64,
        user_id: Option<i64>,
        board_id: Option<i64>,
    ) -> Result<usize, StorageError> {
        self.call(move |conn| {
            Ok(conn.execute(
                "DELETE FROM followers
                 WHERE remote_actor_id = ?1 AND (user_id = ?2 OR board_id = ?3)",
                params![remote_actor_id, user_id, board_id],
            )?)
        })
        .await
    }

    /// Accepted follower actor ap_ids for collection pages.
    pub async fn follower_ap_ids(
        &self,
        user_id: Option<i64>,
        board_id: Option<i64>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<String>, StorageError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT ra.ap_id FROM followers f
                 JOIN remote_actors ra ON ra.id = f.remote_actor_id
                 WHERE f.state = 'accepted' AND (f.user_id = ?1 OR f.board_id = ?2)
                 ORDER BY f.created_at DESC
                 LIMIT ?3 OFFSET ?4",
            )?;
            let rows = stmt
                .query_map(params![user_id, board_id, limit, offset], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn count_followers(
        &self,
        user_id: Option<i64>,
        board_id: Option<i64>,
    ) -> Result<i64, StorageError> {
        self.call(move |conn| {
            Ok(conn.query_row(
                "SELECT count(*) FROM followers
                 WHERE state = 'accepted' AND (user_id = ?1 OR board_id = ?2)",
                params![user_id, board_id],
                |row| row.get(0),
            )?)
        })
        .await
    }

    /// Distinct delivery inboxes of accepted followers, shared inbox
    /// preferred (one POST per domain instead of one per follower).
    pub async fn follower_inboxes(
        &self,
        user_id: Option<i64>,
        board_id: Option<i64>,
    ) -> Result<Vec<String>, StorageError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT coalesce(ra.shared_inbox, ra.inbox) FROM followers f
                 JOIN remote_actors ra ON ra.id = f.remote_actor_id
                 WHERE f.state = 'accepted' AND (f.user_id = ?1 OR f.board_id = ?2)",
            )?;
            let rows = stmt
                .query_map(params![user_id, board_id], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    // --- outbound / local follows -------------------------------------------

    pub async fn insert_user_follow(
        &self,
        user_id: i64,
        remote_actor_id: Option<i64>,
        followed_user_id: Option<i64>,
        state: FollowState,
        ap_id: &str,
    ) -> Result<UserFollow, StorageError> {
        let ap_id = ap_id.to_string();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO user_follows
                     (user_id, remote_actor_id, followed_user_id, state, ap_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    user_id,
                    remote_actor_id,
                    followed_user_id,
                    state.as_str(),
                    ap_id,
                    encode_ts(Utc::now())
                ],
            )?;
            let id = conn.last_insert_rowid();
            let parts = conn.query_row(
                &format!("SELECT {USER_FOLLOW_COLUMNS} FROM user_follows WHERE id = ?1"),
                [id],
                map_user_follow,
            )?;
            finish_user_follow(parts)
        })
        .await
    }

    pub async fn user_follow_for_target(
        &self,
        user_id: i64,
        remote_actor_id: Option<i64>,
        followed_user_id: Option<i64>,
    ) -> Result<Option<UserFollow>, StorageError> {
        self.call(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {USER_FOLLOW_COLUMNS} FROM user_follows
                     WHERE user_id = ?1
                       AND (remote_actor_id = ?2 OR followed_user_id = ?3)"
                ),
                params![user_id, remote_actor_id, followed_user_id],
                map_user_follow,
            )
            .optional()?
            .map(finish_user_follow)
            .transpose()
        })
        .await
    }

    pub async fn user_follow_by_ap_id(
        &self,
        ap_id: &str,
    ) -> Result<Option<UserFollow>, StorageError> {
        let ap_id = ap_id.to_string();
        self.call(move |conn| {
            conn.query_row(
                &format!("SELECT {USER_FOLLOW_COLUMNS} FROM user_follows WHERE ap_id = ?1"),
                [&ap_id],
                map_user_follow,
            )
            .optional()?
            .map(finish_user_follow)
            .transpose()
        })
        .await
    }

    /// Accept/Reject reconciliation, serialized per follow row by the
    /// surrounding transaction.
    pub async fn set_user_follow_state(
        &self,
        ap_id: &str,
        state: FollowState,
    ) -> Result<usize, StorageError> {
        let ap_id = ap_id.to_string();
        self.call(move |conn| {
            Ok(conn.execute(
                "UPDATE user_follows SET state = ?2 WHERE ap_id = ?1",
                params![ap_id, state.as_str()],
            )?)
        })
        .await
    }

    pub async fn delete_user_follow_by_ap_id(&self, ap_id: &str) -> Result<usize, StorageError> {
        let ap_id = ap_id.to_string();
        self.call(move |conn| {
            Ok(conn.execute("DELETE FROM user_follows WHERE ap_id = ?1", [&ap_id])?)
        })
        .await
    }

    /// Remote-initiated removal: only rows pointing at the acting remote
    /// actor may be deleted by its Undo.
    pub async fn delete_user_follow_by_ap_id_for_actor(
        &self,
        ap_id: &str,
        remote_actor_id: i64,
    ) -> Result<usize, StorageError> {
        let ap_id = ap_id.to_string();
        self.call(move |conn| {
            Ok(conn.execute(
                "DELETE FROM user_follows WHERE ap_id = ?1 AND remote_actor_id = ?2",
                params![ap_id, remote_actor_id],
            )?)
        })
        .await
    }

    pub async fn delete_user_follow(
        &self,
        user_id: i64,
        remote_actor_id: Option<i64>,
        followed_user_id: Option<i64>,
    ) -> Result<Option<UserFollow>, StorageError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let existing = tx
                .query_row(
                    &format!(
                        "SELECT {USER_FOLLOW_COLUMNS} FROM user_follows
                         WHERE user_id = ?1
                           AND (remote_actor_id = ?2 OR followed_user_id = ?3)"
                    ),
                    params![user_id, remote_actor_id, followed_user_id],
                    map_user_follow,
                )
                .optional()?;
            if let Some(parts) = &existing {
                tx.execute("DELETE FROM user_follows WHERE id = ?1", [parts.0.id])?;
            }
            tx.commit()?;
            existing.map(finish_user_follow).transpose()
        })
        .await
    }

    /// Remote actors the user follows with accepted state (feed source 1).
    pub async fn accepted_remote_follow_ids(
        &self,
        user_id: i64,
    ) -> Result<Vec<i64>, StorageError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT remote_actor_id FROM user_follows
                 WHERE user_id = ?1 AND state = 'accepted' AND remote_actor_id IS NOT NULL",
            )?;
            let rows = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Who the user follows, for the following collection: remote actor
    /// ap_ids or local usernames (the caller builds local URIs).
    pub async fn following_targets(
        &self,
        user_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<FollowTarget>, StorageError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT ra.ap_id, u.username FROM user_follows uf
                 LEFT JOIN remote_actors ra ON ra.id = uf.remote_actor_id
                 LEFT JOIN users u ON u.id = uf.followed_user_id
                 WHERE uf.user_id = ?1 AND uf.state = 'accepted'
                 ORDER BY uf.created_at DESC
                 LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt
                .query_map(params![user_id, limit, offset], |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows
                .into_iter()
                .filter_map(|pair| match pair {
                    (Some(ap_id), _) => Some(FollowTarget::Remote(ap_id)),
                    (None, Some(username)) => Some(FollowTarget::LocalUser(username)),
                    (None, None) => None,
                })
                .collect())
        })
        .await
    }

    pub async fn count_following(&self, user_id: i64) -> Result<i64, StorageError> {
        self.call(move |conn| {
            Ok(conn.query_row(
                "SELECT count(*) FROM user_follows WHERE user_id = ?1 AND state = 'accepted'",
                [user_id],
                |row| row.get(0),
            )?)
        })
        .await
    }

    /// Move(actor): migrate every follow of `old` to `new` atomically.
    /// A user following both keeps the existing row for `new` and the
    /// duplicate pointing at `old` is dropped.
    pub async fn migrate_user_follows(
        &self,
        old_remote_actor_id: i64,
        new_remote_actor_id: i64,
    ) -> Result<usize, StorageError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM user_follows
                 WHERE remote_actor_id = ?1
                   AND user_id IN (
                        SELECT user_id FROM user_follows WHERE remote_actor_id = ?2)",
                params![old_remote_actor_id, new_remote_actor_id],
            )?;
            let moved = tx.execute(
                "UPDATE user_follows SET remote_actor_id = ?2 WHERE remote_actor_id = ?1",
                params![old_remote_actor_id, new_remote_actor_id],
            )?;
            tx.commit()?;
            Ok(moved)
        })
        .await
    }

    // --- board follows ------------------------------------------------------

    /// Local board follows skip pending entirely.
    pub async fn upsert_board_follow(
        &self,
        user_id: i64,
        board_id: i64,
    ) -> Result<(), StorageError> {
        self.call(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO board_follows (user_id, board_id, state, created_at)
                 VALUES (?1, ?2, 'accepted', ?3)",
                params![user_id, board_id, encode_ts(Utc::now())],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn delete_board_follow(
        &self,
        user_id: i64,
        board_id: i64,
    ) -> Result<usize, StorageError> {
        self.call(move |conn| {
            Ok(conn.execute(
                "DELETE FROM board_follows WHERE user_id = ?1 AND board_id = ?2",
                params![user_id, board_id],
            )?)
        })
        .await
    }

    /// Local users subscribed to a board, for notification fan-out.
    pub async fn board_follower_user_ids(&self, board_id: i64) -> Result<Vec<i64>, StorageError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id FROM board_follows WHERE board_id = ?1 AND state = 'accepted'",
            )?;
            let rows = stmt
                .query_map([board_id], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Local users following a remote actor, for feed fan-out broadcasts.
    pub async fn local_followers_of_remote_actor(
        &self,
        remote_actor_id: i64,
    ) -> Result<Vec<i64>, StorageError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id FROM user_follows
                 WHERE remote_actor_id = ?1 AND state = 'accepted'",
            )?;
            let rows = stmt
                .query_map([remote_actor_id], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Local user ids following a local user (feed source 2 inverse).
    pub async fn local_followers_of_user(&self, user_id: i64) -> Result<Vec<i64>, StorageError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id FROM user_follows
                 WHERE followed_user_id = ?1 AND state = 'accepted'",
            )?;
            let rows = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::remote_actors::tests::remote_actor;
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

    #[tokio::test]
    async fn move_migrates_and_drops_duplicates() {
        let storage = Storage::open_in_memory().unwrap();
        let alice = seed_user(&storage, "alice").await;
        let bob = seed_user(&storage, "bob").await;
        let old = storage
            .upsert_remote_actor(remote_actor("https://old.example/users/zoe"))
            .await
            .unwrap();
        let new = storage
            .upsert_remote_actor(remote_actor("https://new.example/users/zoe"))
            .await
            .unwrap();

        // alice follows both; bob follows only the old account.
        storage
            .insert_user_follow(alice, Some(old.id), None, FollowState::Accepted, "f1")
            .await
            .unwrap();
        storage
            .insert_user_follow(alice, Some(new.id), None, FollowState::Accepted, "f2")
            .await
            .unwrap();
        storage
            .insert_user_follow(bob, Some(old.id), None, FollowState::Accepted, "f3")
            .await
            .unwrap();

        storage.migrate_user_follows(old.id, new.id).await.unwrap();

        let followers = storage
            .local_followers_of_remote_actor(new.id)
            .await
            .unwrap();
        assert_eq!(followers.len(), 2);
        assert!(storage
            .local_followers_of_remote_actor(old.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn follower_upsert_is_idempotent() {
        let storage = Storage::open_in_memory().unwrap();
        let alice = seed_user(&storage, "alice").await;
        let actor = storage
            .upsert_remote_actor(remote_actor("https://remote.example/users/zoe"))
            .await
            .unwrap();
        let first = storage
            .upsert_follower(
                actor.id,
                Some(alice),
                None,
                FollowState::Accepted,
                "https://remote.example/activities/42",
            )
            .await
            .unwrap();
        let second = storage
            .upsert_follower(
                actor.id,
                Some(alice),
                None,
                FollowState::Accepted,
                "https://remote.example/activities/42",
            )
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(storage.count_followers(Some(alice), None).await.unwrap(), 1);
    }
}
