//! Local user accounts.

use super::{decode_ts, encode_ts, Storage, StorageError};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    Guest,
    User,
    Moderator,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Guest => "guest",
            Role::User => "user",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, StorageError> {
        match raw {
            "guest" => Ok(Role::Guest),
            "user" => Ok(Role::User),
            "moderator" => Ok(Role::Moderator),
            "admin" => Ok(Role::Admin),
            other => Err(StorageError::Internal(format!("unknown role {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserStatus {
    Active,
    Pending,
    Banned,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Pending => "pending",
            UserStatus::Banned => "banned",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, StorageError> {
        match raw {
            "active" => Ok(UserStatus::Active),
            "pending" => Ok(UserStatus::Pending),
            "banned" => Ok(UserStatus::Banned),
            other => Err(StorageError::Internal(format!("unknown status {other:?}"))),
        }
    }
}

/// Per-notification-kind delivery switches. Absent kinds default to on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChannelPrefs {
    pub in_app: bool,
    pub web_push: bool,
}

impl Default for ChannelPrefs {
    fn default() -> Self {
        ChannelPrefs {
            in_app: true,
            web_push: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationPreferences(pub BTreeMap<String, ChannelPrefs>);

impl NotificationPreferences {
    pub fn for_kind(&self, kind: &str) -> ChannelPrefs {
        self.0.get(kind).copied().unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub totp_enabled: bool,
    pub totp_secret_enc: Option<Vec<u8>>,
    /// Unix time of the last accepted TOTP code; the replay guard.
    pub totp_last_used: Option<i64>,
    pub totp_reset_required: bool,
    pub role: Role,
    pub status: UserStatus,
    pub avatar_id: Option<String>,
    pub preferred_locales: Vec<String>,
    pub notification_preferences: NotificationPreferences,
    pub public_key_pem: Option<String>,
    pub private_key_enc: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
}

pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub status: UserStatus,
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<(User, String, String, String, String, String)> {
    Ok((
        User {
            id: row.get("id")?,
            username: row.get("username")?,
            password_hash: row.get("password_hash")?,
            totp_enabled: row.get("totp_enabled")?,
            totp_secret_enc: row.get("totp_secret_enc")?,
            totp_last_used: row.get("totp_last_used")?,
            totp_reset_required: row.get("totp_reset_required")?,
            role: Role::User,
            status: UserStatus::Active,
            avatar_id: row.get("avatar_id")?,
            preferred_locales: Vec::new(),
            notification_preferences: NotificationPreferences::default(),
            public_key_pem: row.get("public_key_pem")?,
            private_key_enc: row.get("private_key_enc")?,
            created_at: Utc::now(),
        },
        row.get("role")?,
        row.get("status")?,
        row.get("preferred_locales")?,
        row.get("notification_preferences")?,
        row.get("created_at")?,
    ))
}

fn finish_user(
    parts: (User, String, String, String, String, String),
) -> Result<User, StorageError> {
    let (mut user, role, status, locales, prefs, created_at) = parts;
    user.role = Role::parse(&role)?;
    user.status = UserStatus::parse(&status)?;
    user.preferred_locales = serde_json::from_str(&locales)?;
    user.notification_preferences = serde_json::from_str(&prefs)?;
    user.created_at = decode_ts(&created_at)?;
    Ok(user)
}

const USER_COLUMNS: &str = "id, username, password_hash, totp_enabled, totp_secret_enc, \
     totp_last_used, totp_reset_required, role, status, avatar_id, preferred_locales, \
     notification_preferences, public_key_pem, private_key_enc, created_at";

impl Storage {
    pub async fn create_user(&self, new: NewUser) -> Result<User, StorageError> {
        self.call(move |conn| {
            let now = encode_ts(Utc::now());
            conn.execute(
                "INSERT INTO users (username, password_hash, role, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    new.username,
                    new.password_hash,
                    new.role.as_str(),
                    new.status.as_str(),
                    now
                ],
            )?;
            let id = conn.last_insert_rowid();
            let parts = conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                [id],
                map_user,
            )?;
            finish_user(parts)
        })
        .await
    }

    pub async fn user_by_id(&self, id: i64) -> Result<Option<User>, StorageError> {
        self.call(move |conn| {
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                [id],
                map_user,
            )
            .optional()?
            .map(finish_user)
            .transpose()
        })
        .await
    }

    /// Case-insensitive username lookup.
    pub async fn user_by_username(&self, username: &str) -> Result<Option<User>, StorageError> {
        let username = username.to_string();
        self.call(move |conn| {
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE lower(username) = lower(?1)"),
                [&username],
                map_user,
            )
            .optional()?
            .map(finish_user)
            .transpose()
        })
        .await
    }

    pub async fn set_totp_secret(
        &self,
        user_id: i64,
        secret_enc: Option<Vec<u8>>,
        enabled: bool,
    ) -> Result<(), StorageError> {
        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE users SET totp_secret_enc = ?2, totp_enabled = ?3,
                        totp_reset_required = 0
                 WHERE id = ?1",
                params![user_id, secret_enc, enabled],
            )?;
            if n == 0 {
                return Err(StorageError::NotFound);
            }
            Ok(())
        })
        .await
    }

    /// Advance the TOTP replay guard. Only moves forward.
    pub async fn set_totp_last_used(
        &self,
        user_id: i64,
        used_at: i64,
    ) -> Result<(), StorageError> {
        self.call(move |conn| {
            conn.execute(
                "UPDATE users SET totp_last_used = ?2
                 WHERE id = ?1 AND (totp_last_used IS NULL OR totp_last_used < ?2)",
                params![user_id, used_at],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn set_totp_reset_required(
        &self,
        user_id: i64,
        required: bool,
    ) -> Result<(), StorageError> {
        self.call(move |conn| {
            conn.execute(
                "UPDATE users SET totp_reset_required = ?2 WHERE id = ?1",
                params![user_id, required],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn set_user_keypair(
        &self,
        user_id: i64,
        public_key_pem: String,
        private_key_enc: Vec<u8>,
    ) -> Result<(), StorageError> {
        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE users SET public_key_pem = ?2, private_key_enc = ?3 WHERE id = ?1",
                params![user_id, public_key_pem, private_key_enc],
            )?;
            if n == 0 {
                return Err(StorageError::NotFound);
            }
            Ok(())
        })
        .await
    }

    pub async fn set_user_status(
        &self,
        user_id: i64,
        status: UserStatus,
    ) -> Result<(), StorageError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let n = tx.execute(
                "UPDATE users SET status = ?2 WHERE id = ?1",
                params![user_id, status.as_str()],
            )?;
            if n == 0 {
                return Err(StorageError::NotFound);
            }
            // Banned users cannot hold live sessions.
            if status == UserStatus::Banned {
                tx.execute("DELETE FROM sessions WHERE user_id = ?1", [user_id])?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn set_user_role(&self, user_id: i64, role: Role) -> Result<(), StorageError> {
        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE users SET role = ?2 WHERE id = ?1",
                params![user_id, role.as_str()],
            )?;
            if n == 0 {
                return Err(StorageError::NotFound);
            }
            Ok(())
        })
        .await
    }

    pub async fn update_notification_preferences(
        &self,
        user_id: i64,
        prefs: NotificationPreferences,
    ) -> Result<(), StorageError> {
        self.call(move |conn| {
            let raw = serde_json::to_string(&prefs)?;
            conn.execute(
                "UPDATE users SET notification_preferences = ?2 WHERE id = ?1",
                params![user_id, raw],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn count_users(&self) -> Result<i64, StorageError> {
        self.call(|conn| {
            Ok(conn.query_row("SELECT count(*) FROM users", [], |row| row.get(0))?)
        })
        .await
    }

    // --- blocks and mutes ---------------------------------------------------

    pub async fn add_user_block(
        &self,
        user_id: i64,
        target_user_id: Option<i64>,
        target_remote_actor_id: Option<i64>,
    ) -> Result<(), StorageError> {
        self.call(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO user_blocks
                     (user_id, target_user_id, target_remote_actor_id)
                 VALUES (?1, ?2, ?3)",
                params![user_id, target_user_id, target_remote_actor_id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn add_user_mute(
        &self,
        user_id: i64,
        target_user_id: Option<i64>,
        target_remote_actor_id: Option<i64>,
    ) -> Result<(), StorageError> {
        self.call(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO user_mutes
                     (user_id, target_user_id, target_remote_actor_id)
                 VALUES (?1, ?2, ?3)",
                params![user_id, target_user_id, target_remote_actor_id],
            )?;
            Ok(())
        })
        .await
    }

    /// True when `user_id` has blocked or muted the given actor.
    pub async fn is_blocked_or_muted(
        &self,
        user_id: i64,
        actor_user_id: Option<i64>,
        actor_remote_actor_id: Option<i64>,
    ) -> Result<bool, StorageError> {
        self.call(move |conn| {
            let hit: i64 = conn.query_row(
                "SELECT
                   (SELECT count(*) FROM user_blocks
                     WHERE user_id = ?1
                       AND (target_user_id = ?2 OR target_remote_actor_id = ?3))
                 + (SELECT count(*) FROM user_mutes
                     WHERE user_id = ?1
                       AND (target_user_id = ?2 OR target_remote_actor_id = ?3))",
                params![user_id, actor_user_id, actor_remote_actor_id],
                |row| row.get(0),
            )?;
            Ok(hit > 0)
        })
        .await
    }
}
