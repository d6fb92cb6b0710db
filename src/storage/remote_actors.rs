//! Cached fediverse actors. The database row is the authoritative cache;
//! `fetched_at` drives the 24-hour refresh policy in the resolver.

use super::{decode_ts, encode_ts, Storage, StorageError};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    Person,
    Group,
    Organization,
    Service,
    Application,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::Person => "Person",
            ActorType::Group => "Group",
            ActorType::Organization => "Organization",
            ActorType::Service => "Service",
            ActorType::Application => "Application",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, StorageError> {
        match raw {
            "Person" => Ok(ActorType::Person),
            "Group" => Ok(ActorType::Group),
            "Organization" => Ok(ActorType::Organization),
            "Service" => Ok(ActorType::Service),
            "Application" => Ok(ActorType::Application),
            other => Err(StorageError::Internal(format!(
                "unknown actor type {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteActor {
    pub id: i64,
    pub ap_id: String,
    pub username: String,
    pub domain: String,
    pub display_name: Option<String>,
    pub public_key_pem: String,
    pub inbox: String,
    pub shared_inbox: Option<String>,
    pub actor_type: ActorType,
    pub icon_url: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

impl RemoteActor {
    /// Prefer the shared inbox for fan-out when the remote advertises one.
    pub fn shared_inbox_or_inbox(&self) -> &str {
        self.shared_inbox.as_deref().unwrap_or(&self.inbox)
    }
}

pub struct UpsertRemoteActor {
    pub ap_id: String,
    pub username: String,
    pub domain: String,
    pub display_name: Option<String>,
    pub public_key_pem: String,
    pub inbox: String,
    pub shared_inbox: Option<String>,
    pub actor_type: ActorType,
    pub icon_url: Option<String>,
}

fn map_actor(row: &Row<'_>) -> rusqlite::Result<(RemoteActor, String, String)> {
    Ok((
        RemoteActor {
            id: row.get("id")?,
            ap_id: row.get("ap_id")?,
            username: row.get("username")?,
            domain: row.get("domain")?,
            display_name: row.get("display_name")?,
            public_key_pem: row.get("public_key_pem")?,
            inbox: row.get("inbox")?,
            shared_inbox: row.get("shared_inbox")?,
            actor_type: ActorType::Person,
            icon_url: row.get("icon_url")?,
            fetched_at: Utc::now(),
        },
        row.get("actor_type")?,
        row.get("fetched_at")?,
    ))
}

fn finish_actor(parts: (RemoteActor, String, String)) -> Result<RemoteActor, StorageError> {
    let (mut actor, actor_type, fetched_at) = parts;
    actor.actor_type = ActorType::parse(&actor_type)?;
    actor.fetched_at = decode_ts(&fetched_at)?;
    Ok(actor)
}

const ACTOR_COLUMNS: &str = "id, ap_id, username, domain, display_name, public_key_pem, \
     inbox, shared_inbox, actor_type, icon_url, fetched_at";

impl Storage {
    /// Insert or refresh the cached actor keyed by `ap_id`; `fetched_at` is
    /// set to now either way.
    pub async fn upsert_remote_actor(
        &self,
        upsert: UpsertRemoteActor,
    ) -> Result<RemoteActor, StorageError> {
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO remote_actors
                     (ap_id, username, domain, display_name, public_key_pem, inbox,
                      shared_inbox, actor_type, icon_url, fetched_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(ap_id) DO UPDATE SET
                     username = excluded.username,
                     domain = excluded.domain,
                     display_name = excluded.display_name,
                     public_key_pem = excluded.public_key_pem,
                     inbox = excluded.inbox,
                     shared_inbox = excluded.shared_inbox,
                     actor_type = excluded.actor_type,
                     icon_url = excluded.icon_url,
                     fetched_at = excluded.fetched_at",
                params![
                    upsert.ap_id,
                    upsert.username,
                    upsert.domain,
                    upsert.display_name,
                    upsert.public_key_pem,
                    upsert.inbox,
                    upsert.shared_inbox,
                    upsert.actor_type.as_str(),
                    upsert.icon_url,
                    encode_ts(Utc::now())
                ],
            )?;
            let parts = conn.query_row(
                &format!("SELECT {ACTOR_COLUMNS} FROM remote_actors WHERE ap_id = ?1"),
                [&upsert.ap_id],
                map_actor,
            )?;
            finish_actor(parts)
        })
        .await
    }

    pub async fn remote_actor_by_ap_id(
        &self,
        ap_id: &str,
    ) -> Result<Option<RemoteActor>, StorageError> {
        let ap_id = ap_id.to_string();
        self.call(move |conn| {
            conn.query_row(
                &format!("SELECT {ACTOR_COLUMNS} FROM remote_actors WHERE ap_id = ?1"),
                [&ap_id],
                map_actor,
            )
            .optional()?
            .map(finish_actor)
            .transpose()
        })
        .await
    }

    pub async fn remote_actor_by_id(
        &self,
        id: i64,
    ) -> Result<Option<RemoteActor>, StorageError> {
        self.call(move |conn| {
            conn.query_row(
                &format!("SELECT {ACTOR_COLUMNS} FROM remote_actors WHERE id = ?1"),
                [id],
                map_actor,
            )
            .optional()?
            .map(finish_actor)
            .transpose()
        })
        .await
    }

    /// Remove an actor whose origin sent `Delete(Actor)`. Follow rows and
    /// likes cascade via foreign keys; articles, comments and feed items are
    /// soft-deleted first so federation Delete stays idempotent.
    pub async fn delete_remote_actor(&self, actor_id: i64) -> Result<(), StorageError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let now = encode_ts(Utc::now());
            tx.execute(
                "UPDATE articles SET deleted_at = ?2
                 WHERE remote_actor_id = ?1 AND deleted_at IS NULL",
                params![actor_id, now],
            )?;
            tx.execute(
                "UPDATE comments SET deleted_at = ?2
                 WHERE remote_actor_id = ?1 AND deleted_at IS NULL",
                params![actor_id, now],
            )?;
            tx.execute(
                "UPDATE feed_items SET deleted_at = ?2
                 WHERE remote_actor_id = ?1 AND deleted_at IS NULL",
                params![actor_id, now],
            )?;
            tx.execute("DELETE FROM remote_actors WHERE id = ?1", [actor_id])?;
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn remote_actor(ap_id: &str) -> UpsertRemoteActor {
        let url = url::Url::parse(ap_id).unwrap();
        UpsertRemoteActor {
            ap_id: ap_id.to_string(),
            username: url.path_segments().unwrap().next_back().unwrap().to_string(),
            domain: url.host_str().unwrap().to_string(),
            display_name: None,
            public_key_pem: "-----BEGIN PUBLIC KEY-----\n-----END PUBLIC KEY-----\n".into(),
            inbox: format!("{ap_id}/inbox"),
            shared_inbox: None,
            actor_type: ActorType::Person,
            icon_url: None,
        }
    }

    #[tokio::test]
    async fn upsert_refreshes_in_place() {
        let storage = Storage::open_in_memory().unwrap();
        let first = storage
            .upsert_remote_actor(remote_actor("https://remote.example/users/zoe"))
            .await
            .unwrap();
        let mut update = remote_actor("https://remote.example/users/zoe");
        update.display_name = Some("Zoe".into());
        let second = storage.upsert_remote_actor(update).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.display_name.as_deref(), Some("Zoe"));
    }
}
