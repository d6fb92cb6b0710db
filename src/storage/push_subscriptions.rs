//! Web Push endpoints registered by browsers.

use super::{decode_ts, encode_ts, Storage, StorageError};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

#[derive(Debug, Clone)]
pub struct PushSubscription {
    pub id: i64,
    pub user_id: i64,
    pub endpoint: String,
    /// 65-byte uncompressed P-256 point from the client.
    pub p256dh: Vec<u8>,
    /// 16-byte client auth secret.
    pub auth: Vec<u8>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn map_subscription(row: &Row<'_>) -> rusqlite::Result<(PushSubscription, String)> {
    Ok((
        PushSubscription {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            endpoint: row.get("endpoint")?,
            p256dh: row.get("p256dh")?,
            auth: row.get("auth")?,
            user_agent: row.get("user_agent")?,
            created_at: Utc::now(),
        },
        row.get("created_at")?,
    ))
}

fn finish_subscription(
    parts: (PushSubscription, String),
) -> Result<PushSubscription, StorageError> {
    let (mut sub, created_at) = parts;
    sub.created_at = decode_ts(&created_at)?;
    Ok(sub)
}

const SUBSCRIPTION_COLUMNS: &str =
    "id, user_id, endpoint, p256dh, auth, user_agent, created_at";

impl Storage {
    /// Endpoint is the natural key; re-registration replaces the key
    /// material and may move the endpoint to another user.
    pub async fn upsert_push_subscription(
        &self,
        user_id: i64,
        endpoint: &str,
        p256dh: Vec<u8>,
        auth: Vec<u8>,
        user_agent: Option<String>,
    ) -> Result<PushSubscription, StorageError> {
        let endpoint = endpoint.to_string();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO push_subscriptions
                     (user_id, endpoint, p256dh, auth, user_agent, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(endpoint) DO UPDATE SET
                     user_id = excluded.user_id,
                     p256dh = excluded.p256dh,
                     auth = excluded.auth,
                     user_agent = excluded.user_agent",
                params![
                    user_id,
                    endpoint,
                    p256dh,
                    auth,
                    user_agent,
                    encode_ts(Utc::now())
                ],
            )?;
            let parts = conn.query_row(
                &format!(
                    "SELECT {SUBSCRIPTION_COLUMNS} FROM push_subscriptions WHERE endpoint = ?1"
                ),
                [&endpoint],
                map_subscription,
            )?;
            finish_subscription(parts)
        })
        .await
    }

    pub async fn push_subscriptions_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<PushSubscription>, StorageError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SUBSCRIPTION_COLUMNS} FROM push_subscriptions WHERE user_id = ?1"
            ))?;
            let rows = stmt
                .query_map([user_id], map_subscription)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(finish_subscription).collect()
        })
        .await
    }

    /// Stale-subscription cleanup after a 404/410 from the push service.
    pub async fn delete_push_subscription_by_endpoint(
        &self,
        endpoint: &str,
    ) -> Result<usize, StorageError> {
        let endpoint = endpoint.to_string();
        self.call(move |conn| {
            Ok(conn.execute(
                "DELETE FROM push_subscriptions WHERE endpoint = ?1",
                [&endpoint],
            )?)
        })
        .await
    }
}
