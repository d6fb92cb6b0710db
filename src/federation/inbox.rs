//! Inbound dispatch for the shared and per-actor inboxes.
//!
//! Pipeline: body cap → schema check → HTTP signature (keyId actor must be
//! the activity actor) → 24 h dedup → typed dispatch. Every handler is
//! idempotent, so at-least-once delivery from remotes is safe.

use crate::{
    context::AppContext,
    error::{Error, SignatureError},
    federation::{
        activities::{Activity, InboxActivity},
        resolver, signatures,
    },
    storage::remote_actors::RemoteActor,
};
use http::{HeaderMap, Method, Uri};
use tracing::{debug, info};
use url::Url;

/// Largest accepted inbox payload.
pub const INBOX_BODY_LIMIT: usize = 1024 * 1024;

/// What the HTTP layer should answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxOutcome {
    /// 202: accepted and applied.
    Accepted,
    /// 200: replay inside the dedup window; nothing happened.
    Duplicate,
}

/// Full inbox pipeline for one POST.
pub async fn receive_activity(
    ctx: &AppContext,
    headers: &HeaderMap,
    method: &Method,
    uri: &Uri,
    body: &[u8],
) -> Result<InboxOutcome, Error> {
    if !ctx.config().federation_enabled {
        return Err(Error::NotFound);
    }
    if body.len() > INBOX_BODY_LIMIT {
        return Err(Error::Validation("body exceeds 1 MiB".to_string()));
    }

    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| Error::Validation(format!("invalid json: {e}")))?;
    let (id, actor) = require_envelope(&value)?;

    // The signer must be the activity's actor; relayed signatures are not
    // accepted.
    let key_actor = signatures::signing_actor_url(headers)?;
    if key_actor != actor {
        return Err(SignatureError::UnknownActor.into());
    }
    let signer = resolver::resolve_by_key_id(ctx, &key_actor)
        .await
        .map_err(|e| {
            debug!("failed to resolve signing actor {key_actor}: {e}");
            Error::from(SignatureError::UnknownActor)
        })?;
    signatures::verify_request(headers, method, uri, body, &signer.public_key_pem)?;

    dispatch_trusted(ctx, &signer, &id, value).await
}

/// Dedup and dispatch an activity whose signature has been verified.
pub async fn dispatch_trusted(
    ctx: &AppContext,
    signer: &RemoteActor,
    id: &Url,
    value: serde_json::Value,
) -> Result<InboxOutcome, Error> {
    // Re-delivery within the window: 200, no side effects.
    if ctx.is_duplicate_activity(id.as_str()) {
        debug!(%id, "duplicate activity dropped");
        return Ok(InboxOutcome::Duplicate);
    }

    // The activity id must come from the actor's origin and not from us.
    if ctx.config().is_local_url(id) {
        return Err(Error::Validation("activity claims a local id".to_string()));
    }
    ctx.config().verify_remote_url(id)?;

    let activity: InboxActivity = serde_json::from_value(value)
        .map_err(|e| Error::Validation(format!("unsupported activity: {e}")))?;
    if activity.actor().as_str() != signer.ap_id {
        return Err(SignatureError::UnknownActor.into());
    }

    info!(%id, actor = %signer.ap_id, "receiving activity");
    activity.receive(ctx, signer).await?;
    // Only applied activities enter the dedup window; a failed handler may
    // be retried by the remote.
    ctx.remember_activity(id.as_str());
    Ok(InboxOutcome::Accepted)
}

/// The {id, type, actor} triple every activity must carry.
fn require_envelope(value: &serde_json::Value) -> Result<(Url, Url), Error> {
    let id = value
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Validation("activity has no id".to_string()))?;
    value
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Validation("activity has no type".to_string()))?;
    let actor = value
        .get("actor")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Validation("activity has no actor".to_string()))?;
    let id = Url::parse(id).map_err(|_| Error::Validation("activity id is not a url".to_string()))?;
    let actor =
        Url::parse(actor).map_err(|_| Error::Validation("actor is not a url".to_string()))?;
    Ok((id, actor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::SiteConfig,
        storage::{
            follows::FollowState,
            remote_actors::tests::remote_actor,
            users::{NewUser, Role, UserStatus},
            Storage,
        },
    };
    use serde_json::json;

    async fn test_ctx() -> AppContext {
        let config = SiteConfig::builder()
            .base_url(Url::parse("https://baud.example").unwrap())
            .totp_vault_key([1; 32])
            .vapid_vault_key([2; 32])
            .build()
            .unwrap();
        let (ctx, _rx) = AppContext::new(config, Storage::open_in_memory().unwrap());
        ctx
    }

    #[tokio::test]
    async fn envelope_fields_are_required() {
        let missing_actor = json!({
            "id": "https://remote.example/activities/1",
            "type": "Follow"
        });
        assert!(require_envelope(&missing_actor).is_err());
        let complete = json!({
            "id": "https://remote.example/activities/1",
            "type": "Follow",
            "actor": "https://remote.example/users/zoe"
        });
        assert!(require_envelope(&complete).is_ok());
    }

    #[tokio::test]
    async fn duplicate_follow_has_no_second_effect() {
        let ctx = test_ctx().await;
        let alice = ctx
            .storage()
            .create_user(NewUser {
                username: "alice".into(),
                password_hash: "x".into(),
                role: Role::User,
                status: UserStatus::Active,
            })
            .await
            .unwrap();
        let signer = ctx
            .storage()
            .upsert_remote_actor(remote_actor("https://remote.example/users/zoe"))
            .await
            .unwrap();

        let id = Url::parse("https://remote.example/activities/42").unwrap();
        let follow = json!({
            "id": id.as_str(),
            "type": "Follow",
            "actor": signer.ap_id,
            "object": "https://baud.example/ap/users/alice"
        });

        let first = dispatch_trusted(&ctx, &signer, &id, follow.clone())
            .await
            .unwrap();
        assert_eq!(first, InboxOutcome::Accepted);
        let row = ctx
            .storage()
            .follower_by_ap_id(id.as_str())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.state, FollowState::Accepted);
        assert_eq!(row.user_id, Some(alice.id));

        // Replay: 200-with-nothing. Still exactly one follower row and no
        // second Accept in the delivery queue.
        let second = dispatch_trusted(&ctx, &signer, &id, follow).await.unwrap();
        assert_eq!(second, InboxOutcome::Duplicate);
        assert_eq!(
            ctx.storage()
                .count_followers(Some(alice.id), None)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn local_activity_ids_are_rejected() {
        let ctx = test_ctx().await;
        let signer = ctx
            .storage()
            .upsert_remote_actor(remote_actor("https://remote.example/users/zoe"))
            .await
            .unwrap();
        let id = Url::parse("https://baud.example/ap/activities/1").unwrap();
        let activity = json!({
            "id": id.as_str(),
            "type": "Follow",
            "actor": signer.ap_id,
            "object": "https://baud.example/ap/users/alice"
        });
        assert!(dispatch_trusted(&ctx, &signer, &id, activity).await.is_err());
    }

    #[tokio::test]
    async fn actor_mismatch_is_rejected() {
        let ctx = test_ctx().await;
        let signer = ctx
            .storage()
            .upsert_remote_actor(remote_actor("https://remote.example/users/zoe"))
            .await
            .unwrap();
        let id = Url::parse("https://remote.example/activities/2").unwrap();
        let activity = json!({
            "id": id.as_str(),
            "type": "Follow",
            "actor": "https://remote.example/users/mallory",
            "object": "https://baud.example/ap/users/alice"
        });
        assert!(dispatch_trusted(&ctx, &signer, &id, activity).await.is_err());
    }
}
