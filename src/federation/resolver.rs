//! Remote actor resolution with a database-backed TTL cache.
//!
//! The `remote_actors` row is the authoritative cache: a row fresher than
//! [ACTOR_TTL] is returned without network I/O, anything older is
//! re-fetched. Callers that can live with stale data (inbox signature
//! verification, outbound delivery) opt in explicitly and get the cached
//! row back when a refresh fails transiently.

use crate::{
    context::AppContext,
    error::Error,
    federation::protocol::{
        actors::ActorJson, FEDERATION_CONTENT_TYPE, FEDERATION_CONTENT_TYPE_LD,
    },
    storage::remote_actors::{ActorType, RemoteActor, UpsertRemoteActor},
};
use chrono::{Duration, Utc};
use http::StatusCode;
use tracing::{debug, info, warn};
use url::Url;

/// Cached actors are refreshed after this long.
const ACTOR_TTL: Duration = Duration::hours(24);

/// Whether the caller accepts a stale cached row when the refresh fails
/// transiently.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    Fresh,
    AllowStale,
}

/// Resolve an actor URL: cached row if fresh, otherwise fetch + upsert.
pub async fn resolve(ctx: &AppContext, actor_url: &Url) -> Result<RemoteActor, Error> {
    resolve_with(ctx, actor_url, Staleness::Fresh).await
}

/// Like [resolve], but returns a stale cached row when the remote cannot be
/// reached right now.
pub async fn resolve_stale_ok(ctx: &AppContext, actor_url: &Url) -> Result<RemoteActor, Error> {
    resolve_with(ctx, actor_url, Staleness::AllowStale).await
}

/// Resolve the actor behind a signature keyId (fragment stripped).
pub async fn resolve_by_key_id(ctx: &AppContext, key_id: &Url) -> Result<RemoteActor, Error> {
    let mut actor_url = key_id.clone();
    actor_url.set_fragment(None);
    resolve_stale_ok(ctx, &actor_url).await
}

/// Unconditionally re-fetch, bypassing the TTL.
pub async fn refresh(ctx: &AppContext, actor_url: &Url) -> Result<RemoteActor, Error> {
    ctx.config().verify_remote_url(actor_url)?;
    fetch_and_upsert(ctx, actor_url).await
}

async fn resolve_with(
    ctx: &AppContext,
    actor_url: &Url,
    staleness: Staleness,
) -> Result<RemoteActor, Error> {
    ctx.config().verify_remote_url(actor_url)?;
    if ctx.config().is_local_url(actor_url) {
        return Err(Error::Validation(
            "refusing to resolve a local actor remotely".to_string(),
        ));
    }

    let cached = ctx.storage().remote_actor_by_ap_id(actor_url.as_str()).await?;
    if let Some(actor) = &cached {
        if Utc::now() - actor.fetched_at < ACTOR_TTL {
            return Ok(actor.clone());
        }
    }

    match fetch_and_upsert(ctx, actor_url).await {
        Ok(actor) => Ok(actor),
        Err(Error::NotFound) => Err(Error::NotFound),
        Err(e) if staleness == Staleness::AllowStale && cached.is_some() => {
            warn!("returning stale actor {actor_url} after fetch failure: {e}");
            Ok(cached.expect("checked above"))
        }
        Err(e) => Err(e),
    }
}

async fn fetch_and_upsert(ctx: &AppContext, actor_url: &Url) -> Result<RemoteActor, Error> {
    info!("fetching remote actor {actor_url}");
    let response = ctx
        .client()
        .get(actor_url.as_str())
        .header(
            "accept",
            format!("{FEDERATION_CONTENT_TYPE}, {FEDERATION_CONTENT_TYPE_LD}"),
        )
        .timeout(ctx.config().request_timeout)
        .send()
        .await?;

    if response.status() == StatusCode::GONE {
        // The origin tombstoned the actor; drop our cache transitively.
        if let Some(actor) = ctx.storage().remote_actor_by_ap_id(actor_url.as_str()).await? {
            ctx.storage().delete_remote_actor(actor.id).await?;
        }
        return Err(Error::NotFound);
    }
    if !response.status().is_success() {
        return Err(Error::UpstreamFailure(format!(
            "actor fetch returned {}",
            response.status()
        )));
    }

    let json: ActorJson = response
        .json()
        .await
        .map_err(|e| Error::UpstreamFailure(format!("actor parse: {e}")))?;
    upsert_actor_json(ctx, actor_url, json).await
}

/// Upsert a parsed actor document. The document's own `id` wins over the
/// URL it was fetched from (authoritative self-identification), unless that
/// id belongs to another cached actor.
pub async fn upsert_actor_json(
    ctx: &AppContext,
    requested_url: &Url,
    json: ActorJson,
) -> Result<RemoteActor, Error> {
    if json.id != *requested_url {
        debug!("actor {requested_url} self-identifies as {}", json.id);
        ctx.config().verify_remote_url(&json.id)?;
    }
    let ap_id = if json.id != *requested_url
        && ctx
            .storage()
            .remote_actor_by_ap_id(json.id.as_str())
            .await?
            .is_some()
    {
        // Conflicting claim; keep the row keyed by the requested URL.
        requested_url.clone()
    } else {
        json.id.clone()
    };

    let domain = ap_id
        .host_str()
        .ok_or(Error::Validation("actor id has no host".to_string()))?
        .to_string();
    let username = json
        .preferred_username
        .clone()
        .or_else(|| {
            ap_id
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| domain.clone());

    let actor_type = match json.kind.as_str() {
        "Person" => ActorType::Person,
        "Group" => ActorType::Group,
        "Organization" => ActorType::Organization,
        "Service" => ActorType::Service,
        "Application" => ActorType::Application,
        other => {
            return Err(Error::Validation(format!("unknown actor type {other:?}")));
        }
    };

    let actor = ctx
        .storage()
        .upsert_remote_actor(UpsertRemoteActor {
            ap_id: ap_id.to_string(),
            username,
            domain,
            display_name: json.name,
            public_key_pem: json.public_key.public_key_pem,
            inbox: json.inbox.to_string(),
            shared_inbox: json
                .endpoints
                .and_then(|e| e.shared_inbox)
                .map(|u| u.to_string()),
            actor_type,
            icon_url: json.icon.and_then(|i| i.url).map(|u| u.to_string()),
        })
        .await?;
    Ok(actor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::SiteConfig, storage::Storage};

    fn test_ctx() -> AppContext {
        let config = SiteConfig::builder()
            .base_url(Url::parse("https://baud.example").unwrap())
            .totp_vault_key([1; 32])
            .vapid_vault_key([2; 32])
            .build()
            .unwrap();
        let (ctx, _rx) = AppContext::new(config, Storage::open_in_memory().unwrap());
        ctx
    }

    fn actor_json(id: &str) -> ActorJson {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "type": "Person",
            "preferredUsername": "zoe",
            "inbox": format!("{id}/inbox"),
            "publicKey": {
                "id": format!("{id}#main-key"),
                "owner": id,
                "publicKeyPem": "-----BEGIN PUBLIC KEY-----"
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn fresh_cache_short_circuits_network() {
        let ctx = test_ctx();
        let url = Url::parse("https://remote.example/users/zoe").unwrap();
        upsert_actor_json(&ctx, &url, actor_json(url.as_str()))
            .await
            .unwrap();
        // No HTTP server exists; a cache miss would error.
        let actor = resolve(&ctx, &url).await.unwrap();
        assert_eq!(actor.username, "zoe");
    }

    #[tokio::test]
    async fn rejects_local_urls() {
        let ctx = test_ctx();
        let url = Url::parse("https://baud.example/ap/users/alice").unwrap();
        assert!(resolve(&ctx, &url).await.is_err());
    }

    #[tokio::test]
    async fn response_id_is_authoritative() {
        let ctx = test_ctx();
        let requested = Url::parse("https://remote.example/users/zoe").unwrap();
        let canonical = "https://remote.example/actors/zoe";
        let actor = upsert_actor_json(&ctx, &requested, actor_json(canonical))
            .await
            .unwrap();
        assert_eq!(actor.ap_id, canonical);
    }
}
