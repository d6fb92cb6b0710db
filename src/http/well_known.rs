//! WebFinger (RFC 7033) and NodeInfo discovery.

use crate::{context::AppContext, error::Error};
use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

/// A JRD document as returned by `.well-known/webfinger`.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Webfinger {
    pub subject: String,
    #[serde(default)]
    pub aliases: Vec<Url>,
    #[serde(default)]
    pub links: Vec<WebfingerLink>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct WebfingerLink {
    pub rel: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub href: Option<Url>,
}

#[derive(Deserialize)]
pub struct WebfingerQuery {
    resource: String,
}

/// `acct:name@host` resolves users; `acct:!slug@host` resolves boards.
pub async fn webfinger(
    State(ctx): State<AppContext>,
    Query(query): Query<WebfingerQuery>,
) -> Result<Json<Webfinger>, Error> {
    let resource = query.resource.trim();
    let rest = resource
        .strip_prefix("acct:")
        .ok_or_else(|| Error::Validation("resource must start with acct:".to_string()))?;
    let (name, host) = rest
        .split_once('@')
        .ok_or_else(|| Error::Validation("malformed acct resource".to_string()))?;
    if host != ctx.config().domain() {
        return Err(Error::NotFound);
    }

    let actor_uri = if let Some(slug) = name.strip_prefix('!') {
        let board = ctx
            .storage()
            .board_by_slug(slug)
            .await?
            .ok_or(Error::NotFound)?;
        if !board.is_public() || !board.ap_enabled {
            return Err(Error::NotFound);
        }
        ctx.config().board_actor_uri(&board.slug)
    } else {
        let user = ctx
            .storage()
            .user_by_username(name)
            .await?
            .ok_or(Error::NotFound)?;
        ctx.config().user_actor_uri(&user.username)
    };

    Ok(Json(Webfinger {
        subject: resource.to_string(),
        aliases: vec![actor_uri.clone()],
        links: vec![
            WebfingerLink {
                rel: Some("self".to_string()),
                kind: Some("application/activity+json".to_string()),
                href: Some(actor_uri.clone()),
            },
            WebfingerLink {
                rel: Some("http://webfinger.net/rel/profile-page".to_string()),
                kind: Some("text/html".to_string()),
                href: Some(actor_uri),
            },
        ],
    }))
}

/// Discovery document pointing at the NodeInfo 2.1 endpoint.
pub async fn nodeinfo_well_known(State(ctx): State<AppContext>) -> Json<Value> {
    let href = ctx
        .config()
        .base_url
        .join("/nodeinfo/2.1")
        .expect("fixed path joins");
    Json(json!({
        "links": [{
            "rel": "http://nodeinfo.diaspora.software/ns/schema/2.1",
            "href": href,
        }]
    }))
}

/// NodeInfo 2.1.
pub async fn nodeinfo(State(ctx): State<AppContext>) -> Result<Json<Value>, Error> {
    let users = ctx.storage().count_users().await?;
    let local_posts = ctx.storage().count_local_articles().await?;
    let open_registrations =
        ctx.config().registration_mode == crate::config::RegistrationMode::Open;
    Ok(Json(json!({
        "version": "2.1",
        "software": {
            "name": "baudrate",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "protocols": ["activitypub"],
        "services": { "inbound": [], "outbound": [] },
        "openRegistrations": open_registrations,
        "usage": {
            "users": { "total": users },
            "localPosts": local_posts,
        },
        "metadata": { "nodeName": ctx.config().site_name },
    })))
}
