//! Session-authenticated JSON API: feed, notifications, push
//! subscriptions.

use super::auth::CurrentUser;
use crate::{
    context::AppContext,
    error::Error,
    feed::{self, FeedEntry},
    notifications,
};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD as Base64Url, Engine};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

#[derive(Deserialize)]
pub struct FeedQuery {
    page: Option<i64>,
    per_page: Option<i64>,
}

#[derive(Serialize)]
pub struct FeedResponse {
    items: Vec<Value>,
    total: i64,
}

/// GET /api/feed — the merged personal feed.
pub async fn get_feed(
    State(ctx): State<AppContext>,
    current: CurrentUser,
    Query(query): Query<FeedQuery>,
) -> Result<Json<FeedResponse>, Error> {
    let page = feed::list_feed(
        &ctx,
        current.user.id,
        query.page.unwrap_or(1),
        query.per_page.unwrap_or(20),
    )
    .await?;
    let items = page
        .items
        .into_iter()
        .map(|entry| match entry {
            FeedEntry::Remote(item) => json!({
                "kind": "remote",
                "id": item.id,
                "ap_id": item.ap_id,
                "published_at": item.published_at,
            }),
            FeedEntry::Article(article) => json!({
                "kind": "article",
                "id": article.id,
                "slug": article.slug,
                "title": article.title,
                "published_at": article.created_at,
            }),
            FeedEntry::Comment(comment) => json!({
                "kind": "comment",
                "id": comment.id,
                "article_id": comment.article_id,
                "published_at": comment.created_at,
            }),
        })
        .collect();
    Ok(Json(FeedResponse {
        items,
        total: page.total,
    }))
}

#[derive(Deserialize)]
pub struct NotificationsQuery {
    page: Option<i64>,
}

/// GET /api/notifications
pub async fn list_notifications(
    State(ctx): State<AppContext>,
    current: CurrentUser,
    Query(query): Query<NotificationsQuery>,
) -> Result<Json<Value>, Error> {
    let page = query.page.unwrap_or(1).max(1);
    let rows = ctx
        .storage()
        .list_notifications(current.user.id, (page - 1) * 20, 20)
        .await?;
    let unread = ctx
        .storage()
        .unread_notification_count(current.user.id)
        .await?;
    let items: Vec<Value> = rows
        .into_iter()
        .map(|n| {
            json!({
                "id": n.id,
                "kind": n.kind,
                "article_id": n.article_id,
                "comment_id": n.comment_id,
                "read": n.read,
                "inserted_at": n.inserted_at,
                "data": n.data,
            })
        })
        .collect();
    Ok(Json(json!({ "items": items, "unread": unread })))
}

/// POST /api/notifications/{id}/read
pub async fn mark_notification_read(
    State(ctx): State<AppContext>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<Value>, Error> {
    notifications::mark_as_read(&ctx, id, current.user.id).await?;
    Ok(Json(json!({ "ok": true })))
}

/// POST /api/notifications/read_all
pub async fn mark_all_notifications_read(
    State(ctx): State<AppContext>,
    current: CurrentUser,
) -> Result<Json<Value>, Error> {
    let updated = notifications::mark_all_as_read(&ctx, current.user.id).await?;
    Ok(Json(json!({ "updated": updated })))
}

#[derive(Deserialize)]
pub struct PushSubscribeRequest {
    endpoint: String,
    /// base64url, 65 bytes decoded.
    p256dh: String,
    /// base64url, 16 bytes decoded.
    auth: String,
}

/// POST /api/push-subscriptions
pub async fn subscribe_push(
    State(ctx): State<AppContext>,
    current: CurrentUser,
    Json(request): Json<PushSubscribeRequest>,
) -> Result<Json<Value>, Error> {
    let endpoint = Url::parse(&request.endpoint)
        .map_err(|_| Error::Validation("endpoint is not a url".to_string()))?;
    if endpoint.scheme() != "https" && !ctx.config().allow_http {
        return Err(Error::Validation("endpoint must be https".to_string()));
    }
    let p256dh = Base64Url
        .decode(&request.p256dh)
        .map_err(|_| Error::Validation("p256dh is not base64url".to_string()))?;
    let auth = Base64Url
        .decode(&request.auth)
        .map_err(|_| Error::Validation("auth is not base64url".to_string()))?;
    if p256dh.len() != 65 {
        return Err(Error::Validation("p256dh must decode to 65 bytes".to_string()));
    }
    if auth.len() != 16 {
        return Err(Error::Validation("auth must decode to 16 bytes".to_string()));
    }
    ctx.storage()
        .upsert_push_subscription(
            current.user.id,
            endpoint.as_str(),
            p256dh,
            auth,
            current.session.user_agent.clone(),
        )
        .await?;
    let vapid = ctx.keys().ensure_vapid_keys().await?;
    Ok(Json(json!({ "vapid_public_key": vapid.public_key_b64 })))
}

#[derive(Deserialize)]
pub struct PushUnsubscribeRequest {
    endpoint: String,
}

/// DELETE /api/push-subscriptions
pub async fn unsubscribe_push(
    State(ctx): State<AppContext>,
    _current: CurrentUser,
    Json(request): Json<PushUnsubscribeRequest>,
) -> Result<Json<Value>, Error> {
    let removed = ctx
        .storage()
        .delete_push_subscription_by_endpoint(&request.endpoint)
        .await?;
    Ok(Json(json!({ "removed": removed })))
}
