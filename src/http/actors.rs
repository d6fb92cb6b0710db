//! GET endpoints serving actor documents, articles and collections.

use super::json::ActivityJson;
use crate::{
    context::AppContext,
    error::Error,
    federation::{
        protocol::{
            collections::{collection_page, collection_root, OrderedCollection,
                OrderedCollectionPage, PAGE_SIZE},
            context::WithContext,
        },
        publisher,
    },
    storage::{articles::Article, boards::Board, follows::FollowTarget, users::User},
};
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

#[derive(Deserialize, Default)]
pub struct PageQuery {
    page: Option<i64>,
}

async fn local_user(ctx: &AppContext, username: &str) -> Result<User, Error> {
    let user = ctx
        .storage()
        .user_by_username(username)
        .await?
        .ok_or(Error::NotFound)?;
    ctx.keys().ensure_user_keypair(user).await
}

/// A board as federation may see it; private boards 404 everywhere.
async fn public_board(ctx: &AppContext, slug: &str) -> Result<Board, Error> {
    let board = ctx
        .storage()
        .board_by_slug(slug)
        .await?
        .ok_or(Error::NotFound)?;
    if !board.is_public() || !board.ap_enabled {
        return Err(Error::NotFound);
    }
    ctx.keys().ensure_board_keypair(board).await
}

async fn local_article(ctx: &AppContext, slug: &str) -> Result<Article, Error> {
    let article = ctx
        .storage()
        .article_by_slug(slug)
        .await?
        .ok_or(Error::NotFound)?;
    if article.deleted_at.is_some() || article.user_id.is_none() {
        return Err(Error::NotFound);
    }
    Ok(article)
}

pub async fn get_user(
    State(ctx): State<AppContext>,
    Path(username): Path<String>,
) -> Result<ActivityJson<WithContext<Value>>, Error> {
    let user = local_user(&ctx, &username).await?;
    let person = publisher::person_object(&ctx, &user)?;
    Ok(ActivityJson(WithContext::new_default(serde_json::to_value(
        person,
    )?)))
}

pub async fn get_board(
    State(ctx): State<AppContext>,
    Path(slug): Path<String>,
) -> Result<ActivityJson<WithContext<Value>>, Error> {
    let board = public_board(&ctx, &slug).await?;
    let parent_slug = match board.parent_id {
        Some(parent_id) => ctx.storage().board_by_id(parent_id).await?.map(|b| b.slug),
        None => None,
    };
    let sub_slugs = ctx.storage().sub_board_slugs(board.id).await?;
    let group = publisher::group_object(&ctx, &board, parent_slug.as_deref(), &sub_slugs)?;
    Ok(ActivityJson(WithContext::new_default(serde_json::to_value(
        group,
    )?)))
}

pub async fn get_site(
    State(ctx): State<AppContext>,
) -> Result<ActivityJson<WithContext<Value>>, Error> {
    let keypair = ctx.keys().ensure_site_keypair().await?;
    let organization = publisher::organization_object(&ctx, keypair.public_key);
    Ok(ActivityJson(WithContext::new_default(serde_json::to_value(
        organization,
    )?)))
}

pub async fn get_article(
    State(ctx): State<AppContext>,
    Path(slug): Path<String>,
) -> Result<ActivityJson<WithContext<Value>>, Error> {
    let article = local_article(&ctx, &slug).await?;
    let object = publisher::article_object(&ctx, &article).await?;
    Ok(ActivityJson(WithContext::new_default(serde_json::to_value(
        object,
    )?)))
}

/// Replies collection: local comments inline as Notes, remote comments by
/// reference.
pub async fn get_article_replies(
    State(ctx): State<AppContext>,
    Path(slug): Path<String>,
) -> Result<ActivityJson<WithContext<OrderedCollectionPage>>, Error> {
    let article = local_article(&ctx, &slug).await?;
    let comments = ctx.storage().comments_for_article(article.id).await?;
    let id = Url::parse(&format!("{}/replies", ctx.config().article_uri(&article.slug)))
        .map_err(Error::other)?;

    let mut items = Vec::with_capacity(comments.len());
    for comment in &comments {
        if comment.user_id.is_some() {
            let note = publisher::note_object(&ctx, comment, &article).await?;
            items.push(serde_json::to_value(note)?);
        } else if let Some(ap_id) = &comment.ap_id {
            items.push(Value::String(ap_id.clone()));
        }
    }
    let total = items.len() as i64;
    let page = collection_page(&id, 1, total, items);
    Ok(ActivityJson(WithContext::new_default(page)))
}

// --- collections -------------------------------------------------------------

enum CollectionResponse {
    Root(OrderedCollection),
    Page(OrderedCollectionPage),
}

impl CollectionResponse {
    fn into_json(self) -> Result<ActivityJson<WithContext<Value>>, Error> {
        let value = match self {
            CollectionResponse::Root(root) => serde_json::to_value(root)?,
            CollectionResponse::Page(page) => serde_json::to_value(page)?,
        };
        Ok(ActivityJson(WithContext::new_default(value)))
    }
}

fn page_bounds(page: i64) -> (i64, i64) {
    ((page - 1) * PAGE_SIZE, PAGE_SIZE)
}

pub async fn get_user_outbox(
    State(ctx): State<AppContext>,
    Path(username): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<ActivityJson<WithContext<Value>>, Error> {
    let user = local_user(&ctx, &username).await?;
    let id = collection_uri(&ctx, &format!("/ap/users/{username}/outbox"))?;
    let total = ctx.storage().count_articles_by_user(user.id).await?;
    let response = match query.page {
        None => CollectionResponse::Root(collection_root(id, total)),
        Some(page) => {
            let page = page.max(1);
            let (offset, limit) = page_bounds(page);
            let articles = ctx.storage().articles_by_user(user.id, offset, limit).await?;
            let mut items = Vec::with_capacity(articles.len());
            for article in &articles {
                items.push(serde_json::to_value(
                    publisher::article_object(&ctx, article).await?,
                )?);
            }
            CollectionResponse::Page(collection_page(&id, page, total, items))
        }
    };
    response.into_json()
}

pub async fn get_board_outbox(
    State(ctx): State<AppContext>,
    Path(slug): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<ActivityJson<WithContext<Value>>, Error> {
    let board = public_board(&ctx, &slug).await?;
    let id = collection_uri(&ctx, &format!("/ap/boards/{slug}/outbox"))?;
    let total = ctx.storage().count_articles_by_board(board.id).await?;
    let response = match query.page {
        None => CollectionResponse::Root(collection_root(id, total)),
        Some(page) => {
            let page = page.max(1);
            let (offset, limit) = page_bounds(page);
            let articles = ctx
                .storage()
                .articles_by_board(board.id, offset, limit)
                .await?;
            let mut items = Vec::with_capacity(articles.len());
            for article in &articles {
                // Remote articles appear in board timelines by reference.
                if article.user_id.is_some() {
                    items.push(serde_json::to_value(
                        publisher::article_object(&ctx, article).await?,
                    )?);
                } else if let Some(ap_id) = &article.ap_id {
                    items.push(Value::String(ap_id.clone()));
                }
            }
            CollectionResponse::Page(collection_page(&id, page, total, items))
        }
    };
    response.into_json()
}

pub async fn get_user_followers(
    State(ctx): State<AppContext>,
    Path(username): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<ActivityJson<WithContext<Value>>, Error> {
    let user = local_user(&ctx, &username).await?;
    followers_collection(
        &ctx,
        &format!("/ap/users/{username}/followers"),
        Some(user.id),
        None,
        query.page,
    )
    .await
}

pub async fn get_board_followers(
    State(ctx): State<AppContext>,
    Path(slug): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<ActivityJson<WithContext<Value>>, Error> {
    let board = public_board(&ctx, &slug).await?;
    followers_collection(
        &ctx,
        &format!("/ap/boards/{slug}/followers"),
        None,
        Some(board.id),
        query.page,
    )
    .await
}

async fn followers_collection(
    ctx: &AppContext,
    path: &str,
    user_id: Option<i64>,
    board_id: Option<i64>,
    page: Option<i64>,
) -> Result<ActivityJson<WithContext<Value>>, Error> {
    let id = collection_uri(ctx, path)?;
    let total = ctx.storage().count_followers(user_id, board_id).await?;
    let response = match page {
        None => CollectionResponse::Root(collection_root(id, total)),
        Some(page) => {
            let page = page.max(1);
            let (offset, limit) = page_bounds(page);
            let items = ctx
                .storage()
                .follower_ap_ids(user_id, board_id, offset, limit)
                .await?
                .into_iter()
                .map(Value::String)
                .collect();
            CollectionResponse::Page(collection_page(&id, page, total, items))
        }
    };
    response.into_json()
}

pub async fn get_user_following(
    State(ctx): State<AppContext>,
    Path(username): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<ActivityJson<WithContext<Value>>, Error> {
    let user = local_user(&ctx, &username).await?;
    let id = collection_uri(&ctx, &format!("/ap/users/{username}/following"))?;
    let total = ctx.storage().count_following(user.id).await?;
    let response = match query.page {
        None => CollectionResponse::Root(collection_root(id, total)),
        Some(page) => {
            let page = page.max(1);
            let (offset, limit) = page_bounds(page);
            let items = ctx
                .storage()
                .following_targets(user.id, offset, limit)
                .await?
                .into_iter()
                .map(|target| match target {
                    FollowTarget::Remote(ap_id) => Value::String(ap_id),
                    FollowTarget::LocalUser(username) => {
                        Value::String(ctx.config().user_actor_uri(&username).to_string())
                    }
                })
                .collect();
            CollectionResponse::Page(collection_page(&id, page, total, items))
        }
    };
    response.into_json()
}

/// Public AP-enabled boards, as a collection of Group actor URIs.
pub async fn get_boards(
    State(ctx): State<AppContext>,
    Query(query): Query<PageQuery>,
) -> Result<ActivityJson<WithContext<Value>>, Error> {
    let id = collection_uri(&ctx, "/ap/boards")?;
    let total = ctx.storage().count_public_boards().await?;
    let response = match query.page {
        None => CollectionResponse::Root(collection_root(id, total)),
        Some(page) => {
            let page = page.max(1);
            let (offset, limit) = page_bounds(page);
            let items = ctx
                .storage()
                .list_public_boards(offset, limit)
                .await?
                .into_iter()
                .map(|board| {
                    Value::String(ctx.config().board_actor_uri(&board.slug).to_string())
                })
                .collect();
            CollectionResponse::Page(collection_page(&id, page, total, items))
        }
    };
    response.into_json()
}

#[derive(Deserialize)]
pub struct SearchQuery {
    q: String,
    page: Option<i64>,
}

/// Search over articles; local hits inline, remote hits by reference.
pub async fn search(
    State(ctx): State<AppContext>,
    Query(query): Query<SearchQuery>,
) -> Result<ActivityJson<WithContext<Value>>, Error> {
    let id = collection_uri(&ctx, "/ap/search")?;
    let page = query.page.unwrap_or(1).max(1);
    let (offset, limit) = page_bounds(page);
    let articles = ctx.storage().search_articles(&query.q, offset, limit).await?;
    let mut items = Vec::with_capacity(articles.len());
    for article in &articles {
        if article.user_id.is_some() {
            items.push(serde_json::to_value(
                publisher::article_object(&ctx, article).await?,
            )?);
        } else if let Some(ap_id) = &article.ap_id {
            items.push(Value::String(ap_id.clone()));
        }
    }
    let total = items.len() as i64 + offset;
    CollectionResponse::Page(collection_page(&id, page, total, items)).into_json()
}

fn collection_uri(ctx: &AppContext, path: &str) -> Result<Url, Error> {
    ctx.config().base_url.join(path).map_err(Error::other)
}
