//! Personal feed: a merge of remote feed items, followed local authors and
//! thread activity.

use crate::{
    context::AppContext,
    error::Error,
    pubsub::{self, Event},
    storage::{articles::Article, comments::Comment, feed_items::FeedItem,
        remote_actors::RemoteActor},
};
use chrono::{DateTime, Utc};

/// One row of the merged feed.
#[derive(Debug, Clone)]
pub enum FeedEntry {
    Remote(FeedItem),
    Article(Article),
    Comment(Comment),
}

impl FeedEntry {
    pub fn sorted_at(&self) -> DateTime<Utc> {
        match self {
            FeedEntry::Remote(item) => item.published_at,
            FeedEntry::Article(article) => article.created_at,
            FeedEntry::Comment(comment) => comment.created_at,
        }
    }
}

#[derive(Debug)]
pub struct FeedPage {
    pub items: Vec<FeedEntry>,
    /// Sum of the three source counts. Items appearing in more than one
    /// source may be counted twice; acceptable for this view.
    pub total: i64,
}

/// Merge the three sources, newest first. Each source is already sorted,
/// so fetching `offset + per_page` from each and running one stable sort
/// yields the correct page.
pub async fn list_feed(
    ctx: &AppContext,
    user_id: i64,
    page: i64,
    per_page: i64,
) -> Result<FeedPage, Error> {
    let page = page.max(1);
    let per_page = per_page.clamp(1, 100);
    let offset = (page - 1) * per_page;
    let fetch = offset + per_page;

    let remote = ctx.storage().feed_items_for_user(user_id, fetch).await?;
    let articles = ctx.storage().feed_articles_for_user(user_id, fetch).await?;
    let comments = ctx.storage().feed_comments_for_user(user_id, fetch).await?;

    let total = ctx.storage().count_feed_items_for_user(user_id).await?
        + ctx.storage().count_feed_articles_for_user(user_id).await?
        + ctx.storage().count_feed_comments_for_user(user_id).await?;

    let mut merged: Vec<FeedEntry> = remote
        .into_iter()
        .map(FeedEntry::Remote)
        .chain(articles.into_iter().map(FeedEntry::Article))
        .chain(comments.into_iter().map(FeedEntry::Comment))
        .collect();
    merged.sort_by_key(|entry| std::cmp::Reverse(entry.sorted_at()));

    let items = merged
        .into_iter()
        .skip(offset as usize)
        .take(per_page as usize)
        .collect();
    Ok(FeedPage { items, total })
}

/// Store a remote Create with no local anchor and wake each local
/// follower's feed.
pub async fn materialize_remote_create(
    ctx: &AppContext,
    author: &RemoteActor,
    ap_id: &str,
    article_json: String,
    published_at: DateTime<Utc>,
) -> Result<FeedItem, Error> {
    let item = ctx
        .storage()
        .insert_feed_item(ap_id, author.id, article_json, published_at)
        .await?;
    let followers = ctx
        .storage()
        .local_followers_of_remote_actor(author.id)
        .await?;
    for user_id in followers {
        ctx.pubsub().broadcast(
            &pubsub::feed_topic(user_id),
            Event::FeedItemCreated {
                feed_item_id: item.id,
            },
        );
    }
    Ok(item)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::SiteConfig,
        storage::{
            articles::NewArticle,
            follows::FollowState,
            remote_actors::tests::remote_actor,
            users::{NewUser, Role, UserStatus},
            Storage,
        },
    };
    use url::Url;

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

    async fn seed_user(ctx: &AppContext, name: &str) -> i64 {
        ctx.storage()
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
    async fn empty_feed_for_user_with_no_follows() {
        let ctx = test_ctx().await;
        let user_id = seed_user(&ctx, "alice").await;
        let page = list_feed(&ctx, user_id, 1, 20).await.unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn merges_sources_newest_first() {
        let ctx = test_ctx().await;
        let alice = seed_user(&ctx, "alice").await;
        let bob = seed_user(&ctx, "bob").await;
        ctx.storage()
            .insert_user_follow(alice, None, Some(bob), FollowState::Accepted, "f-local")
            .await
            .unwrap();

        let actor = ctx
            .storage()
            .upsert_remote_actor(remote_actor("https://remote.example/users/zoe"))
            .await
            .unwrap();
        ctx.storage()
            .insert_user_follow(alice, Some(actor.id), None, FollowState::Accepted, "f-remote")
            .await
            .unwrap();

        ctx.storage()
            .create_article(
                NewArticle {
                    title: "from bob".into(),
                    body: "b".into(),
                    body_html: None,
                    slug: "from-bob".into(),
                    user_id: Some(bob),
                    remote_actor_id: None,
                    ap_id: None,
                    forwardable: true,
                },
                vec![],
            )
            .await
            .unwrap();
        materialize_remote_create(
            &ctx,
            &actor,
            "https://remote.example/objects/1",
            "{}".into(),
            Utc::now() + chrono::Duration::seconds(5),
        )
        .await
        .unwrap();

        let page = list_feed(&ctx, alice, 1, 20).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items.len(), 2);
        // The remote item is newer and sorts first.
        assert!(matches!(page.items[0], FeedEntry::Remote(_)));
        assert!(matches!(page.items[1], FeedEntry::Article(_)));
    }

    #[tokio::test]
    async fn materialization_broadcasts_to_followers() {
        let ctx = test_ctx().await;
        let alice = seed_user(&ctx, "alice").await;
        let actor = ctx
            .storage()
            .upsert_remote_actor(remote_actor("https://remote.example/users/zoe"))
            .await
            .unwrap();
        ctx.storage()
            .insert_user_follow(alice, Some(actor.id), None, FollowState::Accepted, "f1")
            .await
            .unwrap();

        let mut rx = ctx.pubsub().subscribe(&pubsub::feed_topic(alice));
        let item = materialize_remote_create(
            &ctx,
            &actor,
            "https://remote.example/objects/2",
            "{}".into(),
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            Event::FeedItemCreated {
                feed_item_id: item.id
            }
        );
    }
}
