//! Notification creation with suppression gates and dedup.
//!
//! Order of gates: self, block/mute, per-kind preference. Inserts ride the
//! dedup unique indexes, and the PubSub broadcast plus web-push scheduling
//! happen only after the row is committed.

use crate::{
    context::AppContext,
    error::Error,
    pubsub::{self, Event},
    storage::notifications::{NewNotification, Notification, NotificationInsert},
    webpush::PushTask,
};
use chrono::{Duration, Utc};
use serde_json::json;
use tracing::debug;

/// Closed set of notification kinds. These strings are persisted and keyed
/// in user preferences.
pub mod kinds {
    pub const USER_FOLLOWED: &str = "user_followed";
    pub const ARTICLE_COMMENTED: &str = "article_commented";
    pub const COMMENT_REPLIED: &str = "comment_replied";
    pub const ARTICLE_LIKED: &str = "article_liked";
    pub const ARTICLE_ANNOUNCED: &str = "article_announced";
    pub const BOARD_ARTICLE: &str = "board_article";
    pub const FOLLOW_REQUEST: &str = "follow_request";
}

/// Creation outcome; `Skipped` and `Duplicate` are successes.
#[derive(Debug)]
pub enum CreateOutcome {
    Created(Notification),
    Skipped,
    Duplicate,
}

pub async fn create(ctx: &AppContext, new: NewNotification) -> Result<CreateOutcome, Error> {
    // Self-notifications must not exist.
    if new.actor_user_id == Some(new.user_id) {
        return Ok(CreateOutcome::Skipped);
    }

    if (new.actor_user_id.is_some() || new.actor_remote_actor_id.is_some())
        && ctx
            .storage()
            .is_blocked_or_muted(new.user_id, new.actor_user_id, new.actor_remote_actor_id)
            .await?
    {
        debug!(user_id = new.user_id, "notification suppressed by block/mute");
        return Ok(CreateOutcome::Skipped);
    }

    let user = ctx
        .storage()
        .user_by_id(new.user_id)
        .await?
        .ok_or(Error::NotFound)?;
    let prefs = user.notification_preferences.for_kind(&new.kind);
    if !prefs.in_app {
        return Ok(CreateOutcome::Skipped);
    }

    let kind = new.kind.clone();
    match ctx.storage().insert_notification(new).await? {
        NotificationInsert::Duplicate => Ok(CreateOutcome::Duplicate),
        NotificationInsert::Created(notification) => {
            ctx.pubsub().broadcast(
                &pubsub::notifications_topic(notification.user_id),
                Event::NotificationCreated {
                    notification_id: notification.id,
                },
            );
            if prefs.web_push {
                ctx.queue_push(PushTask {
                    user_id: notification.user_id,
                    payload: json!({
                        "kind": kind,
                        "notification_id": notification.id,
                    }),
                });
            }
            Ok(CreateOutcome::Created(notification))
        }
    }
}

pub async fn mark_as_read(
    ctx: &AppContext,
    notification_id: i64,
    user_id: i64,
) -> Result<(), Error> {
    Ok(ctx
        .storage()
        .mark_notification_read(notification_id, user_id)
        .await?)
}

pub async fn mark_all_as_read(ctx: &AppContext, user_id: i64) -> Result<usize, Error> {
    Ok(ctx.storage().mark_all_notifications_read(user_id).await?)
}

pub async fn cleanup_older_than(ctx: &AppContext, days: i64) -> Result<usize, Error> {
    let cutoff = Utc::now() - Duration::days(days);
    Ok(ctx.storage().delete_notifications_older_than(cutoff).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::SiteConfig,
        storage::{
            users::{ChannelPrefs, NewUser, NotificationPreferences, Role, UserStatus},
            Storage,
        },
    };
    use url::Url;

    async fn ctx_with_users() -> (AppContext, i64, i64) {
        let config = SiteConfig::builder()
            .base_url(Url::parse("https://baud.example").unwrap())
            .totp_vault_key([1; 32])
            .vapid_vault_key([2; 32])
            .build()
            .unwrap();
        let storage = Storage::open_in_memory().unwrap();
        let (ctx, _rx) = AppContext::new(config, storage);
        let recipient = seed_user(&ctx, "alice").await;
        let actor = seed_user(&ctx, "bob").await;
        (ctx, recipient, actor)
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

    async fn seed_article(ctx: &AppContext, author_id: i64, slug: &str) -> i64 {
        ctx.storage()
            .create_article(
                crate::storage::articles::NewArticle {
                    title: slug.into(),
                    body: "body".into(),
                    body_html: None,
                    slug: slug.into(),
                    user_id: Some(author_id),
                    remote_actor_id: None,
                    ap_id: None,
                    forwardable: true,
                },
                vec![],
            )
            .await
            .unwrap()
            .id
    }

    fn liked(user_id: i64, actor_user_id: i64, article_id: i64) -> NewNotification {
        NewNotification {
            user_id,
            kind: kinds::ARTICLE_LIKED.to_string(),
            actor_user_id: Some(actor_user_id),
            actor_remote_actor_id: None,
            article_id: Some(article_id),
            comment_id: None,
            data: json!({}),
        }
    }

    #[tokio::test]
    async fn dedup_on_identical_tuple() {
        let (ctx, alice, bob) = ctx_with_users().await;
        let carol = seed_user(&ctx, "carol").await;
        let article = seed_article(&ctx, alice, "liked-post").await;

        assert!(matches!(
            create(&ctx, liked(alice, bob, article)).await.unwrap(),
            CreateOutcome::Created(_)
        ));
        assert!(matches!(
            create(&ctx, liked(alice, bob, article)).await.unwrap(),
            CreateOutcome::Duplicate
        ));
        // A different actor is a distinct row.
        assert!(matches!(
            create(&ctx, liked(alice, carol, article)).await.unwrap(),
            CreateOutcome::Created(_)
        ));
    }

    #[tokio::test]
    async fn self_notifications_are_skipped() {
        let (ctx, alice, _) = ctx_with_users().await;
        let article = seed_article(&ctx, alice, "own-post").await;
        assert!(matches!(
            create(&ctx, liked(alice, alice, article)).await.unwrap(),
            CreateOutcome::Skipped
        ));
        assert_eq!(
            ctx.storage().unread_notification_count(alice).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn blocked_actor_is_suppressed() {
        let (ctx, alice, bob) = ctx_with_users().await;
        let article = seed_article(&ctx, alice, "blocked-post").await;
        ctx.storage()
            .add_user_block(alice, Some(bob), None)
            .await
            .unwrap();
        assert!(matches!(
            create(&ctx, liked(alice, bob, article)).await.unwrap(),
            CreateOutcome::Skipped
        ));
    }

    #[tokio::test]
    async fn preference_gate_disables_kind() {
        let (ctx, alice, bob) = ctx_with_users().await;
        let mut prefs = NotificationPreferences::default();
        prefs.0.insert(
            kinds::ARTICLE_LIKED.to_string(),
            ChannelPrefs {
                in_app: false,
                web_push: false,
            },
        );
        ctx.storage()
            .update_notification_preferences(alice, prefs)
            .await
            .unwrap();
        let article = seed_article(&ctx, alice, "muted-kind").await;
        assert!(matches!(
            create(&ctx, liked(alice, bob, article)).await.unwrap(),
            CreateOutcome::Skipped
        ));
    }

    #[tokio::test]
    async fn created_notifications_broadcast() {
        let (ctx, alice, bob) = ctx_with_users().await;
        let article = seed_article(&ctx, alice, "broadcast-post").await;
        let mut rx = ctx.pubsub().subscribe(&pubsub::notifications_topic(alice));
        let outcome = create(&ctx, liked(alice, bob, article)).await.unwrap();
        let CreateOutcome::Created(notification) = outcome else {
            panic!("expected creation");
        };
        assert_eq!(
            rx.recv().await.unwrap(),
            Event::NotificationCreated {
                notification_id: notification.id
            }
        );
    }
}
