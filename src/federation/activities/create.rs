//! Inbound Create: remote articles, comments and feed material.

use super::Activity;
use crate::{
    context::AppContext,
    error::Error,
    feed,
    federation::{
        parse_local_actor, parse_local_article_slug,
        protocol::{
            helpers::deserialize_one_or_many,
            objects::{ArticleObject, NoteObject, PostObject},
            verify_domains_match,
        },
        publisher, LocalActorRef,
    },
    notifications::{self, kinds},
    storage::{
        articles::{Article, NewArticle},
        comments::{NewComment, MAX_NOTIFIED_REPLY_DEPTH},
        notifications::NewNotification,
        remote_actors::RemoteActor,
        StorageError,
    },
};
use activitystreams_kinds::activity::CreateType;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use url::Url;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CreatePost {
    #[serde(rename = "type")]
    pub kind: CreateType,
    pub id: Url,
    pub actor: Url,
    pub object: PostObject,
    #[serde(deserialize_with = "deserialize_one_or_many", default)]
    pub to: Vec<Url>,
    #[serde(deserialize_with = "deserialize_one_or_many", default)]
    pub cc: Vec<Url>,
    #[serde(deserialize_with = "deserialize_one_or_many", default)]
    pub audience: Vec<Url>,
}

#[async_trait]
impl Activity for CreatePost {
    fn id(&self) -> &Url {
        &self.id
    }

    fn actor(&self) -> &Url {
        &self.actor
    }

    async fn receive(self, ctx: &AppContext, signer: &RemoteActor) -> Result<(), Error> {
        verify_domains_match(self.object.id(), &self.actor)?;
        verify_domains_match(self.object.attributed_to(), &self.actor)?;
        let mut audience: Vec<Url> = self.object.audience().into_iter().cloned().collect();
        audience.extend(self.to);
        audience.extend(self.cc);
        audience.extend(self.audience);
        ingest_post(ctx, signer, self.object, &audience).await
    }
}

/// Shared ingestion used by Create and by Announce content forwarding.
pub(crate) async fn ingest_post(
    ctx: &AppContext,
    author: &RemoteActor,
    object: PostObject,
    audience: &[Url],
) -> Result<(), Error> {
    let board_ids = resolve_board_audience(ctx, audience).await?;

    match object {
        PostObject::Note(note) => {
            if let Some(anchor) = resolve_thread_anchor(ctx, &note).await? {
                return ingest_comment(ctx, author, *note, anchor).await;
            }
            // A note with no local thread anchor is treated as an
            // article-shaped post.
            ingest_article(ctx, author, article_from_note(*note), board_ids).await
        }
        PostObject::Article(article) => ingest_article(ctx, author, *article, board_ids).await,
    }
}

/// Boards named in the audience that actually accept federated posts.
async fn resolve_board_audience(
    ctx: &AppContext,
    audience: &[Url],
) -> Result<Vec<i64>, Error> {
    let mut board_ids = Vec::new();
    for url in audience {
        if let Some(LocalActorRef::Board(slug)) = parse_local_actor(ctx.config(), url) {
            if let Some(board) = ctx.storage().board_by_slug(&slug).await? {
                if board.is_public() && board.ap_enabled && !board_ids.contains(&board.id) {
                    board_ids.push(board.id);
                }
            }
        }
    }
    Ok(board_ids)
}

/// The local article a note replies into, walking one comment hop.
async fn resolve_thread_anchor(
    ctx: &AppContext,
    note: &NoteObject,
) -> Result<Option<ThreadAnchor>, Error> {
    let Some(in_reply_to) = &note.in_reply_to else {
        return Ok(None);
    };
    if let Some(slug) = parse_local_article_slug(ctx.config(), in_reply_to) {
        if let Some(article) = ctx.storage().article_by_slug(&slug).await? {
            return Ok(Some(ThreadAnchor {
                article,
                parent_comment_id: None,
            }));
        }
    }
    if let Some(article) = ctx.storage().article_by_ap_id(in_reply_to.as_str()).await? {
        return Ok(Some(ThreadAnchor {
            article,
            parent_comment_id: None,
        }));
    }
    if let Some(parent) = ctx.storage().comment_by_ap_id(in_reply_to.as_str()).await? {
        if let Some(article) = ctx.storage().article_by_id(parent.article_id).await? {
            return Ok(Some(ThreadAnchor {
                article,
                parent_comment_id: Some(parent.id),
            }));
        }
    }
    Ok(None)
}

struct ThreadAnchor {
    article: Article,
    parent_comment_id: Option<i64>,
}

async fn ingest_comment(
    ctx: &AppContext,
    author: &RemoteActor,
    note: NoteObject,
    anchor: ThreadAnchor,
) -> Result<(), Error> {
    if ctx
        .storage()
        .comment_by_ap_id(note.id.as_str())
        .await?
        .is_some()
    {
        debug!(ap_id = %note.id, "comment already ingested");
        return Ok(());
    }
    if anchor.article.locked {
        return Err(Error::Validation("article is locked".to_string()));
    }

    let body = note
        .source
        .as_ref()
        .map(|s| s.content.clone())
        .or_else(|| note.content.clone())
        .unwrap_or_default();
    let comment = match ctx
        .storage()
        .create_comment(NewComment {
            body,
            body_html: note.content.clone(),
            parent_id: anchor.parent_comment_id,
            article_id: anchor.article.id,
            user_id: None,
            remote_actor_id: Some(author.id),
            ap_id: Some(note.id.to_string()),
        })
        .await
    {
        Ok(comment) => comment,
        // Raced with a duplicate delivery; the other copy won.
        Err(StorageError::Conflict(_)) => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    if let Some(article_author) = anchor.article.user_id {
        notifications::create(
            ctx,
            NewNotification {
                user_id: article_author,
                kind: kinds::ARTICLE_COMMENTED.to_string(),
                actor_user_id: None,
                actor_remote_actor_id: Some(author.id),
                article_id: Some(anchor.article.id),
                comment_id: Some(comment.id),
                data: json!({}),
            },
        )
        .await?;
    }
    if let Some(parent_id) = anchor.parent_comment_id {
        let depth = ctx.storage().comment_depth(comment.id).await?;
        if depth <= MAX_NOTIFIED_REPLY_DEPTH {
            if let Some(parent) = ctx.storage().comment_by_id(parent_id).await? {
                if let Some(parent_author) = parent.user_id {
                    notifications::create(
                        ctx,
                        NewNotification {
                            user_id: parent_author,
                            kind: kinds::COMMENT_REPLIED.to_string(),
                            actor_user_id: None,
                            actor_remote_actor_id: Some(author.id),
                            article_id: Some(anchor.article.id),
                            comment_id: Some(comment.id),
                            data: json!({}),
                        },
                    )
                    .await?;
                }
            }
        }
    }
    Ok(())
}

async fn ingest_article(
    ctx: &AppContext,
    author: &RemoteActor,
    object: ArticleObject,
    board_ids: Vec<i64>,
) -> Result<(), Error> {
    // Cross-post dedup: a known ap_id joins additional boards instead of
    // erroring.
    if let Some(existing) = ctx.storage().article_by_ap_id(object.id.as_str()).await? {
        if !board_ids.is_empty() {
            ctx.storage()
                .add_article_to_boards(existing.id, board_ids)
                .await?;
        }
        return Ok(());
    }

    if board_ids.is_empty() {
        // No board anchor: materialize for follower feeds only.
        let published = object.published.unwrap_or_else(Utc::now);
        let ap_id = object.id.to_string();
        feed::materialize_remote_create(
            ctx,
            author,
            &ap_id,
            serde_json::to_string(&object)?,
            published,
        )
        .await?;
        return Ok(());
    }

    let title = object
        .name
        .clone()
        .unwrap_or_else(|| publisher::derive_title(object.content.as_deref().unwrap_or("")));
    let body = object
        .source
        .as_ref()
        .map(|s| s.content.clone())
        .or_else(|| object.content.clone())
        .unwrap_or_default();

    let mut slug = publisher::slugify(&title);
    let article = loop {
        let result = ctx
            .storage()
            .create_article(
                NewArticle {
                    title: title.clone(),
                    body: body.clone(),
                    body_html: object.content.clone(),
                    slug: slug.clone(),
                    user_id: None,
                    remote_actor_id: Some(author.id),
                    ap_id: Some(object.id.to_string()),
                    forwardable: true,
                },
                board_ids.clone(),
            )
            .await;
        match result {
            Ok(article) => break article,
            Err(StorageError::Conflict(_)) => {
                // Either a slug collision or a racing duplicate delivery.
                if let Some(existing) =
                    ctx.storage().article_by_ap_id(object.id.as_str()).await?
                {
                    ctx.storage()
                        .add_article_to_boards(existing.id, board_ids)
                        .await?;
                    return Ok(());
                }
                slug = publisher::slugify_with_suffix(&title);
            }
            Err(e) => return Err(e.into()),
        }
    };

    for board_id in ctx.storage().article_board_ids(article.id).await? {
        for user_id in ctx.storage().board_follower_user_ids(board_id).await? {
            notifications::create(
                ctx,
                NewNotification {
                    user_id,
                    kind: kinds::BOARD_ARTICLE.to_string(),
                    actor_user_id: None,
                    actor_remote_actor_id: Some(author.id),
                    article_id: Some(article.id),
                    comment_id: None,
                    data: json!({ "board_id": board_id }),
                },
            )
            .await?;
        }
    }
    Ok(())
}

/// Promote a bare note to an article shape (title derived from content).
pub(crate) fn article_from_note(note: NoteObject) -> ArticleObject {
    ArticleObject {
        kind: Default::default(),
        id: note.id,
        attributed_to: note.attributed_to,
        to: note.to,
        cc: note.cc,
        audience: note.audience,
        name: None,
        summary: None,
        content: note.content,
        source: note.source,
        published: note.published,
        updated: None,
        tag: vec![],
        replies: None,
        pinned: None,
        locked: None,
        comment_count: None,
        like_count: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::SiteConfig,
        federation::protocol::{objects::Source, public},
        storage::{
            boards::tests::test_board,
            remote_actors::tests::remote_actor,
            users::{NewUser, Role, UserStatus},
            Storage,
        },
    };

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

    fn remote_article(id: &str, author: &str, audience: Vec<Url>) -> ArticleObject {
        ArticleObject {
            kind: Default::default(),
            id: Url::parse(id).unwrap(),
            attributed_to: Url::parse(author).unwrap(),
            to: vec![public()],
            cc: audience,
            audience: vec![],
            name: Some("Crossposted news".into()),
            summary: Some("Crossposted news".into()),
            content: Some("<p>Big news about #rust</p>".into()),
            source: Some(Source::markdown("Big news about #rust")),
            published: Some(Utc::now()),
            updated: None,
            tag: vec![],
            replies: None,
            pinned: None,
            locked: None,
            comment_count: None,
            like_count: None,
        }
    }

    #[tokio::test]
    async fn board_addressed_article_lands_in_board() {
        let ctx = test_ctx().await;
        let board = ctx.storage().create_board(test_board("news")).await.unwrap();
        let author = ctx
            .storage()
            .upsert_remote_actor(remote_actor("https://remote.example/users/zoe"))
            .await
            .unwrap();
        let board_uri = ctx.config().board_actor_uri("news");
        let object = remote_article(
            "https://remote.example/objects/1",
            "https://remote.example/users/zoe",
            vec![board_uri.clone()],
        );

        ingest_post(
            &ctx,
            &author,
            PostObject::Article(Box::new(object)),
            &[board_uri],
        )
        .await
        .unwrap();

        // Content survives ingestion: title, markdown source, html.
        let article = ctx
            .storage()
            .article_by_ap_id("https://remote.example/objects/1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(article.title, "Crossposted news");
        assert_eq!(article.body, "Big news about #rust");
        assert_eq!(article.body_html.as_deref(), Some("<p>Big news about #rust</p>"));
        assert_eq!(article.remote_actor_id, Some(author.id));
        assert_eq!(
            ctx.storage().article_board_ids(article.id).await.unwrap(),
            vec![board.id]
        );
    }

    #[tokio::test]
    async fn known_ap_id_joins_additional_boards() {
        let ctx = test_ctx().await;
        let news = ctx.storage().create_board(test_board("news")).await.unwrap();
        let meta = ctx.storage().create_board(test_board("meta")).await.unwrap();
        let author = ctx
            .storage()
            .upsert_remote_actor(remote_actor("https://remote.example/users/zoe"))
            .await
            .unwrap();

        let first_audience = vec![ctx.config().board_actor_uri("news")];
        let object = remote_article(
            "https://remote.example/objects/2",
            "https://remote.example/users/zoe",
            first_audience.clone(),
        );
        ingest_post(
            &ctx,
            &author,
            PostObject::Article(Box::new(object.clone())),
            &first_audience,
        )
        .await
        .unwrap();

        // The same object addressed at another board joins it instead of
        // conflicting.
        let second_audience = vec![ctx.config().board_actor_uri("meta")];
        ingest_post(
            &ctx,
            &author,
            PostObject::Article(Box::new(object)),
            &second_audience,
        )
        .await
        .unwrap();

        let article = ctx
            .storage()
            .article_by_ap_id("https://remote.example/objects/2")
            .await
            .unwrap()
            .unwrap();
        let mut boards = ctx.storage().article_board_ids(article.id).await.unwrap();
        boards.sort();
        assert_eq!(boards, vec![news.id, meta.id]);
    }

    #[tokio::test]
    async fn reply_note_becomes_a_comment_and_notifies_the_author() {
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
        let article = ctx
            .storage()
            .create_article(
                crate::storage::articles::NewArticle {
                    title: "Local post".into(),
                    body: "hello".into(),
                    body_html: None,
                    slug: "local-post".into(),
                    user_id: Some(alice.id),
                    remote_actor_id: None,
                    ap_id: None,
                    forwardable: true,
                },
                vec![],
            )
            .await
            .unwrap();
        let author = ctx
            .storage()
            .upsert_remote_actor(remote_actor("https://remote.example/users/zoe"))
            .await
            .unwrap();

        let note = NoteObject {
            kind: Default::default(),
            id: Url::parse("https://remote.example/notes/1").unwrap(),
            attributed_to: Url::parse("https://remote.example/users/zoe").unwrap(),
            to: vec![public()],
            cc: vec![],
            audience: vec![],
            in_reply_to: Some(ctx.config().article_uri("local-post")),
            content: Some("<p>nice</p>".into()),
            source: Some(Source::markdown("nice")),
            published: Some(Utc::now()),
        };
        ingest_post(&ctx, &author, PostObject::Note(Box::new(note)), &[])
            .await
            .unwrap();

        let comment = ctx
            .storage()
            .comment_by_ap_id("https://remote.example/notes/1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(comment.article_id, article.id);
        assert_eq!(comment.remote_actor_id, Some(author.id));
        assert_eq!(
            ctx.storage().unread_notification_count(alice.id).await.unwrap(),
            1
        );

        // Re-delivery is a no-op.
        let note_again = NoteObject {
            kind: Default::default(),
            id: Url::parse("https://remote.example/notes/1").unwrap(),
            attributed_to: Url::parse("https://remote.example/users/zoe").unwrap(),
            to: vec![public()],
            cc: vec![],
            audience: vec![],
            in_reply_to: Some(ctx.config().article_uri("local-post")),
            content: Some("<p>nice</p>".into()),
            source: Some(Source::markdown("nice")),
            published: Some(Utc::now()),
        };
        ingest_post(&ctx, &author, PostObject::Note(Box::new(note_again)), &[])
            .await
            .unwrap();
        assert_eq!(ctx.storage().count_comments(article.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unanchored_create_materializes_a_feed_item() {
        let ctx = test_ctx().await;
        let author = ctx
            .storage()
            .upsert_remote_actor(remote_actor("https://remote.example/users/zoe"))
            .await
            .unwrap();
        let object = remote_article(
            "https://remote.example/objects/3",
            "https://remote.example/users/zoe",
            vec![],
        );
        ingest_post(&ctx, &author, PostObject::Article(Box::new(object)), &[])
            .await
            .unwrap();

        let item = ctx
            .storage()
            .feed_item_by_ap_id("https://remote.example/objects/3")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.remote_actor_id, author.id);
        // No article row was created.
        assert!(ctx
            .storage()
            .article_by_ap_id("https://remote.example/objects/3")
            .await
            .unwrap()
            .is_none());
    }
}
