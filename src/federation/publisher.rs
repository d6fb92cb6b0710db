//! Builders that turn local events into outbound activities, plus the
//! text plumbing they need (summaries, hashtags, slugs).

use crate::{
    context::AppContext,
    error::Error,
    federation::{
        activities::{AcceptFollow, CreatePost, Delete, DeleteObject, Follow, FollowRef,
            ObjectRef, RejectFollow, Undo, UndoObject},
        delivery,
        protocol::{
            actors::{Endpoints, Group, Icon, Organization, Person},
            context::WithContext,
            objects::{ArticleObject, Hashtag, NoteObject, PostObject, Source},
            public,
            public_key::PublicKey,
        },
    },
    storage::{articles::Article, boards::Board, comments::Comment, remote_actors::RemoteActor,
        users::User},
};
use activitystreams_kinds::activity::UpdateType;
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use serde::Serialize;
use url::Url;

/// Maximum plain-text summary length on published articles.
const SUMMARY_MAX_CHARS: usize = 500;

// --- actor documents --------------------------------------------------------

pub fn person_object(ctx: &AppContext, user: &User) -> Result<Person, Error> {
    let config = ctx.config();
    let id = config.user_actor_uri(&user.username);
    let public_key_pem = user
        .public_key_pem
        .clone()
        .ok_or_else(|| Error::Other("user has no keypair".to_string()))?;
    Ok(Person {
        kind: Default::default(),
        preferred_username: user.username.clone(),
        name: None,
        inbox: join(&id, "inbox"),
        outbox: join(&id, "outbox"),
        followers: join(&id, "followers"),
        following: join(&id, "following"),
        endpoints: Endpoints {
            shared_inbox: Some(config.shared_inbox_uri()),
        },
        public_key: PublicKey::new(id.clone(), public_key_pem),
        icon: user.avatar_id.as_ref().map(|avatar| Icon {
            url: config.base_url.join(&format!("/media/{avatar}")).ok(),
        }),
        published: Some(user.created_at),
        id,
    })
}

pub fn group_object(
    ctx: &AppContext,
    board: &Board,
    parent_slug: Option<&str>,
    sub_slugs: &[String],
) -> Result<Group, Error> {
    let config = ctx.config();
    let id = config.board_actor_uri(&board.slug);
    let public_key_pem = board
        .public_key_pem
        .clone()
        .ok_or_else(|| Error::Other("board has no keypair".to_string()))?;
    Ok(Group {
        kind: Default::default(),
        preferred_username: board.slug.clone(),
        name: board.name.clone(),
        summary: (!board.description.is_empty()).then(|| board.description.clone()),
        inbox: join(&id, "inbox"),
        outbox: join(&id, "outbox"),
        followers: join(&id, "followers"),
        endpoints: Endpoints {
            shared_inbox: Some(config.shared_inbox_uri()),
        },
        public_key: PublicKey::new(id.clone(), public_key_pem),
        parent_board: parent_slug.map(|slug| config.board_actor_uri(slug)),
        sub_boards: sub_slugs
            .iter()
            .map(|slug| config.board_actor_uri(slug))
            .collect(),
        id,
    })
}

pub fn organization_object(ctx: &AppContext, public_key_pem: String) -> Organization {
    let config = ctx.config();
    let id = config.site_actor_uri();
    Organization {
        kind: Default::default(),
        name: config.site_name.clone(),
        inbox: config.shared_inbox_uri(),
        public_key: PublicKey::new(id.clone(), public_key_pem),
        id,
    }
}

// --- content objects --------------------------------------------------------

/// The federated representation of a local article.
pub async fn article_object(ctx: &AppContext, article: &Article) -> Result<ArticleObject, Error> {
    let config = ctx.config();
    let author = match article.user_id {
        Some(user_id) => ctx
            .storage()
            .user_by_id(user_id)
            .await?
            .ok_or(Error::NotFound)?,
        None => return Err(Error::Validation("not a local article".to_string())),
    };
    let board_uris = board_uris_of(ctx, article.id).await?;
    let id = config.article_uri(&article.slug);

    Ok(ArticleObject {
        kind: Default::default(),
        attributed_to: config.user_actor_uri(&author.username),
        to: vec![public()],
        cc: board_uris,
        audience: vec![],
        name: Some(article.title.clone()),
        summary: Some(summary_of(&article.body)),
        content: Some(
            article
                .body_html
                .clone()
                .unwrap_or_else(|| format!("<p>{}</p>", escape_html(&article.body))),
        ),
        source: Some(Source::markdown(article.body.clone())),
        published: Some(article.created_at),
        updated: (article.updated_at > article.created_at).then_some(article.updated_at),
        tag: extract_hashtags(&article.body)
            .into_iter()
            .map(|name| Hashtag::new(&name))
            .collect(),
        replies: Some(join(&id, "replies")),
        pinned: Some(article.pinned),
        locked: Some(article.locked),
        comment_count: Some(ctx.storage().count_comments(article.id).await?),
        like_count: Some(ctx.storage().count_article_likes(article.id).await?),
        id,
    })
}

/// The federated representation of a local comment.
pub async fn note_object(
    ctx: &AppContext,
    comment: &Comment,
    article: &Article,
) -> Result<NoteObject, Error> {
    let config = ctx.config();
    let author = match comment.user_id {
        Some(user_id) => ctx
            .storage()
            .user_by_id(user_id)
            .await?
            .ok_or(Error::NotFound)?,
        None => return Err(Error::Validation("not a local comment".to_string())),
    };
    let in_reply_to = match comment.parent_id {
        Some(parent_id) => {
            let parent = ctx
                .storage()
                .comment_by_id(parent_id)
                .await?
                .ok_or(Error::NotFound)?;
            comment_uri(ctx, &parent, article)
        }
        None => article_uri_of(ctx, article),
    };
    Ok(NoteObject {
        kind: Default::default(),
        id: comment_uri(ctx, comment, article),
        attributed_to: config.user_actor_uri(&author.username),
        to: vec![public()],
        cc: board_uris_of(ctx, article.id).await?,
        audience: vec![],
        in_reply_to: Some(in_reply_to),
        content: Some(
            comment
                .body_html
                .clone()
                .unwrap_or_else(|| format!("<p>{}</p>", escape_html(&comment.body))),
        ),
        source: Some(Source::markdown(comment.body.clone())),
        published: Some(comment.created_at),
    })
}

fn comment_uri(ctx: &AppContext, comment: &Comment, article: &Article) -> Url {
    match &comment.ap_id {
        Some(ap_id) => Url::parse(ap_id).unwrap_or_else(|_| ctx.config().base_url.clone()),
        None => join(
            &ctx.config().article_uri(&article.slug),
            &format!("comments/{}", comment.id),
        ),
    }
}

fn article_uri_of(ctx: &AppContext, article: &Article) -> Url {
    match &article.ap_id {
        Some(ap_id) => Url::parse(ap_id).unwrap_or_else(|_| ctx.config().base_url.clone()),
        None => ctx.config().article_uri(&article.slug),
    }
}

async fn board_uris_of(ctx: &AppContext, article_id: i64) -> Result<Vec<Url>, Error> {
    let mut uris = Vec::new();
    for board_id in ctx.storage().article_board_ids(article_id).await? {
        if let Some(board) = ctx.storage().board_by_id(board_id).await? {
            if board.is_public() && board.ap_enabled {
                uris.push(ctx.config().board_actor_uri(&board.slug));
            }
        }
    }
    Ok(uris)
}

// --- publish: articles and comments -----------------------------------------

/// Article created: `Create(Article)` to the author's and boards'
/// followers.
pub async fn publish_article_created(ctx: &AppContext, article: &Article) -> Result<(), Error> {
    let (author_uri, inboxes) = article_delivery_targets(ctx, article).await?;
    let object = article_object(ctx, article).await?;
    let activity = CreatePost {
        kind: Default::default(),
        id: ctx.config().new_activity_uri(),
        actor: author_uri.clone(),
        to: object.to.clone(),
        cc: object.cc.clone(),
        audience: vec![],
        object: PostObject::Article(Box::new(object)),
    };
    enqueue(ctx, &activity, &author_uri, inboxes).await
}

/// Article updated: `Update(Article)` with refreshed content.
pub async fn publish_article_updated(ctx: &AppContext, article: &Article) -> Result<(), Error> {
    let (author_uri, inboxes) = article_delivery_targets(ctx, article).await?;
    let object = article_object(ctx, article).await?;
    let activity = UpdateActivity {
        kind: Default::default(),
        id: ctx.config().new_activity_uri(),
        actor: author_uri.clone(),
        to: vec![public()],
        object,
    };
    enqueue(ctx, &activity, &author_uri, inboxes).await
}

/// Article soft-deleted: `Delete` with the bare object IRI.
pub async fn publish_article_deleted(ctx: &AppContext, article: &Article) -> Result<(), Error> {
    let (author_uri, inboxes) = article_delivery_targets(ctx, article).await?;
    let activity = Delete {
        kind: Default::default(),
        id: ctx.config().new_activity_uri(),
        actor: author_uri.clone(),
        object: DeleteObject::Ref(ObjectRef::Id(ctx.config().article_uri(&article.slug))),
    };
    enqueue(ctx, &activity, &author_uri, inboxes).await
}

/// Comment created: `Create(Note)` with `inReplyTo` and board audience.
pub async fn publish_comment_created(
    ctx: &AppContext,
    comment: &Comment,
    article: &Article,
) -> Result<(), Error> {
    let author = comment_author(ctx, comment).await?;
    let author = ctx.keys().ensure_user_keypair(author).await?;
    let author_uri = ctx.config().user_actor_uri(&author.username);

    let mut inboxes = follower_inboxes_for_article(ctx, article).await?;
    inboxes.extend(
        ctx.storage()
            .follower_inboxes(comment.user_id, None)
            .await?,
    );
    // The remote author of the thread gets a direct copy.
    if let Some(remote_actor_id) = article.remote_actor_id {
        if let Some(actor) = ctx.storage().remote_actor_by_id(remote_actor_id).await? {
            inboxes.push(actor.shared_inbox_or_inbox().to_string());
        }
    }

    let object = note_object(ctx, comment, article).await?;
    let activity = CreatePost {
        kind: Default::default(),
        id: ctx.config().new_activity_uri(),
        actor: author_uri.clone(),
        to: object.to.clone(),
        cc: object.cc.clone(),
        audience: vec![],
        object: PostObject::Note(Box::new(object)),
    };
    enqueue(ctx, &activity, &author_uri, inboxes).await
}

// --- publish: follow handshakes ---------------------------------------------

/// Accept an inbound follow; addressed straight to the follower.
pub async fn publish_accept_follow(
    ctx: &AppContext,
    follow: &Follow,
    follower: &RemoteActor,
) -> Result<(), Error> {
    let target_uri = follow.object.clone();
    ensure_signing_key(ctx, &target_uri).await?;
    let activity = AcceptFollow {
        kind: Default::default(),
        id: ctx.config().new_activity_uri(),
        actor: target_uri.clone(),
        object: FollowRef::Follow(follow.clone()),
    };
    enqueue(
        ctx,
        &activity,
        &target_uri,
        vec![follower.shared_inbox_or_inbox().to_string()],
    )
    .await
}

/// Reject an inbound follow (moderator decision on held boards).
pub async fn publish_reject_follow(
    ctx: &AppContext,
    follow: &Follow,
    follower: &RemoteActor,
) -> Result<(), Error> {
    let target_uri = follow.object.clone();
    ensure_signing_key(ctx, &target_uri).await?;
    let activity = RejectFollow {
        kind: Default::default(),
        id: ctx.config().new_activity_uri(),
        actor: target_uri.clone(),
        object: FollowRef::Follow(follow.clone()),
    };
    enqueue(
        ctx,
        &activity,
        &target_uri,
        vec![follower.shared_inbox_or_inbox().to_string()],
    )
    .await
}

/// Outbound follow of a remote actor.
pub async fn publish_follow(
    ctx: &AppContext,
    user: &User,
    target: &RemoteActor,
    follow_ap_id: &Url,
) -> Result<(), Error> {
    let user = ctx.keys().ensure_user_keypair(user.clone()).await?;
    let actor_uri = ctx.config().user_actor_uri(&user.username);
    let target_ap_id =
        Url::parse(&target.ap_id).map_err(|_| Error::Validation("bad actor id".to_string()))?;
    let activity = Follow::new(follow_ap_id.clone(), actor_uri.clone(), target_ap_id);
    enqueue(ctx, &activity, &actor_uri, vec![target.inbox.clone()]).await
}

/// Retract an outbound follow.
pub async fn publish_undo_follow(
    ctx: &AppContext,
    user: &User,
    target: &RemoteActor,
    follow_ap_id: &Url,
) -> Result<(), Error> {
    let user = ctx.keys().ensure_user_keypair(user.clone()).await?;
    let actor_uri = ctx.config().user_actor_uri(&user.username);
    let target_ap_id =
        Url::parse(&target.ap_id).map_err(|_| Error::Validation("bad actor id".to_string()))?;
    let follow = Follow::new(follow_ap_id.clone(), actor_uri.clone(), target_ap_id);
    let activity = Undo {
        kind: Default::default(),
        id: ctx.config().new_activity_uri(),
        actor: actor_uri.clone(),
        object: UndoObject::Follow(follow),
    };
    enqueue(ctx, &activity, &actor_uri, vec![target.inbox.clone()]).await
}

// --- publish: key rotation ---------------------------------------------------

/// After a key rotation, followers learn the new key via `Update(Actor)`.
pub async fn publish_user_key_rotation(ctx: &AppContext, user: &User) -> Result<(), Error> {
    let actor_uri = ctx.config().user_actor_uri(&user.username);
    let object = person_object(ctx, user)?;
    let activity = UpdateActivity {
        kind: Default::default(),
        id: ctx.config().new_activity_uri(),
        actor: actor_uri.clone(),
        to: vec![public()],
        object,
    };
    let inboxes = ctx.storage().follower_inboxes(Some(user.id), None).await?;
    enqueue(ctx, &activity, &actor_uri, inboxes).await
}

pub async fn publish_board_key_rotation(ctx: &AppContext, board: &Board) -> Result<(), Error> {
    let actor_uri = ctx.config().board_actor_uri(&board.slug);
    let parent_slug = match board.parent_id {
        Some(parent_id) => ctx
            .storage()
            .board_by_id(parent_id)
            .await?
            .map(|b| b.slug),
        None => None,
    };
    let sub_slugs = ctx.storage().sub_board_slugs(board.id).await?;
    let object = group_object(ctx, board, parent_slug.as_deref(), &sub_slugs)?;
    let activity = UpdateActivity {
        kind: Default::default(),
        id: ctx.config().new_activity_uri(),
        actor: actor_uri.clone(),
        to: vec![public()],
        object,
    };
    let inboxes = ctx.storage().follower_inboxes(None, Some(board.id)).await?;
    enqueue(ctx, &activity, &actor_uri, inboxes).await
}

// --- shared plumbing ---------------------------------------------------------

/// Outbound Update wrapper; the object is an article or an actor document.
#[derive(Serialize)]
struct UpdateActivity<T: Serialize> {
    #[serde(rename = "type")]
    kind: UpdateType,
    id: Url,
    actor: Url,
    to: Vec<Url>,
    object: T,
}

async fn article_delivery_targets(
    ctx: &AppContext,
    article: &Article,
) -> Result<(Url, Vec<String>), Error> {
    let author = match article.user_id {
        Some(user_id) => ctx
            .storage()
            .user_by_id(user_id)
            .await?
            .ok_or(Error::NotFound)?,
        None => return Err(Error::Validation("not a local article".to_string())),
    };
    let author = ctx.keys().ensure_user_keypair(author).await?;
    let author_uri = ctx.config().user_actor_uri(&author.username);
    let mut inboxes = ctx
        .storage()
        .follower_inboxes(article.user_id, None)
        .await?;
    inboxes.extend(follower_inboxes_for_article(ctx, article).await?);
    Ok((author_uri, inboxes))
}

async fn follower_inboxes_for_article(
    ctx: &AppContext,
    article: &Article,
) -> Result<Vec<String>, Error> {
    let mut inboxes = Vec::new();
    for board_id in ctx.storage().article_board_ids(article.id).await? {
        inboxes.extend(ctx.storage().follower_inboxes(None, Some(board_id)).await?);
    }
    Ok(inboxes)
}

async fn comment_author(ctx: &AppContext, comment: &Comment) -> Result<User, Error> {
    match comment.user_id {
        Some(user_id) => ctx
            .storage()
            .user_by_id(user_id)
            .await?
            .ok_or(Error::NotFound),
        None => Err(Error::Validation("not a local comment".to_string())),
    }
}

/// Make sure the signing actor named by `actor_uri` has a keypair before a
/// job referencing it lands in the queue.
async fn ensure_signing_key(ctx: &AppContext, actor_uri: &Url) -> Result<(), Error> {
    use crate::federation::{parse_local_actor, LocalActorRef};
    match parse_local_actor(ctx.config(), actor_uri) {
        Some(LocalActorRef::User(username)) => {
            let user = ctx
                .storage()
                .user_by_username(&username)
                .await?
                .ok_or(Error::NotFound)?;
            ctx.keys().ensure_user_keypair(user).await?;
        }
        Some(LocalActorRef::Board(slug)) => {
            let board = ctx
                .storage()
                .board_by_slug(&slug)
                .await?
                .ok_or(Error::NotFound)?;
            ctx.keys().ensure_board_keypair(board).await?;
        }
        Some(LocalActorRef::Site) => {
            ctx.keys().ensure_site_keypair().await?;
        }
        None => return Err(Error::Validation("not a local actor".to_string())),
    }
    Ok(())
}

async fn enqueue<T: Serialize>(
    ctx: &AppContext,
    activity: &T,
    actor_uri: &Url,
    inboxes: Vec<String>,
) -> Result<(), Error> {
    let value = serde_json::to_value(WithContext::new_default(activity))?;
    delivery::enqueue_activity(ctx, value, actor_uri, inboxes).await?;
    Ok(())
}

fn join(base: &Url, segment: &str) -> Url {
    Url::parse(&format!("{base}/{segment}")).expect("fixed suffix keeps url valid")
}

// --- text helpers ------------------------------------------------------------

static FENCED_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```.*?```").expect("static regex"));
static INLINE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`[^`]*`").expect("static regex"));
static IMAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\([^)]*\)").expect("static regex"));
static LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("static regex"));
static MARKUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"[*_~#>|]+").expect("static regex"));
static HASHTAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[\s(])#([A-Za-z0-9_][A-Za-z0-9_-]*)").expect("static regex"));
static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("static regex"));

/// Plain text rendering of a markdown body.
pub fn strip_markdown(body: &str) -> String {
    let text = FENCED_CODE.replace_all(body, " ");
    let text = INLINE_CODE.replace_all(&text, " ");
    let text = IMAGE.replace_all(&text, "$1");
    let text = LINK.replace_all(&text, "$1");
    let text = MARKUP.replace_all(&text, "");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Plain-text preview, at most [SUMMARY_MAX_CHARS] characters.
pub fn summary_of(body: &str) -> String {
    let stripped = strip_markdown(body);
    if stripped.chars().count() <= SUMMARY_MAX_CHARS {
        return stripped;
    }
    let mut out: String = stripped.chars().take(SUMMARY_MAX_CHARS - 1).collect();
    out.push('…');
    out
}

/// Hashtags found in a body, code blocks excluded, in order of first
/// appearance.
pub fn extract_hashtags(body: &str) -> Vec<String> {
    let text = FENCED_CODE.replace_all(body, " ");
    let text = INLINE_CODE.replace_all(&text, " ");
    let mut seen = Vec::new();
    for capture in HASHTAG.captures_iter(&text) {
        let name = capture[1].to_string();
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}

/// Title derived from content when a note has no `name`.
pub fn derive_title(content: &str) -> String {
    let text = HTML_TAG.replace_all(content, " ");
    let stripped = strip_markdown(&text);
    if stripped.is_empty() {
        return "Untitled".to_string();
    }
    let mut title: String = stripped.chars().take(80).collect();
    if stripped.chars().count() > 80 {
        title.push('…');
    }
    title
}

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// URL-safe slug from a title.
pub fn slugify(title: &str) -> String {
    let mut slug = String::new();
    let mut previous_dash = true;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            previous_dash = false;
        } else if !previous_dash {
            slug.push('-');
            previous_dash = true;
        }
        if slug.len() >= 64 {
            break;
        }
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        "article".to_string()
    } else {
        slug
    }
}

/// Slug with a random suffix, for collision retries.
pub fn slugify_with_suffix(title: &str) -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("{}-{suffix}", slugify(title))
}
