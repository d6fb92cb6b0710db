//! Content objects: articles (Article/Page) and comments (Note).

use super::helpers::{deserialize_one_or_many, deserialize_skip_error};
use activitystreams_kinds::object::{NoteType, TombstoneType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Articles federate as `Article`; some platforms send long-form content as
/// `Page` (Lemmy) and both are accepted on ingest.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum ArticleKind {
    #[default]
    Article,
    Page,
}

/// Markdown source attached beside the rendered `content`.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub content: String,
    pub media_type: String,
}

impl Source {
    pub fn markdown(content: impl Into<String>) -> Self {
        Source {
            content: content.into(),
            media_type: "text/markdown".to_string(),
        }
    }
}

/// Hashtag entry in an object's `tag` array.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Hashtag {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<Url>,
}

impl Hashtag {
    pub fn new(name: &str) -> Self {
        Hashtag {
            kind: "Hashtag".to_string(),
            name: format!("#{name}"),
            href: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleObject {
    #[serde(rename = "type")]
    pub kind: ArticleKind,
    pub id: Url,
    pub attributed_to: Url,
    #[serde(deserialize_with = "deserialize_one_or_many", default)]
    pub to: Vec<Url>,
    #[serde(deserialize_with = "deserialize_one_or_many", default)]
    pub cc: Vec<Url>,
    #[serde(deserialize_with = "deserialize_one_or_many", default)]
    pub audience: Vec<Url>,
    /// Title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Plain-text preview, markdown stripped, at most 500 chars.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Rendered HTML.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Markdown source.
    #[serde(default, deserialize_with = "deserialize_skip_error")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tag: Vec<Hashtag>,
    /// URL of the replies collection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replies: Option<Url>,
    #[serde(rename = "baudrate:pinned", skip_serializing_if = "Option::is_none")]
    pub pinned: Option<bool>,
    #[serde(rename = "baudrate:locked", skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
    #[serde(
        rename = "baudrate:commentCount",
        skip_serializing_if = "Option::is_none"
    )]
    pub comment_count: Option<i64>,
    #[serde(rename = "baudrate:likeCount", skip_serializing_if = "Option::is_none")]
    pub like_count: Option<i64>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteObject {
    #[serde(rename = "type")]
    pub kind: NoteType,
    pub id: Url,
    pub attributed_to: Url,
    #[serde(deserialize_with = "deserialize_one_or_many", default)]
    pub to: Vec<Url>,
    #[serde(deserialize_with = "deserialize_one_or_many", default)]
    pub cc: Vec<Url>,
    #[serde(deserialize_with = "deserialize_one_or_many", default)]
    pub audience: Vec<Url>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<Url>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, deserialize_with = "deserialize_skip_error")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
}

/// Object of a Create/Update: an article-like object or a comment-like
/// note.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PostObject {
    Article(Box<ArticleObject>),
    Note(Box<NoteObject>),
}

impl PostObject {
    pub fn id(&self) -> &Url {
        match self {
            PostObject::Article(a) => &a.id,
            PostObject::Note(n) => &n.id,
        }
    }

    pub fn attributed_to(&self) -> &Url {
        match self {
            PostObject::Article(a) => &a.attributed_to,
            PostObject::Note(n) => &n.attributed_to,
        }
    }

    /// Union of the object's own addressing fields.
    pub fn audience(&self) -> Vec<&Url> {
        let (to, cc, audience) = match self {
            PostObject::Article(a) => (&a.to, &a.cc, &a.audience),
            PostObject::Note(n) => (&n.to, &n.cc, &n.audience),
        };
        to.iter().chain(cc.iter()).chain(audience.iter()).collect()
    }
}

/// Marker left when an object is deleted.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Tombstone {
    #[serde(rename = "type")]
    pub kind: TombstoneType,
    pub id: Url,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lemmy_page_parses_as_article() {
        let raw = r#"{
            "type": "Page",
            "id": "https://lemmy.example/post/17",
            "attributedTo": "https://lemmy.example/u/zoe",
            "to": ["https://www.w3.org/ns/activitystreams#Public"],
            "name": "A post",
            "content": "<p>hello</p>",
            "source": {"content": "hello", "mediaType": "text/markdown"}
        }"#;
        let object: PostObject = serde_json::from_str(raw).unwrap();
        match object {
            PostObject::Article(article) => {
                assert_eq!(article.kind, ArticleKind::Page);
                assert_eq!(article.name.as_deref(), Some("A post"));
            }
            PostObject::Note(_) => panic!("expected article"),
        }
    }

    #[test]
    fn reply_note_parses_as_note() {
        let raw = r#"{
            "type": "Note",
            "id": "https://mastodon.example/notes/9",
            "attributedTo": "https://mastodon.example/users/zoe",
            "to": "https://www.w3.org/ns/activitystreams#Public",
            "inReplyTo": "https://baud.example/ap/articles/hello",
            "content": "<p>nice post</p>"
        }"#;
        let object: PostObject = serde_json::from_str(raw).unwrap();
        match object {
            PostObject::Note(note) => {
                assert!(note.in_reply_to.is_some());
            }
            PostObject::Article(_) => panic!("expected note"),
        }
    }

    #[test]
    fn extension_keys_round_trip() {
        let article = ArticleObject {
            kind: ArticleKind::Article,
            id: Url::parse("https://baud.example/ap/articles/hello").unwrap(),
            attributed_to: Url::parse("https://baud.example/ap/users/alice").unwrap(),
            to: vec![super::super::public()],
            cc: vec![],
            audience: vec![],
            name: Some("Hello".into()),
            summary: Some("Hello".into()),
            content: Some("<p>Hello</p>".into()),
            source: Some(Source::markdown("Hello")),
            published: None,
            updated: None,
            tag: vec![Hashtag::new("intro")],
            replies: None,
            pinned: Some(false),
            locked: Some(false),
            comment_count: Some(0),
            like_count: Some(0),
        };
        let value = serde_json::to_value(&article).unwrap();
        assert_eq!(value["baudrate:pinned"], false);
        assert_eq!(value["tag"][0]["name"], "#intro");
        let back: ArticleObject = serde_json::from_value(value).unwrap();
        assert_eq!(back.name, article.name);
    }
}
