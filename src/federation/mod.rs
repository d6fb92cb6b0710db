//! The ActivityPub federation engine.

pub mod activities;
pub mod delivery;
pub mod follows;
pub mod inbox;
pub mod protocol;
pub mod publisher;
pub mod resolver;
pub mod signatures;

use crate::config::SiteConfig;
use url::Url;

/// A local actor addressed by one of our own actor URIs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalActorRef {
    User(String),
    Board(String),
    Site,
}

/// Parse a URL against the local actor URI scheme. Returns `None` for
/// foreign URLs and for local URLs that are not actors.
pub fn parse_local_actor(config: &SiteConfig, url: &Url) -> Option<LocalActorRef> {
    if !config.is_local_url(url) {
        return None;
    }
    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
    if segments.next() != Some("ap") {
        return None;
    }
    match (segments.next(), segments.next(), segments.next()) {
        (Some("users"), Some(name), None) => Some(LocalActorRef::User(name.to_string())),
        (Some("boards"), Some(slug), None) => Some(LocalActorRef::Board(slug.to_string())),
        (Some("site"), None, None) => Some(LocalActorRef::Site),
        _ => None,
    }
}

/// Extract the slug from a local article URI.
pub fn parse_local_article_slug(config: &SiteConfig, url: &Url) -> Option<String> {
    if !config.is_local_url(url) {
        return None;
    }
    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
    if segments.next() != Some("ap") || segments.next() != Some("articles") {
        return None;
    }
    match (segments.next(), segments.next()) {
        (Some(slug), None) => Some(slug.to_string()),
        _ => None,
    }
}
