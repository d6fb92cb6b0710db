//! Baudrate: a federated forum server speaking ActivityPub.
//!
//! Local users see boards, articles and comments; the Fediverse sees
//! Person/Group actors, HTTP-signed activities, and collections. The
//! binary in `main.rs` wires configuration, storage, the HTTP router and
//! the background workers together.

pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod federation;
pub mod feed;
pub mod http;
pub mod keys;
pub mod maintenance;
pub mod moderation;
pub mod notifications;
pub mod pubsub;
pub mod storage;
pub mod vault;
pub mod webpush;
