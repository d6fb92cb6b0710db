//! In-process topic broadcast.
//!
//! Payloads carry only IDs; subscribers re-read authoritative state from
//! storage. Channels are bounded and lossy: a subscriber that falls behind
//! sees `Lagged` and re-syncs, it never blocks publishers.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

/// Lightweight events fanned out to topic subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    NotificationCreated { notification_id: i64 },
    FeedItemCreated { feed_item_id: i64 },
    ArticleCreated { article_id: i64 },
    CommentCreated { comment_id: i64 },
}

/// Topic name for a user's notification stream.
pub fn notifications_topic(user_id: i64) -> String {
    format!("notifications:user:{user_id}")
}

/// Topic name for a user's personal feed.
pub fn feed_topic(user_id: i64) -> String {
    format!("feed:user:{user_id}")
}

/// Topic name for a board's article stream.
pub fn board_topic(board_id: i64) -> String {
    format!("board:{board_id}")
}

#[derive(Clone, Default)]
pub struct PubSub {
    topics: Arc<Mutex<HashMap<String, broadcast::Sender<Event>>>>,
}

impl PubSub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<Event> {
        let mut topics = self.topics.lock().expect("pubsub mutex poisoned");
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Fire-and-forget broadcast. Topics with no live subscribers are
    /// dropped from the map on the way through.
    pub fn broadcast(&self, topic: &str, event: Event) {
        let mut topics = self.topics.lock().expect("pubsub mutex poisoned");
        let dead = match topics.get(topic) {
            Some(sender) => sender.send(event).is_err(),
            None => false,
        };
        if dead {
            topics.remove(topic);
        }
    }
}
