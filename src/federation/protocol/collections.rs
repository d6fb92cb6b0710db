//! OrderedCollection plumbing for outbox/followers/following/replies.

use activitystreams_kinds::collection::{OrderedCollectionPageType, OrderedCollectionType};
use serde::{Deserialize, Serialize};
use url::Url;

/// Items per collection page.
pub const PAGE_SIZE: i64 = 20;

/// Root collection document pointing at its first page.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderedCollection {
    #[serde(rename = "type")]
    pub kind: OrderedCollectionType,
    pub id: Url,
    pub total_items: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<Url>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderedCollectionPage {
    #[serde(rename = "type")]
    pub kind: OrderedCollectionPageType,
    pub id: Url,
    pub part_of: Url,
    pub total_items: i64,
    pub ordered_items: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<Url>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev: Option<Url>,
}

/// Build the root document for a paginated collection.
pub fn collection_root(id: Url, total_items: i64) -> OrderedCollection {
    let first = page_url(&id, 1);
    OrderedCollection {
        kind: Default::default(),
        id,
        total_items,
        first: Some(first),
    }
}

/// Build one page. `page` is 1-based; a page past the end carries an empty
/// `orderedItems`.
pub fn collection_page(
    id: &Url,
    page: i64,
    total_items: i64,
    ordered_items: Vec<serde_json::Value>,
) -> OrderedCollectionPage {
    let total_pages = (total_items + PAGE_SIZE - 1) / PAGE_SIZE;
    let next = (page < total_pages).then(|| page_url(id, page + 1));
    let prev = (page > 1).then(|| page_url(id, page - 1));
    OrderedCollectionPage {
        kind: Default::default(),
        id: page_url(id, page),
        part_of: id.clone(),
        total_items,
        ordered_items,
        next,
        prev,
    }
}

fn page_url(id: &Url, page: i64) -> Url {
    let mut url = id.clone();
    url.set_query(Some(&format!("page={page}")));
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_links() {
        let id = Url::parse("https://baud.example/ap/users/alice/outbox").unwrap();
        let page = collection_page(&id, 2, 50, vec![]);
        assert_eq!(
            page.next.unwrap().as_str(),
            "https://baud.example/ap/users/alice/outbox?page=3"
        );
        assert_eq!(
            page.prev.unwrap().as_str(),
            "https://baud.example/ap/users/alice/outbox?page=1"
        );
    }

    #[test]
    fn last_page_has_no_next() {
        let id = Url::parse("https://baud.example/ap/users/alice/outbox").unwrap();
        let page = collection_page(&id, 3, 50, vec![]);
        assert!(page.next.is_none());
    }
}
