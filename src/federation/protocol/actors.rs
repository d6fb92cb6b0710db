//! Actor documents: what we serve for local users, boards and the site, and
//! what we accept when resolving remote actors.

use super::{
    helpers::deserialize_skip_error,
    public_key::PublicKey,
};
use activitystreams_kinds::actor::{GroupType, OrganizationType, PersonType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_inbox: Option<Url>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Icon {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<Url>,
}

/// Person actor served for a local user.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    #[serde(rename = "type")]
    pub kind: PersonType,
    pub id: Url,
    pub preferred_username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub inbox: Url,
    pub outbox: Url,
    pub followers: Url,
    pub following: Url,
    pub endpoints: Endpoints,
    pub public_key: PublicKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<Icon>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
}

/// Group actor served for a board.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    #[serde(rename = "type")]
    pub kind: GroupType,
    pub id: Url,
    pub preferred_username: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub inbox: Url,
    pub outbox: Url,
    pub followers: Url,
    pub endpoints: Endpoints,
    pub public_key: PublicKey,
    #[serde(
        rename = "baudrate:parentBoard",
        skip_serializing_if = "Option::is_none"
    )]
    pub parent_board: Option<Url>,
    #[serde(rename = "baudrate:subBoards", skip_serializing_if = "Vec::is_empty", default)]
    pub sub_boards: Vec<Url>,
}

/// Organization actor served for the site itself.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    #[serde(rename = "type")]
    pub kind: OrganizationType,
    pub id: Url,
    pub name: String,
    pub inbox: Url,
    pub public_key: PublicKey,
}

/// Lenient parse of any remote actor document. Required: id, type, inbox
/// and the signing key; everything else is optional.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorJson {
    pub id: Url,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub inbox: Url,
    pub public_key: PublicKey,
    #[serde(default, deserialize_with = "deserialize_skip_error")]
    pub endpoints: Option<Endpoints>,
    #[serde(default, deserialize_with = "deserialize_skip_error")]
    pub icon: Option<Icon>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mastodon_shaped_actor() {
        let raw = r#"{
            "id": "https://mastodon.example/users/zoe",
            "type": "Person",
            "preferredUsername": "zoe",
            "name": "Zoe",
            "inbox": "https://mastodon.example/users/zoe/inbox",
            "endpoints": {"sharedInbox": "https://mastodon.example/inbox"},
            "publicKey": {
                "id": "https://mastodon.example/users/zoe#main-key",
                "owner": "https://mastodon.example/users/zoe",
                "publicKeyPem": "-----BEGIN PUBLIC KEY-----"
            },
            "icon": {"type": "Image", "url": "https://mastodon.example/avatar.png"}
        }"#;
        let actor: ActorJson = serde_json::from_str(raw).unwrap();
        assert_eq!(actor.kind, "Person");
        assert_eq!(
            actor.endpoints.unwrap().shared_inbox.unwrap().as_str(),
            "https://mastodon.example/inbox"
        );
    }

    #[test]
    fn missing_inbox_is_rejected() {
        let raw = r#"{
            "id": "https://mastodon.example/users/zoe",
            "type": "Person",
            "publicKey": {
                "id": "k", "owner": "https://mastodon.example/users/zoe",
                "publicKeyPem": "pem"
            }
        }"#;
        assert!(serde_json::from_str::<ActorJson>(raw).is_err());
    }
}
