//! Actor key federated for HTTP signatures.

use serde::{Deserialize, Serialize};
use url::Url;

/// Public key federated in the `publicKey` field of all actors.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKey {
    /// Id of this key, `{actor_id}#main-key`.
    pub id: String,
    /// The actor that owns this key.
    pub owner: Url,
    /// The key in PEM format.
    pub public_key_pem: String,
}

impl PublicKey {
    pub fn new(owner: Url, public_key_pem: String) -> Self {
        let id = main_key_id(&owner);
        PublicKey {
            id,
            owner,
            public_key_pem,
        }
    }
}

/// Standard key id for an actor.
pub fn main_key_id(owner: &Url) -> String {
    format!("{}#main-key", &owner)
}
