//! Data structures which define federated messages on the wire.

pub mod actors;
pub mod collections;
pub mod context;
pub mod helpers;
pub mod objects;
pub mod public_key;

use crate::error::Error;
use url::Url;

/// Mime type for ActivityPub, used for `Accept` and `Content-Type` headers.
pub static FEDERATION_CONTENT_TYPE: &str = "application/activity+json";

/// Legacy JSON-LD content type still sent by some software.
pub static FEDERATION_CONTENT_TYPE_LD: &str =
    "application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"";

/// The `as:Public` audience collection.
pub fn public() -> Url {
    activitystreams_kinds::public()
}

/// Check that both urls have the same domain, as required for ids nested in
/// an activity.
pub fn verify_domains_match(a: &Url, b: &Url) -> Result<(), Error> {
    if a.domain() != b.domain() {
        return Err(Error::UrlVerification("domains do not match"));
    }
    Ok(())
}

/// Check that both urls are identical.
pub fn verify_urls_match(a: &Url, b: &Url) -> Result<(), Error> {
    if a != b {
        return Err(Error::UrlVerification("urls do not match"));
    }
    Ok(())
}
