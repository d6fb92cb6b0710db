//! Wrapper for federated structs which handles the `@context` field.
//!
//! Used when sending ActivityPub data, to add `@context` once at the top
//! level instead of repeating it on every nested struct.

use super::helpers::deserialize_one_or_many;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default context used in ActivityPub.
const DEFAULT_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";

/// Extension context declaring the `baudrate:` keys used on articles and
/// board actors.
const BAUDRATE_CONTEXT: &str = "https://baudrate.org/ns";

#[derive(Serialize, Deserialize, Debug)]
pub struct WithContext<T> {
    #[serde(rename = "@context")]
    #[serde(deserialize_with = "deserialize_one_or_many")]
    context: Vec<Value>,
    #[serde(flatten)]
    inner: T,
}

impl<T> WithContext<T> {
    /// Wrap with the default ActivityStreams context plus the baudrate
    /// extension context.
    pub fn new_default(inner: T) -> WithContext<T> {
        let context = vec![
            Value::String(DEFAULT_CONTEXT.to_string()),
            Value::String(BAUDRATE_CONTEXT.to_string()),
        ];
        WithContext { context, inner }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T> Clone for WithContext<T>
where
    T: Clone,
{
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            inner: self.inner.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_is_flattened() {
        #[derive(Serialize)]
        struct Note {
            content: String,
        }
        let wrapped = WithContext::new_default(Note {
            content: "Hello world".to_string(),
        });
        let serialized = serde_json::to_string(&wrapped).unwrap();
        assert_eq!(
            serialized,
            r#"{"@context":["https://www.w3.org/ns/activitystreams","https://baudrate.org/ns"],"content":"Hello world"}"#
        );
    }

    #[test]
    fn accepts_single_string_context() {
        #[derive(Deserialize)]
        struct Note {
            content: String,
        }
        let parsed: WithContext<Note> = serde_json::from_str(
            r#"{"@context":"https://www.w3.org/ns/activitystreams","content":"hi"}"#,
        )
        .unwrap();
        assert_eq!(parsed.inner().content, "hi");
    }
}
