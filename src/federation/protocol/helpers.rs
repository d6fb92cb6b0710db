//! Serde helpers for the differently shaped data other platforms send.

use serde::{Deserialize, Deserializer};

/// Deserialize a JSON single value or array into a Vec.
///
/// Mastodon sends `to` as an array, some platforms send a bare string.
pub fn deserialize_one_or_many<'de, T, D>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        One(T),
        Many(Vec<T>),
    }

    let result: OneOrMany<T> = Deserialize::deserialize(deserializer)?;
    Ok(match result {
        OneOrMany::Many(list) => list,
        OneOrMany::One(value) => vec![value],
    })
}

/// Attempt to deserialize the item, falling back to the type's default on a
/// shape mismatch. Use together with `#[serde(default)]` for optional
/// fields that other platforms send with surprising types.
pub fn deserialize_skip_error<'de, T, D>(deserializer: D) -> Result<T, D::Error>
where
    T: Deserialize<'de> + Default,
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    #[test]
    fn one_or_many() {
        #[derive(Deserialize)]
        struct Note {
            #[serde(deserialize_with = "deserialize_one_or_many")]
            to: Vec<Url>,
        }

        let single: Note =
            serde_json::from_str(r#"{"to": "https://example.com/u/alice" }"#).unwrap();
        assert_eq!(single.to.len(), 1);

        let multiple: Note = serde_json::from_str(
            r#"{"to": ["https://example.com/u/alice", "https://lemmy.ml/u/bob"]}"#,
        )
        .unwrap();
        assert_eq!(multiple.to.len(), 2);
    }

    #[test]
    fn skip_error_falls_back_to_default() {
        #[derive(Deserialize)]
        struct Note {
            #[serde(deserialize_with = "deserialize_skip_error", default)]
            source: Option<String>,
        }

        let note: Note =
            serde_json::from_str(r#"{"source": {"content": "x", "mediaType": "text/markdown"}}"#)
                .unwrap();
        assert_eq!(note.source, None);
    }
}
