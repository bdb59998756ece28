//! Entity records as held in the local cache and returned by the remote store

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Domain fields of a record, without its id
pub type Fields = serde_json::Map<String, Value>;

/// Prefix of ids synthesised for records created while offline
pub const PLACEHOLDER_PREFIX: &str = "offline-";

/// A member, event or attendance row.
///
/// The collection is implicit: it is the cache list the record lives in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(flatten)]
    pub fields: Fields,
}

impl EntityRecord {
    pub fn new(id: impl Into<String>, mut fields: Fields) -> Self {
        fields.remove("id");
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Build a record from a remote JSON object
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Whether the id was synthesised locally and awaits a server id
    pub fn is_placeholder(&self) -> bool {
        is_placeholder_id(&self.id)
    }

    /// Shallow merge: top-level patch keys overwrite, `id` is never touched.
    pub fn merge(&mut self, patch: &Fields) {
        for (key, value) in patch {
            if key != "id" {
                self.fields.insert(key.clone(), value.clone());
            }
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

pub fn is_placeholder_id(id: &str) -> bool {
    id.starts_with(PLACEHOLDER_PREFIX)
}

/// Top-level fields whose value is a placeholder id, e.g. an attendance
/// row pointing at a member created offline.
pub fn placeholder_references(fields: &Fields) -> Vec<&str> {
    fields
        .iter()
        .filter(|(_, value)| value.as_str().is_some_and(is_placeholder_id))
        .map(|(key, _)| key.as_str())
        .collect()
}

/// Server ids arrive as strings or as integers depending on the table.
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) if !s.is_empty() => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "record id must be a non-empty string or a number, got {other}"
        ))),
    }
}
