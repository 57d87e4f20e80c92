//! Schema-less documents as stored in the document database.
//!
//! A document is a JSON object. Three field names are reserved:
//! `_id` (the key), `_rev` (the revision token) and `docType` (the type tag
//! that partitions the store into entities).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field holding the document key.
pub const KEY_FIELD: &str = "_id";
/// Field holding the revision token.
pub const REV_FIELD: &str = "_rev";
/// Field holding the entity type tag.
pub const TYPE_FIELD: &str = "docType";

/// A JSON object stored in (or headed for) the document store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Returns the document key, if one has been assigned.
    pub fn key(&self) -> Option<&str> {
        self.str_field(KEY_FIELD)
    }

    /// Returns the revision token, if the document has been written.
    pub fn rev(&self) -> Option<&str> {
        self.str_field(REV_FIELD)
    }

    pub fn type_tag(&self) -> Option<&str> {
        self.str_field(TYPE_FIELD)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Returns a field only if it is a string.
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    /// True when the field is present and carries a usable value
    /// (not null, not an empty string).
    pub fn has_value(&self, field: &str) -> bool {
        match self.0.get(field) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        }
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    /// Keeps only the fields accepted by `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.0.retain(|field, _| keep(field));
    }

    /// Copies every field of `patch` over this document.
    pub fn merge(&mut self, patch: Document) {
        for (field, value) in patch.0 {
            self.0.insert(field, value);
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Value::Object(doc.0)
    }
}

impl TryFrom<Value> for Document {
    type Error = Value;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(other),
        }
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Builds a [`Document`] from a `serde_json::json!` object literal.
///
/// Panics if the value is not an object; intended for literals.
#[cfg(test)]
#[macro_export]
macro_rules! doc {
    ($($json:tt)+) => {
        $crate::models::Document::try_from(::serde_json::json!($($json)+))
            .expect("doc! expects an object literal")
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reserved_fields() {
        let doc = crate::doc!({"_id": "k1", "_rev": "1-a", "docType": "Child", "name": "Al"});
        assert_eq!(doc.key(), Some("k1"));
        assert_eq!(doc.rev(), Some("1-a"));
        assert_eq!(doc.type_tag(), Some("Child"));
    }

    #[test]
    fn test_has_value() {
        let doc = crate::doc!({"a": "", "b": null, "c": false, "d": 0, "e": "x"});
        assert!(!doc.has_value("a"));
        assert!(!doc.has_value("b"));
        assert!(doc.has_value("c"));
        assert!(doc.has_value("d"));
        assert!(doc.has_value("e"));
        assert!(!doc.has_value("missing"));
    }

    #[test]
    fn test_merge_overwrites_and_keeps_untouched() {
        let mut doc = crate::doc!({"name": "Al", "active": false});
        doc.merge(crate::doc!({"active": true}));
        assert_eq!(doc.get("name"), Some(&json!("Al")));
        assert_eq!(doc.get("active"), Some(&json!(true)));
    }

    #[test]
    fn test_try_from_rejects_non_objects() {
        assert!(Document::try_from(json!([1, 2])).is_err());
        assert!(Document::try_from(json!({"a": 1})).is_ok());
    }
}
