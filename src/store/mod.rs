//! Document store adapters.
//!
//! The CRUD engine only talks to a [`DocumentStore`]: get by key, find by
//! predicate, insert/overwrite, delete by key+revision and ordered view
//! queries. Two adapters are provided:
//!
//! - [`CouchStore`]: a remote CouchDB database over HTTP.
//! - [`MemoryStore`]: an in-process map with the same revision and view
//!   semantics, used by tests and for local development.

pub mod couch;
pub mod memory;

use std::cmp::Ordering;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;
use crate::models::{Document, EntityKind, TYPE_FIELD};

pub use couch::CouchStore;
pub use memory::MemoryStore;

/// Name of the design document holding every range view.
pub const DESIGN_DOC: &str = "sortedSensors";

/// Key and new revision returned by a successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReceipt {
    pub ok: bool,
    pub id: String,
    pub rev: String,
}

/// A typed condition on a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// JSON equality; numbers compare by value, so `5` equals `5.0`.
    Equals(Value),
    /// Case-sensitive substring match on string fields.
    Contains(String),
}

impl Predicate {
    /// Evaluates the predicate against a field value (absent = `None`).
    pub fn matches(&self, value: Option<&Value>) -> bool {
        let Some(value) = value else {
            return false;
        };
        match self {
            Predicate::Equals(Value::Number(expected)) => match value {
                Value::Number(n) => n.as_f64() == expected.as_f64(),
                _ => false,
            },
            Predicate::Equals(expected) => value == expected,
            Predicate::Contains(needle) => value
                .as_str()
                .map(|s| s.contains(needle.as_str()))
                .unwrap_or(false),
        }
    }
}

/// Documents of one type tag matching every clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    pub type_tag: String,
    pub clauses: Vec<(String, Predicate)>,
    /// Projection; `None` returns whole documents.
    pub fields: Option<Vec<String>>,
}

impl Selector {
    pub fn for_type(type_tag: impl Into<String>) -> Self {
        Self {
            type_tag: type_tag.into(),
            clauses: Vec::new(),
            fields: None,
        }
    }

    pub fn with(mut self, field: impl Into<String>, predicate: Predicate) -> Self {
        self.clauses.push((field.into(), predicate));
        self
    }

    pub fn project<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// True if the document carries the type tag and satisfies every clause.
    pub fn matches(&self, doc: &Document) -> bool {
        doc.type_tag() == Some(self.type_tag.as_str())
            && self
                .clauses
                .iter()
                .all(|(field, predicate)| predicate.matches(doc.get(field)))
    }

    /// Applies the projection to a matching document.
    pub fn apply_projection(&self, doc: &Document) -> Document {
        match &self.fields {
            None => doc.clone(),
            Some(fields) => fields
                .iter()
                .filter_map(|f| doc.get(f).map(|v| (f.clone(), v.clone())))
                .collect(),
        }
    }
}

/// Parameters of an ordered view query, CouchDB style.
///
/// When `descending` is set, `start_key` is the upper bound and `end_key`
/// the lower one. Both bounds are inclusive.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ViewQuery {
    pub start_key: Option<Value>,
    pub end_key: Option<Value>,
    pub descending: bool,
    pub skip: u64,
    pub limit: u64,
}

/// One page of view rows, with their documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewPage {
    pub total_rows: u64,
    pub offset: u64,
    pub docs: Vec<Document>,
}

/// Declaration of a range view over one entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewDefinition {
    pub name: String,
    pub type_tag: String,
    pub owner_field: Option<String>,
    pub ordering_field: String,
}

impl ViewDefinition {
    /// Range views for every entity kind that declares one.
    pub fn all() -> Vec<ViewDefinition> {
        EntityKind::ALL
            .into_iter()
            .filter_map(|kind| {
                let def = kind.definition();
                def.range_view.map(|view| ViewDefinition {
                    name: def.type_tag.to_string(),
                    type_tag: def.type_tag.to_string(),
                    owner_field: view.owner_field.map(str::to_string),
                    ordering_field: view.ordering_field.to_string(),
                })
            })
            .collect()
    }

    /// Key the view emits for a document, or `None` if it is not indexed.
    pub fn emit(&self, doc: &Document) -> Option<Value> {
        if doc.type_tag() != Some(self.type_tag.as_str()) {
            return None;
        }
        let order = numeric(doc.get(&self.ordering_field));
        match &self.owner_field {
            Some(owner) => Some(Value::Array(vec![
                doc.get(owner).cloned().unwrap_or(Value::Null),
                order,
            ])),
            None => Some(order),
        }
    }

    /// JavaScript map function equivalent to [`ViewDefinition::emit`].
    pub fn map_function(&self) -> String {
        let key = match &self.owner_field {
            Some(owner) => format!(
                "[doc['{}'], Number(doc['{}'])]",
                owner, self.ordering_field
            ),
            None => format!("Number(doc['{}'])", self.ordering_field),
        };
        format!(
            "function (doc) {{ if (doc['{}'] === '{}') {{ emit({}, null); }} }}",
            TYPE_FIELD, self.type_tag, key
        )
    }
}

/// JavaScript `Number()` over a JSON value; NaN becomes `null`.
fn numeric(value: Option<&Value>) -> Value {
    let n = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) if s.trim().is_empty() => Some(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(Value::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
        Some(Value::Null) => Some(0.0),
        _ => None,
    };
    n.map(number_value).unwrap_or(Value::Null)
}

/// Wraps a float as a JSON number, preferring an integer representation.
pub fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(false) => 1,
        Value::Bool(true) => 2,
        Value::Number(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) => 5,
        Value::Object(_) => 6,
    }
}

/// View key collation: null < false < true < numbers < strings < arrays < objects.
///
/// Arrays compare element-wise with a shorter prefix sorting first, so
/// `[owner]` and `[owner, {}]` bracket every `[owner, n]`. Strings compare
/// by code point.
pub fn collate(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = collate(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => x.len().cmp(&y.len()),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Storage backend contract used by the CRUD engine.
///
/// Implementations must reject a write whose `_rev` does not match the
/// stored revision (or that omits `_rev` for an existing key) with
/// [`StoreError::Conflict`].
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetches a document by key. `Ok(None)` if absent.
    async fn get(&self, key: &str) -> Result<Option<Document>, StoreError>;

    /// Returns every document matching the selector, projected.
    async fn find(&self, selector: &Selector) -> Result<Vec<Document>, StoreError>;

    /// Inserts a new document or overwrites the revision it names.
    ///
    /// A document without `_id` gets a store-assigned key.
    async fn insert(&self, doc: &Document) -> Result<WriteReceipt, StoreError>;

    /// Deletes the given revision of a document.
    async fn delete(&self, key: &str, rev: &str) -> Result<WriteReceipt, StoreError>;

    /// Queries a declared range view; rows carry their documents.
    async fn view(&self, view: &str, query: &ViewQuery) -> Result<ViewPage, StoreError>;

    /// Declares (or refreshes) the range views.
    async fn ensure_views(&self, views: &[ViewDefinition]) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collate_type_order() {
        let ordered = [
            json!(null),
            json!(false),
            json!(true),
            json!(-1),
            json!(2.5),
            json!("a"),
            json!("b"),
            json!(["a"]),
            json!(["a", 1]),
            json!({}),
        ];
        for pair in ordered.windows(2) {
            assert_eq!(collate(&pair[0], &pair[1]), Ordering::Less, "{:?}", pair);
        }
    }

    #[test]
    fn test_collate_owner_brackets() {
        let low = json!(["sw1"]);
        let high = json!(["sw1", {}]);
        let row = json!(["sw1", 1700000000]);
        assert_eq!(collate(&low, &row), Ordering::Less);
        assert_eq!(collate(&row, &high), Ordering::Less);
        assert_eq!(collate(&json!(["sw2", 0]), &high), Ordering::Greater);
    }

    #[test]
    fn test_predicates() {
        assert!(Predicate::Contains("Al".into()).matches(Some(&json!("Alice"))));
        assert!(!Predicate::Contains("al".into()).matches(Some(&json!("Alice"))));
        assert!(!Predicate::Contains("1".into()).matches(Some(&json!(1))));
        assert!(Predicate::Equals(json!(5)).matches(Some(&json!(5))));
        assert!(!Predicate::Equals(json!(5)).matches(None));
    }

    #[test]
    fn test_equals_compares_numbers_by_value() {
        assert!(Predicate::Equals(json!(5)).matches(Some(&json!(5.0))));
        assert!(Predicate::Equals(json!(5.0)).matches(Some(&json!(5))));
        assert!(!Predicate::Equals(json!(5)).matches(Some(&json!(5.5))));
        assert!(!Predicate::Equals(json!(5)).matches(Some(&json!("5"))));
    }

    #[test]
    fn test_selector_requires_type_tag() {
        let selector = Selector::for_type("Child").with("name", Predicate::Contains("A".into()));
        assert!(selector.matches(&crate::doc!({"docType": "Child", "name": "Al"})));
        assert!(!selector.matches(&crate::doc!({"docType": "Parent", "name": "Al"})));
    }

    #[test]
    fn test_projection() {
        let selector = Selector::for_type("Child").project(["_id", "name"]);
        let doc = crate::doc!({"_id": "c1", "docType": "Child", "name": "Al", "Parent": "p1"});
        let projected = selector.apply_projection(&doc);
        assert_eq!(projected.len(), 2);
        assert!(!projected.contains("Parent"));
    }

    #[test]
    fn test_view_emit() {
        let views = ViewDefinition::all();
        let heart = views.iter().find(|v| v.name == "HeartRateHistory").unwrap();
        let doc = crate::doc!({"docType": "HeartRateHistory", "Smartwatch": "sw1", "date": "1700"});
        assert_eq!(heart.emit(&doc), Some(json!(["sw1", 1700])));

        let room = views.iter().find(|v| v.name == "RoomTempHistory").unwrap();
        let doc = crate::doc!({"docType": "RoomTempHistory", "date": 12});
        assert_eq!(room.emit(&doc), Some(json!(12)));
        assert_eq!(room.emit(&crate::doc!({"docType": "Child"})), None);
    }

    #[test]
    fn test_map_function_mentions_type_and_key() {
        let views = ViewDefinition::all();
        let heart = views.iter().find(|v| v.name == "HeartRateHistory").unwrap();
        let js = heart.map_function();
        assert!(js.contains("'HeartRateHistory'"));
        assert!(js.contains("[doc['Smartwatch'], Number(doc['date'])]"));
    }
}
