//! In-process document store.
//!
//! Keeps documents in a map guarded by an async `RwLock`. Revisions follow
//! the CouchDB `<generation>-<nonce>` shape and every write is checked
//! against the stored revision, so conflicts behave like the real store.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{collate, DocumentStore, Selector, ViewDefinition, ViewPage, ViewQuery, WriteReceipt};
use crate::error::StoreError;
use crate::models::{Document, KEY_FIELD, REV_FIELD};

/// Document store kept entirely in memory.
#[derive(Debug)]
pub struct MemoryStore {
    docs: RwLock<BTreeMap<String, Document>>,
    views: RwLock<HashMap<String, ViewDefinition>>,
}

impl MemoryStore {
    /// Creates an empty store with every range view declared.
    pub fn new() -> Self {
        let views = ViewDefinition::all()
            .into_iter()
            .map(|view| (view.name.clone(), view))
            .collect();
        Self {
            docs: RwLock::new(BTreeMap::new()),
            views: RwLock::new(views),
        }
    }

    /// Number of live documents.
    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn next_rev(current: Option<&str>) -> String {
    let generation = current
        .and_then(|rev| rev.split('-').next())
        .and_then(|g| g.parse::<u64>().ok())
        .unwrap_or(0);
    format!("{}-{}", generation + 1, Uuid::new_v4().simple())
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Document>, StoreError> {
        Ok(self.docs.read().await.get(key).cloned())
    }

    async fn find(&self, selector: &Selector) -> Result<Vec<Document>, StoreError> {
        let docs = self.docs.read().await;
        Ok(docs
            .values()
            .filter(|doc| selector.matches(doc))
            .map(|doc| selector.apply_projection(doc))
            .collect())
    }

    async fn insert(&self, doc: &Document) -> Result<WriteReceipt, StoreError> {
        let mut docs = self.docs.write().await;

        let key = doc
            .key()
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        let stored_rev = docs.get(&key).and_then(|d| d.rev().map(str::to_string));
        if stored_rev.as_deref() != doc.rev() {
            return Err(StoreError::Conflict);
        }

        let rev = next_rev(stored_rev.as_deref());
        let mut stored = doc.clone();
        stored.insert(KEY_FIELD, key.clone());
        stored.insert(REV_FIELD, rev.clone());
        docs.insert(key.clone(), stored);

        Ok(WriteReceipt {
            ok: true,
            id: key,
            rev,
        })
    }

    async fn delete(&self, key: &str, rev: &str) -> Result<WriteReceipt, StoreError> {
        let mut docs = self.docs.write().await;

        let stored_rev = match docs.get(key) {
            Some(doc) => doc.rev().map(str::to_string),
            None => return Err(StoreError::NotFound),
        };
        if stored_rev.as_deref() != Some(rev) {
            return Err(StoreError::Conflict);
        }

        docs.remove(key);
        Ok(WriteReceipt {
            ok: true,
            id: key.to_string(),
            rev: next_rev(Some(rev)),
        })
    }

    async fn view(&self, view: &str, query: &ViewQuery) -> Result<ViewPage, StoreError> {
        let views = self.views.read().await;
        let definition = views.get(view).ok_or_else(|| StoreError::Rejected {
            status: 404,
            error: "not_found".to_string(),
            reason: "missing_named_view".to_string(),
        })?;

        let docs = self.docs.read().await;
        let mut rows: Vec<(Value, &Document)> = docs
            .values()
            .filter_map(|doc| definition.emit(doc).map(|key| (key, doc)))
            .collect();
        // ties keep key order, as the real view does
        rows.sort_by(|(a, da), (b, db)| {
            collate(a, b).then_with(|| da.key().cmp(&db.key()))
        });
        if query.descending {
            rows.reverse();
        }
        let total_rows = rows.len() as u64;

        // In descending order the start key is the upper bound.
        let before_start = |key: &Value| match &query.start_key {
            Some(start) if query.descending => collate(key, start) == Ordering::Greater,
            Some(start) => collate(key, start) == Ordering::Less,
            None => false,
        };
        let past_end = |key: &Value| match &query.end_key {
            Some(end) if query.descending => collate(key, end) == Ordering::Less,
            Some(end) => collate(key, end) == Ordering::Greater,
            None => false,
        };

        let first = rows.iter().position(|(key, _)| !before_start(key)).unwrap_or(rows.len());
        let docs = rows[first..]
            .iter()
            .take_while(|(key, _)| !past_end(key))
            .skip(query.skip as usize)
            .take(query.limit as usize)
            .map(|(_, doc)| (*doc).clone())
            .collect();

        Ok(ViewPage {
            total_rows,
            offset: first as u64 + query.skip,
            docs,
        })
    }

    async fn ensure_views(&self, definitions: &[ViewDefinition]) -> Result<(), StoreError> {
        let mut views = self.views.write().await;
        for view in definitions {
            views.insert(view.name.clone(), view.clone());
        }
        Ok(())
    }
}
