//! Generic create / read / update / destroy over one entity definition.
//!
//! A [`CrudEngine`] is cheap to clone: it holds a shared store handle and a
//! reference to a static [`EntityDefinition`]. Validation (required keys,
//! uniqueness, owner references) happens before any write, and every write
//! is a single store call.

pub mod hooks;
pub mod query;
pub mod secret;

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::error::{plain, CrudError, StoreError};
use crate::models::{
    Document, EntityDefinition, EntityKind, Uniqueness, KEY_FIELD, REV_FIELD, TYPE_FIELD,
};
use crate::store::{number_value, DocumentStore, Predicate, Selector, ViewPage, WriteReceipt};

use hooks::Lifecycle;
use query::PageRequest;

/// Result of a read, shaped by the mode the request selected.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReadOutcome {
    /// Read by `_id`.
    One(Document),
    /// Attribute search.
    Many(Vec<Document>),
    /// Ranged read over a view.
    Page(ViewPage),
}

#[derive(Clone)]
pub struct CrudEngine {
    store: Arc<dyn DocumentStore>,
    definition: &'static EntityDefinition,
}

impl std::fmt::Debug for CrudEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrudEngine")
            .field("kind", &self.definition.kind)
            .finish()
    }
}

impl CrudEngine {
    pub fn new(store: Arc<dyn DocumentStore>, kind: EntityKind) -> Self {
        Self {
            store,
            definition: kind.definition(),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.definition.kind
    }

    pub fn definition(&self) -> &'static EntityDefinition {
        self.definition
    }

    /// Validates and inserts a new document, then runs the created hooks.
    ///
    /// Returns the stored document including `_id` and `_rev`.
    pub async fn create(&self, mut body: Document) -> Result<Document, CrudError> {
        let def = self.definition;

        let missing: Vec<String> = def
            .required_fields()
            .filter(|field| !body.contains(field))
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(CrudError::MissingKeys(missing));
        }

        // a store-assigned key would silently drop the caller's key
        if def.unique == Some(Uniqueness::DocumentKey) {
            match body.get(KEY_FIELD) {
                Some(Value::String(key)) if !key.is_empty() => {}
                _ => return Err(CrudError::MissingKeys(vec![KEY_FIELD.to_string()])),
            }
        }

        if let Some(field) = def.unique_field() {
            if let Some(value) = body.get(field) {
                self.ensure_unique(field, value, None).await?;
            }
        }

        for owner in def.owner_fields {
            self.ensure_owner_exists(owner, body.get(owner)).await?;
        }

        body.retain(|field| def.allows(field));
        body.insert(TYPE_FIELD, def.type_tag);
        secret::hash_secret_fields(def, &mut body).await?;

        let receipt = match self.store.insert(&body).await {
            Ok(receipt) => receipt,
            Err(StoreError::Conflict) if def.unique == Some(Uniqueness::DocumentKey) => {
                let key = body.get(KEY_FIELD).cloned().unwrap_or(Value::Null);
                return Err(CrudError::duplicate(KEY_FIELD, key));
            }
            Err(e) => return Err(e.into()),
        };

        body.insert(KEY_FIELD, receipt.id.clone());
        body.insert(REV_FIELD, receipt.rev);
        tracing::info!("Created {} {}", def.type_tag, receipt.id);

        hooks::run(&self.store, def.kind, Lifecycle::Created, &body).await;
        Ok(body)
    }

    /// Reads by `_id`, by a ranged view, or by attribute search.
    pub async fn read(&self, params: Document) -> Result<ReadOutcome, CrudError> {
        let def = self.definition;

        if let Some(key) = params.get(KEY_FIELD) {
            let key = plain(key);
            return match self.fetch(&key).await? {
                Some(doc) => Ok(ReadOutcome::One(doc)),
                None => Err(CrudError::NotFound(key)),
            };
        }

        if let Some(view) = &def.range_view {
            let request = PageRequest::from_params(&params, view)?;
            let page = self
                .store
                .view(def.type_tag, &request.to_view_query())
                .await?;
            return Ok(ReadOutcome::Page(page));
        }

        let selector = params
            .fields()
            .fold(Selector::for_type(def.type_tag), |selector, (field, value)| {
                let predicate = match value {
                    Value::String(s) => Predicate::Contains(s.clone()),
                    other => Predicate::Equals(other.clone()),
                };
                selector.with(field.clone(), predicate)
            });
        Ok(ReadOutcome::Many(self.store.find(&selector).await?))
    }

    /// Merges a sparse patch into the latest stored copy of a document.
    ///
    /// The target is named either by `_id` + `_rev` (written with the
    /// caller's revision, so a stale one is rejected by the store) or by the
    /// entity's natural key (written with the freshly fetched revision).
    pub async fn update(&self, body: Document) -> Result<Document, CrudError> {
        let (current, rev) = if body.has_value(KEY_FIELD) && body.has_value(REV_FIELD) {
            let key = plain(body.get(KEY_FIELD).unwrap_or(&Value::Null));
            let current = self.fetch(&key).await?.ok_or(CrudError::NotFound(key))?;
            (current, plain(body.get(REV_FIELD).unwrap_or(&Value::Null)))
        } else if let Some(value) = body.get(self.definition.natural_key) {
            let current = self
                .find_by_natural_key(value)
                .await?
                .ok_or_else(|| CrudError::NotFound(plain(value)))?;
            let rev = current.rev().unwrap_or_default().to_string();
            (current, rev)
        } else {
            return Err(self.missing_target());
        };

        self.apply_patch(current, rev, body).await
    }

    /// Patches the document stored under `key` of this engine's kind.
    ///
    /// Used by ownership hooks; runs no hooks of its own.
    pub async fn update_by_key(&self, key: &str, patch: Document) -> Result<Document, CrudError> {
        let current = self
            .fetch(key)
            .await?
            .ok_or_else(|| CrudError::NotFound(key.to_string()))?;
        let rev = current.rev().unwrap_or_default().to_string();
        self.apply_patch(current, rev, patch).await
    }

    /// Deletes by `_id` + `_rev` or by natural key, then runs the destroyed
    /// hooks.
    pub async fn destroy(&self, body: Document) -> Result<WriteReceipt, CrudError> {
        let def = self.definition;

        if body.has_value(KEY_FIELD) && body.has_value(REV_FIELD) {
            let key = plain(body.get(KEY_FIELD).unwrap_or(&Value::Null));
            let rev = plain(body.get(REV_FIELD).unwrap_or(&Value::Null));
            let current = self
                .fetch(&key)
                .await?
                .ok_or_else(|| CrudError::NotFound(key.clone()))?;

            let receipt = self.store.delete(&key, &rev).await?;
            tracing::info!("Destroyed {} {}", def.type_tag, key);
            hooks::run(&self.store, def.kind, Lifecycle::Destroyed, &current).await;
            return Ok(receipt);
        }

        let Some(value) = body.get(def.natural_key) else {
            return Err(self.missing_target());
        };
        let target = self
            .find_by_natural_key(value)
            .await?
            .ok_or_else(|| CrudError::NotFound(plain(value)))?;
        let key = target.key().unwrap_or_default();
        let rev = target.rev().unwrap_or_default();

        let receipt = self.store.delete(key, rev).await?;
        tracing::info!("Destroyed {} {}", def.type_tag, key);
        hooks::run(&self.store, def.kind, Lifecycle::Destroyed, &target).await;
        Ok(receipt)
    }

    /// Fetches a document by key, treating a document of another kind as absent.
    async fn fetch(&self, key: &str) -> Result<Option<Document>, CrudError> {
        let doc = self.store.get(key).await?;
        Ok(doc.filter(|doc| doc.type_tag() == Some(self.definition.type_tag)))
    }

    async fn find_by_natural_key(&self, value: &Value) -> Result<Option<Document>, CrudError> {
        let field = self.definition.natural_key;
        if field == KEY_FIELD {
            return self.fetch(&plain(value)).await;
        }
        let selector = Selector::for_type(self.definition.type_tag).with(field, equals(value));
        Ok(self.store.find(&selector).await?.into_iter().next())
    }

    /// Fails if another live document of this kind holds `value` in `field`.
    async fn ensure_unique(
        &self,
        field: &str,
        value: &Value,
        except_key: Option<&str>,
    ) -> Result<(), CrudError> {
        let selector = Selector::for_type(self.definition.type_tag)
            .with(field, equals(value))
            .project([KEY_FIELD, field]);
        let taken = self
            .store
            .find(&selector)
            .await?
            .iter()
            .any(|doc| except_key.is_none() || doc.key() != except_key);
        if taken {
            return Err(CrudError::duplicate(field, value.clone()));
        }
        Ok(())
    }

    /// An owner reference must name an existing document of the owner's kind.
    async fn ensure_owner_exists(&self, owner: &str, value: Option<&Value>) -> Result<(), CrudError> {
        let key = plain(value.unwrap_or(&Value::Null));
        let found = match (value, EntityKind::from_type_tag(owner)) {
            (Some(Value::String(_)), Some(kind)) => {
                CrudEngine::new(Arc::clone(&self.store), kind).fetch(&key).await?
            }
            _ => None,
        };
        found.map(|_| ()).ok_or(CrudError::NotFound(key))
    }

    fn missing_target(&self) -> CrudError {
        let natural = self.definition.natural_key;
        let mut keys = vec![KEY_FIELD.to_string(), REV_FIELD.to_string()];
        if natural != KEY_FIELD {
            keys.push(natural.to_string());
        }
        CrudError::MissingKeys(keys)
    }

    /// Sanitises `patch`, merges it onto `current` and writes with `rev`.
    async fn apply_patch(
        &self,
        mut current: Document,
        rev: String,
        mut patch: Document,
    ) -> Result<Document, CrudError> {
        let def = self.definition;

        patch.remove(REV_FIELD);
        patch.remove(KEY_FIELD);
        patch.remove(TYPE_FIELD);
        for (renamed, field) in def.renames() {
            if let Some(value) = patch.remove(&renamed) {
                patch.insert(field, value);
            }
        }
        patch.retain(|field| def.allows(field) && !def.is_owner_field(field));

        if let Some(Uniqueness::Field(field)) = def.unique {
            if let Some(value) = patch.get(field) {
                if current.get(field) != Some(value) {
                    self.ensure_unique(field, value, current.key()).await?;
                }
            }
        }
        secret::hash_secret_fields(def, &mut patch).await?;

        current.merge(patch);
        current.insert(REV_FIELD, rev);
        let receipt = self.store.insert(&current).await?;
        current.insert(REV_FIELD, receipt.rev);
        tracing::info!("Updated {} {}", def.type_tag, receipt.id);
        Ok(current)
    }
}

/// Equality predicate with numbers in their canonical form.
fn equals(value: &Value) -> Predicate {
    let value = match value {
        Value::Number(n) => n.as_f64().map(number_value).unwrap_or_else(|| value.clone()),
        other => other.clone(),
    };
    Predicate::Equals(value)
}
