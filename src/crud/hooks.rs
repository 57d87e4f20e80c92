//! Ownership side effects run after a create or destroy.
//!
//! Hooks are a fixed table. Each one patches a document of another kind
//! through [`CrudEngine::update_by_key`], which never runs hooks itself, so
//! a hook cannot trigger further hooks.
//!
//! A hook failure never reaches the caller of the triggering operation: it
//! is reported as a `warn` event and as a [`HookOutcome::Failed`] value.

use std::sync::Arc;

use super::CrudEngine;
use crate::models::{Document, EntityKind};
use crate::store::DocumentStore;

/// Lifecycle events hooks can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Created,
    Destroyed,
}

/// Sets fields on the document referenced by `reference_field`.
#[derive(Debug)]
pub struct OwnershipHook {
    pub name: &'static str,
    pub entity: EntityKind,
    pub event: Lifecycle,
    pub reference_field: &'static str,
    pub target: EntityKind,
    pub patch: fn() -> Document,
}

fn activate() -> Document {
    let mut patch = Document::new();
    patch.insert("active", true);
    patch
}

fn deactivate() -> Document {
    let mut patch = Document::new();
    patch.insert("active", false);
    patch
}

pub static HOOKS: &[OwnershipHook] = &[
    OwnershipHook {
        name: "activate_smartwatch",
        entity: EntityKind::Child,
        event: Lifecycle::Created,
        reference_field: "Smartwatch",
        target: EntityKind::Smartwatch,
        patch: activate,
    },
    OwnershipHook {
        name: "deactivate_smartwatch",
        entity: EntityKind::Child,
        event: Lifecycle::Destroyed,
        reference_field: "Smartwatch",
        target: EntityKind::Smartwatch,
        patch: deactivate,
    },
];

/// Hooks registered for an entity and event.
pub fn registered(entity: EntityKind, event: Lifecycle) -> impl Iterator<Item = &'static OwnershipHook> {
    HOOKS
        .iter()
        .filter(move |hook| hook.entity == entity && hook.event == event)
}

/// What happened to one hook.
#[derive(Debug, Clone, PartialEq)]
pub enum HookOutcome {
    Applied { hook: &'static str, key: String },
    Skipped { hook: &'static str, reason: String },
    Failed { hook: &'static str, key: String, error: String },
}

/// Runs every hook registered for `entity`/`event` against `doc`.
pub async fn run(
    store: &Arc<dyn DocumentStore>,
    entity: EntityKind,
    event: Lifecycle,
    doc: &Document,
) -> Vec<HookOutcome> {
    let mut outcomes = Vec::new();

    for hook in registered(entity, event) {
        let Some(key) = doc.str_field(hook.reference_field) else {
            tracing::warn!(
                hook = hook.name,
                entity = %entity,
                field = hook.reference_field,
                "Hook skipped, document has no reference"
            );
            outcomes.push(HookOutcome::Skipped {
                hook: hook.name,
                reason: format!("missing {}", hook.reference_field),
            });
            continue;
        };

        let engine = CrudEngine::new(Arc::clone(store), hook.target);
        match engine.update_by_key(key, (hook.patch)()).await {
            Ok(_) => {
                tracing::debug!(hook = hook.name, entity = %entity, key, "Hook applied");
                outcomes.push(HookOutcome::Applied {
                    hook: hook.name,
                    key: key.to_string(),
                });
            }
            Err(e) => {
                tracing::warn!(
                    hook = hook.name,
                    entity = %entity,
                    key,
                    error = %e,
                    "Hook failed"
                );
                outcomes.push(HookOutcome::Failed {
                    hook: hook.name,
                    key: key.to_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    async fn store_with_watch() -> Arc<dyn DocumentStore> {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        store
            .insert(&crate::doc!({
                "_id": "sw1",
                "docType": "Smartwatch",
                "serialNumber": "SW1",
                "active": false,
                "Parent": "p1",
            }))
            .await
            .unwrap();
        store
    }

    #[test]
    fn test_registry() {
        assert_eq!(registered(EntityKind::Child, Lifecycle::Created).count(), 1);
        assert_eq!(registered(EntityKind::Child, Lifecycle::Destroyed).count(), 1);
        assert_eq!(registered(EntityKind::Smartwatch, Lifecycle::Created).count(), 0);
        for hook in HOOKS {
            assert!(hook.entity.definition().is_owner_field(hook.reference_field));
        }
    }

    #[tokio::test]
    async fn test_created_hook_activates_watch() {
        let store = store_with_watch().await;
        let child = crate::doc!({"docType": "Child", "name": "Al", "Smartwatch": "sw1"});

        let outcomes = run(&store, EntityKind::Child, Lifecycle::Created, &child).await;
        assert_eq!(
            outcomes,
            vec![HookOutcome::Applied {
                hook: "activate_smartwatch",
                key: "sw1".to_string()
            }]
        );
        let watch = store.get("sw1").await.unwrap().unwrap();
        assert_eq!(watch.get("active"), Some(&json!(true)));
        assert_eq!(watch.get("serialNumber"), Some(&json!("SW1")));
    }

    #[tokio::test]
    async fn test_failure_is_reported_not_raised() {
        let store = store_with_watch().await;
        let child = crate::doc!({"docType": "Child", "name": "Al", "Smartwatch": "gone"});

        let outcomes = run(&store, EntityKind::Child, Lifecycle::Destroyed, &child).await;
        assert!(matches!(
            outcomes.as_slice(),
            [HookOutcome::Failed { hook: "deactivate_smartwatch", .. }]
        ));
        let watch = store.get("sw1").await.unwrap().unwrap();
        assert_eq!(watch.get("active"), Some(&json!(false)));
    }

    #[tokio::test]
    async fn test_missing_reference_is_skipped() {
        let store = store_with_watch().await;
        let child = crate::doc!({"docType": "Child", "name": "Al"});

        let outcomes = run(&store, EntityKind::Child, Lifecycle::Created, &child).await;
        assert!(matches!(outcomes.as_slice(), [HookOutcome::Skipped { .. }]));
    }

    #[tokio::test]
    async fn test_no_hooks_for_other_kinds() {
        let store = store_with_watch().await;
        let doc = crate::doc!({"docType": "Atmosphere", "Smartwatch": "sw1"});
        assert!(run(&store, EntityKind::Atmosphere, Lifecycle::Created, &doc)
            .await
            .is_empty());
    }
}
