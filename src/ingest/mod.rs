//! Sensor ingestion: routes pub/sub messages to `create` on the right engine.
//!
//! Topics have the form `<namespace>/sensors/<owner>/<entity>`, where
//! `<owner>` is the key of the owning device or the configured sentinel
//! (`-` by default) for "no owner". The legacy form `sensors/<entity>`
//! carries no owner. Delivery is at-most-once: results are logged and never
//! sent back over the transport.

pub mod mqtt;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::crud::CrudEngine;
use crate::error::CrudError;
use crate::models::{Document, EntityKind};
use crate::store::DocumentStore;

pub const DEFAULT_NAMESPACE: &str = "childmon";
pub const DEFAULT_SENTINEL: &str = "-";

/// Entity and owner named by a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicRoute<'a> {
    pub entity: &'a str,
    pub owner: Option<&'a str>,
    pub legacy: bool,
}

/// Splits a topic into its route, or `None` if it is not a sensor topic.
pub fn parse_topic<'a>(topic: &'a str, namespace: &str, sentinel: &str) -> Option<TopicRoute<'a>> {
    let segments: Vec<&'a str> = topic.split('/').collect();
    match segments.as_slice() {
        [ns, "sensors", owner, entity] if *ns == namespace && !entity.is_empty() => Some(TopicRoute {
            entity: *entity,
            owner: (!owner.is_empty() && *owner != sentinel).then_some(*owner),
            legacy: false,
        }),
        ["sensors", entity] if !entity.is_empty() => Some(TopicRoute {
            entity: *entity,
            owner: None,
            legacy: true,
        }),
        _ => None,
    }
}

/// What happened to one inbound message.
#[derive(Debug)]
pub enum Dispatch {
    /// Not a sensor topic, or an entity that is not ingestible.
    Ignored,
    Created(Document),
    Rejected(CrudError),
    /// The payload was not a JSON object.
    Malformed(String),
}

/// Registry of ingestible entities, built once at startup.
#[derive(Debug, Clone)]
pub struct IngestDispatcher {
    namespace: String,
    sentinel: String,
    legacy_topics: bool,
    registry: HashMap<&'static str, CrudEngine>,
}

impl IngestDispatcher {
    /// Registers an engine for every entity kind that declares a topic name.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        let registry = EntityKind::ALL
            .into_iter()
            .filter_map(|kind| {
                kind.definition()
                    .topic
                    .map(|topic| (topic, CrudEngine::new(Arc::clone(&store), kind)))
            })
            .collect();
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            sentinel: DEFAULT_SENTINEL.to_string(),
            legacy_topics: true,
            registry,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.sentinel = sentinel.into();
        self
    }

    pub fn with_legacy_topics(mut self, enabled: bool) -> Self {
        self.legacy_topics = enabled;
        self
    }

    /// Topic filters to subscribe to.
    pub fn subscriptions(&self) -> Vec<String> {
        let mut filters = vec![format!("{}/sensors/+/+", self.namespace)];
        if self.legacy_topics {
            filters.push("sensors/+".to_string());
        }
        filters
    }

    /// True if messages for this entity topic name are ingested.
    pub fn handles(&self, entity: &str) -> bool {
        self.registry.contains_key(entity)
    }

    /// Decodes and stores one message.
    pub async fn dispatch(&self, topic: &str, payload: &[u8]) -> Dispatch {
        let Some(route) = parse_topic(topic, &self.namespace, &self.sentinel) else {
            return Dispatch::Ignored;
        };
        if route.legacy && !self.legacy_topics {
            return Dispatch::Ignored;
        }
        let Some(engine) = self.registry.get(route.entity) else {
            tracing::debug!(topic, "Ignoring message for unregistered entity");
            return Dispatch::Ignored;
        };

        let mut body = match serde_json::from_slice::<Value>(payload)
            .map_err(|e| e.to_string())
            .and_then(|value| {
                Document::try_from(value).map_err(|_| "payload is not a JSON object".to_string())
            }) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(topic, error = %e, "Dropping malformed sensor message");
                return Dispatch::Malformed(e);
            }
        };

        if let Some(owner) = route.owner {
            match engine.definition().owner_fields.first() {
                Some(field) => {
                    body.insert(*field, owner);
                }
                None => tracing::debug!(topic, owner, "Entity has no owner field, owner ignored"),
            }
        }

        match engine.create(body).await {
            Ok(doc) => {
                tracing::info!(
                    topic,
                    entity = %engine.kind(),
                    key = doc.key().unwrap_or_default(),
                    "Stored sensor reading"
                );
                Dispatch::Created(doc)
            }
            Err(e) => {
                tracing::warn!(
                    topic,
                    entity = %engine.kind(),
                    error = %e,
                    "Sensor reading rejected"
                );
                Dispatch::Rejected(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    async fn setup() -> (Arc<dyn DocumentStore>, IngestDispatcher) {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        store
            .insert(&crate::doc!({"_id": "sw1", "docType": "Smartwatch", "serialNumber": "SW1"}))
            .await
            .unwrap();
        let dispatcher = IngestDispatcher::new(Arc::clone(&store));
        (store, dispatcher)
    }

    #[test]
    fn test_parse_topic() {
        assert_eq!(
            parse_topic("childmon/sensors/sw1/heartRateHistory", "childmon", "-"),
            Some(TopicRoute {
                entity: "heartRateHistory",
                owner: Some("sw1"),
                legacy: false
            })
        );
        assert_eq!(
            parse_topic("childmon/sensors/-/roomTempHistory", "childmon", "-")
                .unwrap()
                .owner,
            None
        );
        assert!(parse_topic("sensors/locationHistory", "childmon", "-")
            .unwrap()
            .legacy);
        assert_eq!(parse_topic("other/sensors/sw1/heartRateHistory", "childmon", "-"), None);
        assert_eq!(parse_topic("childmon/sensors/sw1", "childmon", "-"), None);
        assert_eq!(parse_topic("sensors/backend/extra", "childmon", "-"), None);
    }

    #[test]
    fn test_registry_is_the_ingestible_set() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let dispatcher = IngestDispatcher::new(store);
        for topic in [
            "locationHistory",
            "heartRateHistory",
            "lightSensorHistory",
            "roomTempHistory",
            "objectHistory",
            "equipmentHistory",
            "panicHistory",
        ] {
            assert!(dispatcher.handles(topic), "{}", topic);
        }
        assert!(!dispatcher.handles("parent"));
        assert!(!dispatcher.handles("noiseLevelHistory"));
    }

    #[tokio::test]
    async fn test_owner_from_topic_overrides_payload() {
        let (store, dispatcher) = setup().await;
        let outcome = dispatcher
            .dispatch(
                "childmon/sensors/sw1/heartRateHistory",
                br#"{"date": 1700000000, "reading": 72, "Smartwatch": "spoofed"}"#,
            )
            .await;
        let doc = match outcome {
            Dispatch::Created(doc) => doc,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(doc.str_field("Smartwatch"), Some("sw1"));
        let stored = store.get(doc.key().unwrap()).await.unwrap().unwrap();
        assert_eq!(stored.get("reading"), Some(&json!(72)));
    }

    #[tokio::test]
    async fn test_unowned_entity_from_legacy_topic() {
        let (_, dispatcher) = setup().await;
        let outcome = dispatcher
            .dispatch(
                "sensors/roomTempHistory",
                br#"{"date": 1, "reading": 21.5, "location": "nursery"}"#,
            )
            .await;
        assert!(matches!(outcome, Dispatch::Created(_)));

        let outcome = dispatcher
            .dispatch(
                "childmon/sensors/sw1/roomTempHistory",
                br#"{"date": 2, "reading": 21.0, "location": "nursery"}"#,
            )
            .await;
        match outcome {
            Dispatch::Created(doc) => assert!(!doc.contains("Smartwatch")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_legacy_topics_can_be_disabled() {
        let (_, dispatcher) = setup().await;
        let dispatcher = dispatcher.with_legacy_topics(false);
        assert_eq!(dispatcher.subscriptions(), vec!["childmon/sensors/+/+".to_string()]);
        let outcome = dispatcher
            .dispatch("sensors/roomTempHistory", br#"{"date": 1, "reading": 1, "location": "x"}"#)
            .await;
        assert!(matches!(outcome, Dispatch::Ignored));
    }

    #[tokio::test]
    async fn test_unknown_entity_is_ignored() {
        let (store, dispatcher) = setup().await;
        let outcome = dispatcher
            .dispatch("childmon/sensors/sw1/parent", br#"{"_id": "p2"}"#)
            .await;
        assert!(matches!(outcome, Dispatch::Ignored));
        assert!(store.get("p2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bad_payloads() {
        let (_, dispatcher) = setup().await;
        let outcome = dispatcher
            .dispatch("childmon/sensors/sw1/heartRateHistory", b"not json")
            .await;
        assert!(matches!(outcome, Dispatch::Malformed(_)));

        let outcome = dispatcher
            .dispatch("childmon/sensors/sw1/heartRateHistory", b"[1, 2]")
            .await;
        assert!(matches!(outcome, Dispatch::Malformed(_)));

        let outcome = dispatcher
            .dispatch("childmon/sensors/sw1/heartRateHistory", br#"{"date": 1}"#)
            .await;
        assert!(matches!(outcome, Dispatch::Rejected(CrudError::MissingKeys(_))));
    }

    #[tokio::test]
    async fn test_custom_namespace_and_sentinel() {
        let (_, dispatcher) = setup().await;
        let dispatcher = dispatcher.with_namespace("home").with_sentinel("none");
        let outcome = dispatcher
            .dispatch(
                "home/sensors/none/roomTempHistory",
                br#"{"date": 3, "reading": 19, "location": "hall"}"#,
            )
            .await;
        assert!(matches!(outcome, Dispatch::Created(_)));
        let outcome = dispatcher
            .dispatch(
                "childmon/sensors/-/roomTempHistory",
                br#"{"date": 4, "reading": 19, "location": "hall"}"#,
            )
            .await;
        assert!(matches!(outcome, Dispatch::Ignored));
    }
}
