//! Child monitoring backend
//!
//! Document CRUD over a CouchDB-style store for parents, children, devices
//! and their sensor histories, plus MQTT ingestion of sensor readings.

pub mod config;
pub mod crud;
pub mod error;
pub mod ingest;
pub mod models;
pub mod server;
pub mod store;

pub use config::{Config, ConfigError, StoreBackend};
pub use crud::{CrudEngine, ReadOutcome};
pub use error::{CrudError, ErrorBody, StoreError};
pub use ingest::{Dispatch, IngestDispatcher};
pub use models::{Document, EntityDefinition, EntityKind};
pub use store::{CouchStore, DocumentStore, MemoryStore};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
