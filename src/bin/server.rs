//! Child monitoring server
//!
//! Serves the per-entity CRUD API and, when enabled, ingests sensor readings
//! published over MQTT.
//!
//! # Configuration
//!
//! Environment variables (override the config file):
//! - `CHILDMON_CONFIG`: Path to config file (default: ~/.config/childmon/config.yaml)
//! - `CHILDMON_PORT`: Port to listen on (default: 8080)
//! - `CHILDMON_STORE_BACKEND`: `couchdb` or `memory` (default: couchdb)
//! - `CHILDMON_COUCHDB_URL`, `CHILDMON_COUCHDB_DATABASE`,
//!   `CHILDMON_COUCHDB_USERNAME`, `CHILDMON_COUCHDB_PASSWORD`
//! - `CHILDMON_MQTT_ENABLED`, `CHILDMON_MQTT_HOST`, `CHILDMON_MQTT_PORT`,
//!   `CHILDMON_MQTT_NAMESPACE`
//!
//! # Config File Format
//!
//! ```yaml
//! server:
//!   port: 8080
//! store:
//!   backend: couchdb
//!   url: http://localhost:5984
//!   database: childmonitoring
//! mqtt:
//!   enabled: true
//!   host: localhost
//!   namespace: childmon
//! ```
//!
//! # Endpoints
//!
//! - `GET /health`: Health check endpoint
//! - `/API/{entity}/create|read|update|destroy`: see [`childmon::server`]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use childmon::config::{Config, StoreBackend, StoreConfig};
use childmon::ingest::{mqtt, IngestDispatcher};
use childmon::server::{router, AppState};
use childmon::store::{CouchStore, DocumentStore, MemoryStore, ViewDefinition};

#[derive(Parser)]
#[command(name = "childmon-server")]
#[command(about = "Child monitoring document store backend", version)]
struct Cli {
    /// Path to config file
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Opens the configured store and installs the range views.
async fn open_store(config: &StoreConfig) -> Result<Arc<dyn DocumentStore>, Box<dyn std::error::Error>> {
    let store: Arc<dyn DocumentStore> = match config.backend {
        StoreBackend::Couchdb => {
            let mut couch = CouchStore::new(&config.url, &config.database);
            if let (Some(username), Some(password)) = (&config.username, &config.password) {
                couch = couch.with_credentials(username, password);
            }
            couch.ensure_database().await?;
            tracing::info!("Using CouchDB database {} at {}", config.database, config.url);
            Arc::new(couch)
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store, documents are lost on shutdown");
            Arc::new(MemoryStore::new())
        }
    };
    store.ensure_views(&ViewDefinition::all()).await?;
    Ok(store)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "childmon=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config)?;

    let store = open_store(&config.store).await?;

    let ingest = if config.mqtt.enabled {
        let dispatcher = IngestDispatcher::new(Arc::clone(&store))
            .with_namespace(config.mqtt.namespace.clone())
            .with_sentinel(config.mqtt.owner_sentinel.clone())
            .with_legacy_topics(config.mqtt.legacy_topics);
        Some(tokio::spawn(mqtt::run(config.mqtt.clone(), dispatcher)))
    } else {
        tracing::info!("MQTT ingestion disabled");
        None
    };

    let app = router(AppState::new(store));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = ingest {
        handle.abort();
    }
    Ok(())
}
