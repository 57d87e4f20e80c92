//! HTTP surface over the CRUD engines.
//!
//! # Endpoints
//!
//! - `GET /health`: liveness and version
//! - `POST /API/{entity}/create`: JSON body, `201` with the stored document
//! - `GET /API/{entity}/read`: query string, `200` with a document, a list or a page
//! - `PUT /API/{entity}/update`: JSON body, `201` with the updated document
//! - `DELETE /API/{entity}/destroy`: JSON body, `200` with `{ok, id, rev}`
//!
//! `{entity}` is the camelCase kind name (`parent`, `smartwatch`,
//! `heartRateHistory`, ...). Failures use the `{error, message, entry?,
//! databaseError?}` body: `400` for client errors, `500` for store errors and
//! `404` for an unknown entity.

mod handlers;

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::crud::CrudEngine;
use crate::models::EntityKind;
use crate::store::DocumentStore;

pub use handlers::ApiError;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    engines: Arc<HashMap<EntityKind, CrudEngine>>,
}

impl AppState {
    /// Builds one engine per entity kind over the shared store.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        let engines = EntityKind::ALL
            .into_iter()
            .map(|kind| (kind, CrudEngine::new(Arc::clone(&store), kind)))
            .collect();
        Self {
            engines: Arc::new(engines),
        }
    }

    /// Engine for a route name, if it names an entity.
    pub fn engine(&self, route_name: &str) -> Option<&CrudEngine> {
        let kind: EntityKind = route_name.parse().ok()?;
        self.engines.get(&kind)
    }
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check endpoint
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/API/{entity}/create", post(handlers::create))
        .route("/API/{entity}/read", get(handlers::read))
        .route("/API/{entity}/update", put(handlers::update))
        .route("/API/{entity}/destroy", delete(handlers::destroy))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
