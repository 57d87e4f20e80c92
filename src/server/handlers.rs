use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use super::AppState;
use crate::crud::{CrudEngine, ReadOutcome};
use crate::error::CrudError;
use crate::models::Document;
use crate::store::WriteReceipt;

/// Failure of an HTTP request
#[derive(Debug)]
pub enum ApiError {
    UnknownEntity(String),
    Crud(CrudError),
}

impl From<CrudError> for ApiError {
    fn from(e: CrudError) -> Self {
        ApiError::Crud(e)
    }
}

#[derive(Serialize)]
struct UnknownEntityBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::UnknownEntity(name) => (
                StatusCode::NOT_FOUND,
                Json(UnknownEntityBody {
                    error: "unknownEntity",
                    message: format!("Unknown entity '{}'", name),
                }),
            )
                .into_response(),
            ApiError::Crud(e) => {
                let status = if e.is_client_error() {
                    StatusCode::BAD_REQUEST
                } else {
                    tracing::error!("Request failed: {}", e);
                    StatusCode::INTERNAL_SERVER_ERROR
                };
                (status, Json(e.body())).into_response()
            }
        }
    }
}

fn engine<'a>(state: &'a AppState, entity: &str) -> Result<&'a CrudEngine, ApiError> {
    state
        .engine(entity)
        .ok_or_else(|| ApiError::UnknownEntity(entity.to_string()))
}

pub(super) async fn create(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    Json(body): Json<Document>,
) -> Result<(StatusCode, Json<Document>), ApiError> {
    let doc = engine(&state, &entity)?.create(body).await?;
    Ok((StatusCode::CREATED, Json(doc)))
}

/// Query string values arrive as strings; numeric parameters are coerced
/// by the engine where they matter.
pub(super) async fn read(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<ReadOutcome>, ApiError> {
    let params: Document = params
        .into_iter()
        .map(|(field, value)| (field, value.into()))
        .collect();
    let outcome = engine(&state, &entity)?.read(params).await?;
    Ok(Json(outcome))
}

pub(super) async fn update(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    Json(body): Json<Document>,
) -> Result<(StatusCode, Json<Document>), ApiError> {
    let doc = engine(&state, &entity)?.update(body).await?;
    Ok((StatusCode::CREATED, Json(doc)))
}

pub(super) async fn destroy(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    Json(body): Json<Document>,
) -> Result<Json<WriteReceipt>, ApiError> {
    let receipt = engine(&state, &entity)?.destroy(body).await?;
    Ok(Json(receipt))
}
