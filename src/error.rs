//! Error kinds surfaced by the store adapters and the CRUD engine.

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::crud::secret::HashError;

/// Failures reported by a [`DocumentStore`](crate::store::DocumentStore).
#[derive(Error, Debug)]
pub enum StoreError {
    /// The write carried a missing or stale revision, or the key is taken.
    #[error("Document update conflict")]
    Conflict,

    /// The addressed document does not exist (delete only; reads return `None`).
    #[error("Document not found")]
    NotFound,

    /// The store answered with an error status.
    #[error("Store rejected request ({status}): {error}: {reason}")]
    Rejected {
        status: u16,
        error: String,
        reason: String,
    },

    /// The store could not be reached.
    #[error("Store unavailable: {0}")]
    Transport(String),

    /// The store answered with a body we could not decode.
    #[error("Malformed store response: {0}")]
    Decode(String),
}

impl StoreError {
    /// Opaque JSON rendering echoed to callers as `databaseError`.
    pub fn to_json(&self) -> Value {
        match self {
            StoreError::Conflict => json!({
                "error": "conflict",
                "reason": "Document update conflict.",
            }),
            StoreError::NotFound => json!({
                "error": "not_found",
                "reason": "missing",
            }),
            StoreError::Rejected {
                status,
                error,
                reason,
            } => json!({
                "error": error,
                "reason": reason,
                "statusCode": status,
            }),
            StoreError::Transport(e) => json!({
                "error": "unavailable",
                "reason": e,
            }),
            StoreError::Decode(e) => json!({
                "error": "bad_response",
                "reason": e,
            }),
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            StoreError::Decode(e.to_string())
        } else {
            StoreError::Transport(e.to_string())
        }
    }
}

/// Outcome kinds of a CRUD operation.
///
/// `MissingKeys`, `DuplicateValue` and `NotFound` are client errors detected
/// before any write; `Database` wraps every store failure. `Secret` covers a
/// secret field that could not be hashed.
#[derive(Error, Debug)]
pub enum CrudError {
    #[error("not all required keys were found")]
    MissingKeys(Vec<String>),

    #[error("{} already exists in the database", plain(.value))]
    DuplicateValue { field: String, value: Value },

    #[error("{0} not in the database")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] StoreError),

    #[error("{0}")]
    Secret(#[from] HashError),
}

impl CrudError {
    pub(crate) fn duplicate(field: &str, value: Value) -> Self {
        CrudError::DuplicateValue {
            field: field.to_string(),
            value,
        }
    }

    pub fn is_client_error(&self) -> bool {
        match self {
            CrudError::Database(_) => false,
            CrudError::Secret(e) => matches!(e, HashError::NotAString(_)),
            _ => true,
        }
    }

    /// Kind string carried in the `error` member of the wire body.
    pub fn kind(&self) -> String {
        match self {
            CrudError::MissingKeys(_) => "missingKeys".to_string(),
            CrudError::DuplicateValue { field, .. } => format!("duplicate{}", capitalize(field)),
            CrudError::NotFound(_) => "notInTheDataBase".to_string(),
            CrudError::Database(_) => "databaseError".to_string(),
            CrudError::Secret(_) => "hashError".to_string(),
        }
    }

    /// Renders the uniform failure body.
    pub fn body(&self) -> ErrorBody {
        let (entry, database_error) = match self {
            CrudError::MissingKeys(missing) if !missing.is_empty() => (Some(json!(missing)), None),
            CrudError::MissingKeys(_) => (None, None),
            CrudError::DuplicateValue { value, .. } => (Some(value.clone()), None),
            CrudError::NotFound(reference) => (Some(json!(reference)), None),
            CrudError::Database(e) => (None, Some(e.to_json())),
            CrudError::Secret(_) => (None, None),
        };
        ErrorBody {
            error: self.kind(),
            message: self.to_string(),
            entry,
            database_error,
        }
    }
}

/// Strings without their JSON quotes, everything else as JSON.
pub(crate) fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn capitalize(field: &str) -> String {
    let field = field.trim_start_matches('_');
    let mut chars = field.chars();
    match chars.next() {
        Some(first) => format!("{}{}", first.to_uppercase(), chars.as_str()),
        None => String::new(),
    }
}

/// Failure body returned to HTTP callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<Value>,
    #[serde(rename = "databaseError", skip_serializing_if = "Option::is_none")]
    pub database_error: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_kind_names_the_field() {
        let err = CrudError::duplicate("serialNumber", json!("SW1"));
        assert_eq!(err.kind(), "duplicateSerialNumber");
        assert_eq!(err.to_string(), "SW1 already exists in the database");

        let err = CrudError::duplicate("_id", json!("p1"));
        assert_eq!(err.kind(), "duplicateId");
    }

    #[test]
    fn test_body_shape() {
        let body = CrudError::NotFound("p9".to_string()).body();
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(
            value,
            json!({
                "error": "notInTheDataBase",
                "message": "p9 not in the database",
                "entry": "p9",
            })
        );
    }

    #[test]
    fn test_database_error_is_opaque() {
        let body = CrudError::Database(StoreError::Conflict).body();
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["error"], "databaseError");
        assert_eq!(value["databaseError"]["error"], "conflict");
        assert!(value.get("entry").is_none());
    }

    #[test]
    fn test_client_errors() {
        assert!(CrudError::MissingKeys(vec![]).is_client_error());
        assert!(CrudError::NotFound("x".into()).is_client_error());
        assert!(!CrudError::Database(StoreError::NotFound).is_client_error());
        assert!(CrudError::Secret(HashError::NotAString("password".into())).is_client_error());
        assert!(!CrudError::Secret(HashError::Hash("boom".into())).is_client_error());
    }
}
