//! Translation of paged read requests into view queries.

use serde_json::{json, Value};

use crate::error::CrudError;
use crate::models::{Document, RangeView};
use crate::store::{number_value, ViewQuery};

pub const START_KEY: &str = "startkey";
pub const END_KEY: &str = "endkey";
pub const PAGE: &str = "page";
pub const ROWS: &str = "rows";

/// A ranged read after its parameters have been coerced.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub owner: Option<Value>,
    pub start: Option<Value>,
    pub end: Option<Value>,
    pub page: u64,
    pub rows: u64,
}

impl PageRequest {
    /// Reads `startkey`, `endkey`, `page`, `rows` and the owner key from
    /// request parameters.
    ///
    /// Unusable keys are ignored and unusable counts fall back to their
    /// defaults. A view scoped by owner requires the owner parameter.
    pub fn from_params(params: &Document, view: &RangeView) -> Result<Self, CrudError> {
        let owner = match view.owner_field {
            Some(field) if params.has_value(field) => params.get(field).cloned(),
            Some(field) => return Err(CrudError::MissingKeys(vec![field.to_string()])),
            None => None,
        };

        Ok(Self {
            owner,
            start: params.get(START_KEY).and_then(as_number).map(number_value),
            end: params.get(END_KEY).and_then(as_number).map(number_value),
            page: params.get(PAGE).and_then(as_count).unwrap_or(0),
            rows: params
                .get(ROWS)
                .and_then(as_count)
                .filter(|rows| *rows > 0)
                .unwrap_or(view.default_rows),
        })
    }

    /// True when the caller bounded the read explicitly.
    pub fn is_ranged(&self) -> bool {
        self.start.is_some() || self.end.is_some()
    }

    /// View parameters: most recent first by default, chronological when a
    /// range is given.
    pub fn to_view_query(&self) -> ViewQuery {
        let (start_key, end_key, descending) = match (&self.owner, self.is_ranged()) {
            (Some(owner), true) => (
                Some(match &self.start {
                    Some(start) => json!([owner, start]),
                    None => json!([owner]),
                }),
                Some(match &self.end {
                    Some(end) => json!([owner, end]),
                    None => json!([owner, {}]),
                }),
                false,
            ),
            (Some(owner), false) => (Some(json!([owner, {}])), Some(json!([owner])), true),
            (None, true) => (self.start.clone(), self.end.clone(), false),
            (None, false) => (None, None, true),
        };

        ViewQuery {
            start_key,
            end_key,
            descending,
            skip: self.page.saturating_mul(self.rows),
            limit: self.rows,
        }
    }
}

/// Numeric value of a parameter, accepting numeric strings.
fn as_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if !s.trim().is_empty() => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn as_count(value: &Value) -> Option<u64> {
    as_number(value)
        .filter(|n| *n >= 0.0)
        .map(|n| n.trunc() as u64)
}
