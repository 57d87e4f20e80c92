//! CouchDB adapter.
//!
//! Talks to a single CouchDB database over its HTTP API:
//! ```text
//! GET    /<db>/<key>                              get
//! POST   /<db>/_find                              find (Mango, paged by bookmark)
//! PUT    /<db>/<key>  |  POST /<db>               insert / overwrite
//! DELETE /<db>/<key>?rev=<rev>                    delete
//! GET    /<db>/_design/sortedSensors/_view/<v>    range views
//! ```

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::{
    DocumentStore, Predicate, Selector, ViewDefinition, ViewPage, ViewQuery, WriteReceipt,
    DESIGN_DOC,
};
use crate::error::StoreError;
use crate::models::{Document, TYPE_FIELD};

/// Documents requested per `_find` round trip.
const FIND_PAGE_SIZE: u64 = 500;

/// Error body CouchDB returns alongside non-2xx statuses.
#[derive(Debug, Default, Deserialize)]
struct CouchErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Serialize)]
struct FindRequest<'a> {
    selector: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<&'a [String]>,
    limit: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    bookmark: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FindResponse {
    docs: Vec<Document>,
    #[serde(default)]
    bookmark: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ViewRow {
    #[serde(default)]
    doc: Option<Document>,
}

#[derive(Debug, Deserialize)]
struct ViewResponse {
    #[serde(default)]
    total_rows: u64,
    #[serde(default)]
    offset: u64,
    rows: Vec<ViewRow>,
}

/// Document store backed by a remote CouchDB database.
#[derive(Debug, Clone)]
pub struct CouchStore {
    client: Client,
    base_url: String,
    database: String,
    credentials: Option<(String, String)>,
}

impl CouchStore {
    /// Creates an adapter for `database` on the server at `base_url`.
    pub fn new(base_url: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            database: database.into(),
            credentials: None,
        }
    }

    /// Uses HTTP basic auth for every request.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    fn db_url(&self) -> String {
        format!("{}/{}", self.base_url, urlencoding::encode(&self.database))
    }

    fn doc_url(&self, key: &str) -> String {
        format!("{}/{}", self.db_url(), urlencoding::encode(key))
    }

    fn design_url(&self) -> String {
        format!("{}/_design/{}", self.db_url(), DESIGN_DOC)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.credentials {
            Some((user, pass)) => builder.basic_auth(user, Some(pass)),
            None => builder,
        }
    }

    /// Creates the database if it does not exist yet.
    pub async fn ensure_database(&self) -> Result<(), StoreError> {
        let resp = self.request(Method::PUT, &self.db_url()).send().await?;
        match resp.status() {
            StatusCode::CREATED | StatusCode::ACCEPTED => {
                tracing::info!("Created database {}", self.database);
                Ok(())
            }
            StatusCode::PRECONDITION_FAILED => {
                tracing::info!(
                    "Database {} already exists, previous entries were not affected",
                    self.database
                );
                Ok(())
            }
            _ => Err(error_from(resp).await),
        }
    }
}

/// Maps a failed response to a [`StoreError`].
async fn error_from(resp: Response) -> StoreError {
    let status = resp.status();
    if status == StatusCode::CONFLICT {
        return StoreError::Conflict;
    }
    let body: CouchErrorBody = resp.json().await.unwrap_or_default();
    StoreError::Rejected {
        status: status.as_u16(),
        error: body.error,
        reason: body.reason,
    }
}

/// Translates a [`Selector`] into a Mango selector.
///
/// Substring predicates are escaped before being emitted as `$regex`, so
/// caller input is never interpreted as a pattern.
pub(crate) fn mango_selector(selector: &Selector) -> Value {
    let mut clauses = vec![json!({ TYPE_FIELD: { "$eq": selector.type_tag } })];
    for (field, predicate) in &selector.clauses {
        let condition = match predicate {
            Predicate::Equals(value) => json!({ "$eq": value }),
            Predicate::Contains(needle) => json!({ "$regex": regex::escape(needle) }),
        };
        let mut clause = Map::new();
        clause.insert(field.clone(), condition);
        clauses.push(Value::Object(clause));
    }
    json!({ "$and": clauses })
}

/// Query string for a view request; keys are JSON encoded.
pub(crate) fn view_params(query: &ViewQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("include_docs", "true".to_string()),
        ("descending", query.descending.to_string()),
        ("skip", query.skip.to_string()),
        ("limit", query.limit.to_string()),
    ];
    if let Some(start) = &query.start_key {
        params.push(("startkey", start.to_string()));
    }
    if let Some(end) = &query.end_key {
        params.push(("endkey", end.to_string()));
    }
    params
}

/// Design document declaring every range view.
pub(crate) fn design_document(views: &[ViewDefinition]) -> Value {
    let mut map = Map::new();
    for view in views {
        map.insert(view.name.clone(), json!({ "map": view.map_function() }));
    }
    json!({
        "_id": format!("_design/{}", DESIGN_DOC),
        "language": "javascript",
        "views": map,
    })
}

#[async_trait]
impl DocumentStore for CouchStore {
    async fn get(&self, key: &str) -> Result<Option<Document>, StoreError> {
        let resp = self.request(Method::GET, &self.doc_url(key)).send().await?;
        match resp.status() {
            StatusCode::OK => Ok(Some(resp.json().await?)),
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(error_from(resp).await),
        }
    }

    async fn find(&self, selector: &Selector) -> Result<Vec<Document>, StoreError> {
        let url = format!("{}/_find", self.db_url());
        let mango = mango_selector(selector);
        let mut docs = Vec::new();
        let mut bookmark = None;

        loop {
            let body = FindRequest {
                selector: mango.clone(),
                fields: selector.fields.as_deref(),
                limit: FIND_PAGE_SIZE,
                bookmark: bookmark.clone(),
            };
            let resp = self.request(Method::POST, &url).json(&body).send().await?;
            if !resp.status().is_success() {
                return Err(error_from(resp).await);
            }
            let page: FindResponse = resp.json().await?;
            let fetched = page.docs.len() as u64;
            docs.extend(page.docs);

            if fetched < FIND_PAGE_SIZE || page.bookmark.is_none() || page.bookmark == bookmark {
                break;
            }
            bookmark = page.bookmark;
        }

        tracing::debug!("find {} returned {} document(s)", selector.type_tag, docs.len());
        Ok(docs)
    }

    async fn insert(&self, doc: &Document) -> Result<WriteReceipt, StoreError> {
        let builder = match doc.key() {
            Some(key) => self.request(Method::PUT, &self.doc_url(key)),
            None => self.request(Method::POST, &self.db_url()),
        };
        let resp = builder.json(doc).send().await?;
        match resp.status() {
            StatusCode::CREATED | StatusCode::ACCEPTED => Ok(resp.json().await?),
            _ => Err(error_from(resp).await),
        }
    }

    async fn delete(&self, key: &str, rev: &str) -> Result<WriteReceipt, StoreError> {
        let resp = self
            .request(Method::DELETE, &self.doc_url(key))
            .query(&[("rev", rev)])
            .send()
            .await?;
        match resp.status() {
            StatusCode::OK | StatusCode::ACCEPTED => Ok(resp.json().await?),
            StatusCode::NOT_FOUND => Err(StoreError::NotFound),
            _ => Err(error_from(resp).await),
        }
    }

    async fn view(&self, view: &str, query: &ViewQuery) -> Result<ViewPage, StoreError> {
        let url = format!("{}/_view/{}", self.design_url(), urlencoding::encode(view));
        let resp = self
            .request(Method::GET, &url)
            .query(&view_params(query))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(error_from(resp).await);
        }
        let body: ViewResponse = resp.json().await?;
        Ok(ViewPage {
            total_rows: body.total_rows,
            offset: body.offset,
            docs: body.rows.into_iter().filter_map(|row| row.doc).collect(),
        })
    }

    async fn ensure_views(&self, views: &[ViewDefinition]) -> Result<(), StoreError> {
        let url = self.design_url();
        let mut design = design_document(views);

        let resp = self.request(Method::GET, &url).send().await?;
        match resp.status() {
            StatusCode::OK => {
                let existing: Value = resp.json().await?;
                if existing.get("views") == design.get("views") {
                    tracing::info!("Views in _design/{} are up to date", DESIGN_DOC);
                    return Ok(());
                }
                if let (Some(rev), Some(obj)) = (existing.get("_rev"), design.as_object_mut()) {
                    obj.insert("_rev".to_string(), rev.clone());
                }
            }
            StatusCode::NOT_FOUND => {}
            _ => return Err(error_from(resp).await),
        }

        let resp = self.request(Method::PUT, &url).json(&design).send().await?;
        if !resp.status().is_success() {
            return Err(error_from(resp).await);
        }
        tracing::info!("Installed {} view(s) in _design/{}", views.len(), DESIGN_DOC);
        Ok(())
    }
}
