//! Atomic document store client.
//!
//! The backend exposes one all-or-nothing `commit` of a batch of writes.
//! Two write kinds are used: creating a new document (optionally stamped
//! with the server's clock) and applying a relative numeric increment to a
//! field, which never reads the current value and therefore cannot clobber
//! concurrent updates.
//!
//! [`HttpDocumentStore`] speaks the Firestore REST `documents:commit` wire
//! format.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::api;
use crate::auth::AuthState;
use crate::error::StoreError;

// ---------------------------------------------------------------------------
// Write model
// ---------------------------------------------------------------------------

/// Typed document field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    Array(Vec<FieldValue>),
    Map(BTreeMap<String, FieldValue>),
    /// Replaced by the commit time on the server.
    ServerTimestamp,
}

impl FieldValue {
    /// Convert plain JSON. Integral numbers become `Integer`, all other
    /// numbers `Double`.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Integer(i),
                None => FieldValue::Double(n.as_f64().unwrap_or(0.0)),
            },
            Value::String(s) => FieldValue::String(s.clone()),
            Value::Array(items) => FieldValue::Array(items.iter().map(Self::from_json).collect()),
            Value::Object(obj) => FieldValue::Map(
                obj.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocPath {
    pub collection: String,
    pub id: String,
}

impl DocPath {
    pub fn new(collection: &str, id: &str) -> Self {
        Self {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Delta {
    Integer(i64),
    Double(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentWrite {
    /// Create a document; fails the whole batch if it already exists.
    Create {
        path: DocPath,
        fields: BTreeMap<String, FieldValue>,
    },
    /// Add `delta` to a numeric field server-side.
    Increment {
        path: DocPath,
        field: String,
        delta: Delta,
        /// Fail the whole batch when the document is missing.
        must_exist: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommitResponse {
    pub commit_time: DateTime<Utc>,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Apply every write or none of them.
    async fn commit(&self, writes: Vec<DocumentWrite>) -> Result<CommitResponse, StoreError>;
}

// ---------------------------------------------------------------------------
// Firestore REST encoding
// ---------------------------------------------------------------------------

fn encode_value(value: &FieldValue) -> Value {
    match value {
        // Server timestamps are lifted into transforms before encoding.
        FieldValue::Null | FieldValue::ServerTimestamp => json!({ "nullValue": null }),
        FieldValue::Bool(b) => json!({ "booleanValue": b }),
        FieldValue::Integer(i) => json!({ "integerValue": i.to_string() }),
        FieldValue::Double(d) => json!({ "doubleValue": d }),
        FieldValue::String(s) => json!({ "stringValue": s }),
        FieldValue::Timestamp(ts) => {
            json!({ "timestampValue": ts.to_rfc3339_opts(SecondsFormat::Micros, true) })
        }
        FieldValue::Array(items) => json!({
            "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() }
        }),
        FieldValue::Map(fields) => json!({ "mapValue": { "fields": encode_fields(fields, "", &mut Vec::new()) } }),
    }
}

/// Encode a field map, collecting dotted paths of server-timestamp fields.
fn encode_fields(
    fields: &BTreeMap<String, FieldValue>,
    prefix: &str,
    server_timestamps: &mut Vec<String>,
) -> Map<String, Value> {
    let mut out = Map::new();
    for (name, value) in fields {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        match value {
            FieldValue::ServerTimestamp => server_timestamps.push(path),
            FieldValue::Map(nested) => {
                let encoded = encode_fields(nested, &path, server_timestamps);
                out.insert(name.clone(), json!({ "mapValue": { "fields": encoded } }));
            }
            other => {
                out.insert(name.clone(), encode_value(other));
            }
        }
    }
    out
}

fn encode_delta(delta: Delta) -> Value {
    match delta {
        Delta::Integer(i) => json!({ "integerValue": i.to_string() }),
        Delta::Double(d) => json!({ "doubleValue": d }),
    }
}

/// Build the `documents:commit` request body. `documents_root` is
/// `projects/{project}/databases/(default)/documents`.
pub fn encode_commit_body(documents_root: &str, writes: &[DocumentWrite]) -> Value {
    let encoded: Vec<Value> = writes
        .iter()
        .map(|write| match write {
            DocumentWrite::Create { path, fields } => {
                let mut server_timestamps = Vec::new();
                let encoded_fields = encode_fields(fields, "", &mut server_timestamps);
                let mut w = json!({
                    "update": {
                        "name": format!("{documents_root}/{path}"),
                        "fields": encoded_fields,
                    },
                    "currentDocument": { "exists": false },
                });
                if !server_timestamps.is_empty() {
                    w["updateTransforms"] = Value::Array(
                        server_timestamps
                            .into_iter()
                            .map(|p| json!({ "fieldPath": p, "setToServerValue": "REQUEST_TIME" }))
                            .collect(),
                    );
                }
                w
            }
            DocumentWrite::Increment {
                path,
                field,
                delta,
                must_exist,
            } => {
                let mut w = json!({
                    "transform": {
                        "document": format!("{documents_root}/{path}"),
                        "fieldTransforms": [{
                            "fieldPath": field,
                            "increment": encode_delta(*delta),
                        }],
                    }
                });
                if *must_exist {
                    w["currentDocument"] = json!({ "exists": true });
                }
                w
            }
        })
        .collect();
    json!({ "writes": encoded })
}

fn parse_commit_response(body: &Value) -> Result<CommitResponse, StoreError> {
    let raw = body
        .get("commitTime")
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::InvalidResponse("missing commitTime".into()))?;
    let commit_time = DateTime::parse_from_rfc3339(raw)
        .map_err(|e| StoreError::InvalidResponse(format!("commitTime {raw:?}: {e}")))?
        .with_timezone(&Utc);
    Ok(CommitResponse { commit_time })
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

pub const DEFAULT_BACKEND_URL: &str = "https://firestore.googleapis.com";

/// Remote document store over HTTPS.
pub struct HttpDocumentStore {
    client: Client,
    base_url: String,
    project_id: String,
    api_key: Option<String>,
    auth: Arc<AuthState>,
}

impl HttpDocumentStore {
    pub fn new(
        base_url: &str,
        project_id: &str,
        api_key: Option<String>,
        auth: Arc<AuthState>,
        timeout: Duration,
    ) -> Result<Self, String> {
        let base_url = api::normalize_base_url(base_url);
        if base_url.is_empty() {
            return Err("Backend URL is empty".into());
        }
        if project_id.trim().is_empty() {
            return Err("Backend project id is empty".into());
        }
        Ok(Self {
            client: api::build_client(timeout)?,
            base_url,
            project_id: project_id.trim().to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            auth,
        })
    }

    fn documents_root(&self) -> String {
        format!("projects/{}/databases/(default)/documents", self.project_id)
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn commit(&self, writes: Vec<DocumentWrite>) -> Result<CommitResponse, StoreError> {
        let token = self.auth.id_token().ok_or(StoreError::Unauthenticated)?;
        let root = self.documents_root();
        let url = format!("{}/v1/{root}:commit", self.base_url);
        let body = encode_commit_body(&root, &writes);

        let mut req = self.client.post(&url).bearer_auth(token.as_str()).json(&body);
        if let Some(key) = self.api_key.as_deref() {
            req = req.query(&[("key", key)]);
        }

        debug!(writes = writes.len(), "Committing document batch");
        let resp = req
            .send()
            .await
            .map_err(|e| StoreError::Transport(api::friendly_error(&self.base_url, &e)))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| StoreError::Transport(api::friendly_error(&self.base_url, &e)))?;

        if !status.is_success() {
            let message = api::error_detail(status, &text);
            warn!(status = status.as_u16(), error = %message, "Document batch rejected");
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let json: Value = serde_json::from_str(&text)
            .map_err(|e| StoreError::InvalidResponse(format!("invalid JSON: {e}")))?;
        parse_commit_response(&json)
    }
}
