//! Document store adapter.
//!
//! Records are JSON documents grouped in collections. Sub-collections are plain
//! collection paths such as `member-applications/{id}/resume-data`. Every
//! document carries a version that increases on each write, which lets a
//! [`WriteBatch`] condition updates and deletes on the state it read.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub mod models;
pub mod sqlite;

pub use sqlite::SqliteStore;

pub const MEMBERS: &str = "members";
pub const POINT_SUBMISSIONS: &str = "pointSubmissions";
pub const MEMBER_APPLICATIONS: &str = "member-applications";
pub const SETTINGS: &str = "settings";
pub const PARTNER_REQUESTS: &str = "partnerRequests";
pub const PARTNERS: &str = "partners";
pub const OFFICERS: &str = "officers";
pub const EVENTS: &str = "events";
pub const HERO_IMAGES: &str = "heroImages";
pub const EMAIL_SIGNUPS: &str = "email-signups";
pub const OFFICER_APPLICATIONS: &str = "officer-applications";
pub const STAFF_CLAIMS: &str = "staffClaims";

/// Serialized JSON size ceiling for a single document.
pub const MAX_DOCUMENT_BYTES: usize = 1024 * 1024;

pub type DbPool = Arc<dyn DocumentStore>;
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Transient; the caller may retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store backend error: {0}")]
    Backend(String),

    #[error("document {collection}/{id} exceeds {limit} bytes ({size})")]
    DocumentTooLarge {
        collection: String,
        id: String,
        size: usize,
        limit: usize,
    },

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub version: u64,
    pub data: Value,
}

impl Document {
    /// Decodes the document into a model, exposing the document id as `id`.
    pub fn decode<T: DeserializeOwned>(&self) -> StoreResult<T> {
        let mut data = self.data.clone();
        if let Value::Object(map) = &mut data {
            map.insert("id".to_string(), Value::String(self.id.clone()));
        }
        serde_json::from_value(data).map_err(|e| {
            StoreError::Serialization(format!("decoding document {}: {}", self.id, e))
        })
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }
}

/// Serializes a model into document data. The `id` field is owned by the
/// store and is never persisted inside the body.
pub fn to_data<T: Serialize>(value: &T) -> StoreResult<Value> {
    let mut data = serde_json::to_value(value)?;
    if let Value::Object(map) = &mut data {
        map.remove("id");
    }
    Ok(data)
}

/// Serializes a model into a patch of top-level fields.
pub fn to_patch<T: Serialize>(value: &T) -> StoreResult<Map<String, Value>> {
    match to_data(value)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Serialization(format!(
            "expected an object patch, got {}",
            other
        ))),
    }
}

pub fn decode_all<T: DeserializeOwned>(docs: &[Document]) -> StoreResult<Vec<T>> {
    docs.iter().map(Document::decode).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: Op,
    pub value: Value,
}

impl Filter {
    fn matches(&self, data: &Value) -> bool {
        let Some(actual) = data.get(&self.field) else {
            return false;
        };
        match (self.op, compare_values(actual, &self.value)) {
            (Op::Eq, Some(ord)) => ord == Ordering::Equal,
            (Op::Eq, None) => actual == &self.value,
            (Op::Lt, Some(ord)) => ord == Ordering::Less,
            (Op::Lte, Some(ord)) => ord != Ordering::Greater,
            (Op::Gt, Some(ord)) => ord == Ordering::Greater,
            (Op::Gte, Some(ord)) => ord != Ordering::Less,
            (_, None) => false,
        }
    }
}

/// Conjunction of field filters with optional single-field ordering.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn where_eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.where_op(field, Op::Eq, value)
    }

    pub fn where_op(mut self, field: &str, op: Op, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.to_string(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some((field.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, data: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(data))
    }

    /// Evaluates the query over an unordered set of documents.
    pub fn apply(&self, docs: Vec<Document>) -> Vec<Document> {
        let mut out: Vec<Document> = docs.into_iter().filter(|d| self.matches(&d.data)).collect();

        if let Some((field, direction)) = &self.order_by {
            out.sort_by(|a, b| {
                let ord = match (a.data.get(field), b.data.get(field)) {
                    (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
                    (None, Some(_)) => Ordering::Less,
                    (Some(_), None) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                };
                match direction {
                    Direction::Asc => ord,
                    Direction::Desc => ord.reverse(),
                }
            });
        }

        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        out
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        // Timestamps carry a variable number of fractional digits.
        (Value::String(x), Value::String(y)) => match (
            chrono::DateTime::parse_from_rfc3339(x),
            chrono::DateTime::parse_from_rfc3339(y),
        ) {
            (Ok(a), Ok(b)) => Some(a.cmp(&b)),
            _ => Some(x.cmp(y)),
        },
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub enum WriteOp {
    Set {
        collection: String,
        id: String,
        data: Value,
    },
    Update {
        collection: String,
        id: String,
        patch: Map<String, Value>,
        expected_version: Option<u64>,
    },
    Delete {
        collection: String,
        id: String,
        expected_version: Option<u64>,
    },
}

/// A set of writes applied all-or-nothing.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, collection: &str, id: &str, data: Value) -> &mut Self {
        self.ops.push(WriteOp::Set {
            collection: collection.to_string(),
            id: id.to_string(),
            data,
        });
        self
    }

    pub fn update(&mut self, collection: &str, id: &str, patch: Map<String, Value>) -> &mut Self {
        self.push_update(collection, id, patch, None)
    }

    /// Update that fails the whole batch with [`StoreError::Conflict`] when the
    /// document changed since `version` was read.
    pub fn update_if_version(
        &mut self,
        collection: &str,
        id: &str,
        patch: Map<String, Value>,
        version: u64,
    ) -> &mut Self {
        self.push_update(collection, id, patch, Some(version))
    }

    pub fn delete(&mut self, collection: &str, id: &str) -> &mut Self {
        self.push_delete(collection, id, None)
    }

    pub fn delete_if_version(&mut self, collection: &str, id: &str, version: u64) -> &mut Self {
        self.push_delete(collection, id, Some(version))
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }

    fn push_update(
        &mut self,
        collection: &str,
        id: &str,
        patch: Map<String, Value>,
        expected_version: Option<u64>,
    ) -> &mut Self {
        self.ops.push(WriteOp::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            patch,
            expected_version,
        });
        self
    }

    fn push_delete(&mut self, collection: &str, id: &str, expected_version: Option<u64>) -> &mut Self {
        self.ops.push(WriteOp::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
            expected_version,
        });
        self
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>>;

    /// Returns every document of the collection matching `query`.
    async fn query(&self, collection: &str, query: &Query) -> StoreResult<Vec<Document>>;

    /// Applies all operations atomically.
    async fn commit(&self, batch: WriteBatch) -> StoreResult<()>;

    async fn count(&self, collection: &str) -> StoreResult<usize> {
        Ok(self.query(collection, &Query::new()).await?.len())
    }

    async fn add(&self, collection: &str, data: Value) -> StoreResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.set(collection, &id, data).await?;
        Ok(id)
    }

    async fn set(&self, collection: &str, id: &str, data: Value) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.set(collection, id, data);
        self.commit(batch).await
    }

    /// Shallow merge of `patch` into the document; `false` when it does not exist.
    async fn update(&self, collection: &str, id: &str, patch: Map<String, Value>) -> StoreResult<bool> {
        let Some(doc) = self.get(collection, id).await? else {
            return Ok(false);
        };
        let mut batch = WriteBatch::new();
        batch.update_if_version(collection, id, patch, doc.version);
        self.commit(batch).await?;
        Ok(true)
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<bool> {
        let Some(doc) = self.get(collection, id).await? else {
            return Ok(false);
        };
        let mut batch = WriteBatch::new();
        batch.delete_if_version(collection, id, doc.version);
        self.commit(batch).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, data: Value) -> Document {
        Document {
            id: id.to_string(),
            version: 1,
            data,
        }
    }

    #[test]
    fn query_filters_and_orders() {
        let docs = vec![
            doc("a", json!({"eid": "ab1", "createdAt": "2026-01-02T10:00:00Z"})),
            doc("b", json!({"eid": "ab1", "createdAt": "2026-01-01T10:00:00Z"})),
            doc("c", json!({"eid": "zz9", "createdAt": "2026-01-03T10:00:00Z"})),
        ];
        let q = Query::new()
            .where_eq("eid", "ab1")
            .order_by("createdAt", Direction::Desc);
        let ids: Vec<_> = q.apply(docs).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn range_filter_on_timestamps() {
        let docs = vec![
            doc("old", json!({"createdAt": "2026-03-01T23:59:59Z"})),
            doc("new", json!({"createdAt": "2026-03-02T00:00:00Z"})),
        ];
        let q = Query::new().where_op("createdAt", Op::Gte, "2026-03-02T00:00:00Z");
        let out = q.apply(docs);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "new");
    }

    #[test]
    fn fractional_seconds_compare_chronologically() {
        let docs = vec![doc("frac", json!({"createdAt": "2026-03-02T00:00:00.250Z"}))];
        let q = Query::new().where_op("createdAt", Op::Gte, "2026-03-02T00:00:00Z");
        assert_eq!(q.apply(docs).len(), 1);
    }

    #[test]
    fn numeric_equality_ignores_representation() {
        let docs = vec![doc("x", json!({"order": 2.0}))];
        assert_eq!(Query::new().where_eq("order", 2).apply(docs).len(), 1);
    }

    #[test]
    fn missing_fields_sort_first() {
        let docs = vec![doc("with", json!({"order": 0})), doc("without", json!({}))];
        let out = Query::new().order_by("order", Direction::Asc).apply(docs);
        assert_eq!(out[0].id, "without");
    }

    #[test]
    fn to_data_strips_id() {
        let data = to_data(&json!({"id": "x", "name": "n"})).unwrap();
        assert_eq!(data, json!({"name": "n"}));
    }
}
