//! Document store seam.
//!
//! The ride and presence logic only needs create, field update (optionally
//! conditional), merge, point read and push subscriptions. Any backend that can
//! offer those implements [`DocumentStore`].

pub mod memory;
pub mod subscription;

use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::StoreError;

pub use subscription::Subscription;

pub type Document = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Value(Value),
    /// Resolved by the store to its own clock at write time.
    ServerTimestamp,
}

/// Top-level fields written by a create, update or merge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields(Vec<(String, FieldValue)>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flattens a serializable struct into top-level fields.
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self, StoreError> {
        match serde_json::to_value(value) {
            Ok(Value::Object(map)) => Ok(Self(
                map.into_iter()
                    .map(|(key, value)| (key, FieldValue::Value(value)))
                    .collect(),
            )),
            Ok(other) => Err(StoreError::Decode(format!(
                "expected an object, got {other}"
            ))),
            Err(err) => Err(StoreError::Decode(err.to_string())),
        }
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.push((key.into(), FieldValue::Value(value.into())));
        self
    }

    pub fn set_serialized<T: Serialize>(
        self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<Self, StoreError> {
        let value = serde_json::to_value(value).map_err(|err| StoreError::Decode(err.to_string()))?;
        Ok(self.set(key, value))
    }

    pub fn server_timestamp(mut self, key: impl Into<String>) -> Self {
        self.0.push((key.into(), FieldValue::ServerTimestamp));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(key, _)| key.as_str())
    }

    /// Writes every field into `doc`, resolving server timestamps to `now`.
    pub fn apply_to(self, doc: &mut Document, now: DateTime<Utc>) {
        let stamp = now.to_rfc3339_opts(SecondsFormat::Micros, true);
        for (key, value) in self.0 {
            let value = match value {
                FieldValue::Value(value) => value,
                FieldValue::ServerTimestamp => Value::String(stamp.clone()),
            };
            doc.insert(key, value);
        }
    }
}

/// Field equality checks a conditional update must pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Precondition {
    equals: Vec<(String, Value)>,
}

impl Precondition {
    pub fn field_equals(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::default().and(key, value)
    }

    pub fn and(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equals.push((key.into(), value.into()));
        self
    }

    pub fn check(&self, doc: &Document) -> Result<(), StoreError> {
        for (key, expected) in &self.equals {
            let actual = doc.get(key).unwrap_or(&Value::Null);
            if actual != expected {
                return Err(StoreError::PreconditionFailed(format!(
                    "{key} is {actual}, expected {expected}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Equality filters with optional ordering and limit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    filters: Vec<(String, Value)>,
    order_by: Option<(String, Direction)>,
    limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn where_eq(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((key.into(), value.into()));
        self
    }

    pub fn order_by(mut self, key: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some((key.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.filters
            .iter()
            .all(|(key, expected)| doc.get(key) == Some(expected))
    }

    /// Filters, sorts and truncates a set of candidate documents.
    pub fn apply(&self, candidates: impl IntoIterator<Item = Snapshot>) -> Vec<Snapshot> {
        let mut results: Vec<Snapshot> = candidates
            .into_iter()
            .filter(|snapshot| self.matches(&snapshot.data))
            .collect();

        if let Some((key, direction)) = &self.order_by {
            results.sort_by(|a, b| {
                let ordering = compare_values(a.data.get(key), b.data.get(key));
                match direction {
                    Direction::Ascending => ordering,
                    Direction::Descending => ordering.reverse(),
                }
            });
        }

        if let Some(limit) = self.limit {
            results.truncate(limit);
        }
        results
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::String(a)), Some(Value::String(b))) => {
            match (parse_timestamp(a), parse_timestamp(b)) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => a.cmp(b),
            }
        }
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .zip(b.as_f64())
            .and_then(|(a, b)| a.partial_cmp(&b))
            .unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw).ok()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub id: String,
    pub data: Document,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Creates a document with a store-assigned id.
    async fn create(&self, collection: &str, fields: Fields) -> Result<String, StoreError>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Updates fields of an existing document. Fails with `NotFound` if it does
    /// not exist and with `PreconditionFailed` if `precondition` does not hold
    /// at the moment the write is applied.
    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
        precondition: Option<Precondition>,
    ) -> Result<(), StoreError>;

    /// Upsert touching only the given fields.
    async fn merge(&self, collection: &str, id: &str, fields: Fields) -> Result<(), StoreError>;

    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Snapshot>, StoreError>;

    /// Emits the current state, then every change in application order.
    /// `None` means the document does not exist.
    async fn subscribe_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Subscription<Option<Document>>, StoreError>;

    /// Emits the full matching result set initially and after every change.
    async fn subscribe_query(
        &self,
        collection: &str,
        query: Query,
    ) -> Result<Subscription<Vec<Snapshot>>, StoreError>;
}
