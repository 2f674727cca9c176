//! The consumed interface of the remote record store.
//!
//! The engines only ever talk to the store through [`RemoteStore`]; the
//! record schema beyond the handful of fields they read is the store's
//! business.

use std::fmt;

use async_trait::async_trait;
use serde_json::{Map, Value};

/// A raw record as the store returns it
pub type Record = Map<String, Value>;

/// Fields to write on create/update
pub type FieldPatch = Map<String, Value>;

/// Error reported by the remote store: a code/message pair
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct RemoteError {
    pub code: String,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        RemoteError {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn not_found(source: &str, id: &str) -> Self {
        RemoteError::new("NOT_FOUND", format!("no record {} in {}", id, source))
    }
}

/// One equality clause of a criteria expression
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub field: String,
    pub value: Value,
}

/// A conjunction of field equality clauses. An empty criteria matches every
/// record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criteria {
    clauses: Vec<Clause>,
}

impl Criteria {
    pub fn all() -> Self {
        Criteria::default()
    }

    /// Add `field = value`.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push(Clause {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Whether a record satisfies every clause. A missing field compares as
    /// null.
    pub fn matches(&self, record: &Record) -> bool {
        self.clauses
            .iter()
            .all(|c| record.get(&c.field).unwrap_or(&Value::Null) == &c.value)
    }
}

impl fmt::Display for Criteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.clauses.is_empty() {
            return write!(f, "TRUE");
        }
        let parts: Vec<String> = self
            .clauses
            .iter()
            .map(|c| format!("{} = {}", c.field, c.value))
            .collect();
        write!(f, "{}", parts.join(" AND "))
    }
}

/// One page of a record query
#[derive(Debug, Clone, Default)]
pub struct RecordPage {
    pub records: Vec<Record>,
    /// Cursor for the next page, if there is one
    pub next_cursor: Option<String>,
}

/// Request/response contract of the remote record service.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn query_records(
        &self,
        source: &str,
        criteria: &Criteria,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<RecordPage, RemoteError>;

    async fn query_record_count(&self, source: &str, criteria: &Criteria)
    -> Result<u64, RemoteError>;

    async fn update_record(
        &self,
        source: &str,
        id: &str,
        patch: &FieldPatch,
    ) -> Result<(), RemoteError>;

    async fn update_records_bulk(
        &self,
        source: &str,
        criteria: &Criteria,
        patch: &FieldPatch,
    ) -> Result<(), RemoteError>;

    /// Returns the new record's id.
    async fn create_record(&self, source: &str, patch: &FieldPatch) -> Result<String, RemoteError>;
}

/// Build a one-field patch.
pub fn patch_of(field: &str, value: impl Into<Value>) -> FieldPatch {
    let mut patch = FieldPatch::new();
    patch.insert(field.to_string(), value.into());
    patch
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(v: Value) -> Record {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn criteria_matches_all_clauses() {
        let c = Criteria::all().eq("recipient_id", "u1").eq("is_read", false);
        assert!(c.matches(&record(json!({"recipient_id":"u1","is_read":false}))));
        assert!(!c.matches(&record(json!({"recipient_id":"u1","is_read":true}))));
        assert!(!c.matches(&record(json!({"recipient_id":"u2","is_read":false}))));
        assert!(!c.matches(&record(json!({"recipient_id":"u1"}))));
    }

    #[test]
    fn empty_criteria_matches_everything() {
        assert!(Criteria::all().matches(&record(json!({"id":"x"}))));
        assert_eq!(Criteria::all().to_string(), "TRUE");
    }

    #[test]
    fn criteria_display() {
        let c = Criteria::all().eq("recipient_id", "u1").eq("is_read", false);
        assert_eq!(c.to_string(), r#"recipient_id = "u1" AND is_read = false"#);
    }

    #[test]
    fn patch_of_null() {
        let p = patch_of("tranche_id", Value::Null);
        assert_eq!(p.get("tranche_id"), Some(&Value::Null));
    }
}
