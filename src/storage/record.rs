//! Records and their on-disk JSON format.
//!
//! Each record is stored as a separate JSON document with metadata used for
//! version tracking and conflict detection:
//! ```text
//! {
//!   "_id": 12,
//!   "_version": 7,
//!   "_created_at": "xxxx-xx-xxT00:00:00Z",
//!   "_updated_at": "xxxx-xx-xxT00:00:00Z",
//!   "code": "abc",
//!   "algorithm": "sha256"
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::RecordId;

/// Field values of a record, keyed by field name.
pub type Values = BTreeMap<String, Value>;

/// A stored record with metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// database id, unique within its model
    pub id: RecordId,
    /// store commit counter at the last committed write, 0 while uncommitted
    pub version: u64,
    /// creation timestamp
    pub created_at: String,
    /// last update timestamp
    pub updated_at: String,
    /// field values
    pub data: Values,
}

impl Record {
    /// Create a new, not yet committed record.
    pub fn new(id: RecordId, data: Values) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id,
            version: 0,
            created_at: now.clone(),
            updated_at: now,
            data,
        }
    }

    /// Merge new values into existing data (partial update).
    pub fn merge_data(&mut self, updates: Values) {
        for (k, v) in updates {
            self.data.insert(k, v);
        }
        self.updated_at = chrono::Utc::now().to_rfc3339();
    }

    /// Get a field value by name.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    /// Resolve a field path for filtering.
    ///
    /// `id` maps to the record id; dotted paths descend into JSON objects,
    /// so `address.city` reads `{"address": {"city": ...}}`.
    pub fn field(&self, path: &str) -> Option<Value> {
        if path == "id" {
            return Some(Value::from(self.id.value()));
        }
        let mut parts = path.split('.');
        let mut current = self.data.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current.clone())
    }

    /// Get a string field.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }
}

/// metadata keys use a `_` prefix to avoid clashing with model fields
#[derive(Serialize, Deserialize)]
struct RecordJson {
    #[serde(rename = "_id")]
    id: u64,
    #[serde(rename = "_version")]
    version: u64,
    #[serde(rename = "_created_at")]
    created_at: String,
    #[serde(rename = "_updated_at")]
    updated_at: String,
    #[serde(flatten)]
    data: Values,
}

/// Serialize a record to JSON bytes.
///
/// BTreeMap keeps key order stable, so unchanged records produce identical
/// blobs in the journal.
pub fn serialize_record(record: &Record) -> StorageResult<Vec<u8>> {
    let json = RecordJson {
        id: record.id.value(),
        version: record.version,
        created_at: record.created_at.clone(),
        updated_at: record.updated_at.clone(),
        data: record.data.clone(),
    };
    Ok(serde_json::to_vec_pretty(&json)?)
}

/// Deserialize a record, checking that its id matches the expected one.
pub fn deserialize_record(bytes: &[u8], expected: RecordId) -> StorageResult<Record> {
    let json: RecordJson = serde_json::from_slice(bytes)?;
    if json.id != expected.value() {
        return Err(StorageError::CorruptedData {
            path: format!("{}.json", expected).into(),
            reason: format!("id mismatch: expected {}, found {}", expected, json.id),
        });
    }
    Ok(Record {
        id: expected,
        version: json.version,
        created_at: json.created_at,
        updated_at: json.updated_at,
        data: json.data,
    })
}
