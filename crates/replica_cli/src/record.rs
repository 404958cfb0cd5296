//! Schema-less record type.
//!
//! The CLI does not know the application's record type. It reads journal
//! payloads as JSON values, which is lossless for anything serde maps to
//! CBOR maps, arrays, strings, numbers, booleans and null.

use replica_core::{Record, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A record whose payload is an arbitrary JSON value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JsonRecord(pub Value);

impl Record for JsonRecord {
    fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(Value::as_str)
    }

    fn set_id(&mut self, id: Option<String>) {
        if let Value::Object(map) = &mut self.0 {
            map.insert("id".to_string(), id.map_or(Value::Null, Value::String));
        }
    }

    fn updated_at(&self) -> Option<Timestamp> {
        self.0
            .get("updated_at")
            .and_then(Value::as_u64)
            .map(Timestamp)
    }

    fn set_updated_at(&mut self, at: Timestamp) {
        if let Value::Object(map) = &mut self.0 {
            map.insert("updated_at".to_string(), Value::from(at.as_millis()));
        }
    }
}
