// src/codec.rs

//! Storage codec for job arguments.
//!
//! Arguments are stored as a JSON array in a text column. Encoding is
//! canonical (object keys sorted, no whitespace) so the encoded form doubles
//! as the identity key for `(command, args)` lookups.
//!
//! Decoding reports failure through `Err`, so a stored `false` is never
//! mistaken for a decoding error.

use serde_json::Value;

use crate::errors::{JobQueueError, Result};

pub fn encode_value(value: &Value) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| JobQueueError::Codec(format!("failed to encode value: {e}")))
}

pub fn decode_value(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).map_err(|e| {
        JobQueueError::Codec(format!("failed to decode stored value {raw:?}: {e}"))
    })
}

pub fn encode_args(args: &[Value]) -> Result<String> {
    serde_json::to_string(args)
        .map_err(|e| JobQueueError::Codec(format!("failed to encode job args: {e}")))
}

pub fn decode_args(raw: &str) -> Result<Vec<Value>> {
    match decode_value(raw)? {
        Value::Array(values) => Ok(values),
        other => Err(JobQueueError::Codec(format!(
            "stored job args must be an array, got {other}"
        ))),
    }
}
