//! Helpers for decoding the opaque params value inside verbs.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::errors::RpcError;

/// Decode params into a concrete type.
///
/// A shape mismatch becomes an `InvalidRequest` error that names the
/// problem, so verbs can simply `?` it.
pub fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, RpcError> {
    serde_json::from_value(params)
        .map_err(|e| RpcError::invalid_request(format!("Invalid params: {e}")))
}

/// Fetch a required string field from an object-shaped params value.
pub fn require_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, RpcError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::invalid_request(format!("Missing '{key}'")))
}
