//! Wire payloads exchanged between nodes
//!
//! Every get response and set request body is a two-field JSON record
//! carrying the key and its value. Failures travel as a small error body
//! naming the error kind so the caller can rebuild a typed error.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};

/// Values that can be cached and carried over the wire.
pub trait CacheValue: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// A key/value pair as it travels between nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry<V> {
    pub key: String,
    pub value: V,
}

impl<V> Entry<V> {
    pub fn new(key: impl Into<String>, value: V) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Inbound write body. Fields are optional here so that a missing field is
/// reported as a malformed request instead of a decoder error.
#[derive(Debug, Deserialize)]
pub struct SetRequest<V> {
    #[serde(default)]
    pub key: String,
    pub value: Option<V>,
}

impl<V: DeserializeOwned> SetRequest<V> {
    /// Decode a write body and check the required fields.
    ///
    /// An empty key or a missing/null value is malformed; an empty but
    /// present value (for example `""`) is accepted.
    pub fn decode(body: &[u8]) -> CacheResult<Entry<V>> {
        let request: SetRequest<V> = serde_json::from_slice(body)
            .map_err(|e| CacheError::MalformedRequest(e.to_string()))?;
        if request.key.is_empty() {
            return Err(CacheError::MalformedRequest("key is required".to_string()));
        }
        let value = request
            .value
            .ok_or_else(|| CacheError::MalformedRequest("value is required".to_string()))?;
        Ok(Entry::new(request.key, value))
    }
}

/// Body of every non-success response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

impl ErrorBody {
    pub fn from_error(err: &CacheError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }

    /// Rebuild the error a remote node reported.
    ///
    /// Absence and duplicate-key outcomes keep their kind; everything else
    /// becomes a remote error attributed to `addr`.
    pub fn into_error(self, addr: &str, key: &str) -> CacheError {
        match self.kind.as_str() {
            "not_found" => CacheError::NotFound(key.to_string()),
            "already_exists" => CacheError::AlreadyExists(key.to_string()),
            _ => CacheError::remote(addr, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_shape() {
        let entry = Entry::new("user:1", json!({"name": "ada"}));
        let encoded = serde_json::to_value(&entry).unwrap();
        assert_eq!(encoded, json!({"key": "user:1", "value": {"name": "ada"}}));
    }

    #[test]
    fn test_set_request_validation() {
        let ok: Entry<serde_json::Value> =
            SetRequest::decode(br#"{"key":"k","value":"v"}"#).unwrap();
        assert_eq!(ok, Entry::new("k", json!("v")));

        let empty_value: Entry<serde_json::Value> =
            SetRequest::decode(br#"{"key":"k","value":""}"#).unwrap();
        assert_eq!(empty_value.value, json!(""));

        let missing_key = SetRequest::<serde_json::Value>::decode(br#"{"value":"v"}"#);
        assert!(matches!(missing_key, Err(CacheError::MalformedRequest(_))));

        let empty_key = SetRequest::<serde_json::Value>::decode(br#"{"key":"","value":1}"#);
        assert!(matches!(empty_key, Err(CacheError::MalformedRequest(_))));

        let null_value = SetRequest::<serde_json::Value>::decode(br#"{"key":"k","value":null}"#);
        assert!(matches!(null_value, Err(CacheError::MalformedRequest(_))));

        let garbage = SetRequest::<serde_json::Value>::decode(b"not json");
        assert!(matches!(garbage, Err(CacheError::MalformedRequest(_))));
    }

    #[derive(Debug, PartialEq, Deserialize)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[test]
    fn test_set_request_accepts_values_without_default() {
        let entry: Entry<Point> = SetRequest::decode(br#"{"key":"p","value":{"x":1,"y":2}}"#).unwrap();
        assert_eq!(entry.value, Point { x: 1, y: 2 });

        let missing = SetRequest::<Point>::decode(br#"{"key":"p"}"#);
        assert!(matches!(missing, Err(CacheError::MalformedRequest(_))));
    }

    #[test]
    fn test_error_body_round_trip_keeps_kind() {
        let body = ErrorBody::from_error(&CacheError::NotFound("k".to_string()));
        assert!(matches!(body.into_error("n1", "k"), CacheError::NotFound(_)));

        let body = ErrorBody::from_error(&CacheError::EmptyRing);
        match body.into_error("n1", "k") {
            CacheError::Remote { addr, .. } => assert_eq!(addr, "n1"),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
