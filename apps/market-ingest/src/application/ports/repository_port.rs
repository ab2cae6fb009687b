//! Repository Port (Driven Port)
//!
//! Interface for persisting normalized events and raw REST payloads.
//!
//! Every write is an idempotent upsert keyed by natural identity: the same
//! event persisted twice leaves one logical record. Streaming and REST paths
//! write the same entities without coordinating, so adapters must not rely
//! on write ordering.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};

use crate::domain::events::NormalizedEvent;

/// Repository error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RepositoryError {
    /// Backing store unreachable.
    #[error("repository connection error: {message}")]
    Connection {
        /// Error detail.
        message: String,
    },

    /// Write rejected or failed.
    #[error("repository write failed: {message}")]
    WriteFailed {
        /// Error detail.
        message: String,
    },

    /// Repository already closed.
    #[error("repository is closed")]
    Closed,
}

/// Raw REST response captured for audit and replay.
#[derive(Debug, Clone, PartialEq)]
pub struct RestPayloadRecord {
    /// Catalog endpoint key.
    pub endpoint: String,
    /// Partition key (`ticker:SPY`, `market`).
    pub scope: Option<String>,
    /// SHA-256 of the canonical `{context, response}` document, hex encoded.
    pub payload_hash: String,
    /// Decoded response body.
    pub payload: Value,
    /// Request context (for example the ticker).
    pub context: Map<String, Value>,
    /// When the response was received.
    pub fetched_at: DateTime<Utc>,
}

impl RestPayloadRecord {
    /// Build a record, hashing the payload together with its context.
    #[must_use]
    pub fn new(
        endpoint: impl Into<String>,
        scope: Option<String>,
        payload: Value,
        context: Map<String, Value>,
    ) -> Self {
        let document = json!({ "context": Value::Object(context.clone()), "response": payload });
        let payload_hash = hex::encode(Sha256::digest(canonical_json(&document).as_bytes()));
        Self {
            endpoint: endpoint.into(),
            scope,
            payload_hash,
            payload,
            context,
            fetched_at: Utc::now(),
        }
    }

    /// Identity used for idempotent storage.
    #[must_use]
    pub fn natural_key(&self) -> (String, Option<String>, String) {
        (
            self.endpoint.clone(),
            self.scope.clone(),
            self.payload_hash.clone(),
        )
    }
}

/// Serialize with object keys sorted at every depth.
fn canonical_json(value: &Value) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let mut out = Map::with_capacity(map.len());
                for key in keys {
                    out.insert(key.clone(), sorted(&map[key.as_str()]));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    sorted(value).to_string()
}

/// Port for event and payload persistence.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Repository: Send + Sync {
    /// Upsert a single event.
    async fn upsert_event(&self, event: &NormalizedEvent) -> Result<(), RepositoryError>;

    /// Upsert a batch of events in one call.
    async fn upsert_events(&self, events: &[NormalizedEvent]) -> Result<(), RepositoryError>;

    /// Store a raw REST payload, ignoring exact duplicates.
    async fn store_rest_payload(&self, record: &RestPayloadRecord) -> Result<(), RepositoryError>;

    /// Release the underlying connection.
    async fn close(&self) -> Result<(), RepositoryError>;
}

/// Shared repository handle.
pub type SharedRepository = Arc<dyn Repository>;

#[cfg(test)]
mod tests {
    use super::*;

    fn context(ticker: &str) -> Map<String, Value> {
        json!({ "ticker": ticker }).as_object().cloned().unwrap()
    }

    #[test]
    fn hash_ignores_key_order() {
        let a = RestPayloadRecord::new(
            "stock_nope",
            Some("ticker:SPY".to_string()),
            json!({"data": [{"a": 1, "b": 2}]}),
            context("SPY"),
        );
        let b = RestPayloadRecord::new(
            "stock_nope",
            Some("ticker:SPY".to_string()),
            serde_json::from_str(r#"{"data":[{"b":2,"a":1}]}"#).unwrap(),
            context("SPY"),
        );
        assert_eq!(a.payload_hash, b.payload_hash);
        assert_eq!(a.natural_key(), b.natural_key());
        assert_eq!(a.payload_hash.len(), 64);
    }

    #[test]
    fn hash_covers_context() {
        let payload = json!({"data": []});
        let spy = RestPayloadRecord::new("stock_nope", None, payload.clone(), context("SPY"));
        let qqq = RestPayloadRecord::new("stock_nope", None, payload, context("QQQ"));
        assert_ne!(spy.payload_hash, qqq.payload_hash);
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let value = json!({"z": {"b": 1, "a": [{"d": 0, "c": 0}]}, "y": null});
        assert_eq!(
            canonical_json(&value),
            r#"{"y":null,"z":{"a":[{"c":0,"d":0}],"b":1}}"#
        );
    }
}
