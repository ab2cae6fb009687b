//! Stream Frame Codec
//!
//! Decodes inbound WebSocket text frames into a channel name and one or more
//! payload objects, and encodes outbound subscription requests. Decoding never
//! panics; anything unusable is reported as a [`CodecError`] for the consumer
//! to log and drop.
//!
//! # Inbound shapes
//!
//! ```json
//! {"channel": "flow-alerts", "data": {"id": "..."}}
//! {"topic": "price", "payload": {"ticker": "SPY", "price": 512.3}}
//! {"stream": "news", "headline": "...", "id": 7}
//! ["option_trades:SPY", {"trade_id": "..."}]
//! ```
//!
//! The channel comes from the first of `channel`, `topic`, `stream` holding a
//! non-empty string. The payload comes from `data` or `payload` (an object,
//! or an array of objects); without either, the remaining top-level fields
//! form the payload.

use serde_json::{Map, Value};

use crate::application::handlers::Subscription;
use crate::domain::normalize::Payload;

/// Field names that may carry the channel identifier, in priority order.
pub const CHANNEL_KEYS: [&str; 3] = ["channel", "topic", "stream"];

const PAYLOAD_KEYS: [&str; 2] = ["data", "payload"];

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Frame is not valid JSON.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is JSON but neither an object nor a `[channel, payload]` pair.
    #[error("invalid frame format: {0}")]
    InvalidFormat(String),

    /// No channel identifier present.
    #[error("frame has no channel")]
    MissingChannel,

    /// Channel present but nothing to hand to a handler.
    #[error("frame on channel {0} has no payload")]
    MissingPayload(String),
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Channel name as sent by the server.
    pub channel: String,
    /// Payload objects, in the order they appeared.
    pub payloads: Vec<Payload>,
}

impl Frame {
    /// Split a `base:SUFFIX` channel into its base and suffix.
    #[must_use]
    pub fn split_channel(&self) -> (&str, Option<&str>) {
        match self.channel.split_once(':') {
            Some((base, suffix)) if !base.is_empty() && !suffix.is_empty() => (base, Some(suffix)),
            _ => (&self.channel, None),
        }
    }
}

/// JSON codec for the streaming socket.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl FrameCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not JSON, has an unsupported shape,
    /// or carries no channel or no payload.
    pub fn decode(&self, text: &str) -> Result<Frame, CodecError> {
        match serde_json::from_str::<Value>(text.trim())? {
            Value::Object(map) => Self::decode_object(map),
            Value::Array(items) => Self::decode_pair(items),
            other => Err(CodecError::InvalidFormat(format!(
                "expected object or array, got {}",
                kind_of(&other)
            ))),
        }
    }

    /// Encode a subscription request.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode_subscription(&self, subscription: &Subscription) -> Result<String, CodecError> {
        Ok(serde_json::to_string(subscription)?)
    }

    fn decode_object(mut map: Map<String, Value>) -> Result<Frame, CodecError> {
        let channel = CHANNEL_KEYS
            .iter()
            .find_map(|key| map.get(*key).and_then(non_empty_str))
            .ok_or(CodecError::MissingChannel)?;

        let nested = PAYLOAD_KEYS
            .iter()
            .find_map(|key| map.get(*key).and_then(payload_objects));

        let payloads = match nested {
            Some(payloads) => payloads,
            None => {
                for key in CHANNEL_KEYS.iter().chain(PAYLOAD_KEYS.iter()) {
                    map.remove(*key);
                }
                if map.is_empty() { Vec::new() } else { vec![map] }
            }
        };

        finish(channel, payloads)
    }

    fn decode_pair(items: Vec<Value>) -> Result<Frame, CodecError> {
        let [channel, payload]: [Value; 2] = items
            .try_into()
            .map_err(|items: Vec<Value>| {
                CodecError::InvalidFormat(format!("expected [channel, payload], got {} elements", items.len()))
            })?;
        let channel = non_empty_str(&channel).ok_or(CodecError::MissingChannel)?;
        let payloads = payload_objects(&payload).unwrap_or_default();
        finish(channel, payloads)
    }
}

fn finish(channel: String, payloads: Vec<Payload>) -> Result<Frame, CodecError> {
    if payloads.is_empty() {
        return Err(CodecError::MissingPayload(channel));
    }
    Ok(Frame { channel, payloads })
}

fn non_empty_str(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn payload_objects(value: &Value) -> Option<Vec<Payload>> {
    match value {
        Value::Object(map) if !map.is_empty() => Some(vec![map.clone()]),
        Value::Array(items) => {
            let objects: Vec<Payload> = items
                .iter()
                .filter_map(|item| item.as_object().filter(|m| !m.is_empty()).cloned())
                .collect();
            (!objects.is_empty()).then_some(objects)
        }
        _ => None,
    }
}

const fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// =============================================================================
// Tests
// =============================================================================
