//! Pusher protocol framing
//!
//! Pusher servers send `data` either as a nested object or as a JSON document
//! escaped into a string. Decoding accepts both; encoding always nests.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const CONNECTION_ESTABLISHED: &str = "pusher:connection_established";
pub const SUBSCRIPTION_SUCCEEDED: &str = "pusher:subscription_succeeded";
pub const INTERNAL_SUBSCRIPTION_SUCCEEDED: &str = "pusher_internal:subscription_succeeded";
pub const SUBSCRIBE: &str = "pusher:subscribe";
pub const PING: &str = "pusher:ping";
pub const PONG: &str = "pusher:pong";
pub const ERROR: &str = "pusher:error";

/// Errors raised while framing
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("frame has no event name")]
    MissingEvent,

    #[error("failed to serialize frame: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// A decoded inbound frame whose payload has not been interpreted yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEnvelope {
    pub event_name: String,
    /// Payload as JSON text, unescaped if it arrived as a string
    pub raw_payload: String,
    pub channel: Option<String>,
}

#[derive(Deserialize)]
struct RawFrame {
    event: Option<String>,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    channel: Option<String>,
}

#[derive(Serialize)]
struct OutboundFrame<'a, T: Serialize> {
    event: &'a str,
    data: &'a T,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<&'a str>,
}

impl InboundEnvelope {
    /// Interpret the payload as `T`, `None` if it does not have that shape
    pub fn data<T: DeserializeOwned>(&self) -> Option<T> {
        parse_payload(&self.raw_payload)
    }

    pub fn is_event(&self, name: &str) -> bool {
        self.event_name == name
    }
}

/// Decode a text frame into an envelope
pub fn decode(text: &str) -> Result<InboundEnvelope, CodecError> {
    let frame: RawFrame = serde_json::from_str(text).map_err(CodecError::InvalidJson)?;
    let event_name = frame.event.ok_or(CodecError::MissingEvent)?;

    let raw_payload = match frame.data {
        Value::String(embedded) => embedded,
        Value::Null => String::new(),
        other => other.to_string(),
    };

    Ok(InboundEnvelope {
        event_name,
        raw_payload,
        channel: frame.channel,
    })
}

/// Decode a text frame and its payload in one step
///
/// Fails only when the envelope itself is unusable; an unusable payload
/// yields `Ok(None)`.
pub fn decode_as<T: DeserializeOwned>(text: &str) -> Result<Option<(InboundEnvelope, T)>, CodecError> {
    let envelope = decode(text)?;
    Ok(envelope.data::<T>().map(|data| (envelope, data)))
}

fn parse_payload<T: DeserializeOwned>(raw: &str) -> Option<T> {
    if raw.is_empty() {
        return serde_json::from_value(Value::Null).ok();
    }

    match serde_json::from_str::<T>(raw) {
        Ok(value) => Some(value),
        Err(_) => {
            // Payloads are sometimes escaped twice
            let inner: String = serde_json::from_str(raw).ok()?;
            serde_json::from_str(&inner).ok()
        }
    }
}

/// Encode an outbound frame, nesting `data` as an object
pub fn encode<T: Serialize>(event: &str, data: &T, channel: Option<&str>) -> Result<String, CodecError> {
    serde_json::to_string(&OutboundFrame {
        event,
        data,
        channel,
    })
    .map_err(CodecError::Serialize)
}

/// Payload of `pusher:connection_established`
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ConnectionEstablished {
    pub socket_id: String,
    /// Seconds of silence after which the client should ping
    #[serde(default)]
    pub activity_timeout: Option<u64>,
}

/// Payload of `pusher:subscribe`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub auth: String,
    pub channel: String,
}

/// Payload of `pusher:error`
#[derive(Debug, Clone, Deserialize)]
pub struct ServerError {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: Option<i64>,
}

/// Empty object payload for pings, pongs and acks
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Empty {}
