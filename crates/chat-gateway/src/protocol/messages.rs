//! Gateway message format
//!
//! Defines the structure for all WebSocket messages.

use chat_core::PushEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{CloseCode, HelloPayload, IdentifyPayload, OpCode, ReadyPayload, READY};

/// Gateway message format
///
/// All messages sent over the WebSocket connection follow this format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayMessage {
    /// Operation code
    pub op: OpCode,

    /// Event type (only for op=0 Dispatch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,

    /// Sequence number (only for op=0 Dispatch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,

    /// Event data payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<Value>,
}

impl GatewayMessage {
    // === Server Messages ===

    /// Create a Dispatch message (op=0)
    #[must_use]
    pub fn dispatch(event_type: impl Into<String>, sequence: u64, data: Value) -> Self {
        Self {
            op: OpCode::Dispatch,
            t: Some(event_type.into()),
            s: Some(sequence),
            d: Some(data),
        }
    }

    /// Dispatch a push event; `t` carries the event type, `d` the tagged event
    ///
    /// # Errors
    /// Returns an error if the event cannot be serialized
    pub fn push_event(event: &PushEvent, sequence: u64) -> Result<Self, serde_json::Error> {
        Ok(Self::dispatch(
            event.event_type(),
            sequence,
            serde_json::to_value(event)?,
        ))
    }

    /// Create the READY dispatch that completes identification
    ///
    /// # Errors
    /// Returns an error if the payload cannot be serialized
    pub fn ready(payload: &ReadyPayload, sequence: u64) -> Result<Self, serde_json::Error> {
        Ok(Self::dispatch(READY, sequence, serde_json::to_value(payload)?))
    }

    /// First frame on every socket
    #[must_use]
    pub fn hello(payload: HelloPayload) -> Self {
        Self::control(
            OpCode::Hello,
            Some(serde_json::json!({ "heartbeat_interval": payload.heartbeat_interval })),
        )
    }

    #[must_use]
    pub fn heartbeat_ack() -> Self {
        Self::control(OpCode::HeartbeatAck, None)
    }

    /// Token rejected; `d` is `false` because the session cannot be resumed
    #[must_use]
    pub fn invalid_session() -> Self {
        Self::control(OpCode::InvalidSession, Some(Value::Bool(false)))
    }

    /// Non-dispatch frame: no event type, no sequence
    fn control(op: OpCode, d: Option<Value>) -> Self {
        Self {
            op,
            t: None,
            s: None,
            d,
        }
    }

    // === Parsing Client Messages ===

    /// Try to parse as an Identify payload (op=2)
    pub fn as_identify(&self) -> Option<IdentifyPayload> {
        if self.op != OpCode::Identify {
            return None;
        }
        self.d.as_ref().and_then(|d| serde_json::from_value(d.clone()).ok())
    }

    /// Try to parse the heartbeat sequence number (op=1)
    pub fn as_heartbeat_seq(&self) -> Option<Option<u64>> {
        if self.op != OpCode::Heartbeat {
            return None;
        }
        Some(self.d.as_ref().and_then(Value::as_u64))
    }

    // === Utilities ===

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Create an error close frame
    #[must_use]
    pub fn close_frame(code: CloseCode) -> (u16, String) {
        (code.as_u16(), code.reason().to_string())
    }
}

impl std::fmt::Display for GatewayMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(t) = &self.t {
            write!(f, "GatewayMessage(op={}, t={}", self.op, t)?;
            if let Some(s) = self.s {
                write!(f, ", s={s}")?;
            }
            write!(f, ")")
        } else {
            write!(f, "GatewayMessage(op={})", self.op)
        }
    }
}
