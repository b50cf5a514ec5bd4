//! Frame op codes

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Operation of a `{op, t, s, d}` frame, carried on the wire as its integer value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum OpCode {
    /// Push event, `t` names it and `d` carries it
    Dispatch = 0,
    Heartbeat = 1,
    /// First frame a client must send, carrying its token
    Identify = 2,
    /// Token rejected; the socket closes right after
    InvalidSession = 7,
    /// First frame on every socket, announcing the heartbeat interval
    Hello = 10,
    HeartbeatAck = 11,
}

/// An integer that names no op
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown op code {0}")]
pub struct UnknownOpCode(pub u8);

impl OpCode {
    /// Whether a client may send this op; every other op is server to client
    #[must_use]
    pub const fn is_client_op(self) -> bool {
        matches!(self, Self::Heartbeat | Self::Identify)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = UnknownOpCode;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Dispatch,
            1 => Self::Heartbeat,
            2 => Self::Identify,
            7 => Self::InvalidSession,
            10 => Self::Hello,
            11 => Self::HeartbeatAck,
            other => return Err(UnknownOpCode(other)),
        })
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> Self {
        op as u8
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?} ({})", u8::from(*self))
    }
}
