//! Gateway protocol definitions
//!
//! Defines the WebSocket protocol including op codes, message formats, and close codes.

mod close_codes;
mod messages;
mod opcodes;
mod payloads;

pub use close_codes::CloseCode;
pub use messages::GatewayMessage;
pub use opcodes::{OpCode, UnknownOpCode};
pub use payloads::{HelloPayload, IdentifyPayload, ReadyPayload};

/// Dispatch name of the handshake completion event
pub const READY: &str = "READY";
