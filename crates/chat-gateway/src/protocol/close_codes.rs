//! Close codes of the final WebSocket frame

/// Application close codes
///
/// Only `AuthenticationFailed` tells a client that reconnecting cannot help.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CloseCode {
    UnknownError = 4000,
    /// The client sent an op only the server may send
    UnknownOpcode = 4001,
    /// Not JSON, or not a gateway frame
    DecodeError = 4002,
    /// An op other than Identify before the session was identified
    NotAuthenticated = 4003,
    AuthenticationFailed = 4004,
    AlreadyAuthenticated = 4005,
    /// Heartbeat window elapsed, or Identify never arrived
    SessionTimeout = 4009,
}

impl CloseCode {
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Reason text sent with the code
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            Self::UnknownError => "Unknown error",
            Self::UnknownOpcode => "Op not allowed from a client",
            Self::DecodeError => "Undecodable frame",
            Self::NotAuthenticated => "Identify first",
            Self::AuthenticationFailed => "Token rejected",
            Self::AlreadyAuthenticated => "Already identified",
            Self::SessionTimeout => "Heartbeat window elapsed",
        }
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason())
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}
