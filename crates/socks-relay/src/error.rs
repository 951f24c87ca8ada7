//! Error types for the SOCKS5 relay

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProxyError>;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("SOCKS5 protocol error: {0}")]
    Protocol(String),

    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Timeout")]
    Timeout,
}

impl ProxyError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn connect(msg: impl Into<String>) -> Self {
        Self::Connect(msg.into())
    }

    /// Map an IO error hit while reading a wire field.
    ///
    /// A peer that hangs up mid-message sent a malformed message, so
    /// `UnexpectedEof` becomes a protocol error; anything else stays IO.
    pub fn from_wire(err: std::io::Error, field: &str) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::Protocol(format!("stream ended while reading {}", field))
        } else {
            Self::Io(err)
        }
    }
}
