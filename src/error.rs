use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Empty packet")]
    Empty,
    #[error("Unknown packet type: {0:?}")]
    UnknownPacketType(char),
    #[error("Invalid packet payload: {0}")]
    InvalidPayload(String),
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),
    #[error("No heartbeat from server within {0:?}")]
    PingTimeout(Duration),
    #[error("Connection refused by server: {0}")]
    ConnectRefused(String),
    #[error("Unexpected handshake packet: {0}")]
    UnexpectedHandshake(String),
    #[error("Transport closed")]
    Closed,
    #[error("Invalid server url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error("WebSocket transport error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Username must be {min}-{max} characters long")]
    UsernameLength { min: usize, max: usize },
    #[error("Username can only contain letters, numbers, underscores, and hyphens")]
    UsernameCharacters,
    #[error("Room name must be {min}-{max} characters long")]
    RoomLength { min: usize, max: usize },
    #[error("Room name can only contain letters, numbers, spaces, underscores, and hyphens")]
    RoomCharacters,
    #[error("Message cannot be empty")]
    MessageEmpty,
    #[error("Message must be less than {max} characters")]
    MessageTooLong { max: usize },
}
