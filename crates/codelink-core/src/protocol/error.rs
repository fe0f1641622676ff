//! Protocol errors

use thiserror::Error;

/// Errors that can occur while configuring or driving a link
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Serial port error: {0}")]
    SerialError(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Empty command")]
    EmptyCommand,

    #[error("Receive buffer overflow: {incoming} bytes arrived, {available} bytes free")]
    BufferOverflow { incoming: usize, available: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration parse error: {0}")]
    JsonError(#[from] serde_json::Error),
}
