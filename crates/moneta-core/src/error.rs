use crate::status::CurrencyError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Transport errors
    #[error("Port error: {0}")]
    Port(String),

    #[error("Port is not open")]
    PortClosed,

    // Protocol errors
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    #[error("Answer too short: need {expected} bytes, got {actual}")]
    AnswerTooShort { expected: usize, actual: usize },

    #[error("Device answered NAK")]
    Nak,

    #[error("No answer from device")]
    NoAnswer,

    // Device state errors
    #[error("Device is not initialized")]
    NotInitialized,

    #[error("Device is not ready: {0}")]
    NotReady(String),

    #[error("Timeout waiting for {0}")]
    Timeout(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing configuration key: {0}")]
    MissingConfig(String),

    #[error("Currency error: {0:?}")]
    Currency(CurrencyError),

    // Firmware update errors
    #[error("Firmware error: {0}")]
    Firmware(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn port(message: impl Into<String>) -> Self {
        Error::Port(message.into())
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol(message.into())
    }

    pub fn timeout(waiting_for: impl Into<String>) -> Self {
        Error::Timeout(waiting_for.into())
    }

    pub fn firmware(message: impl Into<String>) -> Self {
        Error::Firmware(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
