//! Error types for KNX addressing, encoding and transport.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum KnxError {
    #[error("Invalid group address: {0}")]
    InvalidGroupAddress(String),

    #[error("Invalid individual address: {0}")]
    InvalidIndividualAddress(String),

    #[error("Unknown datapoint type: {0}")]
    UnknownDpt(String),

    #[error("Value '{value}' is not valid for DPT {dpt}: {reason}")]
    InvalidValue {
        dpt: String,
        value: String,
        reason: String,
    },

    #[error("Malformed KNXnet/IP frame: {0}")]
    Frame(String),

    /// The tunnel could not be established (socket setup, refused or unanswered connect).
    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("Telegram rejected: {0}")]
    Rejected(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, KnxError>;
