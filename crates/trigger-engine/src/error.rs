//! Error types for trigger-engine operations.

use thiserror::Error;

use crate::coordinator::TickReport;

/// Invalid trigger configuration. Fatal at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Duplicate trigger name: {0}")]
    DuplicateRule(String),

    #[error("Trigger '{rule}': base needs to be either \"begin\" or \"end\", not \"{base}\"")]
    InvalidBase { rule: String, base: String },

    #[error("Trigger '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },
}

/// Failures of the notification ledger's storage.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// The stored ledger exists but cannot be read or decoded.
    #[error("Ledger at {path} is unreadable: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("Failed to write ledger to {path}: {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failures resolving the tracked event from the calendar feed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("No event named '{0}' found in the feed")]
    NotFound(String),

    #[error("Calendar feed unreachable: {0}")]
    Unreachable(String),

    #[error("Calendar feed could not be parsed: {0}")]
    ParseError(String),
}

/// Failures delivering a single value to the bus.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("Bus not connected: {0}")]
    NotConnected(String),

    #[error("Telegram rejected: {0}")]
    Rejected(String),

    #[error("Bus timed out: {0}")]
    Timeout(String),
}

/// Failures that abort a whole tick.
#[derive(Error, Debug)]
pub enum TickError {
    /// The event could not be resolved; nothing was evaluated or sent.
    #[error("Tick aborted: {0}")]
    Feed(#[from] FeedError),

    /// A delivered value could not be recorded. Remaining due rules were not attempted.
    #[error("Tick aborted: '{rule}' not recorded after {attempts} attempts: {source}")]
    LedgerWrite {
        rule: String,
        attempts: u32,
        #[source]
        source: LedgerError,
        /// What the tick had achieved before it stopped.
        report: TickReport,
    },
}
