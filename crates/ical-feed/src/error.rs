//! Error types for ical-feed operations.

use thiserror::Error;
use trigger_engine::FeedError;

#[derive(Error, Debug)]
pub enum IcalError {
    #[error("Failed to fetch {source_url}: {message}")]
    Fetch { source_url: String, message: String },

    #[error("iCalendar parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Invalid RRULE: {0}")]
    InvalidRule(String),
}

pub type Result<T> = std::result::Result<T, IcalError>;

impl From<IcalError> for FeedError {
    fn from(e: IcalError) -> Self {
        match e {
            IcalError::Fetch { .. } => FeedError::Unreachable(e.to_string()),
            other => FeedError::ParseError(other.to_string()),
        }
    }
}
