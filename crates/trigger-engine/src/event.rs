//! The resolved event occurrence a tick evaluates against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FeedError;
use crate::rules::Anchor;

/// One occurrence of the tracked event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Distinguishes this occurrence from every other occurrence of the same event.
    pub identity: String,
}

impl EventWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, identity: impl Into<String>) -> Self {
        Self {
            start,
            end,
            identity: identity.into(),
        }
    }

    /// The timestamp a rule with the given base measures its offset from.
    pub fn anchor(&self, base: Anchor) -> DateTime<Utc> {
        match base {
            Anchor::Start => self.start,
            Anchor::End => self.end,
        }
    }
}

/// Source of the tracked event, usually a calendar feed.
pub trait EventFeed {
    /// Resolve the occurrence of `name` relevant at `now`.
    fn resolve_event(&self, name: &str, now: DateTime<Utc>) -> Result<EventWindow, FeedError>;
}
