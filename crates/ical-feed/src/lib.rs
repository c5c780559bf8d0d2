//! # ical-feed
//!
//! Resolves a named event from an iCalendar (RFC 5545) feed.
//!
//! The feed is fetched over HTTP(S) or read from disk, parsed, and recurring events
//! are expanded. [`IcalFeed`] implements the trigger engine's
//! [`EventFeed`](trigger_engine::EventFeed): it yields the earliest occurrence with the
//! configured summary that has not been over for longer than the lookback window.
//!
//! ## Modules
//!
//! - [`fetch`] — HTTP(S) download or local read
//! - [`parser`] — RFC 5545 `VEVENT` parsing
//! - [`expander`] — RRULE expansion with EXDATE and override handling
//! - [`feed`] — occurrence selection and the [`IcalFeed`] adapter
//! - [`error`] — Error types

pub mod error;
pub mod expander;
pub mod feed;
pub mod fetch;
pub mod parser;

pub use error::IcalError;
pub use expander::{expand_event, expand_rrule, Occurrence};
pub use feed::{select_occurrence, IcalFeed};
pub use parser::{parse_calendar, parse_duration, Calendar, CalendarEvent, IcalTime};
