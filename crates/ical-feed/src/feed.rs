//! [`EventFeed`] backed by an iCalendar URL or file.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};
use trigger_engine::{EventFeed, EventWindow, FeedError};

use crate::error::Result;
use crate::expander::{expand_event, Occurrence};
use crate::fetch::fetch;
use crate::parser::{parse_calendar, Calendar, CalendarEvent};

pub const DEFAULT_LOOKBACK_HOURS: i64 = 48;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Resolves a named event from an iCalendar feed, fetching it on every call.
#[derive(Debug, Clone)]
pub struct IcalFeed {
    source: String,
    timezone: Tz,
    lookback: Duration,
    timeout: StdDuration,
}

impl IcalFeed {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            timezone: Tz::UTC,
            lookback: Duration::hours(DEFAULT_LOOKBACK_HOURS),
            timeout: StdDuration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
        }
    }

    /// Zone for floating and all-day times.
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    /// How long after its end an occurrence is still considered current.
    pub fn with_lookback(mut self, lookback: Duration) -> Self {
        self.lookback = lookback;
        self
    }

    pub fn with_timeout(mut self, timeout: StdDuration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Fetch and parse the calendar.
    pub fn load(&self) -> Result<Calendar> {
        let text = fetch(&self.source, self.timeout)?;
        parse_calendar(&text)
    }
}

impl EventFeed for IcalFeed {
    fn resolve_event(
        &self,
        name: &str,
        now: DateTime<Utc>,
    ) -> std::result::Result<EventWindow, FeedError> {
        let calendar = self.load()?;
        debug!(source = %self.source, events = calendar.events.len(), "calendar loaded");

        let occurrence = select_occurrence(&calendar, name, now, self.lookback, self.timezone)?
            .ok_or_else(|| FeedError::NotFound(name.to_string()))?;
        let identity = occurrence.identity();
        Ok(EventWindow::new(occurrence.start, occurrence.end, identity))
    }
}

/// The earliest occurrence named `name` that ended no more than `lookback` before `now`.
///
/// Series are grouped by UID so that overrides renaming or moving a single instance
/// are honoured; only series with at least one component named `name` are expanded.
///
/// # Errors
/// Returns `IcalError::InvalidRule` if a matching series has an unusable RRULE.
pub fn select_occurrence(
    calendar: &Calendar,
    name: &str,
    now: DateTime<Utc>,
    lookback: Duration,
    default_tz: Tz,
) -> Result<Option<Occurrence>> {
    let name = name.trim();
    let not_before = now - lookback;

    let mut uids: Vec<&str> = calendar
        .events
        .iter()
        .filter(|e| e.summary.trim() == name)
        .map(CalendarEvent::uid_or_summary)
        .collect();
    uids.sort_unstable();
    uids.dedup();

    let mut best: Option<Occurrence> = None;
    for uid in uids {
        let (overrides, masters): (Vec<&CalendarEvent>, Vec<&CalendarEvent>) = calendar
            .events
            .iter()
            .filter(|e| e.uid_or_summary() == uid)
            .partition(|e| e.recurrence_id.is_some());

        if masters.len() > 1 {
            // Feeds without UIDs put unrelated single events under the same summary.
            for master in &masters {
                let occurrences = expand_event(Some(*master), &[], default_tz, not_before)?;
                consider(&mut best, occurrences, name);
            }
            if !overrides.is_empty() {
                warn!(uid, "overrides for an ambiguous series are ignored");
            }
            continue;
        }

        let occurrences =
            expand_event(masters.first().copied(), &overrides, default_tz, not_before)?;
        consider(&mut best, occurrences, name);
    }

    if let Some(found) = &best {
        debug!(
            identity = %found.identity(),
            start = %found.start,
            end = %found.end,
            "selected occurrence"
        );
    }
    Ok(best)
}

fn consider(best: &mut Option<Occurrence>, occurrences: Vec<Occurrence>, name: &str) {
    let Some(candidate) = occurrences.into_iter().find(|o| o.summary.trim() == name) else {
        return;
    };
    if best.as_ref().map_or(true, |b| candidate.start < b.start) {
        *best = Some(candidate);
    }
}
