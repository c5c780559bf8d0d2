//! RRULE expansion -- turns calendar events into concrete occurrences.
//!
//! Recurrence rules are expanded with the `rrule` crate. The DTSTART is rendered in
//! its own zone (`DTSTART;TZID=...`) so instances keep their wall-clock time across
//! DST changes. EXDATEs, `RECURRENCE-ID` overrides and cancellations are applied
//! after expansion.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use rrule::RRuleSet;

use crate::error::{IcalError, Result};
use crate::parser::{local_to_utc, CalendarEvent, IcalTime};

/// Upper bound on instances produced per recurring event, counted from the lower bound.
pub const EXPANSION_LIMIT: u16 = 500;

/// One concrete occurrence of an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub uid: String,
    pub summary: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Occurrence {
    /// Key distinguishing this occurrence from all others: `UID/start`.
    pub fn identity(&self) -> String {
        format!("{}/{}", self.uid, self.start.to_rfc3339())
    }
}

/// Expand one recurring series into occurrence start times, skipping those that
/// ended before `not_before`.
///
/// # Errors
/// Returns `IcalError::InvalidRule` if the RRULE is empty or unparseable.
pub fn expand_rrule(
    rrule: &str,
    dtstart: &IcalTime,
    length: Duration,
    default_tz: Tz,
    not_before: DateTime<Utc>,
) -> Result<Vec<DateTime<Utc>>> {
    if rrule.trim().is_empty() {
        return Err(IcalError::InvalidRule("empty RRULE string".to_string()));
    }

    let tz = dtstart.zone(default_tz);
    let rule = normalize_until(rrule, tz)?;
    let rrule_text = format!(
        "DTSTART;TZID={}:{}\nRRULE:{}",
        tz.name(),
        dtstart.naive_local().format("%Y%m%dT%H%M%S"),
        rule
    );

    let rrule_set: RRuleSet = rrule_text
        .parse()
        .map_err(|e| IcalError::InvalidRule(format!("{}: {}", rrule, e)))?;

    // `after` is exclusive; back off by one second so an instance ending exactly at the
    // bound survives.
    let lower = (not_before - length - Duration::seconds(1)).with_timezone(&rrule::Tz::UTC);
    let instances = rrule_set.after(lower).all(EXPANSION_LIMIT);

    Ok(instances
        .dates
        .into_iter()
        .map(|dt| dt.with_timezone(&Utc))
        .collect())
}

/// The rrule crate needs UNTIL in the same zone as DTSTART: UTC with a `Z` for UTC
/// series, bare wall-clock time for everything else. Date-only UNTILs cover the whole day.
fn normalize_until(rrule: &str, tz: Tz) -> Result<String> {
    let parts = rrule
        .split(';')
        .filter(|part| !part.trim().is_empty())
        .map(|part| {
            let Some((key, value)) = part.split_once('=') else {
                return Ok(part.to_string());
            };
            if !key.trim().eq_ignore_ascii_case("UNTIL") {
                return Ok(part.to_string());
            }
            let local = until_local(value.trim(), tz)
                .ok_or_else(|| IcalError::InvalidRule(format!("invalid UNTIL '{}'", value)))?;
            let mut until = local.format("%Y%m%dT%H%M%S").to_string();
            if tz == Tz::UTC {
                until.push('Z');
            }
            Ok(format!("UNTIL={}", until))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.join(";"))
}

fn until_local(value: &str, tz: Tz) -> Option<NaiveDateTime> {
    if value.len() == 8 {
        return NaiveDate::parse_from_str(value, "%Y%m%d").ok()?.and_hms_opt(23, 59, 59);
    }
    if let Some(utc) = value.strip_suffix('Z') {
        let instant = NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S").ok()?.and_utc();
        return Some(instant.with_timezone(&tz).naive_local());
    }
    NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S").ok()
}

/// Expand a series master together with its overrides into occurrences that end at
/// or after `not_before`, sorted by start.
///
/// - Instances matching an EXDATE are removed. All-day EXDATEs remove every instance
///   starting on that local date.
/// - Instances matching an override's `RECURRENCE-ID` are replaced by the override,
///   or dropped when the override is cancelled.
/// - A cancelled master yields nothing.
///
/// # Errors
/// Returns `IcalError::InvalidRule` if the master's RRULE cannot be expanded.
pub fn expand_event(
    master: Option<&CalendarEvent>,
    overrides: &[&CalendarEvent],
    default_tz: Tz,
    not_before: DateTime<Utc>,
) -> Result<Vec<Occurrence>> {
    let mut occurrences = Vec::new();

    let replaced: Vec<DateTime<Utc>> = overrides
        .iter()
        .filter_map(|o| o.recurrence_id.as_ref())
        .map(|id| id.to_utc(default_tz))
        .collect();

    if let Some(master) = master.filter(|m| !m.cancelled) {
        let length = master.length(default_tz);
        let starts = match &master.rrule {
            Some(rule) => expand_rrule(rule, &master.start, length, default_tz, not_before)?,
            None => vec![master.start.to_utc(default_tz)],
        };

        for start in starts {
            if replaced.contains(&start) || is_excluded(master, start, default_tz) {
                continue;
            }
            occurrences.push(Occurrence {
                uid: master.uid_or_summary().to_string(),
                summary: master.summary.clone(),
                start,
                end: start + length,
            });
        }
    }

    for o in overrides.iter().filter(|o| !o.cancelled) {
        let start = o.start.to_utc(default_tz);
        occurrences.push(Occurrence {
            uid: o.uid_or_summary().to_string(),
            summary: o.summary.clone(),
            start,
            end: start + o.length(default_tz),
        });
    }

    occurrences.retain(|o| o.end >= not_before);
    occurrences.sort_by_key(|o| o.start);
    Ok(occurrences)
}

fn is_excluded(master: &CalendarEvent, start: DateTime<Utc>, default_tz: Tz) -> bool {
    master.exdates.iter().any(|exdate| match exdate {
        IcalTime::Date(date) => {
            let tz = master.start.zone(default_tz);
            start.with_timezone(&tz).date_naive() == *date
        }
        IcalTime::Local { time, tz } => {
            local_to_utc(*time, tz.unwrap_or(master.start.zone(default_tz))) == start
        }
        IcalTime::Utc(t) => *t == start,
    })
}
