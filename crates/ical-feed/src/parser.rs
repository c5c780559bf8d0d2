//! RFC 5545 parsing, restricted to what event resolution needs.
//!
//! Only `VEVENT` components are kept. Other components (`VTIMEZONE`, `VTODO`, and
//! `VALARM` blocks nested inside events) are skipped whole. Time zones are taken from
//! `TZID` parameters as IANA names; embedded `VTIMEZONE` definitions are not read.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::warn;

use crate::error::{IcalError, Result};

/// A date or date-time value as written in the calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcalTime {
    /// `19970714T173000Z`
    Utc(DateTime<Utc>),
    /// Wall-clock time. `tz` is `None` for floating times and unknown `TZID`s.
    Local { time: NaiveDateTime, tz: Option<Tz> },
    /// `VALUE=DATE`, an all-day value.
    Date(NaiveDate),
}

impl IcalTime {
    pub fn is_date(&self) -> bool {
        matches!(self, Self::Date(_))
    }

    /// The zone this value's wall-clock time belongs to.
    pub fn zone(&self, default_tz: Tz) -> Tz {
        match self {
            Self::Utc(_) => Tz::UTC,
            Self::Local { tz, .. } => tz.unwrap_or(default_tz),
            Self::Date(_) => default_tz,
        }
    }

    /// Wall-clock time in [`IcalTime::zone`]. Dates map to midnight.
    pub fn naive_local(&self) -> NaiveDateTime {
        match self {
            Self::Utc(t) => t.naive_utc(),
            Self::Local { time, .. } => *time,
            Self::Date(d) => d.and_time(chrono::NaiveTime::MIN),
        }
    }

    /// The instant this value denotes. Floating and all-day values are read in `default_tz`.
    pub fn to_utc(&self, default_tz: Tz) -> DateTime<Utc> {
        match self {
            Self::Utc(t) => *t,
            _ => local_to_utc(self.naive_local(), self.zone(default_tz)),
        }
    }
}

/// Resolve a wall-clock time. Ambiguous times take the earlier instant; times in a
/// spring-forward gap move forward by an hour.
pub fn local_to_utc(time: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    tz.from_local_datetime(&time)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(time + Duration::hours(1))).earliest())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&time))
}

/// One `VEVENT`.
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarEvent {
    pub uid: Option<String>,
    pub summary: String,
    pub start: IcalTime,
    pub end: Option<IcalTime>,
    pub duration: Option<Duration>,
    pub rrule: Option<String>,
    pub exdates: Vec<IcalTime>,
    /// Set on an override of a single instance of a recurring event.
    pub recurrence_id: Option<IcalTime>,
    pub cancelled: bool,
}

impl CalendarEvent {
    /// Length of each occurrence: `DTEND - DTSTART`, else `DURATION`, else one day for
    /// all-day events, else zero.
    pub fn length(&self, default_tz: Tz) -> Duration {
        if let Some(end) = &self.end {
            return end.to_utc(default_tz) - self.start.to_utc(default_tz);
        }
        if let Some(duration) = self.duration {
            return duration;
        }
        if self.start.is_date() {
            Duration::days(1)
        } else {
            Duration::zero()
        }
    }

    /// `UID`, or the summary for feeds that omit it.
    pub fn uid_or_summary(&self) -> &str {
        self.uid.as_deref().unwrap_or(&self.summary)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Calendar {
    pub events: Vec<CalendarEvent>,
}

/// Parse iCalendar text.
///
/// # Errors
/// Returns `IcalError::Parse` with a 1-based line number when the text is not an
/// iCalendar document, a component is left open, or a `VEVENT` property is malformed.
pub fn parse_calendar(text: &str) -> Result<Calendar> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut events = Vec::new();
    let mut in_calendar = false;
    let mut seen_calendar = false;
    let mut current: Option<EventBuilder> = None;
    let mut nested: Vec<String> = Vec::new();

    for (line_no, line) in unfold(text) {
        if line.trim().is_empty() {
            continue;
        }
        if !in_calendar {
            if line.trim().eq_ignore_ascii_case("BEGIN:VCALENDAR") {
                in_calendar = true;
                seen_calendar = true;
                continue;
            }
            return Err(parse_error(line_no, "expected BEGIN:VCALENDAR"));
        }

        let content = ContentLine::parse(&line)
            .ok_or_else(|| parse_error(line_no, format!("expected NAME:VALUE, got '{}'", line)))?;

        match content.name.as_str() {
            "BEGIN" => {
                let component = content.value.trim().to_ascii_uppercase();
                if component == "VEVENT" && current.is_none() && nested.is_empty() {
                    current = Some(EventBuilder::default());
                } else {
                    nested.push(component);
                }
            }
            "END" => {
                let component = content.value.trim().to_ascii_uppercase();
                if let Some(open) = nested.pop() {
                    if open != component {
                        return Err(parse_error(
                            line_no,
                            format!("END:{} does not close BEGIN:{}", component, open),
                        ));
                    }
                } else if component == "VEVENT" {
                    let builder = current
                        .take()
                        .ok_or_else(|| parse_error(line_no, "END:VEVENT without BEGIN:VEVENT"))?;
                    events.push(builder.build(line_no)?);
                } else if component == "VCALENDAR" {
                    if current.is_some() {
                        return Err(parse_error(line_no, "END:VCALENDAR inside VEVENT"));
                    }
                    in_calendar = false;
                } else {
                    return Err(parse_error(line_no, format!("unexpected END:{}", component)));
                }
            }
            _ => {
                if nested.is_empty() {
                    if let Some(builder) = current.as_mut() {
                        builder
                            .apply(&content)
                            .map_err(|message| parse_error(line_no, message))?;
                    }
                }
            }
        }
    }

    if !seen_calendar {
        return Err(parse_error(0, "empty document"));
    }
    if in_calendar || current.is_some() {
        return Err(parse_error(0, "unexpected end of input inside VCALENDAR"));
    }
    Ok(Calendar { events })
}

fn parse_error(line: usize, message: impl Into<String>) -> IcalError {
    IcalError::Parse {
        line,
        message: message.into(),
    }
}

/// Join folded lines. Yields `(first physical line number, logical line)`.
fn unfold(text: &str) -> Vec<(usize, String)> {
    let mut lines: Vec<(usize, String)> = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        if let Some(continuation) = raw.strip_prefix([' ', '\t']) {
            if let Some((_, previous)) = lines.last_mut() {
                previous.push_str(continuation);
                continue;
            }
        }
        lines.push((index + 1, raw.to_string()));
    }
    lines
}

struct ContentLine<'a> {
    name: String,
    params: Vec<(String, String)>,
    value: &'a str,
}

impl<'a> ContentLine<'a> {
    fn parse(line: &'a str) -> Option<Self> {
        let mut quoted = false;
        let mut colon = None;
        let mut separators = Vec::new();
        for (i, c) in line.char_indices() {
            match c {
                '"' => quoted = !quoted,
                ';' if !quoted => separators.push(i),
                ':' if !quoted => {
                    colon = Some(i);
                    break;
                }
                _ => {}
            }
        }
        let colon = colon?;
        let head = &line[..colon];

        let mut bounds = vec![0];
        bounds.extend(separators.iter().map(|s| s + 1));
        let mut ends = separators;
        ends.push(colon);

        let mut parts = bounds.into_iter().zip(ends).map(|(from, to)| &head[from..to]);
        let name = parts.next()?.trim().to_ascii_uppercase();
        if name.is_empty() {
            return None;
        }
        let params = parts
            .filter_map(|part| {
                let (key, value) = part.split_once('=')?;
                Some((key.trim().to_ascii_uppercase(), value.trim().trim_matches('"').to_string()))
            })
            .collect();

        Some(Self {
            name,
            params,
            value: &line[colon + 1..],
        })
    }

    fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Default)]
struct EventBuilder {
    uid: Option<String>,
    summary: Option<String>,
    start: Option<IcalTime>,
    end: Option<IcalTime>,
    duration: Option<Duration>,
    rrule: Option<String>,
    exdates: Vec<IcalTime>,
    recurrence_id: Option<IcalTime>,
    cancelled: bool,
}

impl EventBuilder {
    fn apply(&mut self, line: &ContentLine<'_>) -> std::result::Result<(), String> {
        match line.name.as_str() {
            "UID" => self.uid = Some(unescape_text(line.value.trim())),
            "SUMMARY" => self.summary = Some(unescape_text(line.value)),
            "DTSTART" => self.start = Some(parse_time(line.value, line)?),
            "DTEND" => self.end = Some(parse_time(line.value, line)?),
            "DURATION" => {
                self.duration = Some(
                    parse_duration(line.value)
                        .ok_or_else(|| format!("invalid DURATION '{}'", line.value))?,
                )
            }
            "RRULE" => self.rrule = Some(line.value.trim().to_string()),
            "EXDATE" => {
                for value in line.value.split(',').filter(|v| !v.trim().is_empty()) {
                    self.exdates.push(parse_time(value, line)?);
                }
            }
            "RECURRENCE-ID" => self.recurrence_id = Some(parse_time(line.value, line)?),
            "STATUS" => self.cancelled = line.value.trim().eq_ignore_ascii_case("CANCELLED"),
            _ => {}
        }
        Ok(())
    }

    fn build(self, line_no: usize) -> Result<CalendarEvent> {
        let start = self
            .start
            .ok_or_else(|| parse_error(line_no, "VEVENT without DTSTART"))?;
        Ok(CalendarEvent {
            uid: self.uid,
            summary: self.summary.unwrap_or_default(),
            start,
            end: self.end,
            duration: self.duration,
            rrule: self.rrule,
            exdates: self.exdates,
            recurrence_id: self.recurrence_id,
            cancelled: self.cancelled,
        })
    }
}

fn parse_time(value: &str, line: &ContentLine<'_>) -> std::result::Result<IcalTime, String> {
    let value = value.trim();
    let invalid = || format!("invalid {} value '{}'", line.name, value);

    let is_date = line
        .param("VALUE")
        .map(|v| v.eq_ignore_ascii_case("DATE"))
        .unwrap_or(value.len() == 8);
    if is_date {
        return NaiveDate::parse_from_str(value, "%Y%m%d")
            .map(IcalTime::Date)
            .map_err(|_| invalid());
    }

    if let Some(utc) = value.strip_suffix('Z') {
        return NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S")
            .map(|t| IcalTime::Utc(t.and_utc()))
            .map_err(|_| invalid());
    }

    let time = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S").map_err(|_| invalid())?;
    let tz = line.param("TZID").and_then(resolve_tzid);
    Ok(IcalTime::Local { time, tz })
}

/// Look up a `TZID` as an IANA name. Vendor prefixes such as
/// `/freeassociation.sourceforge.net/Tzfile/Europe/Berlin` are stripped.
pub fn resolve_tzid(tzid: &str) -> Option<Tz> {
    let tzid = tzid.trim();
    let found = std::iter::once(tzid)
        .chain(tzid.match_indices('/').map(|(i, _)| &tzid[i + 1..]))
        .find_map(|candidate| candidate.parse::<Tz>().ok());
    if found.is_none() {
        warn!(tzid, "unknown TZID, treating time as floating");
    }
    found
}

/// Parse an RFC 5545 `DURATION` such as `PT1H30M`, `P1D`, `P2W` or `-PT15M`.
pub fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let body = body.strip_prefix(['P', 'p'])?;

    let mut seconds: i64 = 0;
    let mut digits = String::new();
    let mut in_time = false;
    let mut any = false;
    for c in body.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let c = c.to_ascii_uppercase();
        if c == 'T' {
            if in_time || !digits.is_empty() {
                return None;
            }
            in_time = true;
            continue;
        }
        let unit: i64 = match (c, in_time) {
            ('W', false) => 604_800,
            ('D', false) => 86_400,
            ('H', true) => 3_600,
            ('M', true) => 60,
            ('S', true) => 1,
            _ => return None,
        };
        let amount: i64 = digits.parse().ok()?;
        seconds = seconds.checked_add(amount.checked_mul(unit)?)?;
        digits.clear();
        any = true;
    }
    if !digits.is_empty() || !any {
        return None;
    }

    Duration::try_seconds(if negative { -seconds } else { seconds })
}

/// Undo RFC 5545 TEXT escaping.
pub fn unescape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(escaped @ (',' | ';' | '\\')) => out.push(escaped),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
