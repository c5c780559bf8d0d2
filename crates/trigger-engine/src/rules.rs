//! Trigger rules -- "send this value to this group address N hours before/after the
//! event starts/ends".
//!
//! Rules arrive from configuration as [`RawRule`]s and are validated once into a
//! [`RuleSet`]. After loading, a rule set is never mutated.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use knx_bus::{DatapointType, DptValue, GroupAddress};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::event::EventWindow;

/// Largest accepted offset magnitude, about a century.
pub const MAX_OFFSET_DAYS: i64 = 36_525;

/// Which event timestamp a rule's offset is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Anchor {
    Start,
    End,
}

impl FromStr for Anchor {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "begin" | "start" => Ok(Self::Start),
            "end" => Ok(Self::End),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "begin",
            Self::End => "end",
        })
    }
}

/// An offset as written in configuration: bare hours, or a string with units.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RawOffset {
    Hours(i64),
    Text(String),
}

impl fmt::Display for RawOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hours(h) => write!(f, "{}", h),
            Self::Text(t) => f.write_str(t),
        }
    }
}

/// A trigger rule as it appears in configuration, before validation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawRule {
    pub name: String,
    pub offset: RawOffset,
    pub base: String,
    pub address: String,
    /// `dtp` is the spelling older gateway configs used.
    #[serde(alias = "dtp")]
    pub dpt: String,
    pub value: DptValue,
}

/// A validated trigger rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub name: String,
    /// Subtracted from the anchor: positive fires before it, negative after.
    pub offset: Duration,
    pub base: Anchor,
    pub address: GroupAddress,
    pub dpt: DatapointType,
    pub value: DptValue,
}

impl Rule {
    /// The instant this rule becomes due for `window`.
    pub fn trigger_at(&self, window: &EventWindow) -> DateTime<Utc> {
        window.anchor(self.base) - self.offset
    }

    fn from_raw(raw: RawRule) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidRule {
            rule: raw.name.clone(),
            reason,
        };

        if raw.name.trim().is_empty() {
            return Err(invalid("trigger name must not be empty".to_string()));
        }

        let base = raw.base.parse::<Anchor>().map_err(|_| ConfigError::InvalidBase {
            rule: raw.name.clone(),
            base: raw.base.clone(),
        })?;

        let offset = match &raw.offset {
            RawOffset::Hours(hours) => Duration::try_hours(*hours),
            RawOffset::Text(text) => parse_offset(text),
        }
        .ok_or_else(|| invalid(format!("invalid offset '{}'", raw.offset)))?;
        if offset.num_days().abs() > MAX_OFFSET_DAYS {
            return Err(invalid(format!(
                "offset '{}' exceeds {} days",
                raw.offset, MAX_OFFSET_DAYS
            )));
        }

        let address = raw
            .address
            .parse::<GroupAddress>()
            .map_err(|e| invalid(e.to_string()))?;
        let dpt = raw
            .dpt
            .parse::<DatapointType>()
            .map_err(|e| invalid(e.to_string()))?;
        dpt.encode(&raw.value).map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            name: raw.name,
            offset,
            base,
            address,
            dpt,
            value: raw.value,
        })
    }
}

/// The immutable, validated collection of rules, in configuration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Validate raw rules into a rule set.
    ///
    /// # Errors
    /// - `ConfigError::DuplicateRule` if two rules share a name.
    /// - `ConfigError::InvalidBase` if a base is not `begin`/`start`/`end`.
    /// - `ConfigError::InvalidRule` for a bad offset, address, DPT or value.
    pub fn load<I>(raw: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = RawRule>,
    {
        let mut seen = HashSet::new();
        let mut rules = Vec::new();
        for raw_rule in raw {
            if !seen.insert(raw_rule.name.clone()) {
                return Err(ConfigError::DuplicateRule(raw_rule.name));
            }
            rules.push(Rule::from_raw(raw_rule)?);
        }
        Ok(Self { rules })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.name == name)
    }
}

impl<'a> IntoIterator for &'a RuleSet {
    type Item = &'a Rule;
    type IntoIter = std::slice::Iter<'a, Rule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}

/// Parse an offset such as `"72"`, `"72h"`, `"-30m"`, `"1d12h"` or `"90s"`.
///
/// A bare number is hours. Components may repeat and are summed; a leading sign
/// applies to the whole offset.
pub fn parse_offset(text: &str) -> Option<Duration> {
    let text = text.trim();
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    if body.is_empty() {
        return None;
    }

    if body.chars().all(|c| c.is_ascii_digit()) {
        let hours: i64 = body.parse().ok()?;
        return Duration::try_hours(if negative { -hours } else { hours });
    }

    let mut seconds: i64 = 0;
    let mut digits = String::new();
    for c in body.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let unit: i64 = match c.to_ascii_lowercase() {
            'd' => 86_400,
            'h' => 3_600,
            'm' => 60,
            's' => 1,
            _ => return None,
        };
        if digits.is_empty() {
            return None;
        }
        let amount: i64 = digits.parse().ok()?;
        seconds = seconds.checked_add(amount.checked_mul(unit)?)?;
        digits.clear();
    }
    if !digits.is_empty() {
        return None;
    }

    Duration::try_seconds(if negative { -seconds } else { seconds })
}
