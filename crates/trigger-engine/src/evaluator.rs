//! Decide which rules are due.
//!
//! Evaluation is a pure function of `(now, window, rules, ledger)`: calling it twice
//! with the same inputs yields the same answer, and it never marks anything as fired.
//! Marking happens per rule when the coordinator commits a successful delivery.

use chrono::{DateTime, Utc};

use crate::event::EventWindow;
use crate::ledger::LedgerState;
use crate::rules::{Rule, RuleSet};

/// A rule that must fire now, with the instant it became due.
#[derive(Debug, Clone, PartialEq)]
pub struct DueRule<'a> {
    pub rule: &'a Rule,
    pub trigger_at: DateTime<Utc>,
}

/// Result of [`evaluate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation<'a> {
    /// Due rules, earliest trigger first.
    pub due: Vec<DueRule<'a>>,
    /// The input ledger, reconciled with the window's identity.
    pub ledger: LedgerState,
}

impl Evaluation<'_> {
    pub fn due_names(&self) -> Vec<&str> {
        self.due.iter().map(|d| d.rule.name.as_str()).collect()
    }
}

/// Evaluate `rules` against `window` at `now`.
///
/// A rule is due when `anchor - offset <= now` and the (reconciled) ledger has no
/// record of it. Every due rule is returned, not just the latest: after downtime the
/// whole countdown is replayed in order. Rules due at the same instant keep their
/// rule-set order.
pub fn evaluate<'a>(
    now: DateTime<Utc>,
    window: &EventWindow,
    rules: &'a RuleSet,
    ledger: LedgerState,
) -> Evaluation<'a> {
    let ledger = ledger.reconcile(&window.identity);

    let mut due: Vec<DueRule<'a>> = rules
        .iter()
        .map(|rule| DueRule {
            rule,
            trigger_at: rule.trigger_at(window),
        })
        .filter(|d| d.trigger_at <= now && !ledger.has_fired(&d.rule.name))
        .collect();

    // Stable sort: ties stay in configuration order.
    due.sort_by_key(|d| d.trigger_at);

    Evaluation { due, ledger }
}
