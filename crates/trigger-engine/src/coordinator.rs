//! One tick of the gateway: resolve the event, evaluate, deliver, record.
//!
//! Each successful delivery is written to the ledger before the next rule is tried.
//! A crash or shutdown between deliveries therefore never re-sends a confirmed value
//! and never forgets an unattempted one.

use std::thread;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::bus::GroupBus;
use crate::error::{BusError, LedgerError, TickError};
use crate::evaluator::{evaluate, Evaluation};
use crate::event::EventFeed;
use crate::ledger::{LedgerState, LedgerStore};
use crate::rules::RuleSet;

/// Behaviour switches for a [`Coordinator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorOptions {
    /// When false, values are logged instead of sent and still count as delivered.
    pub bus_enabled: bool,
    /// When false, the ledger store is never touched and every tick starts empty.
    pub state_enabled: bool,
    /// Attempts per ledger write before the tick is aborted.
    pub write_attempts: u32,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            bus_enabled: true,
            state_enabled: true,
            write_attempts: 3,
        }
    }
}

/// A rule whose value could not be delivered this tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub rule: String,
    pub error: BusError,
}

/// Outcome of a completed tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Identity of the occurrence evaluated; `None` if the tick stopped before resolving it.
    pub event_identity: Option<String>,
    /// Rules delivered to the bus, in delivery order.
    pub fired: Vec<String>,
    /// Rules that were due while the bus was disabled.
    pub skipped: Vec<String>,
    pub failures: Vec<DeliveryFailure>,
}

impl TickReport {
    pub fn fired_count(&self) -> usize {
        self.fired.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failures.len()
    }

    /// True when nothing failed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Drives ticks for one named event.
pub struct Coordinator<F, B, S> {
    event_name: String,
    rules: RuleSet,
    feed: F,
    bus: B,
    store: S,
    options: CoordinatorOptions,
}

impl<F, B, S> Coordinator<F, B, S>
where
    F: EventFeed,
    B: GroupBus,
    S: LedgerStore,
{
    pub fn new(event_name: impl Into<String>, rules: RuleSet, feed: F, bus: B, store: S) -> Self {
        Self {
            event_name: event_name.into(),
            rules,
            feed,
            bus,
            store,
            options: CoordinatorOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CoordinatorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn options(&self) -> &CoordinatorOptions {
        &self.options
    }

    /// Run one tick at the current time.
    pub fn run_tick(&mut self) -> Result<TickReport, TickError> {
        self.run_tick_at(Utc::now())
    }

    /// Run one tick as if the current time were `now`.
    ///
    /// # Errors
    /// - `TickError::Feed` if the event could not be resolved; the ledger is untouched.
    /// - `TickError::LedgerWrite` if a delivered value could not be recorded.
    ///
    /// Per-rule bus failures do not fail the tick; they are listed in the report.
    pub fn run_tick_at(&mut self, now: DateTime<Utc>) -> Result<TickReport, TickError> {
        let window = self.feed.resolve_event(&self.event_name, now)?;
        debug!(
            event = %self.event_name,
            identity = %window.identity,
            start = %window.start,
            end = %window.end,
            "resolved event"
        );

        let ledger = self.load_ledger();
        let Evaluation { due, mut ledger } = evaluate(now, &window, &self.rules, ledger);

        let mut report = TickReport {
            event_identity: Some(window.identity.clone()),
            ..TickReport::default()
        };
        if due.is_empty() {
            debug!(event = %self.event_name, "no trigger due");
            return Ok(report);
        }

        for due_rule in due {
            let rule = due_rule.rule;

            if self.options.bus_enabled {
                info!(
                    rule = %rule.name,
                    address = %rule.address,
                    dpt = %rule.dpt,
                    value = %rule.value,
                    due_since = %due_rule.trigger_at,
                    "notifying"
                );
                if let Err(e) = self.bus.send(rule.address, rule.dpt, &rule.value) {
                    warn!(rule = %rule.name, error = %e, "delivery failed");
                    report.failures.push(DeliveryFailure {
                        rule: rule.name.clone(),
                        error: e,
                    });
                    continue;
                }
                report.fired.push(rule.name.clone());
            } else {
                warn!(
                    rule = %rule.name,
                    address = %rule.address,
                    value = %rule.value,
                    "bus access disabled, not sending"
                );
                report.skipped.push(rule.name.clone());
            }

            ledger = ledger.mark_fired(&rule.name, now);
            if !self.options.state_enabled {
                continue;
            }
            let attempts = self.options.write_attempts;
            if let Err(source) = persist_with_retry(&mut self.store, &ledger, attempts) {
                error!(
                    rule = %rule.name,
                    error = %source,
                    "could not record firing, aborting tick"
                );
                return Err(TickError::LedgerWrite {
                    rule: rule.name.clone(),
                    attempts: attempts.max(1),
                    source,
                    report,
                });
            }
        }

        Ok(report)
    }

    fn load_ledger(&self) -> LedgerState {
        if !self.options.state_enabled {
            warn!("state disabled, not loading ledger");
            return LedgerState::empty();
        }
        match self.store.load() {
            Ok(state) => state,
            Err(e) => {
                error!(
                    error = %e,
                    "ledger unreadable, starting empty; already-sent values may repeat"
                );
                LedgerState::empty()
            }
        }
    }
}

fn persist_with_retry<S: LedgerStore>(
    store: &mut S,
    state: &LedgerState,
    attempts: u32,
) -> Result<(), LedgerError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match store.persist(state) {
            Ok(()) => return Ok(()),
            Err(e) if attempt < attempts => {
                warn!(attempt, error = %e, "ledger write failed, retrying");
                thread::sleep(StdDuration::from_millis(50 * u64::from(attempt)));
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
