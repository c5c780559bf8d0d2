//! # trigger-engine
//!
//! Exactly-once offset triggers for a calendar event.
//!
//! Given the current time, one resolved event occurrence, a set of offset rules and
//! a persisted ledger of what already fired, the engine decides which rules fire now,
//! in which order, and records each delivery so a re-run never repeats it. A new
//! occurrence of a recurring event resets the ledger automatically.
//!
//! ## Modules
//!
//! - [`rules`] — trigger rules and their validation into a [`RuleSet`]
//! - [`ledger`] — notification ledger state and its atomic file store
//! - [`evaluator`] — pure due-rule evaluation
//! - [`coordinator`] — one tick: resolve, evaluate, deliver, record
//! - [`event`] — the resolved event window and the [`EventFeed`] trait
//! - [`bus`] — the [`GroupBus`] delivery trait
//! - [`error`] — Error types

pub mod bus;
pub mod coordinator;
pub mod error;
pub mod evaluator;
pub mod event;
pub mod ledger;
pub mod rules;

pub use bus::GroupBus;
pub use coordinator::{Coordinator, CoordinatorOptions, DeliveryFailure, TickReport};
pub use error::{BusError, ConfigError, FeedError, LedgerError, TickError};
pub use evaluator::{evaluate, DueRule, Evaluation};
pub use event::{EventFeed, EventWindow};
pub use ledger::{FileLedgerStore, LedgerState, LedgerStore, MemoryLedgerStore};
pub use rules::{parse_offset, Anchor, RawOffset, RawRule, Rule, RuleSet, MAX_OFFSET_DAYS};
