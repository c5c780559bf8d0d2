//! Notification ledger -- which rules already fired for the tracked occurrence.
//!
//! The ledger is scoped to a single event occurrence. When the feed starts returning
//! a different occurrence (the next instance of a recurring event), [`LedgerState::reconcile`]
//! discards every record of the previous one, so all rules become eligible again
//! without manual cleanup.
//!
//! State transitions are pure; [`LedgerStore`] implementations decide where the state
//! lives. [`FileLedgerStore`] replaces its file atomically (temp file, fsync, rename),
//! so a crash mid-write leaves either the old or the new ledger, never a torn one.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::LedgerError;

/// On-disk format version written by [`FileLedgerStore`].
pub const LEDGER_FORMAT_VERSION: u32 = 1;

/// Fired-rule records for one event occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LedgerState {
    /// `None` until the ledger is first stamped with an occurrence.
    pub event_identity: Option<String>,
    /// Rule name → instant its delivery was committed.
    #[serde(default)]
    pub fired: BTreeMap<String, DateTime<Utc>>,
}

impl LedgerState {
    /// An empty ledger not yet tied to any occurrence.
    pub fn empty() -> Self {
        Self::default()
    }

    /// An empty ledger stamped with `identity`.
    pub fn for_identity(identity: impl Into<String>) -> Self {
        Self {
            event_identity: Some(identity.into()),
            fired: BTreeMap::new(),
        }
    }

    /// Reset the ledger if it belongs to a different occurrence than `identity`.
    pub fn reconcile(self, identity: &str) -> Self {
        if self.event_identity.as_deref() == Some(identity) {
            self
        } else {
            if self.event_identity.is_some() {
                debug!(
                    previous = ?self.event_identity,
                    current = identity,
                    discarded = self.fired.len(),
                    "event occurrence changed, resetting ledger"
                );
            }
            Self::for_identity(identity)
        }
    }

    /// Record `rule` as fired at `at`.
    pub fn mark_fired(mut self, rule: &str, at: DateTime<Utc>) -> Self {
        self.fired.insert(rule.to_string(), at);
        self
    }

    pub fn has_fired(&self, rule: &str) -> bool {
        self.fired.contains_key(rule)
    }

    pub fn fired_rules(&self) -> impl Iterator<Item = &str> {
        self.fired.keys().map(String::as_str)
    }
}

/// Durable slot holding a single [`LedgerState`].
pub trait LedgerStore {
    /// Read the stored state, or an empty ledger if nothing was stored yet.
    fn load(&self) -> Result<LedgerState, LedgerError>;

    /// Atomically replace the stored state.
    fn persist(&mut self, state: &LedgerState) -> Result<(), LedgerError>;
}

impl<S: LedgerStore + ?Sized> LedgerStore for &mut S {
    fn load(&self) -> Result<LedgerState, LedgerError> {
        (**self).load()
    }

    fn persist(&mut self, state: &LedgerState) -> Result<(), LedgerError> {
        (**self).persist(state)
    }
}

/// Keeps the ledger in memory. Nothing survives the process.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedgerStore {
    state: LedgerState,
    writes: usize,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: LedgerState) -> Self {
        Self { state, writes: 0 }
    }

    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    /// Number of successful [`LedgerStore::persist`] calls.
    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn load(&self) -> Result<LedgerState, LedgerError> {
        Ok(self.state.clone())
    }

    fn persist(&mut self, state: &LedgerState) -> Result<(), LedgerError> {
        self.state = state.clone();
        self.writes += 1;
        Ok(())
    }
}

#[derive(Serialize)]
struct LedgerFileRef<'a> {
    version: u32,
    #[serde(flatten)]
    state: &'a LedgerState,
}

#[derive(Deserialize)]
struct LedgerFile {
    version: u32,
    #[serde(flatten)]
    state: LedgerState,
}

/// Stores the ledger as a JSON file.
#[derive(Debug, Clone)]
pub struct FileLedgerStore {
    path: PathBuf,
}

impl FileLedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sibling temp file in the same directory, so the rename never crosses filesystems.
    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "ledger".to_string());
        self.path.with_file_name(format!(".{}.tmp", name))
    }

    fn corrupt(&self, reason: impl ToString) -> LedgerError {
        LedgerError::Corrupt {
            path: self.path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    fn write_failed(&self, source: std::io::Error) -> LedgerError {
        LedgerError::WriteFailed {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl LedgerStore for FileLedgerStore {
    fn load(&self) -> Result<LedgerState, LedgerError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(LedgerState::empty()),
            Err(e) => return Err(self.corrupt(e)),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(LedgerState::empty());
        }

        let file: LedgerFile = serde_json::from_slice(&bytes).map_err(|e| self.corrupt(e))?;
        if file.version != LEDGER_FORMAT_VERSION {
            return Err(self.corrupt(format!(
                "unsupported format version {} (expected {})",
                file.version, LEDGER_FORMAT_VERSION
            )));
        }
        Ok(file.state)
    }

    fn persist(&mut self, state: &LedgerState) -> Result<(), LedgerError> {
        let body = serde_json::to_vec_pretty(&LedgerFileRef {
            version: LEDGER_FORMAT_VERSION,
            state,
        })
        .map_err(|e| self.write_failed(e.into()))?;

        let temp = self.temp_path();
        let written = File::create(&temp)
            .and_then(|mut file| {
                file.write_all(&body)?;
                file.sync_all()
            })
            .and_then(|()| fs::rename(&temp, &self.path));

        if let Err(e) = written {
            let _ = fs::remove_file(&temp);
            return Err(self.write_failed(e));
        }
        debug!(path = %self.path.display(), fired = state.fired.len(), "ledger persisted");
        Ok(())
    }
}
