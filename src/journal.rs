//! Append-only journal of tool invocations
//!
//! Every subprocess run is recorded here, success or failure, with
//! credential-bearing arguments already masked. Front-ends render the
//! journal as a live log view, so entries are kept newest first.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// One recorded tool invocation
#[derive(Clone, Debug, Serialize)]
pub struct JournalEntry {
    /// Resolved executable path
    pub executable: String,

    /// Full argument list with sensitive values masked
    pub arguments: Vec<String>,

    /// Captured standard output
    pub stdout: String,

    /// Captured standard error
    pub stderr: String,

    /// Process exit code (-1 when terminated by signal)
    pub exit_code: i32,

    /// When the process was spawned
    pub timestamp: DateTime<Utc>,

    /// Wall-clock run time
    pub duration: Duration,
}

impl JournalEntry {
    /// Whether the invocation exited zero
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    /// The invocation as a shell-style one-liner (already redacted)
    pub fn command_line(&self) -> String {
        let mut parts = Vec::with_capacity(self.arguments.len() + 1);
        parts.push(self.executable.clone());
        parts.extend(self.arguments.iter().cloned());
        parts.join(" ")
    }
}

/// Newest-first log of every tool invocation
///
/// Cloneable handles share the same underlying log. Readers take snapshots;
/// the mutex is never held across an await point.
#[derive(Debug, Default)]
pub struct CommandJournal {
    entries: Mutex<Vec<JournalEntry>>,
}

impl CommandJournal {
    /// Creates an empty journal
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an invocation at the front of the log
    pub fn record(&self, entry: JournalEntry) {
        self.lock().insert(0, entry);
    }

    /// Snapshot of all entries, newest first
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.lock().clone()
    }

    /// The most recent entry, if any
    pub fn latest(&self) -> Option<JournalEntry> {
        self.lock().first().cloned()
    }

    /// Removes all entries
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of recorded invocations
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the journal is empty
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<JournalEntry>> {
        // A poisoned journal still holds valid entries; keep serving them.
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
