//! Deferred creation and update commands.
//!
//! Writes to a container are batched: an [`UpdateCommand`] is opened for a
//! target, rows are appended to it without touching the engine, and the whole
//! batch is handed to the engine in one call when the command is executed.
//! Executing consumes the command, so a flushed batch cannot be reused.
//!
//! ```text
//! open ──► append* ──► execute (one engine update)
//! ```
//!
//! A [`CreateCommand`] is the immutable description of a container to create,
//! executed once.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::binding::Rrd;
use crate::engine::RrdEngine;
use crate::error::StorageError;

/// Description of a container to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateCommand {
    path: PathBuf,
    step: u64,
    start: i64,
    argv: Vec<String>,
}

impl CreateCommand {
    /// Creates a command for `path` with the given step, initial last-update
    /// time and `DS:`/`RRA:` arguments.
    pub fn new(path: impl Into<PathBuf>, step: u64, start: i64, argv: Vec<String>) -> Self {
        Self {
            path: path.into(),
            step,
            start,
            argv,
        }
    }

    /// Path of the container to create.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Step in seconds.
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Initial last-update timestamp.
    pub fn start(&self) -> i64 {
        self.start
    }

    /// Definition arguments, data sources first.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Creates the container through the binding.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the engine rejects the definition.
    pub fn execute<E: RrdEngine>(self, rrd: &Rrd<E>) -> Result<(), StorageError> {
        rrd.create(&self.path, self.step, self.start, &self.argv)
    }
}

impl fmt::Display for CreateCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Filename: {}, Argv: {:?}", self.path.display(), self.argv)
    }
}

/// Append-only batch of update rows for one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCommand {
    path: PathBuf,
    rows: Vec<String>,
}

impl UpdateCommand {
    /// Opens an empty batch for `path`. Does not touch the engine.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            rows: Vec::new(),
        }
    }

    /// Path of the target container.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows accumulated so far, in append order.
    pub fn rows(&self) -> &[String] {
        &self.rows
    }

    /// Appends one `timestamp:value[:value...]` row. The row is not validated.
    pub fn append(&mut self, row: impl Into<String>) {
        self.rows.push(row.into());
    }

    /// Hands every accumulated row to the engine in a single update call.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if no rows were appended, the target is
    /// missing, or the engine rejects a row. The command is consumed either
    /// way.
    pub fn execute<E: RrdEngine>(self, rrd: &Rrd<E>) -> Result<(), StorageError> {
        rrd.update(&self.path, None, &self.rows)
    }
}

impl fmt::Display for UpdateCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Filename: {} Arguments: {:?}", self.path.display(), self.rows)
    }
}
