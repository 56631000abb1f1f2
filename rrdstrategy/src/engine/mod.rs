//! Storage engine boundary.
//!
//! [`RrdEngine`] is the set of primitives the strategy layer consumes from a
//! round-robin storage engine. Arguments are passed in the flat argument-vector
//! form the engine's command-line tools accept, and every primitive reports
//! failures as an [`EngineError`] carrying the engine's diagnostic text.
//!
//! [`FileEngine`] is the bundled implementation.

mod container;
pub mod file;
mod xport;

pub use file::FileEngine;

use std::path::Path;

use crate::error::EngineError;
use crate::fetch::FetchResults;

/// Primitive operations of a round-robin storage engine.
///
/// Implementations must allow `create`, `update` and `fetch` to be called
/// concurrently from threads that have each called
/// [`attach_thread`](Self::attach_thread). `xport` is not required to be
/// reentrant; the binding serializes it.
pub trait RrdEngine: Send + Sync {
    /// Loads the engine. Called once per binding, before any other primitive,
    /// and again on reload.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be made available.
    fn load(&self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Registers the calling thread with the engine.
    ///
    /// Called once per thread and binding, before that thread's first
    /// primitive call through the binding.
    fn attach_thread(&self) {}

    /// Creates a container at `path` with the given step, last-update time
    /// and `DS:`/`RRA:` definitions.
    ///
    /// # Errors
    ///
    /// Returns an error if the definition is rejected or the file cannot be
    /// written.
    fn create(&self, path: &Path, step: u64, last_update: i64, argv: &[String])
    -> Result<(), EngineError>;

    /// Appends `timestamp:value[:value...]` rows to the container at `path`.
    ///
    /// `template` names the data sources the values map to, colon separated.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is missing or unreadable, or no
    /// usable row is supplied.
    fn update(&self, path: &Path, template: Option<&str>, argv: &[String])
    -> Result<(), EngineError>;

    /// Reads consolidated values from the container at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is missing or the window is invalid.
    fn fetch(
        &self,
        path: &Path,
        cf: &str,
        start: i64,
        end: i64,
        step: u64,
    ) -> Result<FetchResults, EngineError>;

    /// Evaluates an export argument vector (`xport --start ... DEF:... XPORT:...`).
    ///
    /// # Errors
    ///
    /// Returns an error if the arguments are invalid or a referenced
    /// container cannot be read.
    fn xport(&self, argv: &[String]) -> Result<FetchResults, EngineError>;
}
