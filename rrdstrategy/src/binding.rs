//! Storage binding over an [`RrdEngine`].
//!
//! [`Rrd`] is the synchronous facade the rest of the crate uses to reach the
//! engine. It validates arguments, wraps engine failures into
//! [`StorageError`], and enforces the engine's threading contract:
//!
//! - Each [`Rrd`] loads its engine once through its own [`Loader`].
//! - Every thread registers with each engine once, before its first call.
//!   Registrations are thread-local, keyed by binding id, and never torn down.
//! - Export calls are serialized process-wide; create, update and fetch may
//!   run concurrently.
//!
//! # Example
//!
//! ```rust,no_run
//! use rrdstrategy::binding::Rrd;
//! use rrdstrategy::engine::FileEngine;
//! use rrdstrategy::ConsolidationFn;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let rrd = Rrd::new(FileEngine::new())?;
//! rrd.create("/tmp/load.rrd", 300, 1_424_700_000, &[
//!     "DS:load:GAUGE:600:0:U".to_string(),
//!     "RRA:AVERAGE:0.5:1:288".to_string(),
//! ])?;
//! rrd.update("/tmp/load.rrd", None, &["1424700300:0.42".to_string()])?;
//! let results = rrd.fetch("/tmp/load.rrd", ConsolidationFn::Average, 1_424_700_000, 1_424_700_300, 1)?;
//! println!("{:?}", results.column("load"));
//! # Ok(())
//! # }
//! ```

use std::cell::RefCell;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::{Mutex, const_mutex};

use crate::definition::ConsolidationFn;
use crate::engine::RrdEngine;
use crate::error::{EngineError, StorageError};
use crate::fetch::FetchResults;

/// Source of [`Rrd`] ids; ids are never reused.
static NEXT_BINDING_ID: AtomicUsize = AtomicUsize::new(0);

/// Serializes export calls across the process.
static EXPORT_LOCK: Mutex<()> = const_mutex(());

thread_local! {
    /// Ids of the bindings whose engine this thread has registered with.
    static THREAD_ATTACHED: RefCell<HashSet<usize>> = RefCell::new(HashSet::new());
}

/// One-time engine load state.
///
/// [`init`](Self::init) loads at most once; [`reload`](Self::reload) clears the
/// flag and loads again. The flag is read without locking on the fast path and
/// only set while holding the lock.
#[derive(Debug)]
pub struct Loader {
    loaded: AtomicBool,
    lock: Mutex<()>,
}

impl Loader {
    /// Creates a loader in the "not loaded" state.
    pub const fn new() -> Self {
        Self {
            loaded: AtomicBool::new(false),
            lock: const_mutex(()),
        }
    }

    /// Loads the engine unless this loader already did.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Load`] if the engine fails to load; the loader
    /// stays unloaded so a later call retries.
    pub fn init<E: RrdEngine + ?Sized>(&self, engine: &E) -> Result<(), StorageError> {
        if self.loaded.load(Ordering::Acquire) {
            return Ok(());
        }

        let _guard = self.lock.lock();
        if self.loaded.load(Ordering::Acquire) {
            return Ok(());
        }
        Self::load(engine)?;
        self.loaded.store(true, Ordering::Release);
        Ok(())
    }

    /// Forgets any previous load and loads the engine again.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Load`] if the engine fails to load.
    pub fn reload<E: RrdEngine + ?Sized>(&self, engine: &E) -> Result<(), StorageError> {
        let _guard = self.lock.lock();
        self.loaded.store(false, Ordering::Release);
        Self::load(engine)?;
        self.loaded.store(true, Ordering::Release);
        Ok(())
    }

    /// Whether a load has completed.
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    fn load<E: RrdEngine + ?Sized>(engine: &E) -> Result<(), StorageError> {
        engine.load().map_err(|e| StorageError::Load { message: e.message })?;
        tracing::info!("storage engine loaded");
        Ok(())
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

/// Synchronous facade over the four engine primitives.
#[derive(Debug)]
pub struct Rrd<E> {
    engine: E,
    loader: Loader,
    id: usize,
}

impl<E: RrdEngine> Rrd<E> {
    /// Wraps an engine and loads it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Load`] if the engine fails to load.
    pub fn new(engine: E) -> Result<Self, StorageError> {
        let loader = Loader::new();
        loader.init(&engine)?;
        Ok(Self {
            engine,
            loader,
            id: NEXT_BINDING_ID.fetch_add(1, Ordering::Relaxed),
        })
    }

    /// Loads the engine again.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Load`] if the engine fails to load; the
    /// binding then reports [`is_loaded`](Self::is_loaded) as `false`.
    pub fn reload(&self) -> Result<(), StorageError> {
        self.loader.reload(&self.engine)
    }

    /// Whether the engine's last load succeeded.
    pub fn is_loaded(&self) -> bool {
        self.loader.is_loaded()
    }

    /// Returns the wrapped engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Creates a container.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if `target` or `argv` is empty, or the engine
    /// rejects the definition.
    pub fn create(
        &self,
        target: impl AsRef<Path>,
        step: u64,
        initial_timestamp: i64,
        argv: &[String],
    ) -> Result<(), StorageError> {
        const OP: &str = "create";
        let target = target.as_ref();
        require_target(OP, target)?;
        if argv.is_empty() {
            return Err(invalid(OP, "argv cannot be empty"));
        }

        self.attach();
        self.engine
            .create(target, step, initial_timestamp, argv)
            .map_err(|e| engine_error(OP, target, e))
    }

    /// Appends rows to a container.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if `target` is empty, missing or unreadable,
    /// or `argv` holds no rows.
    pub fn update(
        &self,
        target: impl AsRef<Path>,
        template: Option<&str>,
        argv: &[String],
    ) -> Result<(), StorageError> {
        const OP: &str = "update";
        let target = target.as_ref();
        require_target(OP, target)?;

        self.attach();
        self.engine
            .update(target, template, argv)
            .map_err(|e| engine_error(OP, target, e))
    }

    /// Reads consolidated values from a container.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if `target` is empty, the window is invalid,
    /// or the engine fails.
    pub fn fetch(
        &self,
        target: impl AsRef<Path>,
        cf: ConsolidationFn,
        start: i64,
        end: i64,
        step: u64,
    ) -> Result<FetchResults, StorageError> {
        const OP: &str = "fetch";
        let target = target.as_ref();
        require_target(OP, target)?;
        check_window(OP, start, end, step)?;

        self.attach();
        self.engine
            .fetch(target, cf.as_str(), start, end, step)
            .map_err(|e| engine_error(OP, target, e))
    }

    /// Exports `DEF:`/`XPORT:` directives over a time window.
    ///
    /// The engine is called with the vector built by [`export_arguments`],
    /// under the process-wide export lock.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if `argv` is empty, the window is invalid, or
    /// the engine fails.
    pub fn export(
        &self,
        start: i64,
        end: i64,
        step: u64,
        max_rows: i64,
        argv: &[String],
    ) -> Result<FetchResults, StorageError> {
        const OP: &str = "export";
        if argv.is_empty() {
            return Err(invalid(OP, "argv cannot be empty"));
        }
        check_window(OP, start, end, step)?;

        let all_argv = export_arguments(start, end, step, max_rows, argv);

        self.attach();
        let _guard = EXPORT_LOCK.lock();
        self.engine.xport(&all_argv).map_err(|e| StorageError::Engine {
            operation: OP,
            target: all_argv.join(" "),
            message: e.message,
        })
    }

    fn attach(&self) {
        THREAD_ATTACHED.with(|attached| {
            if attached.borrow_mut().insert(self.id) {
                self.engine.attach_thread();
            }
        });
    }
}

/// Builds the export argument vector:
/// `xport --start <s> --end <e> --step <n> [--maxrows <m>] <argv...>`.
///
/// `--maxrows` is only included when `max_rows > 0`.
///
/// # Examples
///
/// ```rust
/// use rrdstrategy::binding::export_arguments;
///
/// let argv = export_arguments(100, 200, 10, 0, &["XPORT:a".to_string()]);
/// assert_eq!(argv, ["xport", "--start", "100", "--end", "200", "--step", "10", "XPORT:a"]);
/// ```
pub fn export_arguments(start: i64, end: i64, step: u64, max_rows: i64, argv: &[String]) -> Vec<String> {
    let fixed = if max_rows > 0 { 9 } else { 7 };
    let mut all = Vec::with_capacity(fixed + argv.len());
    all.extend([
        "xport".to_string(),
        "--start".to_string(),
        start.to_string(),
        "--end".to_string(),
        end.to_string(),
        "--step".to_string(),
        step.to_string(),
    ]);
    if max_rows > 0 {
        all.push("--maxrows".to_string());
        all.push(max_rows.to_string());
    }
    all.extend_from_slice(argv);
    all
}

fn require_target(operation: &'static str, target: &Path) -> Result<(), StorageError> {
    if target.as_os_str().is_empty() {
        return Err(invalid(operation, "filename cannot be empty"));
    }
    Ok(())
}

fn check_window(operation: &'static str, start: i64, end: i64, step: u64) -> Result<(), StorageError> {
    if step == 0 {
        return Err(invalid(operation, "step must be greater than zero"));
    }
    if start > end {
        return Err(invalid(operation, &format!("start ({start}) should be less than end ({end})")));
    }
    Ok(())
}

fn invalid(operation: &'static str, reason: &str) -> StorageError {
    StorageError::InvalidArgument {
        operation,
        reason: reason.to_string(),
    }
}

fn engine_error(operation: &'static str, target: &Path, error: EngineError) -> StorageError {
    StorageError::Engine {
        operation,
        target: target.display().to_string(),
        message: error.message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directives() -> Vec<String> {
        vec!["DEF:x=a.rrd:x:MIN".to_string(), "XPORT:x:xx".to_string()]
    }

    #[test]
    fn test_export_arguments_without_maxrows() {
        for max_rows in [0, -1, i64::MIN] {
            let argv = export_arguments(1, 2, 3, max_rows, &directives());
            assert_eq!(argv.len(), 9);
            assert!(!argv.iter().any(|a| a == "--maxrows"));
            assert_eq!(&argv[7..], &directives()[..]);
        }
    }

    #[test]
    fn test_export_arguments_with_maxrows() {
        let argv = export_arguments(1424700000, 1424800000, 900, 42, &directives());
        assert_eq!(
            argv[..9],
            [
                "xport",
                "--start",
                "1424700000",
                "--end",
                "1424800000",
                "--step",
                "900",
                "--maxrows",
                "42"
            ]
        );
        assert_eq!(&argv[9..], &directives()[..]);
    }

    #[test]
    fn test_check_window() {
        assert!(check_window("fetch", 0, 1, 1).is_ok());
        assert!(check_window("fetch", 1, 1, 1).is_ok());
        assert!(check_window("fetch", 2, 1, 1).is_err());
        assert!(check_window("fetch", 0, 1, 0).is_err());
    }
}
