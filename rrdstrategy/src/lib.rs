//! # rrdstrategy
//!
//! Command-batching strategy layer over a round-robin time-series engine.
//!
//! Data collectors write samples into round-robin containers (fixed-size,
//! time-indexed files in the style of rrdtool), read back the latest values
//! and render graphs. This crate sits between the collectors and the engine:
//!
//! - it wraps the engine's create/update/fetch/export primitives in a typed,
//!   thread-safe binding,
//! - it batches updates so each collection pass costs one engine call per
//!   container,
//! - it answers "last value" queries on top of fetch,
//! - it drives the external graphing program and checks its diagnostics.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rrdstrategy::binding::Rrd;
//! use rrdstrategy::command::UpdateCommand;
//! use rrdstrategy::{ConsolidationFn, FileEngine};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let rrd = Rrd::new(FileEngine::new())?;
//! rrd.create("/tmp/t.rrd", 900, 1_424_700_000, &[
//!     "DS:x:GAUGE:900:0:100".to_string(),
//!     "DS:y:GAUGE:900:0:100".to_string(),
//!     "RRA:MIN:0.5:1:1000".to_string(),
//! ])?;
//!
//! let mut update = UpdateCommand::new("/tmp/t.rrd");
//! for i in 1..=100_i64 {
//!     update.append(format!("{}:{}:100", 1_424_700_000 + i * 900, i));
//! }
//! update.execute(&rrd)?;
//!
//! let results = rrd.fetch("/tmp/t.rrd", ConsolidationFn::Min, 1_424_700_000, 1_424_800_800, 1)?;
//! assert_eq!(results.columns(), ["x", "y"]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`engine`]: The [`RrdEngine`](engine::RrdEngine) primitives and the
//!   bundled file-backed [`FileEngine`]
//! - [`binding`]: [`Rrd`](binding::Rrd), argument checks, load lifecycle and
//!   thread registration
//! - [`command`]: Deferred create and batched update commands
//! - [`query`]: Last-value queries
//! - [`graph`]: External graph rendering
//! - [`strategy`]: The collector-facing [`RrdStrategy`] facade
//! - [`config`]: [`StrategyConfig`]
//! - [`clock`]: Wall-clock helpers
//! - [`error`]: Error types

pub mod binding;
pub mod clock;
pub mod command;
pub mod config;
pub mod definition;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod graph;
pub mod metadata;
pub mod query;
pub mod strategy;

// Re-export primary API types at crate root for convenience.
pub use binding::Rrd;
pub use command::{CreateCommand, UpdateCommand};
pub use config::StrategyConfig;
pub use definition::ConsolidationFn;
pub use engine::{FileEngine, RrdEngine};
pub use error::{Result, RrdError};
pub use fetch::FetchResults;
pub use graph::GraphDetails;
pub use strategy::{MultithreadedStrategy, RrdStrategy};
