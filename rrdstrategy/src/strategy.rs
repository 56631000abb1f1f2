//! Strategy facade used by data collectors.
//!
//! [`RrdStrategy`] is the surface a collector programs against: define and
//! create containers, batch updates into them, query the last stored value
//! and render graphs. [`MultithreadedStrategy`] implements it over a
//! [`Rrd`] binding, so any number of collector threads may share one
//! strategy.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use std::path::Path;
//!
//! use rrdstrategy::definition::{DataSourceDef, DataSourceType};
//! use rrdstrategy::{FileEngine, MultithreadedStrategy, RrdStrategy};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let strategy = MultithreadedStrategy::new(FileEngine::new())?;
//!
//! let ds = [DataSourceDef::new("ifInOctets", DataSourceType::Counter, 600)];
//! let rras = ["RRA:AVERAGE:0.5:1:2016".to_string()];
//! let definition = strategy.create_definition(Path::new("/var/rrd/1"), "mib2", 300, &ds, &rras)?;
//! strategy.create_file(definition, &BTreeMap::new())?;
//!
//! let mut update = strategy.open_file(Path::new("/var/rrd/1/mib2.rrd"));
//! strategy.update_file(&mut update, "N:123456");
//! strategy.close_file(update)?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::binding::Rrd;
use crate::clock;
use crate::command::{CreateCommand, UpdateCommand};
use crate::config::StrategyConfig;
use crate::definition::{ConsolidationFn, DataSourceDef};
use crate::engine::RrdEngine;
use crate::error::{MetadataError, Result};
use crate::graph::{GraphDetails, GraphRenderer};
use crate::metadata;
use crate::query;

/// Operations a collector performs against round-robin storage.
pub trait RrdStrategy {
    /// Builds the creation command for `<directory>/<name><extension>`.
    ///
    /// Returns `None` when the container already exists.
    ///
    /// # Errors
    ///
    /// Implementations may fail if the definition cannot be built.
    fn create_definition(
        &self,
        directory: &Path,
        name: &str,
        step: u64,
        data_sources: &[DataSourceDef],
        rra_list: &[String],
    ) -> Result<Option<CreateCommand>>;

    /// Executes a creation command and writes the container's metadata file.
    /// Does nothing for `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory, container or metadata file cannot
    /// be created.
    fn create_file(
        &self,
        command: Option<CreateCommand>,
        attribute_mappings: &BTreeMap<String, String>,
    ) -> Result<()>;

    /// Opens an update batch for `path`.
    fn open_file(&self, path: &Path) -> UpdateCommand;

    /// Adds one `timestamp:value[:value...]` row to a batch.
    fn update_file(&self, update: &mut UpdateCommand, data: &str);

    /// Writes a batch to storage in one engine call.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the batch, including an empty
    /// one.
    fn close_file(&self, update: UpdateCommand) -> Result<()>;

    /// Newest value of `ds` within `interval_millis` of now.
    fn fetch_last_value(&self, path: &Path, ds: &str, cf: ConsolidationFn, interval_millis: i64) -> Option<f64>;

    /// [`fetch_last_value`](Self::fetch_last_value) with AVERAGE consolidation.
    fn fetch_last_value_average(&self, path: &Path, ds: &str, interval_millis: i64) -> Option<f64> {
        self.fetch_last_value(path, ds, ConsolidationFn::Average, interval_millis)
    }

    /// Newest non-NaN value of `ds` in the `range_millis` before the last
    /// interval boundary.
    fn fetch_last_value_in_range(&self, path: &Path, ds: &str, interval_millis: i64, range_millis: i64)
    -> Option<f64>;

    /// Runs a graph command and returns the image it writes to standard output.
    ///
    /// # Errors
    ///
    /// Returns an error if the process fails or reports diagnostics.
    fn create_graph(&self, command: &str, work_dir: &Path) -> Result<Vec<u8>>;

    /// Runs a graph command into a temporary image and returns its details.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering or parsing the output fails.
    fn create_graph_return_details(&self, command: &str, work_dir: &Path) -> Result<GraphDetails>;

    /// Runtime statistics, empty when none are kept.
    fn stats(&self) -> String;

    /// Offset of the plot area from the left image edge.
    fn graph_left_offset(&self) -> i32;

    /// Offset of the plot area from the right image edge.
    fn graph_right_offset(&self) -> i32;

    /// Offset of the plot area from the top edge when a title is drawn.
    fn graph_top_offset_with_text(&self) -> i32;

    /// Extension of container files, including the dot.
    fn default_file_extension(&self) -> &str;

    /// Asks for queued writes to the given files to be applied first.
    fn promote_enqueued_files(&self, files: &[PathBuf]);
}

/// Strategy that calls the engine directly from each collector thread.
///
/// Updates are batched per file and written when the batch is closed; nothing
/// is queued inside the strategy.
#[derive(Debug)]
pub struct MultithreadedStrategy<E> {
    rrd: Rrd<E>,
    config: StrategyConfig,
    renderer: GraphRenderer,
}

impl<E: RrdEngine> MultithreadedStrategy<E> {
    /// Creates a strategy with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails to load.
    pub fn new(engine: E) -> Result<Self> {
        Self::with_config(engine, StrategyConfig::default())
    }

    /// Creates a strategy with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the engine fails to
    /// load.
    pub fn with_config(engine: E, config: StrategyConfig) -> Result<Self> {
        config.validate()?;
        let rrd = Rrd::new(engine)?;
        Ok(Self::from_parts(rrd, config))
    }

    /// Creates a strategy over an existing binding. The configuration is
    /// used as given.
    pub fn from_parts(rrd: Rrd<E>, config: StrategyConfig) -> Self {
        let renderer = GraphRenderer::from_config(&config);
        Self { rrd, config, renderer }
    }

    /// The underlying storage binding.
    pub fn rrd(&self) -> &Rrd<E> {
        &self.rrd
    }

    /// The active configuration.
    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }
}

impl<E: RrdEngine> RrdStrategy for MultithreadedStrategy<E> {
    fn create_definition(
        &self,
        directory: &Path,
        name: &str,
        step: u64,
        data_sources: &[DataSourceDef],
        rra_list: &[String],
    ) -> Result<Option<CreateCommand>> {
        let path = directory.join(format!("{name}{}", self.config.file_extension));
        if path.exists() {
            tracing::debug!("{} already exists, no definition needed", path.display());
            return Ok(None);
        }

        let start = clock::now_secs() - self.config.create_backdate_secs;
        let argv = data_sources
            .iter()
            .map(ToString::to_string)
            .chain(rra_list.iter().cloned())
            .collect();

        Ok(Some(CreateCommand::new(path, step, start, argv)))
    }

    fn create_file(
        &self,
        command: Option<CreateCommand>,
        attribute_mappings: &BTreeMap<String, String>,
    ) -> Result<()> {
        let Some(command) = command else {
            tracing::debug!("skipping container creation");
            return Ok(());
        };

        if let Some(dir) = command.path().parent()
            && !dir.as_os_str().is_empty()
            && !dir.exists()
        {
            fs::create_dir_all(dir).map_err(|e| MetadataError::DirectoryCreate {
                path: dir.to_path_buf(),
                source: e,
            })?;
        }

        tracing::debug!("executing create: {command}");
        let path = command.path().to_path_buf();
        command.execute(&self.rrd)?;

        metadata::write_metadata(&path, &self.config.file_extension, attribute_mappings)?;
        Ok(())
    }

    fn open_file(&self, path: &Path) -> UpdateCommand {
        UpdateCommand::new(path)
    }

    fn update_file(&self, update: &mut UpdateCommand, data: &str) {
        update.append(data);
    }

    fn close_file(&self, update: UpdateCommand) -> Result<()> {
        update.execute(&self.rrd)?;
        Ok(())
    }

    fn fetch_last_value(&self, path: &Path, ds: &str, cf: ConsolidationFn, interval_millis: i64) -> Option<f64> {
        query::last_value(&self.rrd, path, ds, cf, interval_millis, clock::now_millis())
    }

    fn fetch_last_value_in_range(
        &self,
        path: &Path,
        ds: &str,
        interval_millis: i64,
        range_millis: i64,
    ) -> Option<f64> {
        query::last_value_in_range(&self.rrd, path, ds, interval_millis, range_millis, clock::now_millis())
    }

    fn create_graph(&self, command: &str, work_dir: &Path) -> Result<Vec<u8>> {
        Ok(self.renderer.render(command, work_dir)?)
    }

    fn create_graph_return_details(&self, command: &str, work_dir: &Path) -> Result<GraphDetails> {
        Ok(self.renderer.render_with_details(command, work_dir)?)
    }

    fn stats(&self) -> String {
        String::new()
    }

    fn graph_left_offset(&self) -> i32 {
        self.config.graph_left_offset
    }

    fn graph_right_offset(&self) -> i32 {
        self.config.graph_right_offset
    }

    fn graph_top_offset_with_text(&self) -> i32 {
        self.config.graph_top_offset_with_text
    }

    fn default_file_extension(&self) -> &str {
        &self.config.file_extension
    }

    fn promote_enqueued_files(&self, _files: &[PathBuf]) {
        // Nothing is queued; every batch is written on close.
    }
}
