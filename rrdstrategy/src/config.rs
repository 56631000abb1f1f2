//! Strategy configuration.
//!
//! [`StrategyConfig`] holds the knobs of [`MultithreadedStrategy`](crate::strategy::MultithreadedStrategy).
//! It deserializes from JSON; every field is optional in the file and falls
//! back to the default shown below.
//!
//! ```json
//! {
//!   "file_extension": ".rrd",
//!   "graph_delimiter": "@",
//!   "temp_file_prefix": "rrdtool.",
//!   "create_backdate_secs": 10,
//!   "graph_left_offset": 65,
//!   "graph_right_offset": -30,
//!   "graph_top_offset_with_text": -75
//! }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Configuration for the multi-threaded strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Extension appended to container names, including the leading dot.
    pub file_extension: String,

    /// Quoting character used to split graph command lines.
    pub graph_delimiter: char,

    /// Prefix of temporary image files rendered by graph commands.
    pub temp_file_prefix: String,

    /// Seconds subtracted from "now" for the initial last-update time of a
    /// new container.
    pub create_backdate_secs: i64,

    /// Horizontal offset of the plot area from the left image edge.
    pub graph_left_offset: i32,

    /// Horizontal offset of the plot area from the right image edge.
    pub graph_right_offset: i32,

    /// Vertical offset of the plot area when the graph has a title.
    pub graph_top_offset_with_text: i32,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            file_extension: ".rrd".to_string(),
            graph_delimiter: '@',
            temp_file_prefix: "rrdtool.".to_string(),
            create_backdate_secs: 10,
            graph_left_offset: 65,
            graph_right_offset: -30,
            graph_top_offset_with_text: -75,
        }
    }
}

impl StrategyConfig {
    /// Loads and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`] if the file
    /// cannot be loaded, and [`ConfigError::Invalid`] if a value is out of
    /// range.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&data).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if validation fails.
    pub fn validate(&self) -> Result<()> {
        if !self.file_extension.is_empty() && !self.file_extension.starts_with('.') {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "file_extension '{}' must start with '.'",
                    self.file_extension
                ),
            }
            .into());
        }

        if self.graph_delimiter.is_whitespace() {
            return Err(ConfigError::Invalid {
                reason: "graph_delimiter cannot be whitespace".to_string(),
            }
            .into());
        }

        if self.create_backdate_secs < 0 {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "create_backdate_secs must be >= 0, got {}",
                    self.create_backdate_secs
                ),
            }
            .into());
        }

        Ok(())
    }
}
