//! Error types for the rrdstrategy layer.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for all rrdstrategy operations.
///
/// Each variant wraps the error of one concern: the storage binding, graph
/// rendering, the metadata side-file and configuration loading.
#[derive(Error, Debug)]
pub enum RrdError {
    /// A storage engine primitive failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Graph rendering failed.
    #[error("render error: {0}")]
    Render(#[from] RenderError),

    /// Writing the metadata side-file or its directory failed.
    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    /// Configuration could not be loaded or is invalid.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// A failure reported by a storage engine primitive.
///
/// The message is the engine's diagnostic text, kept verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct EngineError {
    /// The engine's diagnostic message.
    pub message: String,
}

impl EngineError {
    /// Creates an engine error from a diagnostic message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors surfaced by the storage binding's create/update/fetch/export calls.
#[derive(Error, Debug)]
pub enum StorageError {
    /// An argument was rejected before reaching the engine.
    #[error("{operation}: {reason}")]
    InvalidArgument {
        /// The operation that was attempted.
        operation: &'static str,
        /// Why the argument is invalid.
        reason: String,
    },

    /// The engine rejected the call.
    #[error("{operation} '{target}' failed: {message}")]
    Engine {
        /// The operation that was attempted.
        operation: &'static str,
        /// The container path, or the export argument vector.
        target: String,
        /// The engine's diagnostic text.
        message: String,
    },

    /// The engine could not be loaded.
    #[error("failed to load storage engine: {message}")]
    Load {
        /// The engine's diagnostic text.
        message: String,
    },
}

/// Errors raised while rendering a graph through the external process.
#[derive(Error, Debug)]
pub enum RenderError {
    /// The command line contained no program to run.
    #[error("graph command is empty")]
    EmptyCommand,

    /// The process could not be started.
    #[error("failed to execute command '{command}' in {}: {source}", work_dir.display())]
    Launch {
        /// The command line as given by the caller.
        command: String,
        /// The working directory the process was started in.
        work_dir: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The process wrote diagnostics other than the ignorable warning.
    #[error("command '{command}' in {} reported: {stderr}", work_dir.display())]
    Diagnostics {
        /// The command line as given by the caller.
        command: String,
        /// The working directory the process was started in.
        work_dir: PathBuf,
        /// Remaining standard error text.
        stderr: String,
    },

    /// Rendering to a temporary image or processing its output failed.
    #[error("can't execute command '{command}' in {}: {source}", work_dir.display())]
    Details {
        /// The rewritten command line.
        command: String,
        /// The working directory the process was started in.
        work_dir: PathBuf,
        /// What went wrong.
        #[source]
        source: DetailsError,
    },
}

/// Causes of a failed "render with details" call.
#[derive(Error, Debug)]
pub enum DetailsError {
    /// The temporary image file could not be created.
    #[error("failed to create temporary image file: {0}")]
    TempFile(#[source] std::io::Error),

    /// The render itself failed.
    #[error("{0}")]
    Render(#[source] Box<RenderError>),

    /// The process produced no output at all.
    #[error("no output from the graph command")]
    NoOutput,

    /// The first output line was not `<width>x<height>`.
    #[error("invalid dimension line '{line}'")]
    Dimensions {
        /// The offending line.
        line: String,
    },

    /// The rendered image could not be read back.
    #[error("failed to read image '{}': {source}", path.display())]
    ReadImage {
        /// The temporary image path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors writing the companion metadata file of a new container.
#[derive(Error, Debug)]
pub enum MetadataError {
    /// The container directory could not be created.
    #[error("failed to create directory '{}': {source}", path.display())]
    DirectoryCreate {
        /// The directory path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The metadata file could not be written.
    #[error("failed to write metadata file '{}': {source}", path.display())]
    Write {
        /// The metadata file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors loading or validating a [`StrategyConfig`](crate::config::StrategyConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config '{}': {source}", path.display())]
    Read {
        /// The config file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for the config schema.
    #[error("failed to parse config '{}': {source}", path.display())]
    Parse {
        /// The config file path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Description of what is invalid.
        reason: String,
    },
}

/// Type alias for `Result<T, RrdError>`.
pub type Result<T> = std::result::Result<T, RrdError>;
