//! Graph rendering through an external process.
//!
//! Graphs are drawn by a separate program (normally `rrdtool graph`). The
//! command line is split into an argument vector, run in a working directory,
//! and both output streams are drained completely before the result is
//! judged:
//!
//! 1. standard output is the image (or, for [`GraphRenderer::render_with_details`],
//!    the dimension and print lines),
//! 2. one known-harmless warning from the rasterizer is removed from standard
//!    error,
//! 3. anything left on standard error fails the render.

use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::config::StrategyConfig;
use crate::error::{DetailsError, RenderError};

/// Warning printed by the rasterizer on some inputs. It does not affect the image.
pub const IGNORABLE_WARNING: &str = "*** attempt to put segment in horiz list twice";

static IGNORABLE_WARNING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\*\*\* attempt to put segment in horiz list twice\r?\n?")
        .expect("ignorable warning pattern is a valid regex")
});

/// Image size and print lines reported by a detailed render, plus the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphDetails {
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// `PRINT` output lines, in order.
    pub print_lines: Vec<String>,
    /// Raw image bytes.
    #[serde(skip)]
    pub image: Vec<u8>,
}

/// Splits a command line into arguments.
///
/// Arguments are separated by whitespace. Text between two `delimiter`
/// characters is kept together, spaces included, and the delimiters are
/// dropped.
///
/// # Examples
///
/// ```rust
/// use rrdstrategy::graph::command_array;
///
/// let argv = command_array("rrdtool graph - --title @Bits In@ --width 400", '@');
/// assert_eq!(argv, ["rrdtool", "graph", "-", "--title", "Bits In", "--width", "400"]);
/// ```
pub fn command_array(command: &str, delimiter: char) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut pending = false;

    for c in command.chars() {
        if c == delimiter {
            quoted = !quoted;
            pending = true;
        } else if c.is_whitespace() && !quoted {
            if pending {
                args.push(std::mem::take(&mut current));
                pending = false;
            }
        } else {
            current.push(c);
            pending = true;
        }
    }
    if pending {
        args.push(current);
    }
    args
}

/// Runs graph commands with a fixed quoting delimiter and temp-file prefix.
#[derive(Debug, Clone)]
pub struct GraphRenderer {
    delimiter: char,
    temp_prefix: String,
}

impl GraphRenderer {
    /// Creates a renderer.
    pub fn new(delimiter: char, temp_prefix: impl Into<String>) -> Self {
        Self {
            delimiter,
            temp_prefix: temp_prefix.into(),
        }
    }

    /// Creates a renderer from the strategy configuration.
    pub fn from_config(config: &StrategyConfig) -> Self {
        Self::new(config.graph_delimiter, config.temp_file_prefix.clone())
    }

    /// Runs `command` in `work_dir` and returns its standard output.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::EmptyCommand`] if the command has no program,
    /// [`RenderError::Launch`] if the process cannot be started or waited
    /// for, and [`RenderError::Diagnostics`] if it wrote anything to standard
    /// error other than [`IGNORABLE_WARNING`].
    pub fn render(&self, command: &str, work_dir: &Path) -> Result<Vec<u8>, RenderError> {
        let argv = command_array(command, self.delimiter);
        let Some((program, args)) = argv.split_first() else {
            return Err(RenderError::EmptyCommand);
        };

        // output() drains both pipes before waiting
        let output = Command::new(program)
            .args(args)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| RenderError::Launch {
                command: command.to_string(),
                work_dir: work_dir.to_path_buf(),
                source: e,
            })?;

        let mut errors = String::from_utf8_lossy(&output.stderr).into_owned();
        if !errors.is_empty() && errors.contains(IGNORABLE_WARNING) {
            tracing::debug!("ignoring rasterizer warning on stderr: {IGNORABLE_WARNING}");
            errors = IGNORABLE_WARNING_RE.replace_all(&errors, "").into_owned();
        }
        if !errors.is_empty() {
            return Err(RenderError::Diagnostics {
                command: command.to_string(),
                work_dir: work_dir.to_path_buf(),
                stderr: errors,
            });
        }

        Ok(output.stdout)
    }

    /// Renders to a temporary image file and returns the parsed output.
    ///
    /// The first `graph - ` in `command` is replaced by `graph <tmpfile> `.
    /// Standard output must start with a `<width>x<height>` line; the
    /// remaining lines are print lines. The temporary file is removed on
    /// every path.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Details`] wrapping whatever failed.
    pub fn render_with_details(&self, command: &str, work_dir: &Path) -> Result<GraphDetails, RenderError> {
        let temp = tempfile::Builder::new()
            .prefix(&self.temp_prefix)
            .suffix(".png")
            .tempfile()
            .map_err(|e| RenderError::Details {
                command: command.to_string(),
                work_dir: work_dir.to_path_buf(),
                source: DetailsError::TempFile(e),
            })?
            .into_temp_path();

        let command = command.replacen("graph - ", &format!("graph {} ", temp.display()), 1);
        let result = self.read_details(&command, work_dir, &temp);

        let temp_display = temp.display().to_string();
        if let Err(e) = temp.close() {
            tracing::warn!("could not delete temporary graph file {temp_display}: {e}");
        }

        result.map_err(|source| RenderError::Details {
            command,
            work_dir: work_dir.to_path_buf(),
            source,
        })
    }

    fn read_details(&self, command: &str, work_dir: &Path, image_path: &Path) -> Result<GraphDetails, DetailsError> {
        let stdout = self
            .render(command, work_dir)
            .map_err(|e| DetailsError::Render(Box::new(e)))?;
        let text = String::from_utf8_lossy(&stdout);
        let mut lines = text.lines();

        let first = lines.next().ok_or(DetailsError::NoOutput)?;
        let (width, height) = parse_dimensions(first).ok_or_else(|| DetailsError::Dimensions {
            line: first.to_string(),
        })?;
        let print_lines = lines.map(str::to_string).collect();

        let image = fs::read(image_path).map_err(|e| DetailsError::ReadImage {
            path: image_path.to_path_buf(),
            source: e,
        })?;

        Ok(GraphDetails {
            width,
            height,
            print_lines,
            image,
        })
    }
}

impl Default for GraphRenderer {
    fn default() -> Self {
        Self::from_config(&StrategyConfig::default())
    }
}

fn parse_dimensions(line: &str) -> Option<(u32, u32)> {
    let (w, h) = line.trim().split_once('x')?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}
