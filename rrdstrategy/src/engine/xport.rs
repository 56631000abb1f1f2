//! Export argument evaluation.
//!
//! An export request is an argument vector of the form
//!
//! ```text
//! xport --start <ts> --end <ts> --step <n> [--maxrows <n>]
//!       DEF:<vname>=<path>:<ds>:<cf> ... XPORT:<vname>[:<legend>] ...
//! ```
//!
//! Every `DEF` is resolved through the engine's fetch primitive and every
//! `XPORT` becomes one output column, labelled by its legend.

use std::collections::HashMap;
use std::path::Path;

use crate::clock;
use crate::definition::ConsolidationFn;
use crate::engine::RrdEngine;
use crate::error::EngineError;
use crate::fetch::FetchResults;

/// Default export window when `--start` is omitted.
const DEFAULT_WINDOW_SECS: i64 = 86_400;

/// A parsed export request.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct XportRequest {
    start: i64,
    end: i64,
    step: u64,
    max_rows: u64,
    defs: Vec<Def>,
    exports: Vec<Export>,
}

#[derive(Debug, Clone, PartialEq)]
struct Def {
    vname: String,
    path: String,
    ds: String,
    cf: ConsolidationFn,
}

#[derive(Debug, Clone, PartialEq)]
struct Export {
    vname: String,
    legend: String,
}

impl XportRequest {
    /// Parses an export argument vector. A leading `xport` is optional.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown options, malformed directives, or a
    /// request with nothing to export.
    pub(crate) fn parse(argv: &[String]) -> Result<Self, EngineError> {
        let mut args = argv.iter().map(String::as_str).peekable();
        if args.peek() == Some(&"xport") {
            args.next();
        }

        let mut start = None;
        let mut end = None;
        let mut step = 1u64;
        let mut max_rows = 0u64;
        let mut defs = Vec::new();
        let mut exports = Vec::new();

        while let Some(arg) = args.next() {
            match arg {
                "--start" | "-s" => start = Some(option_value(arg, args.next())?),
                "--end" | "-e" => end = Some(option_value(arg, args.next())?),
                "--step" => step = option_value(arg, args.next())?,
                "--maxrows" | "-m" => max_rows = option_value(arg, args.next())?,
                _ if arg.starts_with("DEF:") => defs.push(Def::parse(arg)?),
                _ if arg.starts_with("XPORT:") => exports.push(Export::parse(arg)?),
                _ => return Err(EngineError::new(format!("unknown argument '{arg}'"))),
            }
        }

        if exports.is_empty() {
            return Err(EngineError::new("no XPORT found, nothing to do"));
        }
        if step == 0 {
            return Err(EngineError::new("step must be greater than zero"));
        }

        let end = end.unwrap_or_else(clock::now_secs);
        let start = start.unwrap_or(end - DEFAULT_WINDOW_SECS);

        Ok(Self {
            start,
            end,
            step,
            max_rows,
            defs,
            exports,
        })
    }

    /// Fetches every definition and assembles the exported columns.
    ///
    /// # Errors
    ///
    /// Returns an error if a fetch fails, a referenced variable or data
    /// source does not exist, or the definitions resolve to different
    /// resolutions.
    pub(crate) fn evaluate<E: RrdEngine + ?Sized>(&self, engine: &E) -> Result<FetchResults, EngineError> {
        let mut series: HashMap<&str, (FetchResults, usize)> = HashMap::new();
        for def in &self.defs {
            let results = engine.fetch(
                Path::new(&def.path),
                def.cf.as_str(),
                self.start,
                self.end,
                self.step,
            )?;
            let column = results.column_index(&def.ds).ok_or_else(|| {
                EngineError::new(format!("No DS called '{}' in '{}'", def.ds, def.path))
            })?;
            series.insert(def.vname.as_str(), (results, column));
        }

        let mut columns = Vec::with_capacity(self.exports.len());
        let mut values = Vec::with_capacity(self.exports.len());
        let mut frame: Option<(i64, i64, u64)> = None;

        for export in &self.exports {
            let (results, column) = series.get(export.vname.as_str()).ok_or_else(|| {
                EngineError::new(format!("Unknown variable '{}' in XPORT", export.vname))
            })?;

            let this_frame = (results.start(), results.end(), results.step());
            match frame {
                None => frame = Some(this_frame),
                Some(f) if f != this_frame => {
                    return Err(EngineError::new(
                        "exported definitions resolve to different resolutions",
                    ));
                }
                Some(_) => {}
            }

            columns.push(export.legend.clone());
            values.push(results.values()[*column].clone());
        }

        let Some((start, end, step)) = frame else {
            return Err(EngineError::new("no XPORT found, nothing to do"));
        };

        Ok(reduce_rows(start, end, step, self.max_rows, columns, values))
    }
}

/// Averages adjacent rows together until at most `max_rows` remain.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn reduce_rows(
    start: i64,
    end: i64,
    step: u64,
    max_rows: u64,
    columns: Vec<String>,
    values: Vec<Vec<f64>>,
) -> FetchResults {
    let rows = values.first().map_or(0, Vec::len) as u64;
    if max_rows == 0 || rows <= max_rows {
        return FetchResults::new(start, end, step, columns, values);
    }

    let factor = rows.div_ceil(max_rows);
    let new_step = step * factor;
    let values: Vec<Vec<f64>> = values
        .iter()
        .map(|column| {
            column
                .chunks(factor as usize)
                .map(|chunk| ConsolidationFn::Average.apply(chunk))
                .collect()
        })
        .collect();
    let groups = values.first().map_or(0, Vec::len) as i64;

    // Each reduced row is stamped with the end of its group
    let new_start = start + (factor as i64 - 1) * step as i64;
    let new_end = new_start + (groups - 1).max(0) * new_step as i64;
    FetchResults::new(new_start, new_end, new_step, columns, values)
}

fn option_value<T: std::str::FromStr>(option: &str, value: Option<&str>) -> Result<T, EngineError> {
    let value = value.ok_or_else(|| EngineError::new(format!("option '{option}' requires a value")))?;
    value
        .parse()
        .map_err(|_| EngineError::new(format!("invalid value '{value}' for option '{option}'")))
}

impl Def {
    /// Parses `DEF:<vname>=<path>:<ds>:<cf>`.
    fn parse(arg: &str) -> Result<Self, EngineError> {
        let invalid = || EngineError::new(format!("can't parse '{arg}'"));
        let body = arg.strip_prefix("DEF:").ok_or_else(invalid)?;
        let (vname, rest) = body.split_once('=').ok_or_else(invalid)?;

        // The path may itself contain colons; ds and cf never do
        let mut parts = rest.rsplitn(3, ':');
        let cf = parts.next().ok_or_else(invalid)?;
        let ds = parts.next().ok_or_else(invalid)?;
        let path = parts.next().ok_or_else(invalid)?;
        if vname.is_empty() || ds.is_empty() || path.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            vname: vname.to_string(),
            path: path.to_string(),
            ds: ds.to_string(),
            cf: cf.parse().map_err(EngineError::new)?,
        })
    }
}

impl Export {
    /// Parses `XPORT:<vname>[:<legend>]`.
    fn parse(arg: &str) -> Result<Self, EngineError> {
        let body = arg.strip_prefix("XPORT:").unwrap_or(arg);
        let (vname, legend) = body.split_once(':').unwrap_or((body, ""));
        if vname.is_empty() {
            return Err(EngineError::new(format!("can't parse '{arg}'")));
        }
        Ok(Self {
            vname: vname.to_string(),
            legend: legend.to_string(),
        })
    }
}
