//! Time-series definition syntax.
//!
//! Containers are described at creation time by a flat list of arguments:
//! one `DS:<name>:<type>:<heartbeat>:<min>:<max>` entry per data source and
//! one `RRA:<cf>:<xff>:<steps>:<rows>` entry per archive. This module renders
//! data source definitions into that syntax and parses both kinds back.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Maximum length of a data source name.
const MAX_DS_NAME_LEN: usize = 19;

/// Aggregation applied when primary data points are consolidated into an
/// archive row, and when reading back at a coarser resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConsolidationFn {
    /// Arithmetic mean of all known values.
    Average,

    /// Minimum of all known values.
    Min,

    /// Maximum of all known values.
    Max,

    /// Most recent known value.
    Last,
}

impl ConsolidationFn {
    /// Returns the engine token for this function.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Average => "AVERAGE",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Last => "LAST",
        }
    }

    /// Applies this consolidation function to a slice of values.
    ///
    /// NaN values are skipped. If all values are NaN or the slice is empty,
    /// returns NaN.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rrdstrategy::ConsolidationFn;
    ///
    /// let values = [1.0, 2.0, f64::NAN, 4.0];
    ///
    /// assert!((ConsolidationFn::Average.apply(&values) - 7.0 / 3.0).abs() < 1e-10);
    /// assert_eq!(ConsolidationFn::Min.apply(&values), 1.0);
    /// assert_eq!(ConsolidationFn::Max.apply(&values), 4.0);
    /// assert_eq!(ConsolidationFn::Last.apply(&values), 4.0);
    /// ```
    #[allow(clippy::cast_precision_loss)] // Acceptable for consolidation operations
    pub fn apply(self, values: &[f64]) -> f64 {
        let mut known = values.iter().copied().filter(|v| !v.is_nan());
        let Some(first) = known.next() else {
            return f64::NAN;
        };

        match self {
            Self::Average => {
                let (sum, count) = known.fold((first, 1usize), |(s, c), v| (s + v, c + 1));
                sum / count as f64
            }
            Self::Min => known.fold(first, f64::min),
            Self::Max => known.fold(first, f64::max),
            Self::Last => known.last().unwrap_or(first),
        }
    }
}

impl fmt::Display for ConsolidationFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsolidationFn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AVERAGE" => Ok(Self::Average),
            "MIN" => Ok(Self::Min),
            "MAX" => Ok(Self::Max),
            "LAST" => Ok(Self::Last),
            other => Err(format!("unknown consolidation function '{other}'")),
        }
    }
}

/// How raw readings of a data source are turned into rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataSourceType {
    /// The reading is stored as-is.
    Gauge,

    /// A monotonically increasing counter; wraps at 32 or 64 bits.
    Counter,

    /// Like a counter, but decreases are allowed.
    Derive,

    /// A counter that resets on every read.
    Absolute,
}

impl DataSourceType {
    /// Returns the engine token for this type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gauge => "GAUGE",
            Self::Counter => "COUNTER",
            Self::Derive => "DERIVE",
            Self::Absolute => "ABSOLUTE",
        }
    }
}

impl fmt::Display for DataSourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataSourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GAUGE" => Ok(Self::Gauge),
            "COUNTER" => Ok(Self::Counter),
            "DERIVE" => Ok(Self::Derive),
            "ABSOLUTE" => Ok(Self::Absolute),
            other => Err(format!("unknown data source type '{other}'")),
        }
    }
}

/// Declaration of one named series of a container.
///
/// # Example
///
/// ```rust
/// use rrdstrategy::definition::{DataSourceDef, DataSourceType};
///
/// let ds = DataSourceDef::new("ifInOctets", DataSourceType::Counter, 600)
///     .with_bounds(Some(0.0), None);
/// assert_eq!(ds.to_string(), "DS:ifInOctets:COUNTER:600:0:U");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceDef {
    /// Series name, 1 to 19 characters of `[A-Za-z0-9_]`.
    pub name: String,

    /// How readings are converted to rates.
    pub kind: DataSourceType,

    /// Maximum seconds between two updates before the interval is unknown.
    pub heartbeat: u64,

    /// Lowest acceptable rate; `None` for unbounded.
    pub min: Option<f64>,

    /// Highest acceptable rate; `None` for unbounded.
    pub max: Option<f64>,
}

impl DataSourceDef {
    /// Creates an unbounded data source definition.
    pub fn new(name: impl Into<String>, kind: DataSourceType, heartbeat: u64) -> Self {
        Self {
            name: name.into(),
            kind,
            heartbeat,
            min: None,
            max: None,
        }
    }

    /// Sets the accepted value range.
    #[must_use]
    pub fn with_bounds(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Parses a `DS:<name>:<type>:<heartbeat>:<min>:<max>` argument.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if the argument is malformed.
    pub fn parse(arg: &str) -> Result<Self, String> {
        let fields: Vec<&str> = arg.split(':').collect();
        if fields.len() != 6 || fields[0] != "DS" {
            return Err(format!("can't parse argument '{arg}'"));
        }

        let name = fields[1];
        if !is_valid_ds_name(name) {
            return Err(format!("Invalid DS name '{name}'"));
        }

        let kind: DataSourceType = fields[2].parse()?;
        let heartbeat: u64 = fields[3]
            .parse()
            .map_err(|_| format!("Invalid heartbeat '{}' in '{arg}'", fields[3]))?;
        if heartbeat == 0 {
            return Err(format!("Invalid heartbeat '0' in '{arg}'"));
        }
        let min = parse_bound(fields[4], arg)?;
        let max = parse_bound(fields[5], arg)?;
        if let (Some(lo), Some(hi)) = (min, max)
            && lo >= hi
        {
            return Err(format!("min must be less than max in DS definition '{arg}'"));
        }

        Ok(Self {
            name: name.to_string(),
            kind,
            heartbeat,
            min,
            max,
        })
    }
}

impl fmt::Display for DataSourceDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DS:{}:{}:{}:{}:{}",
            self.name,
            self.kind,
            self.heartbeat,
            Bound(self.min),
            Bound(self.max)
        )
    }
}

/// Renders an optional bound, using `U` for "unbounded".
struct Bound(Option<f64>);

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(v) => write!(f, "{v}"),
            None => f.write_str("U"),
        }
    }
}

/// Declaration of one retention tier of a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveDef {
    /// Aggregation applied to primary data points.
    pub cf: ConsolidationFn,

    /// Fraction of unknown points tolerated before a row is unknown.
    pub xff: f64,

    /// Primary data points consolidated into one row.
    pub steps: u64,

    /// Number of rows kept.
    pub rows: u64,
}

impl ArchiveDef {
    /// Parses a `RRA:<cf>:<xff>:<steps>:<rows>` argument.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if the argument is malformed.
    pub fn parse(arg: &str) -> Result<Self, String> {
        let fields: Vec<&str> = arg.split(':').collect();
        if fields.len() != 5 || fields[0] != "RRA" {
            return Err(format!("can't parse argument '{arg}'"));
        }

        let cf: ConsolidationFn = fields[1].parse()?;
        let xff: f64 = fields[2]
            .parse()
            .map_err(|_| format!("Invalid xff '{}' in '{arg}'", fields[2]))?;
        if !(0.0..1.0).contains(&xff) {
            return Err(format!("Invalid xff: must be between 0 and 1 in '{arg}'"));
        }
        let steps: u64 = fields[3]
            .parse()
            .ok()
            .filter(|s| *s > 0)
            .ok_or_else(|| format!("Invalid step count '{}' in '{arg}'", fields[3]))?;
        let rows: u64 = fields[4]
            .parse()
            .ok()
            .filter(|r| *r > 0)
            .ok_or_else(|| format!("Invalid row count '{}' in '{arg}'", fields[4]))?;

        Ok(Self {
            cf,
            xff,
            steps,
            rows,
        })
    }
}

impl fmt::Display for ArchiveDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RRA:{}:{}:{}:{}", self.cf, self.xff, self.steps, self.rows)
    }
}

fn is_valid_ds_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_DS_NAME_LEN
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

fn parse_bound(field: &str, arg: &str) -> Result<Option<f64>, String> {
    if field == "U" {
        return Ok(None);
    }
    field
        .parse::<f64>()
        .map(Some)
        .map_err(|_| format!("Invalid min/max '{field}' in '{arg}'"))
}
