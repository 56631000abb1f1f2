//! Companion metadata file for newly created containers.
//!
//! Each container created through the strategy gets a `.meta` file in the
//! same directory, named after the container without its configured
//! extension. It maps attribute names to values, one `key=value` line per
//! attribute in key order. The file is written once, at creation.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::MetadataError;

/// Extension of the metadata file.
pub const METADATA_EXTENSION: &str = "meta";

/// Returns the metadata path for a container: same directory, the file name
/// without `extension`, then `.meta`.
///
/// A name that does not end in `extension` keeps its full name.
///
/// # Examples
///
/// ```rust
/// use std::path::{Path, PathBuf};
/// use rrdstrategy::metadata::metadata_path;
///
/// assert_eq!(metadata_path(Path::new("/var/rrd/mib2.v1.rrd"), ".rrd"), PathBuf::from("/var/rrd/mib2.v1.meta"));
/// assert_eq!(metadata_path(Path::new("/var/rrd/mib2.v1"), ""), PathBuf::from("/var/rrd/mib2.v1.meta"));
/// ```
pub fn metadata_path(container: &Path, extension: &str) -> PathBuf {
    let name = container.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    let stem = name.strip_suffix(extension).unwrap_or(&*name);
    container.with_file_name(format!("{stem}.{METADATA_EXTENSION}"))
}

/// Writes the metadata file for `container`, whose name ends in `extension`.
///
/// # Errors
///
/// Returns [`MetadataError::Write`] if the file cannot be written.
pub fn write_metadata(
    container: &Path,
    extension: &str,
    attributes: &BTreeMap<String, String>,
) -> Result<PathBuf, MetadataError> {
    let path = metadata_path(container, extension);

    let mut contents = String::new();
    for (key, value) in attributes {
        // Writing to a String cannot fail
        let _ = writeln!(contents, "{}={}", escape(key), escape(value));
    }

    fs::write(&path, contents).map_err(|e| MetadataError::Write {
        path: path.clone(),
        source: e,
    })?;
    Ok(path)
}

/// Reads a metadata file back into a map.
///
/// # Errors
///
/// Returns the I/O error if the file cannot be read.
pub fn read_metadata(path: &Path) -> std::io::Result<BTreeMap<String, String>> {
    let contents = fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .filter_map(|line| {
            let (key, value) = split_unescaped(line)?;
            Some((unescape(key), unescape(value)))
        })
        .collect())
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '=' => out.push_str("\\="),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Splits a line at the first `=` that is not escaped.
fn split_unescaped(line: &str) -> Option<(&str, &str)> {
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            '\\' if !escaped => escaped = true,
            '=' if !escaped => return Some((&line[..i], &line[i + 1..])),
            _ => escaped = false,
        }
    }
    None
}
