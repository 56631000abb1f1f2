//! File-backed round-robin engine.
//!
//! [`FileEngine`] keeps each container in a single JSON document. Writers to
//! the same path are serialized through a per-path lock table, and every write
//! replaces the file atomically (temporary file in the same directory, then
//! rename), so readers never observe a partially written container.
//!
//! An update call is all-or-nothing: if any row is rejected, none of the
//! rows of that call are persisted.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::NamedTempFile;

use super::RrdEngine;
use super::container::{Container, FORMAT_VERSION};
use super::xport::XportRequest;
use crate::clock;
use crate::definition::{ArchiveDef, ConsolidationFn, DataSourceDef};
use crate::error::EngineError;
use crate::fetch::FetchResults;

/// Round-robin engine storing containers as JSON files.
///
/// # Thread Safety
///
/// All primitives may be called concurrently. Creates and updates of the same
/// path are serialized; different paths proceed in parallel.
#[derive(Debug, Default)]
pub struct FileEngine {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl FileEngine {
    /// Creates an engine with an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(path.to_path_buf()).or_default())
    }

    fn read_container(path: &Path) -> Result<Container, EngineError> {
        let data = fs::read(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                EngineError::new(format!("opening '{}': No such file or directory", path.display()))
            } else {
                EngineError::new(format!("opening '{}': {e}", path.display()))
            }
        })?;

        let container: Container = serde_json::from_slice(&data)
            .map_err(|e| EngineError::new(format!("'{}' is not an RRD file: {e}", path.display())))?;

        if container.version != FORMAT_VERSION {
            return Err(EngineError::new(format!(
                "'{}' has unsupported format version {} (expected {FORMAT_VERSION})",
                path.display(),
                container.version
            )));
        }
        Ok(container)
    }

    fn write_container(path: &Path, container: &Container) -> Result<(), EngineError> {
        let write_error = |e: &dyn std::fmt::Display| {
            EngineError::new(format!("writing '{}': {e}", path.display()))
        };

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut file = NamedTempFile::new_in(dir).map_err(|e| write_error(&e))?;
        serde_json::to_writer(&mut file, container).map_err(|e| write_error(&e))?;
        file.flush().map_err(|e| write_error(&e))?;
        file.persist(path).map_err(|e| write_error(&e.error))?;
        Ok(())
    }

    /// Splits one `timestamp:value[:value...]` row into its time and readings,
    /// ordered by data source.
    fn parse_row(
        container: &Container,
        template: Option<&[usize]>,
        row: &str,
    ) -> Result<(i64, Vec<Option<f64>>), EngineError> {
        let mut fields = row.split(':');
        let time_field = fields.next().unwrap_or_default();
        let timestamp = if time_field == "N" {
            clock::now_secs()
        } else {
            time_field
                .parse::<i64>()
                .map_err(|_| EngineError::new(format!("expected timestamp not found in data source from {row}")))?
        };

        let raw: Vec<&str> = fields.collect();
        let expected = template.map_or(container.source_count(), <[usize]>::len);
        if raw.len() != expected {
            return Err(EngineError::new(format!(
                "expected {expected} data source readings (got {}) from {row}",
                raw.len()
            )));
        }

        let mut readings = vec![None; container.source_count()];
        for (position, field) in raw.iter().enumerate() {
            let value = if *field == "U" {
                None
            } else {
                let v = field.parse::<f64>().map_err(|_| {
                    EngineError::new(format!("conversion of '{field}' to float not complete"))
                })?;
                Some(v).filter(|v| v.is_finite())
            };
            let source = template.map_or(position, |t| t[position]);
            readings[source] = value;
        }
        Ok((timestamp, readings))
    }
}

impl RrdEngine for FileEngine {
    fn create(&self, path: &Path, step: u64, last_update: i64, argv: &[String]) -> Result<(), EngineError> {
        if step == 0 {
            return Err(EngineError::new("step size should be no less than one second"));
        }

        let mut sources: Vec<DataSourceDef> = Vec::new();
        let mut archives = Vec::new();
        for arg in argv {
            if arg.starts_with("DS:") {
                let ds = DataSourceDef::parse(arg).map_err(EngineError::new)?;
                if sources.iter().any(|s| s.name == ds.name) {
                    return Err(EngineError::new(format!("Duplicate DS name: {}", ds.name)));
                }
                sources.push(ds);
            } else if arg.starts_with("RRA:") {
                archives.push(ArchiveDef::parse(arg).map_err(EngineError::new)?);
            } else {
                return Err(EngineError::new(format!("can't parse argument '{arg}'")));
            }
        }

        if sources.is_empty() {
            return Err(EngineError::new("you must define at least one Data Source"));
        }
        if archives.is_empty() {
            return Err(EngineError::new("you must define at least one Round Robin Archive"));
        }

        let container = Container::new(step, last_update, sources, archives);
        let lock = self.lock_for(path);
        let _guard = lock.lock();
        Self::write_container(path, &container)
    }

    fn update(&self, path: &Path, template: Option<&str>, argv: &[String]) -> Result<(), EngineError> {
        if argv.is_empty() {
            return Err(EngineError::new("Not enough arguments"));
        }

        let lock = self.lock_for(path);
        let _guard = lock.lock();
        let mut container = Self::read_container(path)?;

        let template = match template.filter(|t| !t.is_empty()) {
            Some(t) => Some(
                t.split(':')
                    .map(|name| {
                        container
                            .source_index(name)
                            .ok_or_else(|| EngineError::new(format!("unknown DS name '{name}'")))
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            None => None,
        };

        for row in argv {
            let (timestamp, readings) = Self::parse_row(&container, template.as_deref(), row)?;
            container.update(timestamp, &readings).map_err(EngineError::new)?;
        }

        Self::write_container(path, &container)
    }

    fn fetch(&self, path: &Path, cf: &str, start: i64, end: i64, step: u64) -> Result<FetchResults, EngineError> {
        let cf: ConsolidationFn = cf.parse().map_err(EngineError::new)?;
        let container = Self::read_container(path)?;
        container.fetch(cf, start, end, step).map_err(EngineError::new)
    }

    fn xport(&self, argv: &[String]) -> Result<FetchResults, EngineError> {
        XportRequest::parse(argv)?.evaluate(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const START: i64 = 1_424_700_000;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|a| (*a).to_string()).collect()
    }

    #[test]
    fn test_create_then_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rrd");
        let engine = FileEngine::new();

        engine
            .create(&path, 900, START, &strings(&["DS:test:GAUGE:900:0:100", "RRA:MIN:0.5:1:1000"]))
            .unwrap();
        assert!(path.is_file());

        let container = FileEngine::read_container(&path).unwrap();
        assert_eq!(container.step, 900);
        assert_eq!(container.last_update, START);
    }

    #[test]
    fn test_create_rejects_bad_definitions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rrd");
        let engine = FileEngine::new();

        assert!(engine.create(&path, 900, START, &[]).is_err());
        assert!(engine.create(&path, 900, START, &strings(&["DS:x:GAUGE:900:U:U"])).is_err());
        assert!(engine.create(&path, 900, START, &strings(&["RRA:MIN:0.5:1:10"])).is_err());
        assert!(engine.create(&path, 0, START, &strings(&["DS:x:GAUGE:900:U:U", "RRA:MIN:0.5:1:10"])).is_err());
        assert!(engine.create(&path, 900, START, &strings(&["DS:x:GAUGE:900:U:U", "bogus"])).is_err());
        let err = engine
            .create(
                &path,
                900,
                START,
                &strings(&["DS:x:GAUGE:900:U:U", "DS:x:GAUGE:900:U:U", "RRA:MIN:0.5:1:10"]),
            )
            .unwrap_err();
        assert!(err.message.contains("Duplicate DS name"));
        assert!(!path.exists());
    }

    #[test]
    fn test_update_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.rrd");
        let err = FileEngine::new()
            .update(&path, None, &strings(&["1424700900:1"]))
            .unwrap_err();
        assert!(err.message.contains("No such file or directory"));
    }

    #[test]
    fn test_update_is_all_or_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rrd");
        let engine = FileEngine::new();
        engine
            .create(&path, 900, START, &strings(&["DS:x:GAUGE:900:U:U", "RRA:LAST:0.5:1:10"]))
            .unwrap();

        let rows = strings(&["1424700900:1", "1424701800:oops"]);
        assert!(engine.update(&path, None, &rows).is_err());
        assert_eq!(FileEngine::read_container(&path).unwrap().last_update, START);
    }

    #[test]
    fn test_template_maps_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rrd");
        let engine = FileEngine::new();
        engine
            .create(
                &path,
                900,
                START,
                &strings(&["DS:x:GAUGE:900:U:U", "DS:y:GAUGE:900:U:U", "RRA:LAST:0.5:1:10"]),
            )
            .unwrap();

        engine.update(&path, Some("y:x"), &strings(&["1424700900:7:3"])).unwrap();
        let r = engine.fetch(&path, "LAST", START, START + 900, 900).unwrap();
        assert_eq!(r.column("x").unwrap()[0], 3.0);
        assert_eq!(r.column("y").unwrap()[0], 7.0);

        assert!(engine.update(&path, Some("z"), &strings(&["1424701800:1"])).is_err());
        assert!(engine.update(&path, None, &strings(&["1424701800:1"])).is_err());
    }

    #[test]
    fn test_unknown_readings() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rrd");
        let engine = FileEngine::new();
        engine
            .create(&path, 900, START, &strings(&["DS:x:GAUGE:900:U:U", "RRA:AVERAGE:0.5:1:10"]))
            .unwrap();

        engine.update(&path, None, &strings(&["1424700900:U"])).unwrap();
        let r = engine.fetch(&path, "AVERAGE", START, START + 900, 900).unwrap();
        assert!(r.values()[0][0].is_nan());
    }

    #[test]
    fn test_fetch_rejects_unknown_cf_token() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rrd");
        let engine = FileEngine::new();
        engine
            .create(&path, 900, START, &strings(&["DS:x:GAUGE:900:U:U", "RRA:AVERAGE:0.5:1:10"]))
            .unwrap();
        assert!(engine.fetch(&path, "MEDIAN", START, START + 900, 1).is_err());
    }
}
