//! Integration tests for the storage binding over the file engine.
//!
//! Covers argument rejection, create/update/fetch round trips, export, the
//! load lifecycle and per-thread engine registration.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use rrdstrategy::binding::{Loader, Rrd};
use rrdstrategy::error::{EngineError, StorageError};
use rrdstrategy::{ConsolidationFn, FetchResults, FileEngine, RrdEngine};
use tempfile::tempdir;

const START: i64 = 1_424_700_000;
const STEP: u64 = 900;

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| (*a).to_string()).collect()
}

fn rrd() -> Rrd<FileEngine> {
    Rrd::new(FileEngine::new()).unwrap()
}

/// Creates `x`,`y` gauges with MIN and AVERAGE archives and writes 100 rows
/// of `(i, 100)`, one update call per row.
fn populated(rrd: &Rrd<FileEngine>, path: &Path) {
    rrd.create(
        path,
        STEP,
        START,
        &strings(&[
            "DS:x:GAUGE:900:0:100",
            "DS:y:GAUGE:900:0:100",
            "RRA:MIN:0.5:1:1000",
            "RRA:AVERAGE:0.5:1:1000",
        ]),
    )
    .unwrap();

    for i in 1..=100_i64 {
        let timestamp = START + i * STEP as i64;
        rrd.update(path, Some("x:y"), &[format!("{timestamp}:{i}:100")])
            .unwrap();
    }
}

#[test]
fn test_create_rejects_empty_arguments() {
    let rrd = rrd();
    let err = rrd
        .create("", 1, 1, &strings(&["DS:test:GAUGE:900:0:100", "RRA:MIN:0.5:1:1000"]))
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidArgument { operation: "create", .. }));

    assert!(matches!(
        rrd.create("test.rrd", 1, 1, &[]),
        Err(StorageError::InvalidArgument { .. })
    ));
}

#[test]
fn test_can_create() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.rrd");
    assert!(!path.is_file());

    rrd()
        .create(&path, STEP, START, &strings(&["DS:test:GAUGE:900:0:100", "RRA:MIN:0.5:1:1000"]))
        .unwrap();
    assert!(path.is_file());
}

#[test]
fn test_update_failures() {
    let rrd = rrd();

    assert!(matches!(
        rrd.update("", Some(""), &[]),
        Err(StorageError::InvalidArgument { .. })
    ));

    let missing = PathBuf::from("should").join("not").join("exist");
    assert!(!missing.is_file());
    let err = rrd.update(&missing, Some(""), &strings(&["1424700001:1"])).unwrap_err();
    match err {
        StorageError::Engine { operation, message, .. } => {
            assert_eq!(operation, "update");
            assert!(message.contains("No such file or directory"));
        }
        other => panic!("unexpected error: {other}"),
    }

    let dir = tempdir().unwrap();
    let path = dir.path().join("test.rrd");
    rrd.create(&path, STEP, START, &strings(&["DS:test:GAUGE:900:0:100", "RRA:MIN:0.5:1:1000"]))
        .unwrap();
    assert!(matches!(
        rrd.update(&path, Some(""), &[]),
        Err(StorageError::Engine { .. })
    ));
}

#[test]
fn test_can_update() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.rrd");
    let rrd = rrd();
    rrd.create(&path, STEP, START, &strings(&["DS:test:GAUGE:900:0:100", "RRA:MIN:0.5:1:1000"]))
        .unwrap();

    rrd.update(&path, None, &[format!("{}:{}", 1_424_700_001, 1)]).unwrap();
}

#[test]
fn test_fetch_rejects_bad_window() {
    let rrd = rrd();
    assert!(matches!(
        rrd.fetch("", ConsolidationFn::Average, 0, 1, 1),
        Err(StorageError::InvalidArgument { .. })
    ));
    assert!(matches!(
        rrd.fetch("test.rrd", ConsolidationFn::Average, 2, 1, 1),
        Err(StorageError::InvalidArgument { .. })
    ));
    assert!(matches!(
        rrd.fetch("test.rrd", ConsolidationFn::Average, 0, 1, 0),
        Err(StorageError::InvalidArgument { .. })
    ));
}

#[test]
fn test_can_fetch_from_multiple_datasources() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.rrd");
    let rrd = rrd();
    populated(&rrd, &path);

    let results = rrd
        .fetch(&path, ConsolidationFn::Min, 1_424_700_000, 1_424_800_800, 1)
        .unwrap();

    assert_eq!(results.step(), STEP);
    assert_eq!(results.start(), 1_424_700_900);
    assert_eq!(results.end(), 1_424_801_700);
    assert_eq!(results.columns(), ["x", "y"]);

    let values = results.values();
    assert_eq!(values[0][0], 1.0);
    assert_eq!(values[0][1], 2.0);
    assert_eq!(values[1][0], 100.0);
    assert_eq!(values[1][1], 100.0);
}

#[test]
fn test_every_written_value_is_recoverable() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.rrd");
    let rrd = rrd();
    populated(&rrd, &path);

    let results = rrd
        .fetch(&path, ConsolidationFn::Average, START, START + 100 * STEP as i64, STEP)
        .unwrap();

    let x = results.column("x").unwrap();
    for (i, (timestamp, value)) in results.timestamps().zip(x).enumerate().take(100) {
        assert_eq!(timestamp, START + (i as i64 + 1) * STEP as i64);
        assert_eq!(*value, (i + 1) as f64);
    }
}

#[test]
fn test_export_rejects_empty_argv() {
    assert!(matches!(
        rrd().export(START, START + 900, 1, 0, &[]),
        Err(StorageError::InvalidArgument { operation: "export", .. })
    ));
}

#[test]
fn test_can_export() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.rrd");
    let rrd = rrd();
    populated(&rrd, &path);

    let argv = vec![
        format!("DEF:x={}:x:MIN", path.display()),
        format!("DEF:y={}:y:MIN", path.display()),
        "XPORT:x:xx".to_string(),
        "XPORT:y:yy".to_string(),
    ];
    let results = rrd.export(START, 1_424_800_000, 1, 0, &argv).unwrap();

    assert_eq!(results.step(), STEP);
    assert_eq!(results.start(), 1_424_700_900);
    assert_eq!(results.end(), 1_424_800_800);
    assert_eq!(results.columns(), ["xx", "yy"]);

    let values = results.values();
    assert_eq!(values[0][0], 1.0);
    assert_eq!(values[0][1], 2.0);
    assert_eq!(values[1][0], 100.0);
    assert_eq!(values[1][1], 100.0);
}

#[test]
fn test_export_maxrows_reduces_rows() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.rrd");
    let rrd = rrd();
    populated(&rrd, &path);

    let argv = vec![format!("DEF:x={}:x:MIN", path.display()), "XPORT:x".to_string()];
    let results = rrd.export(START, START + 99 * STEP as i64, 1, 50, &argv).unwrap();

    assert_eq!(results.row_count(), 50);
    assert_eq!(results.step(), 2 * STEP);
    assert_eq!(results.values()[0][0], 1.5);
}

#[test]
fn test_export_reports_engine_error_with_arguments() {
    let argv = strings(&["DEF:x=/should/not/exist.rrd:x:MIN", "XPORT:x"]);
    let err = rrd().export(START, START + 900, 1, 0, &argv).unwrap_err();
    match err {
        StorageError::Engine { operation, target, message } => {
            assert_eq!(operation, "export");
            assert!(target.starts_with("xport --start"));
            assert!(message.contains("No such file or directory"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

/// Engine that counts loads and thread registrations.
#[derive(Default)]
struct CountingEngine {
    loads: AtomicUsize,
    attaches: AtomicUsize,
    fail_load: bool,
}

impl RrdEngine for CountingEngine {
    fn load(&self) -> Result<(), EngineError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_load {
            return Err(EngineError::new("cannot load engine"));
        }
        Ok(())
    }

    fn attach_thread(&self) {
        self.attaches.fetch_add(1, Ordering::SeqCst);
    }

    fn create(&self, _: &Path, _: u64, _: i64, _: &[String]) -> Result<(), EngineError> {
        Ok(())
    }

    fn update(&self, _: &Path, _: Option<&str>, _: &[String]) -> Result<(), EngineError> {
        Ok(())
    }

    fn fetch(&self, _: &Path, _: &str, start: i64, end: i64, step: u64) -> Result<FetchResults, EngineError> {
        Ok(FetchResults::new(start, end, step, Vec::new(), Vec::new()))
    }

    fn xport(&self, _: &[String]) -> Result<FetchResults, EngineError> {
        Ok(FetchResults::new(0, 0, 1, Vec::new(), Vec::new()))
    }
}

#[test]
fn test_loader_loads_once_until_reload() {
    let loader = Loader::new();
    let engine = CountingEngine::default();
    assert!(!loader.is_loaded());

    loader.init(&engine).unwrap();
    loader.init(&engine).unwrap();
    assert!(loader.is_loaded());
    assert_eq!(engine.loads.load(Ordering::SeqCst), 1);

    loader.reload(&engine).unwrap();
    loader.init(&engine).unwrap();
    assert_eq!(engine.loads.load(Ordering::SeqCst), 2);
}

#[test]
fn test_loader_failure_leaves_unloaded() {
    let loader = Loader::new();
    let engine = CountingEngine {
        fail_load: true,
        ..CountingEngine::default()
    };

    assert!(matches!(loader.init(&engine), Err(StorageError::Load { .. })));
    assert!(!loader.is_loaded());
    assert!(loader.init(&engine).is_err());
    assert_eq!(engine.loads.load(Ordering::SeqCst), 2);
}

#[test]
fn test_each_thread_attaches_once() {
    let rrd = Arc::new(Rrd::new(CountingEngine::default()).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let rrd = Arc::clone(&rrd);
            std::thread::spawn(move || {
                for _ in 0..10 {
                    rrd.fetch("a.rrd", ConsolidationFn::Average, 0, 10, 1).unwrap();
                    rrd.update("a.rrd", None, &strings(&["N:1"])).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(rrd.engine().attaches.load(Ordering::SeqCst), 4);
}

#[test]
fn test_each_engine_attaches_on_a_shared_thread() {
    let first = Rrd::new(CountingEngine::default()).unwrap();
    let second = Rrd::new(CountingEngine::default()).unwrap();

    first.fetch("a.rrd", ConsolidationFn::Average, 0, 10, 1).unwrap();
    second.fetch("b.rrd", ConsolidationFn::Average, 0, 10, 1).unwrap();
    first.update("a.rrd", None, &strings(&["N:1"])).unwrap();
    second.update("b.rrd", None, &strings(&["N:1"])).unwrap();

    assert_eq!(first.engine().attaches.load(Ordering::SeqCst), 1);
    assert_eq!(second.engine().attaches.load(Ordering::SeqCst), 1);
}

#[test]
fn test_every_binding_loads_its_engine() {
    let engines: Vec<_> = (0..3).map(|_| Rrd::new(CountingEngine::default()).unwrap()).collect();
    for rrd in &engines {
        assert!(rrd.is_loaded());
        assert_eq!(rrd.engine().loads.load(Ordering::SeqCst), 1);
    }

    engines[1].reload().unwrap();
    assert_eq!(engines[0].engine().loads.load(Ordering::SeqCst), 1);
    assert_eq!(engines[1].engine().loads.load(Ordering::SeqCst), 2);
}

#[test]
fn test_binding_load_failure() {
    let engine = CountingEngine {
        fail_load: true,
        ..CountingEngine::default()
    };
    assert!(matches!(Rrd::new(engine), Err(StorageError::Load { .. })));
}

#[test]
fn test_fetch_reports_oversized_windows() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("fine.rrd");
    let rrd = rrd();
    rrd.create(&path, 1, START, &strings(&["DS:x:GAUGE:60:U:U", "RRA:AVERAGE:0.5:1:600"]))
        .unwrap();

    for end in [i64::MAX - 1, i64::MAX] {
        let err = rrd.fetch(&path, ConsolidationFn::Average, 0, end, 1).unwrap_err();
        assert!(matches!(err, StorageError::Engine { operation: "fetch", .. }));
    }
    assert!(rrd.fetch(&path, ConsolidationFn::Average, 0, START, 1).is_err());
}

#[test]
fn test_far_future_update_returns_promptly() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("fine.rrd");
    let rrd = rrd();
    rrd.create(&path, 1, START, &strings(&["DS:x:GAUGE:60:U:U", "RRA:AVERAGE:0.5:1:600"]))
        .unwrap();

    let began = Instant::now();
    rrd.update(&path, None, &[format!("{}:1", START + 30_000_000)]).unwrap();
    assert!(began.elapsed() < Duration::from_secs(5));

    rrd.update(&path, None, &[format!("{}:2", START + 30_000_001)]).unwrap();
    let results = rrd
        .fetch(&path, ConsolidationFn::Average, START + 30_000_000, START + 30_000_001, 1)
        .unwrap();
    assert_eq!(results.column("x").unwrap()[0], 2.0);
}
