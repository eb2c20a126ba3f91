//! End-to-end coverage of event mode through the ambient surface: one
//! binary log per thread, a shared name table, metadata snapshots.

use std::fs;
use std::path::PathBuf;

use fprof_runtime::{
    CallSite, Config, EventKind, HEADER_SIZE, LogHeader, LogRecord, Mode, RECORD_SIZE,
};
use tempfile::TempDir;

static STEP: CallSite = CallSite::new("step");

fn decode(path: &PathBuf) -> (LogHeader, Vec<LogRecord>) {
    let bytes = fs::read(path).unwrap();
    assert!(bytes.len() >= HEADER_SIZE, "log shorter than its header");
    assert_eq!(
        (bytes.len() - HEADER_SIZE) % RECORD_SIZE,
        0,
        "truncated record in {}",
        path.display()
    );
    let header = LogHeader::decode(bytes[..HEADER_SIZE].try_into().unwrap())
        .expect("valid magic");
    let records = bytes[HEADER_SIZE..]
        .chunks_exact(RECORD_SIZE)
        .map(|c| LogRecord::decode(c.try_into().unwrap()).expect("valid record"))
        .collect();
    (header, records)
}

#[test]
fn ambient_event_flow() {
    let tmp = TempDir::new().unwrap();
    let session = fprof_runtime::init_with(Config {
        mode: Mode::Events,
        log_dir: Some(tmp.path().to_path_buf()),
        ..Config::default()
    });

    for _ in 0..3 {
        let _g = fprof_runtime::trace(&STEP);
    }
    let worker = std::thread::spawn(|| {
        let _g = fprof_runtime::trace(&STEP);
    });
    worker.join().unwrap();
    fprof_runtime::shutdown();

    let mut logs: Vec<PathBuf> = fs::read_dir(tmp.path())
        .unwrap()
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "bin"))
        .collect();
    assert_eq!(logs.len(), 2, "one log per thread");

    // Identify by volume: main wrote three pairs, the worker one.
    logs.sort_by_key(|p| fs::metadata(p).unwrap().len());
    let (worker_header, worker_records) = decode(&logs[0]);
    let (main_header, main_records) = decode(&logs[1]);
    assert_eq!(worker_records.len(), 2);
    assert_eq!(main_records.len(), 6);
    assert_eq!(main_header.pid, session.pid());
    assert_eq!(worker_header.pid, session.pid());
    assert_ne!(main_header.tid, worker_header.tid);

    let id = main_records[0].id;
    for records in [&main_records, &worker_records] {
        for pair in records.chunks(2) {
            assert_eq!(pair[0].kind, EventKind::Enter);
            assert_eq!(pair[1].kind, EventKind::Exit);
            assert!(pair[0].ts_ns <= pair[1].ts_ns);
        }
        assert!(records.iter().all(|r| r.id == id), "one site, one identity");
        assert!(
            records.windows(2).all(|w| w[0].ts_ns <= w[1].ts_ns),
            "timestamps must not go backwards within a thread"
        );
    }

    // The name table resolves the interned identity offline.
    let names =
        fs::read_to_string(tmp.path().join(format!("{}.names", session.pid()))).unwrap();
    assert!(
        names.lines().any(|l| l == format!("{}\tstep", id.as_raw())),
        "names file must map the identity: {names}"
    );

    // Metadata snapshots sit beside the logs.
    assert!(tmp.path().join(format!("{}.exe", session.pid())).is_file());
    #[cfg(target_os = "linux")]
    assert!(tmp.path().join(format!("{}.maps", session.pid())).is_file());
}
