//! Event-mode logging: fixed-size binary records streamed per thread.
//!
//! Each thread owns an [`EventWriter`] that lazily opens
//! `<dir>/<pid>.<tid>.bin`, writes a [`LogHeader`], then appends
//! [`LogRecord`]s through a 64 KiB buffer (or one write per record when
//! unbuffered). Failure to open or write permanently disables the writer
//! for that thread: instrumentation may drop data, never block or crash
//! the program it observes.
//!
//! The wire format is little-endian and versioned by the magic. Encode and
//! decode are both public; offline readers are expected to live outside
//! this crate.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::clock;
use crate::ident::FnId;

/// File magic, NUL-padded to 8 bytes.
pub const MAGIC: [u8; 8] = *b"FPROFv1\0";
/// Encoded size of a [`LogHeader`].
pub const HEADER_SIZE: usize = 32;
/// Encoded size of a [`LogRecord`].
pub const RECORD_SIZE: usize = 24;
/// Header flag bit 0: timestamps come from the raw monotonic clock.
pub const FLAG_RAW_CLOCK: u32 = 1;

/// Per-thread buffer capacity. An append that would overflow flushes first.
pub(crate) const BUF_CAP: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventKind {
    Enter = 0,
    Exit = 1,
}

/// Per-file header preceding all records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogHeader {
    pub pid: u32,
    pub tid: u32,
    /// Timestamp at which the file was opened.
    pub open_ns: u64,
    /// Size of every record that follows; readers must honor this rather
    /// than assuming.
    pub record_size: u32,
    pub flags: u32,
}

impl LogHeader {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[..8].copy_from_slice(&MAGIC);
        buf[8..12].copy_from_slice(&self.pid.to_le_bytes());
        buf[12..16].copy_from_slice(&self.tid.to_le_bytes());
        buf[16..24].copy_from_slice(&self.open_ns.to_le_bytes());
        buf[24..28].copy_from_slice(&self.record_size.to_le_bytes());
        buf[28..32].copy_from_slice(&self.flags.to_le_bytes());
        buf
    }

    /// `None` if the magic does not match.
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Option<LogHeader> {
        if buf[..8] != MAGIC {
            return None;
        }
        Some(LogHeader {
            pid: u32::from_le_bytes(buf[8..12].try_into().ok()?),
            tid: u32::from_le_bytes(buf[12..16].try_into().ok()?),
            open_ns: u64::from_le_bytes(buf[16..24].try_into().ok()?),
            record_size: u32::from_le_bytes(buf[24..28].try_into().ok()?),
            flags: u32::from_le_bytes(buf[28..32].try_into().ok()?),
        })
    }
}

/// One enter or exit event. Padded to [`RECORD_SIZE`] bytes on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRecord {
    pub ts_ns: u64,
    pub id: FnId,
    pub kind: EventKind,
}

impl LogRecord {
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[..8].copy_from_slice(&self.ts_ns.to_le_bytes());
        buf[8..16].copy_from_slice(&self.id.as_raw().to_le_bytes());
        buf[16] = self.kind as u8;
        buf
    }

    /// `None` if the event-kind byte is invalid.
    pub fn decode(buf: &[u8; RECORD_SIZE]) -> Option<LogRecord> {
        let kind = match buf[16] {
            0 => EventKind::Enter,
            1 => EventKind::Exit,
            _ => return None,
        };
        Some(LogRecord {
            ts_ns: u64::from_le_bytes(buf[..8].try_into().ok()?),
            id: FnId::from_raw(u64::from_le_bytes(buf[8..16].try_into().ok()?)),
            kind,
        })
    }
}

/// Streams one thread's records to its log file. Exclusively owned by its
/// thread; never shared.
pub struct EventWriter {
    dir: PathBuf,
    pid: u32,
    unbuffered: bool,
    tid: u32,
    file: Option<File>,
    path: Option<PathBuf>,
    buf: Vec<u8>,
    records: u64,
    disabled: bool,
}

impl EventWriter {
    /// A writer for `<dir>/<pid>.<tid>.bin`. Nothing is opened until the
    /// first append.
    pub fn new(dir: PathBuf, pid: u32, unbuffered: bool) -> Self {
        EventWriter {
            dir,
            pid,
            unbuffered,
            tid: 0,
            file: None,
            path: None,
            buf: Vec::new(),
            records: 0,
            disabled: false,
        }
    }

    /// Append one record, opening the file (and writing the header) on
    /// first use. Silently drops the record if the writer is disabled.
    pub fn append(&mut self, rec: &LogRecord) {
        if self.disabled || !self.ensure_open() {
            return;
        }
        let bytes = rec.encode();

        if self.unbuffered {
            self.write_direct(&bytes);
            return;
        }

        if self.buf.len() + RECORD_SIZE > BUF_CAP {
            self.flush();
            if self.disabled {
                return;
            }
        }
        self.buf.extend_from_slice(&bytes);
        self.records += 1;
    }

    /// Write out any buffered bytes in one bulk write.
    pub fn flush(&mut self) {
        if self.disabled || self.buf.is_empty() {
            return;
        }
        let Some(file) = self.file.as_mut() else {
            return;
        };
        // write_all retries interrupted writes; anything else is fatal for
        // this writer.
        if file.write_all(&self.buf).is_err() {
            self.disable();
            return;
        }
        self.buf.clear();
    }

    /// Flush and close. The writer stays safe to call but appends nothing
    /// further once its thread is done.
    pub fn finish(&mut self) {
        if self.disabled {
            return;
        }
        self.flush();
        self.file = None;
    }

    /// Records accepted so far (buffered or written).
    pub fn record_count(&self) -> u64 {
        self.records
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// The log file's path, once the file has been opened.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn ensure_open(&mut self) -> bool {
        if self.file.is_some() {
            return true;
        }
        // Create the directory here too: a hook may fire before process
        // init ran.
        if fs::create_dir_all(&self.dir).is_err() {
            self.disable();
            return false;
        }
        self.tid = clock::thread_id();
        let path = self.dir.join(format!("{}.{}.bin", self.pid, self.tid));
        let mut file = match File::create(&path) {
            Ok(f) => f,
            Err(_) => {
                self.disable();
                return false;
            }
        };

        let header = LogHeader {
            pid: self.pid,
            tid: self.tid,
            open_ns: clock::now_ns(),
            record_size: RECORD_SIZE as u32,
            flags: if clock::RAW_CLOCK { FLAG_RAW_CLOCK } else { 0 },
        };
        if file.write_all(&header.encode()).is_err() {
            self.disable();
            return false;
        }

        self.file = Some(file);
        self.path = Some(path);
        true
    }

    fn write_direct(&mut self, bytes: &[u8; RECORD_SIZE]) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        if file.write_all(bytes).is_err() {
            self.disable();
            return;
        }
        self.records += 1;
    }

    fn disable(&mut self) {
        self.disabled = true;
        self.file = None;
        self.buf = Vec::new();
    }
}
