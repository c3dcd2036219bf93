//! Per-pid handle audit files
//!
//! One `pid{PID}_handles.txt` per observed process, truncated the first time
//! the pid is seen in this run and appended to afterwards. Purely diagnostic.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// One resolved handle
#[derive(Debug, Clone, Copy)]
pub struct HandleAuditRecord<'a> {
    pub handle_value: u64,
    pub object_type: &'a str,
    pub path: &'a str,
}

#[derive(Debug)]
struct AuditWriter<W> {
    // None marks a pid whose file could not be created
    out: Option<W>,
    write_failed: bool,
}

impl<W: Write> AuditWriter<W> {
    fn new(out: Option<W>) -> Self {
        Self {
            out,
            write_failed: false,
        }
    }

    /// Write one line; only the first failure per pid is logged
    fn append(&mut self, pid: u32, record: &HandleAuditRecord<'_>) -> bool {
        let Some(out) = self.out.as_mut() else {
            return false;
        };
        let result = writeln!(
            out,
            "0x{:016X} | {:<12} | {}",
            record.handle_value, record.object_type, record.path
        );
        match result {
            Ok(()) => true,
            Err(e) => {
                if !self.write_failed {
                    debug!("Handle audit write for PID {} failed: {}", pid, e);
                    self.write_failed = true;
                }
                false
            }
        }
    }
}

/// Writer registry for per-pid audit files
#[derive(Debug)]
pub struct HandleAuditLog {
    dir: PathBuf,
    writers: Mutex<HashMap<u32, AuditWriter<File>>>,
}

impl HandleAuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            writers: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the audit file for `pid`
    pub fn file_for(&self, pid: u32) -> PathBuf {
        self.dir.join(format!("pid{}_handles.txt", pid))
    }

    fn open(&self, pid: u32) -> Option<File> {
        let path = self.file_for(pid);
        let result = fs::create_dir_all(&self.dir)
            .and_then(|_| File::create(&path))
            .and_then(|mut file| {
                let stamp = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or_default();
                writeln!(file, "# File handle dump for PID {} - unix time {}", pid, stamp)?;
                writeln!(file, "# Format: handle_value | object_type | path")?;
                writeln!(file, "#{}", "-".repeat(79))?;
                Ok(file)
            });

        match result {
            Ok(file) => {
                info!("Created handle log file: {:?}", path);
                Some(file)
            }
            Err(e) => {
                warn!("Failed to create {:?}: {}", path, e);
                None
            }
        }
    }

    /// Append one record; records with an empty path are skipped
    pub fn record(&self, pid: u32, record: &HandleAuditRecord<'_>) {
        if record.path.is_empty() {
            return;
        }

        let mut writers = self.writers.lock();
        writers
            .entry(pid)
            .or_insert_with(|| AuditWriter::new(self.open(pid)))
            .append(pid, record);
    }

    /// Close every open audit file
    pub fn close_all(&self) {
        self.writers.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_are_appended_per_pid() {
        let dir = tempfile::tempdir().unwrap();
        let audit = HandleAuditLog::new(dir.path());

        let rec = |path| HandleAuditRecord {
            handle_value: 0x1A4,
            object_type: "File",
            path,
        };
        audit.record(42, &rec(r"C:\a.txt"));
        audit.record(42, &rec(r"C:\b.txt"));
        audit.record(7, &rec(r"C:\c.txt"));
        audit.record(7, &rec(""));
        audit.close_all();

        let text = fs::read_to_string(audit.file_for(42)).unwrap();
        let lines: Vec<_> = text.lines().filter(|l| !l.starts_with('#')).collect();
        assert_eq!(
            lines,
            vec![
                r"0x00000000000001A4 | File         | C:\a.txt",
                r"0x00000000000001A4 | File         | C:\b.txt",
            ]
        );

        let text = fs::read_to_string(audit.file_for(7)).unwrap();
        assert_eq!(text.lines().filter(|l| !l.starts_with('#')).count(), 1);
    }

    #[test]
    fn test_file_is_truncated_per_run() {
        let dir = tempfile::tempdir().unwrap();
        let rec = HandleAuditRecord {
            handle_value: 4,
            object_type: "File",
            path: "/tmp/x",
        };

        let first = HandleAuditLog::new(dir.path());
        first.record(1, &rec);
        first.record(1, &rec);
        drop(first);

        let second = HandleAuditLog::new(dir.path());
        second.record(1, &rec);
        drop(second);

        let text = fs::read_to_string(dir.path().join("pid1_handles.txt")).unwrap();
        assert_eq!(text.lines().filter(|l| !l.starts_with('#')).count(), 1);
    }

    struct FullDisk {
        attempts: usize,
    }

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            self.attempts += 1;
            Err(std::io::Error::new(std::io::ErrorKind::Other, "no space left on device"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_failure_is_flagged_and_retried() {
        let rec = HandleAuditRecord {
            handle_value: 8,
            object_type: "File",
            path: r"C:.txt",
        };
        let mut writer = AuditWriter::new(Some(FullDisk { attempts: 0 }));
        assert!(!writer.write_failed);

        assert!(!writer.append(3, &rec));
        assert!(writer.write_failed);
        assert!(!writer.append(3, &rec));
        assert!(writer.out.as_ref().is_some_and(|w| w.attempts >= 2));

        let mut missing = AuditWriter::<FullDisk>::new(None);
        assert!(!missing.append(3, &rec));
        assert!(!missing.write_failed);
    }
}
