//! Open-file probe backed by `/proc/<pid>/fd`
//!
//! Each entry is a symlink to the object the descriptor refers to. Absolute
//! targets are files; `socket:[..]`, `pipe:[..]` and `anon_inode:..` targets
//! are skipped the way non-file handle types are skipped on Windows.

use super::{normalize_pattern, observe_path, HandleAuditLog, HandleAuditRecord, OpenFileProbe};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
pub struct ProcFdProbe {
    audit: Option<Arc<HandleAuditLog>>,
    root: PathBuf,
}

impl ProcFdProbe {
    pub fn new(audit: Option<Arc<HandleAuditLog>>) -> Self {
        Self {
            audit,
            root: PathBuf::from("/proc"),
        }
    }
}

impl OpenFileProbe for ProcFdProbe {
    fn find_open_file(&self, pid: u32, include: &str, exclude: &str) -> Option<String> {
        if pid == 0 {
            return None;
        }

        let include = normalize_pattern(include);
        let exclude = normalize_pattern(exclude);
        let fd_dir = self.root.join(pid.to_string()).join("fd");

        let entries = match fs::read_dir(&fd_dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Cannot read {:?}: {}", fd_dir, e);
                return None;
            }
        };

        let mut scanned = 0usize;
        for entry in entries.flatten() {
            let Some(fd) = entry.file_name().to_str().and_then(|s| s.parse::<u64>().ok()) else {
                continue;
            };

            // Descriptor may close between listing and readlink
            let Ok(target) = fs::read_link(entry.path()) else {
                continue;
            };
            if !target.is_absolute() {
                continue;
            }

            let path = target.to_string_lossy();
            scanned += 1;

            let record = HandleAuditRecord {
                handle_value: fd,
                object_type: "File",
                path: &path,
            };
            if observe_path(self.audit.as_deref(), pid, record, &include, &exclude) {
                debug!("MATCHED (FILE) PID={}: {}", pid, path);
                return Some(path.into_owned());
            }
        }

        debug!("PID {}: scanned {} file descriptors, no match", pid, scanned);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn test_finds_own_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let maps = dir.path().join("TgGame").join("CookedPC").join("Maps");
        fs::create_dir_all(&maps).unwrap();
        let _held = File::create(maps.join("Arena.upk")).unwrap();
        let arena = fs::canonicalize(maps.join("Arena.upk")).unwrap();

        let probe = ProcFdProbe::new(None);
        let found = probe.find_open_file(std::process::id(), "tggame/cookedpc/maps/", "login");
        assert_eq!(found.as_deref(), Some(arena.to_str().unwrap()));
    }

    #[test]
    fn test_exclude_rejects_login_map() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("excl").join("maps")).unwrap();
        let maps = fs::canonicalize(dir.path().join("excl").join("maps")).unwrap();
        let _held = File::create(maps.join("Login_Screen.upk")).unwrap();

        let probe = ProcFdProbe::new(None);
        let include = format!("{}/", maps.to_str().unwrap());
        assert_eq!(probe.find_open_file(std::process::id(), &include, "login"), None);
        assert!(probe.find_open_file(std::process::id(), &include, "").is_some());
    }

    #[test]
    fn test_no_match_without_open_file() {
        let probe = ProcFdProbe::new(None);
        assert_eq!(
            probe.find_open_file(std::process::id(), "no-such-marker-7f3a9c", ""),
            None
        );
        assert_eq!(probe.find_open_file(0, "", ""), None);
        assert_eq!(probe.find_open_file(u32::MAX, "", ""), None);
    }

    #[test]
    fn test_observed_paths_are_audited() {
        let dir = tempfile::tempdir().unwrap();
        let audit_dir = dir.path().join("audit");
        let _held = File::create(dir.path().join("held.bin")).unwrap();
        let held_path = fs::canonicalize(dir.path().join("held.bin")).unwrap();

        let audit = Arc::new(HandleAuditLog::new(&audit_dir));
        let probe = ProcFdProbe::new(Some(audit.clone()));
        let include = held_path.to_str().unwrap().to_string();
        assert!(probe.find_open_file(std::process::id(), &include, "").is_some());
        audit.close_all();

        let text = fs::read_to_string(audit.file_for(std::process::id())).unwrap();
        assert!(text.contains("held.bin"));
    }
}
