//! Handle Introspector
//!
//! Answers "which file does this process have open right now?" without any
//! cooperation from the process. The platform part lives behind
//! [`OpenFileProbe`]:
//! - Windows: walks the system-wide handle table, duplicates the target's
//!   handles into this process and resolves file handles to paths
//! - Linux: reads the `/proc/<pid>/fd` symlinks
//! - Anything else: never matches
//!
//! Every observed path is normalized, written to the per-pid audit log and
//! tested against the include/exclude rule; the first match wins.

mod audit;
#[cfg(target_os = "linux")]
mod procfs;
#[cfg(windows)]
mod handle_table;

pub use audit::{HandleAuditLog, HandleAuditRecord};
#[cfg(target_os = "linux")]
pub use procfs::ProcFdProbe;
#[cfg(windows)]
pub use handle_table::{enable_debug_privilege, HandleTableProbe};

use std::sync::Arc;

/// Finds an open file of a process matching an include/exclude rule
pub trait OpenFileProbe: Send + Sync {
    /// Path of the first open file of `pid` whose normalized path contains
    /// `include` and (when `exclude` is non-empty) does not contain `exclude`.
    ///
    /// Any OS failure degrades to `None`.
    fn find_open_file(&self, pid: u32, include: &str, exclude: &str) -> Option<String>;
}

/// Probe that never matches, for platforms without an implementation
#[derive(Debug, Default)]
pub struct NullProbe;

impl OpenFileProbe for NullProbe {
    fn find_open_file(&self, _pid: u32, _include: &str, _exclude: &str) -> Option<String> {
        None
    }
}

/// Probe for the current platform
pub fn platform_probe(audit: Option<Arc<HandleAuditLog>>) -> Arc<dyn OpenFileProbe> {
    #[cfg(windows)]
    {
        Arc::new(HandleTableProbe::new(audit))
    }

    #[cfg(target_os = "linux")]
    {
        Arc::new(ProcFdProbe::new(audit))
    }

    #[cfg(not(any(windows, target_os = "linux")))]
    {
        let _ = audit;
        Arc::new(NullProbe)
    }
}

const UNC_PREFIX: &str = r"\\?\unc\";
const VERBATIM_PREFIX: &str = r"\\?\";

/// Canonical form used for matching.
///
/// Separators become `\`, the text is lowercased, and verbatim (`\\?\`) and
/// verbatim-UNC (`\\?\UNC\`) prefixes are stripped. Idempotent.
pub fn normalize_path(path: &str) -> String {
    let mut s = path.replace('/', "\\").to_lowercase();
    loop {
        if let Some(rest) = s.strip_prefix(UNC_PREFIX) {
            s = format!(r"\\{}", rest);
        } else if let Some(rest) = s.strip_prefix(VERBATIM_PREFIX) {
            s = rest.to_string();
        } else {
            return s;
        }
    }
}

/// Lowercase a rule substring and unify its separators
pub fn normalize_pattern(pattern: &str) -> String {
    pattern.replace('/', "\\").to_lowercase()
}

/// Include/exclude test on an already-normalized path
pub fn path_matches(normalized: &str, include: &str, exclude: &str) -> bool {
    !normalized.is_empty()
        && normalized.contains(include)
        && (exclude.is_empty() || !normalized.contains(exclude))
}

/// Whether a `File` handle with this access mask must not have its name queried.
///
/// The masks are those of synchronous named-pipe handles, whose name queries
/// can block forever.
#[cfg_attr(not(windows), allow(dead_code))]
pub(crate) fn name_query_may_block(granted_access: u32) -> bool {
    const BLOCKING_ACCESS_MASKS: [u32; 4] = [0x0012_019F, 0x001A_019F, 0x0012_0189, 0x0010_0000];
    BLOCKING_ACCESS_MASKS.contains(&granted_access)
}

/// Normalize, audit and test one observed path
pub(crate) fn observe_path(
    audit: Option<&HandleAuditLog>,
    pid: u32,
    record: HandleAuditRecord<'_>,
    include: &str,
    exclude: &str,
) -> bool {
    if let Some(audit) = audit {
        audit.record(pid, &record);
    }
    path_matches(&normalize_path(record.path), include, exclude)
}
