//! Game config preparation
//!
//! Files the client reads at startup, relative to its `Binaries` folder:
//! - `../tggame/Config/TgDev.ini` enables automated login
//! - `../tggame/Config/TgEngine.ini` gets its smoothed frame rate clamped when
//!   the frame cap is active
//!
//! Both steps are best-effort: failures are logged and the launch continues.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const AUTOMATION_INI: &str = "[TgGame.TgDebug]\nAutomateLogin=True\nSaveAccountInfo=True\n";
const MIN_FRAME_RATE_KEY: &str = "MinSmoothedFrameRate=";

/// `tggame/Config` directory for a game working directory
pub fn config_dir(working_dir: &Path) -> PathBuf {
    working_dir.join("..").join("tggame").join("Config")
}

/// Write `TgDev.ini`, creating its directory
pub fn write_automation_ini(working_dir: &Path) -> bool {
    let dir = config_dir(working_dir);
    let path = dir.join("TgDev.ini");
    match fs::create_dir_all(&dir).and_then(|_| fs::write(&path, AUTOMATION_INI)) {
        Ok(()) => {
            info!("Wrote {:?}", path);
            true
        }
        Err(e) => {
            warn!("Failed to write {:?}: {}", path, e);
            false
        }
    }
}

/// Rewrite the frame rate pair in `TgEngine.ini` contents.
///
/// The first line starting with `MinSmoothedFrameRate=` (any case) becomes
/// `MinSmoothedFrameRate=1.000000` and the line after it the max rate.
/// Returns `None` when the marker is absent.
pub fn patch_frame_rate_lines(contents: &str, max_fps: u32) -> Option<String> {
    let mut lines: Vec<String> = contents.lines().map(str::to_string).collect();
    let index = lines.iter().position(|line| {
        line.get(..MIN_FRAME_RATE_KEY.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(MIN_FRAME_RATE_KEY))
    })?;

    lines[index] = "MinSmoothedFrameRate=1.000000".to_string();
    if let Some(next) = lines.get_mut(index + 1) {
        *next = format!("MaxSmoothedFrameRate={}.000000", max_fps);
    }

    let mut patched = lines.join("\r\n");
    patched.push_str("\r\n");
    Some(patched)
}

/// Patch `TgEngine.ini` in place; a missing file or marker leaves it alone
pub fn patch_engine_ini(working_dir: &Path, max_fps: u32) -> bool {
    let path = config_dir(working_dir).join("TgEngine.ini");
    if !path.exists() {
        return false;
    }

    let contents = match fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read {:?}: {}", path, e);
            return false;
        }
    };

    let Some(patched) = patch_frame_rate_lines(&contents, max_fps) else {
        return false;
    };

    match fs::write(&path, patched) {
        Ok(()) => {
            info!("Patched {:?} (max fps {})", path, max_fps);
            true
        }
        Err(e) => {
            warn!("Failed to write {:?}: {}", path, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_replaces_pair() {
        let ini = "[Engine.GameEngine]\nbSmoothFrameRate=TRUE\nminsmoothedframerate=22\nMaxSmoothedFrameRate=62\nOther=1\n";
        let patched = patch_frame_rate_lines(ini, 5).unwrap();
        let lines: Vec<_> = patched.lines().collect();
        assert_eq!(lines[2], "MinSmoothedFrameRate=1.000000");
        assert_eq!(lines[3], "MaxSmoothedFrameRate=5.000000");
        assert_eq!(lines[4], "Other=1");
    }

    #[test]
    fn test_patch_without_marker_or_next_line() {
        assert_eq!(patch_frame_rate_lines("[Engine]\nFoo=1\n", 1), None);

        let patched = patch_frame_rate_lines("MinSmoothedFrameRate=22", 3).unwrap();
        assert_eq!(patched.lines().collect::<Vec<_>>(), vec!["MinSmoothedFrameRate=1.000000"]);
    }

    #[test]
    fn test_write_automation_ini_creates_dirs() {
        let root = tempfile::tempdir().unwrap();
        let binaries = root.path().join("Binaries");
        fs::create_dir_all(&binaries).unwrap();

        assert!(write_automation_ini(&binaries));
        let text = fs::read_to_string(root.path().join("tggame/Config/TgDev.ini")).unwrap();
        assert!(text.contains("AutomateLogin=True"));
        assert!(text.contains("SaveAccountInfo=True"));
    }

    #[test]
    fn test_patch_engine_ini_on_disk() {
        let root = tempfile::tempdir().unwrap();
        let binaries = root.path().join("Binaries");
        fs::create_dir_all(&binaries).unwrap();
        assert!(!patch_engine_ini(&binaries, 1));

        let dir = config_dir(&binaries);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("TgEngine.ini"), "MinSmoothedFrameRate=22\r\nMaxSmoothedFrameRate=62\r\n").unwrap();

        assert!(patch_engine_ini(&binaries, 1));
        let text = fs::read_to_string(dir.join("TgEngine.ini")).unwrap();
        assert_eq!(text, "MinSmoothedFrameRate=1.000000\r\nMaxSmoothedFrameRate=1.000000\r\n");
    }
}
