//! Game client processes
//!
//! Resolves the game executable, prepares its config files and spawns client
//! processes. Spawning goes through [`ProcessSpawner`] so a run can be driven
//! without a real game installed.

use crate::args::GameArgs;
use crate::error::{LauncherError, Result};
use crate::game_config;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use tracing::{info, warn};

/// Install locations searched under each drive root
const INSTALL_BASES: [&str; 3] = [
    "SteamLibrary",
    r"Program Files (x86)\Steam",
    r"Program Files\Steam",
];

/// Executable location below an install base
const INSTALL_SUFFIX: [&str; 5] = [
    "steamapps",
    "common",
    "Global Agenda Live",
    "Binaries",
    "GlobalAgenda.exe",
];

/// A spawned game client
#[derive(Debug)]
pub struct ClientProcess {
    pub pid: u32,
    child: Option<Child>,
}

impl ClientProcess {
    pub fn new(pid: u32, child: Option<Child>) -> Self {
        Self { pid, child }
    }

    pub fn from_child(child: Child) -> Self {
        Self {
            pid: child.id(),
            child: Some(child),
        }
    }

    /// Kill the process; an already-exited process counts as terminated
    pub fn terminate(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return true;
        };

        if let Ok(Some(status)) = child.try_wait() {
            info!("PID {} already exited ({})", self.pid, status);
            return true;
        }

        match child.kill() {
            Ok(()) => {
                let _ = child.wait();
                info!("Killed PID {}", self.pid);
                true
            }
            Err(e) => {
                warn!("Error killing PID {}: {}", self.pid, e);
                false
            }
        }
    }
}

/// Executable path plus the directory the client must run in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedExecutable {
    pub path: PathBuf,
    pub working_dir: PathBuf,
}

impl ResolvedExecutable {
    fn from_file(path: PathBuf) -> Self {
        let working_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self { path, working_dir }
    }
}

/// Existing drive roots `C:\` through `Z:\`
pub fn drive_roots() -> Vec<PathBuf> {
    if !cfg!(windows) {
        return Vec::new();
    }
    ('C'..='Z')
        .map(|d| PathBuf::from(format!(r"{}:\", d)))
        .filter(|root| root.is_dir())
        .collect()
}

/// Find the game executable.
///
/// An existing absolute path runs from its own folder, an existing relative
/// path from the current directory. Otherwise every search root is checked
/// for a Steam install.
pub fn resolve_game_executable(exe: &str, search_roots: &[PathBuf]) -> Result<ResolvedExecutable> {
    let exe = exe.trim();
    let candidate = Path::new(exe);

    if !exe.is_empty() && candidate.is_file() {
        if candidate.is_absolute() {
            return Ok(ResolvedExecutable::from_file(candidate.to_path_buf()));
        }
        let cwd = std::env::current_dir().map_err(|source| LauncherError::Io {
            path: PathBuf::from("."),
            source,
        })?;
        return Ok(ResolvedExecutable {
            path: cwd.join(candidate),
            working_dir: cwd,
        });
    }

    for root in search_roots {
        for base in INSTALL_BASES {
            let mut path = root.join(base);
            path.extend(INSTALL_SUFFIX);
            if path.is_file() {
                info!("Found game install: {:?}", path);
                return Ok(ResolvedExecutable::from_file(path));
            }
        }
    }

    Err(LauncherError::ExecutableNotFound(exe.to_string()))
}

/// Creates game client processes
pub trait ProcessSpawner: Send + Sync {
    /// Locate the executable for `exe`
    fn resolve(&self, exe: &str) -> Result<ResolvedExecutable>;

    /// One-time preparation before the first spawn
    fn prepare(&self, _resolved: &ResolvedExecutable, _args: &GameArgs) {}

    /// Start one client with the full argument string
    fn spawn(&self, resolved: &ResolvedExecutable, args: &str) -> Result<ClientProcess>;
}

/// Spawns the real game client
#[derive(Debug, Default)]
pub struct GameClientSpawner;

impl GameClientSpawner {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessSpawner for GameClientSpawner {
    fn resolve(&self, exe: &str) -> Result<ResolvedExecutable> {
        resolve_game_executable(exe, &drive_roots())
    }

    fn prepare(&self, resolved: &ResolvedExecutable, args: &GameArgs) {
        game_config::write_automation_ini(&resolved.working_dir);
        if args.frame_cap_active {
            game_config::patch_engine_ini(&resolved.working_dir, args.max_fps);
        }
    }

    fn spawn(&self, resolved: &ResolvedExecutable, args: &str) -> Result<ClientProcess> {
        let mut command = Command::new(&resolved.path);
        command.current_dir(&resolved.working_dir);

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            command.raw_arg(args);
        }
        #[cfg(not(windows))]
        {
            command.args(args.split_whitespace());
        }

        let child = command.spawn().map_err(|source| LauncherError::Spawn {
            exe: resolved.path.clone(),
            source,
        })?;

        #[cfg(windows)]
        wait_for_input_idle(&child);

        Ok(ClientProcess::from_child(child))
    }
}

/// Give a fresh client up to five seconds to reach its message loop
#[cfg(windows)]
fn wait_for_input_idle(child: &Child) {
    use std::os::windows::io::AsRawHandle;
    use windows::Win32::Foundation::HANDLE;
    use windows::Win32::UI::WindowsAndMessaging::WaitForInputIdle;

    unsafe {
        WaitForInputIdle(HANDLE(child.as_raw_handle() as isize), 5000);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_absolute_path_runs_from_its_folder() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("Binaries").join("Game.exe");
        touch(&exe);

        let resolved = resolve_game_executable(exe.to_str().unwrap(), &[]).unwrap();
        assert_eq!(resolved.path, exe);
        assert_eq!(resolved.working_dir, dir.path().join("Binaries"));
    }

    #[test]
    fn test_searches_install_roots() {
        let drive = tempfile::tempdir().unwrap();
        let mut exe = drive.path().join(r"Program Files\Steam");
        exe.extend(INSTALL_SUFFIX);
        touch(&exe);

        let empty = tempfile::tempdir().unwrap();
        let roots = vec![empty.path().to_path_buf(), drive.path().to_path_buf()];
        let resolved = resolve_game_executable("GlobalAgenda.exe", &roots).unwrap();
        assert_eq!(resolved.path, exe);
        assert!(resolved.working_dir.ends_with("Binaries"));
    }

    #[test]
    fn test_missing_executable_is_an_error() {
        let empty = tempfile::tempdir().unwrap();
        let err = resolve_game_executable("NoSuchGame-41.exe", &[empty.path().to_path_buf()])
            .unwrap_err();
        assert!(matches!(err, LauncherError::ExecutableNotFound(ref exe) if exe == "NoSuchGame-41.exe"));
    }

    #[test]
    fn test_terminate_without_child() {
        let mut process = ClientProcess::new(1234, None);
        assert!(process.terminate());
    }
}
