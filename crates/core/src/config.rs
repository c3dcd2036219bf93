/// Configuration module for the swarm launcher.
///
/// This module provides functionality for managing launcher configuration,
/// including:
/// - The game executable and its base argument string
/// - Manual login credentials and the requested client amount
/// - Window/resolution flags folded into the game arguments
/// - Login detection tuning (markers, threshold, poll interval)
/// - Persisting configuration to disk as JSON
///
/// The configuration is saved to and loaded from a `config.json` file located
/// in the platform-specific application data directory
/// (%APPDATA%/SwarmLauncher/ on Windows).
use crate::error::{LauncherError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default game executable name
pub const DEFAULT_GAME_EXE: &str = "GlobalAgenda.exe";

/// Default argument string passed to every client
pub const DEFAULT_GAME_ARGS: &str = "-host=agendorks.ydns.eu -hostdns=gaserveragendorks -seekfreeloading -nostartupmovies -nosplash -tcp=300";

/// Path fragment every gameplay map asset lives under
pub const DEFAULT_MAP_MARKER: &str = r"tggame\cookedpc\maps\";

/// Substring identifying the login-screen map
pub const DEFAULT_LOGIN_MARKER: &str = "login";

/// Name of the multi-account store inside the data directory
pub const ACCOUNTS_FILE_NAME: &str = "accounts.db";

const CONFIG_FILE_NAME: &str = "config.json";

/// Launcher configuration
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LauncherConfig {
    /// Executable name or full path
    pub game_exe: String,
    /// Base argument string (flags below are folded in at launch)
    pub game_args: String,
    /// Manual username (single-credential mode)
    pub username: String,
    /// Manual password (single-credential mode)
    pub password: String,
    /// Requested client amount as entered; clamped when used
    pub client_amount: String,
    pub windowed: bool,
    /// Pass `-log` to the game
    pub log: bool,
    /// Cap client frame rate for bots
    pub bot_mode: bool,
    pub res_x: u32,
    pub res_y: u32,
    /// Multi-account store; `None` means `accounts.db` in the data directory
    pub accounts_file: Option<PathBuf>,
    pub map_marker: String,
    pub login_marker: String,
    /// Consecutive map observations needed to confirm a login
    pub map_confirm_threshold: u32,
    pub poll_interval_secs: u64,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        LauncherConfig {
            game_exe: DEFAULT_GAME_EXE.to_string(),
            game_args: DEFAULT_GAME_ARGS.to_string(),
            username: String::new(),
            password: String::new(),
            client_amount: "7".to_string(),
            windowed: true,
            log: false,
            bot_mode: false,
            res_x: 186,
            res_y: 91,
            accounts_file: None,
            map_marker: DEFAULT_MAP_MARKER.to_string(),
            login_marker: DEFAULT_LOGIN_MARKER.to_string(),
            map_confirm_threshold: 1,
            poll_interval_secs: 10,
        }
    }
}

impl LauncherConfig {
    /// Threshold with the lower bound applied
    pub fn confirm_threshold(&self) -> u32 {
        self.map_confirm_threshold.max(1)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    /// Resolve the accounts store path against the data directory
    pub fn accounts_path(&self, data_dir: &Path) -> PathBuf {
        self.accounts_file
            .clone()
            .unwrap_or_else(|| data_dir.join(ACCOUNTS_FILE_NAME))
    }
}

/// Get the application's data directory
/// Returns %APPDATA%/SwarmLauncher/ on Windows
/// Creates directory if it doesn't exist
pub fn get_data_directory() -> Result<PathBuf> {
    let project_dirs =
        ProjectDirs::from("", "", "SwarmLauncher").ok_or(LauncherError::NoDataDirectory)?;

    let data_dir = project_dirs.data_dir();

    fs::create_dir_all(data_dir).map_err(|source| LauncherError::Io {
        path: data_dir.to_path_buf(),
        source,
    })?;

    Ok(data_dir.to_path_buf())
}

/// Load configuration from `config.json` in `data_dir`
/// Returns default config if file doesn't exist or on error
pub fn load_config_from(data_dir: &Path) -> LauncherConfig {
    let config_path = data_dir.join(CONFIG_FILE_NAME);

    if !config_path.exists() {
        return LauncherConfig::default();
    }

    let Ok(contents) = fs::read_to_string(&config_path) else {
        tracing::warn!("Failed to read {:?}, using defaults", config_path);
        return LauncherConfig::default();
    };

    serde_json::from_str(&contents).unwrap_or_else(|e| {
        tracing::warn!("Invalid config {:?} ({}), using defaults", config_path, e);
        LauncherConfig::default()
    })
}

/// Save configuration to `config.json` in `data_dir`
pub fn save_config_to(config: &LauncherConfig, data_dir: &Path) -> Result<()> {
    let config_path = data_dir.join(CONFIG_FILE_NAME);

    let json = serde_json::to_string_pretty(config)?;

    fs::write(&config_path, json).map_err(|source| LauncherError::Io {
        path: config_path,
        source,
    })?;

    Ok(())
}
