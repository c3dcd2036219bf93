//! Game Argument Builder
//!
//! Turns the user's base argument string plus the launcher flags into the
//! single argument string every client is spawned with.

use crate::config::{LauncherConfig, DEFAULT_GAME_ARGS};
use once_cell::sync::Lazy;
use regex::Regex;

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static MAX_FPS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bmaxfps=(\d+)\b").expect("valid regex"));

/// Flags folded into the base arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgOptions {
    pub windowed: bool,
    pub log: bool,
    pub bot_mode: bool,
    pub res_x: u32,
    pub res_y: u32,
}

impl From<&LauncherConfig> for ArgOptions {
    fn from(config: &LauncherConfig) -> Self {
        Self {
            windowed: config.windowed,
            log: config.log,
            bot_mode: config.bot_mode,
            res_x: config.res_x,
            res_y: config.res_y,
        }
    }
}

/// Final argument string and the frame-rate settings derived from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameArgs {
    pub args: String,
    /// Bot frame cap should be written into the engine config
    pub frame_cap_active: bool,
    pub max_fps: u32,
}

/// Collapse CR/LF/TAB and whitespace runs into single spaces
pub fn normalize_args(args: &str) -> String {
    let flattened = args.replace(['\r', '\n', '\t'], " ");
    WHITESPACE_RUN.replace_all(&flattened, " ").trim().to_string()
}

/// Drop every occurrence of `token` (case-insensitive, whole token)
pub fn remove_token(args: &str, token: &str) -> String {
    normalize_args(args)
        .split(' ')
        .filter(|t| !t.eq_ignore_ascii_case(token))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Drop `-log` and any `-log=...` variant
pub fn remove_log_arg(args: &str) -> String {
    normalize_args(args)
        .split(' ')
        .filter(|t| {
            let lower = t.to_ascii_lowercase();
            lower != "-log" && !lower.starts_with("-log=")
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Replace an existing numeric `key=N` or append `key=value`
pub fn set_or_append_key_value(args: &str, key: &str, value: &str) -> String {
    let args = normalize_args(args);
    let pattern = Regex::new(&format!(r"(?i)\b{}=\d+\b", regex::escape(key)))
        .expect("escaped key is a valid regex");
    let replacement = format!("{}={}", key, value);

    if pattern.is_match(&args) {
        normalize_args(&pattern.replace_all(&args, regex::NoExpand(&replacement)))
    } else {
        normalize_args(&format!("{} {}", args, replacement))
    }
}

/// Build the argument string every client is launched with
pub fn build_game_args(base: &str, options: &ArgOptions) -> GameArgs {
    let mut args = if base.trim().is_empty() {
        DEFAULT_GAME_ARGS.to_string()
    } else {
        normalize_args(base)
    };

    args = remove_token(&args, "-windowed");
    if options.windowed {
        args.push_str(" -windowed");
    }

    args = remove_log_arg(&args);
    if options.log {
        args.push_str(" -log");
    }

    args = set_or_append_key_value(&args, "ResX", &options.res_x.to_string());
    args = set_or_append_key_value(&args, "ResY", &options.res_y.to_string());

    if options.bot_mode && !MAX_FPS.is_match(&args) {
        args.push_str(" maxfps=1");
    }

    let frame_cap_active = options.bot_mode || args.to_ascii_lowercase().contains("bot");

    let max_fps = MAX_FPS
        .captures(&args)
        .and_then(|c| c[1].parse::<u32>().ok())
        .unwrap_or(1);

    GameArgs {
        args: normalize_args(&args),
        frame_cap_active,
        max_fps,
    }
}
