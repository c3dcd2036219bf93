//! Swarm Launcher Core Library
//!
//! Launches many copies of the game client and drives them to the in-game
//! state without any cooperation from the game:
//! - Spawns clients, tiles their windows and types logins into them
//! - Keeps nudging each client with Enter until it is past its dialogs
//! - Detects login by watching which map file each client has open
//!
//! Architecture:
//! - OS access sits behind the `Desktop`, `OpenFileProbe` and
//!   `ProcessSpawner` traits
//! - One `SessionState` behind one lock is shared by the orchestrator, the
//!   spam retry threads and the login monitor
//! - A `StopSignal` is checked at every blocking point

pub mod args;
pub mod config;
pub mod credentials;
pub mod desktop;
pub mod error;
pub mod events;
pub mod game_config;
pub mod input;
pub mod introspect;
pub mod monitor;
pub mod orchestrator;
pub mod process;
pub mod session;
pub mod spam;
pub mod stop;

pub use error::{LauncherError, Result};
pub use events::{EventSink, RunEvent, RunOutcome};
pub use orchestrator::{LaunchRequest, LaunchTimings, Orchestrator};
pub use stop::StopSignal;
