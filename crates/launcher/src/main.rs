//! SwarmLauncher - command-line front end
//!
//! This process:
//! - Loads the saved configuration and applies command-line overrides
//! - Wires the stop surfaces (F8 hotkey on Windows, `stop` on stdin)
//! - Runs the orchestrator on a worker thread and reports its progress
//! - Offers a one-shot `probe` of a process's open files for diagnostics

#[cfg(windows)]
mod hotkey;
mod logging;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use swarm_launcher_core::config::{self, LauncherConfig, DEFAULT_LOGIN_MARKER, DEFAULT_MAP_MARKER};
use swarm_launcher_core::desktop::platform_desktop;
use swarm_launcher_core::introspect::{platform_probe, HandleAuditLog};
use swarm_launcher_core::process::GameClientSpawner;
use swarm_launcher_core::{EventSink, LaunchRequest, Orchestrator, RunEvent, RunOutcome, StopSignal};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "SwarmLauncher", version, about = "Launch and log in a swarm of game clients")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Launch clients, log them in and wait until they reach a map (default)
    Launch(LaunchArgs),
    /// Scan one process's open files once
    Probe {
        #[arg(long)]
        pid: u32,
        #[arg(long, default_value = DEFAULT_MAP_MARKER)]
        include: String,
        #[arg(long, default_value = DEFAULT_LOGIN_MARKER)]
        exclude: String,
        /// Write the observed paths to the handle audit directory
        #[arg(long)]
        audit: bool,
    },
}

/// Overrides for the saved configuration
#[derive(Args, Debug, Default)]
struct LaunchArgs {
    /// Game executable name or full path
    #[arg(long)]
    exe: Option<String>,
    /// Base game argument string
    #[arg(long, allow_hyphen_values = true)]
    args: Option<String>,
    #[arg(long, short)]
    username: Option<String>,
    #[arg(long, short)]
    password: Option<String>,
    /// Client count for single-login runs (1-100)
    #[arg(long, short = 'n')]
    clients: Option<String>,
    #[arg(long)]
    windowed: Option<bool>,
    /// Pass -log to the game
    #[arg(long)]
    log: Option<bool>,
    /// Cap client frame rate
    #[arg(long)]
    bot: Option<bool>,
    #[arg(long)]
    res_x: Option<u32>,
    #[arg(long)]
    res_y: Option<u32>,
    /// Account store with one username:password per line
    #[arg(long)]
    accounts: Option<PathBuf>,
    /// Consecutive map observations needed to confirm a login
    #[arg(long)]
    threshold: Option<u32>,
    #[arg(long)]
    poll_secs: Option<u64>,
    /// Directory for pid{PID}_handles.txt audit files
    #[arg(long)]
    audit_dir: Option<PathBuf>,
    /// Persist the merged configuration
    #[arg(long)]
    save_config: bool,
}

impl LaunchArgs {
    fn apply(&self, config: &mut LauncherConfig) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *target = v.clone();
            }
        }

        set(&mut config.game_exe, &self.exe);
        set(&mut config.game_args, &self.args);
        set(&mut config.username, &self.username);
        set(&mut config.password, &self.password);
        set(&mut config.client_amount, &self.clients);
        set(&mut config.windowed, &self.windowed);
        set(&mut config.log, &self.log);
        set(&mut config.bot_mode, &self.bot);
        set(&mut config.res_x, &self.res_x);
        set(&mut config.res_y, &self.res_y);
        set(&mut config.map_confirm_threshold, &self.threshold);
        set(&mut config.poll_interval_secs, &self.poll_secs);
        if let Some(accounts) = &self.accounts {
            config.accounts_file = Some(accounts.clone());
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let data_dir = config::get_data_directory();
    let _log_guard = logging::init_logging(data_dir.as_ref().ok().map(|d| d.join("logs")).as_deref());

    info!("SwarmLauncher starting...");

    let data_dir = match data_dir {
        Ok(dir) => dir,
        Err(e) => {
            warn!("{}, using the current directory", e);
            std::env::current_dir().context("Failed to get current directory")?
        }
    };

    match cli.command.unwrap_or_else(|| Command::Launch(LaunchArgs::default())) {
        Command::Launch(args) => run_launch(args, data_dir),
        Command::Probe {
            pid,
            include,
            exclude,
            audit,
        } => run_probe(pid, &include, &exclude, audit.then(|| data_dir.join("handles"))),
    }
}

fn run_launch(args: LaunchArgs, data_dir: PathBuf) -> Result<()> {
    let mut config = config::load_config_from(&data_dir);
    args.apply(&mut config);

    if args.save_config {
        config::save_config_to(&config, &data_dir).context("Failed to save configuration")?;
        info!("Configuration saved to {:?}", data_dir);
    }

    let request = LaunchRequest::from_config(&config, &data_dir);
    let stop = StopSignal::new();
    spawn_stdin_listener(stop.clone());
    #[cfg(windows)]
    hotkey::spawn_stop_hotkey(stop.clone());

    let audit = Arc::new(HandleAuditLog::new(
        args.audit_dir.unwrap_or_else(|| data_dir.join("handles")),
    ));
    info!("Handle audit files go to {:?}", audit.dir());

    let (events, rx) = EventSink::channel();
    let orchestrator = Orchestrator::new(
        Arc::new(GameClientSpawner::new()),
        platform_desktop(),
        platform_probe(Some(audit.clone())),
        stop,
        events,
    );

    let worker = thread::Builder::new()
        .name("orchestrator".into())
        .spawn(move || orchestrator.run(&request))
        .context("Failed to start orchestrator thread")?;

    // Ends once the orchestrator and every event sink are dropped
    for event in rx.iter() {
        report(&event);
    }

    let outcome = match worker.join() {
        Ok(outcome) => outcome,
        Err(_) => {
            error!("Orchestrator thread panicked");
            RunOutcome::Aborted("orchestrator thread panicked".into())
        }
    };
    audit.close_all();

    info!("SwarmLauncher finished: {:?}", outcome);
    Ok(())
}

fn report(event: &RunEvent) {
    match event {
        RunEvent::Launched { pid } => println!("Launched client PID {}", pid),
        RunEvent::WindowsLocated { count } => println!("Found {} client windows", count),
        RunEvent::Tiled { moved } => println!("Tiled {} windows", moved),
        RunEvent::CredentialSent { pid, username } => {
            println!("Sent login for {} to PID {}", username, pid)
        }
        RunEvent::MapObserved { pid, path } => println!("PID {} opened {}", pid, path.display()),
        RunEvent::Confirmed { pid } => println!("PID {} is in game", pid),
        RunEvent::Terminated { pid } => println!("Terminated PID {}", pid),
        RunEvent::Finished(outcome) => match outcome {
            RunOutcome::AllConfirmed(pids) => println!("All {} clients in game", pids.len()),
            RunOutcome::Winner(pid) => println!("PID {} won the login race", pid),
            RunOutcome::NoWindows => println!("No client windows found"),
            RunOutcome::Stopped => println!("Stopped"),
            RunOutcome::Aborted(message) => println!("Run aborted: {}", message),
        },
    }
}

/// Request a stop when `stop` (or `q`) is typed on stdin
fn spawn_stdin_listener(stop: StopSignal) {
    let spawned = thread::Builder::new()
        .name("stdin-stop".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if matches!(line.trim().to_ascii_lowercase().as_str(), "stop" | "q" | "quit") {
                    info!("Stop requested from console");
                    stop.request();
                }
            }
        });

    if let Err(e) = spawned {
        warn!("Failed to start console listener: {}", e);
    }
}

fn run_probe(pid: u32, include: &str, exclude: &str, audit_dir: Option<PathBuf>) -> Result<()> {
    let audit = audit_dir.map(|dir| Arc::new(HandleAuditLog::new(dir)));
    let probe = platform_probe(audit.clone());

    match probe.find_open_file(pid, include, exclude) {
        Some(path) => println!("PID {}: {}", pid, path),
        None => println!("PID {}: no open file matches", pid),
    }

    if let Some(audit) = audit {
        audit.close_all();
        println!("Audit written to {:?}", audit.file_for(pid));
    }
    Ok(())
}
