//! Process Orchestrator
//!
//! Drives one run from top to bottom:
//! 1. Resolve the executable, build the argument string, prepare game config
//! 2. Plan credentials and spawn that many clients
//! 3. Wait for the clients to settle, locate and tile their windows
//! 4. Type a login into every window, start one spam retry loop per window
//! 5. Hand over to the login monitor until done or stopped
//!
//! Any error in the pipeline ends the run as [`RunOutcome::Aborted`];
//! clients that were already launched are left running.

use crate::args::{build_game_args, ArgOptions};
use crate::config::LauncherConfig;
use crate::credentials::{load_account_store, plan_credentials, Credential, CredentialPlan};
use crate::desktop::{tile_windows, ClientWindow, Desktop, TILE_THROTTLE};
use crate::events::{EventSink, RunEvent, RunOutcome};
use crate::input::{InputInjector, InputTiming};
use crate::introspect::OpenFileProbe;
use crate::monitor::{resize_command, LoginMonitor, MonitorOutcome, MonitorSettings};
use crate::process::{ProcessSpawner, ResolvedExecutable};
use crate::session::{new_shared_session, SharedSession};
use crate::spam::{SpamRetryPool, SpamSettings};
use crate::stop::StopSignal;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Fixed delays of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchTimings {
    /// Settle wait after spawning, before any client is counted
    pub settle_base: Duration,
    /// Extra settle wait per spawned client
    pub settle_per_client: Duration,
    pub tile_throttle: Duration,
    /// Pause after each typed login, before any window is counted
    pub login_pause_base: Duration,
    /// Extra pause per discovered window
    pub login_pause_per_window: Duration,
    pub winner_settle: Duration,
    pub command_pause: Duration,
    pub submit_pause: Duration,
    pub input: InputTiming,
    pub spam: SpamSettings,
}

impl Default for LaunchTimings {
    fn default() -> Self {
        let monitor = MonitorSettings::default();
        Self {
            settle_base: Duration::from_secs(5),
            settle_per_client: Duration::from_secs(2),
            tile_throttle: TILE_THROTTLE,
            login_pause_base: Duration::from_millis(150),
            login_pause_per_window: Duration::from_millis(10),
            winner_settle: monitor.winner_settle,
            command_pause: monitor.command_pause,
            submit_pause: monitor.submit_pause,
            input: InputTiming::default(),
            spam: SpamSettings::default(),
        }
    }
}

impl LaunchTimings {
    pub fn settle(&self, clients: usize) -> Duration {
        self.settle_base + self.settle_per_client * clients as u32
    }

    pub fn login_pause(&self, windows: usize) -> Duration {
        self.login_pause_base + self.login_pause_per_window * windows as u32
    }

    #[cfg(test)]
    pub(crate) fn instant() -> Self {
        Self {
            settle_base: Duration::ZERO,
            settle_per_client: Duration::ZERO,
            tile_throttle: Duration::ZERO,
            login_pause_base: Duration::ZERO,
            login_pause_per_window: Duration::ZERO,
            winner_settle: Duration::ZERO,
            command_pause: Duration::ZERO,
            submit_pause: Duration::ZERO,
            input: InputTiming::instant(),
            spam: SpamSettings {
                min_interval: Duration::from_millis(1),
                max_interval: Duration::from_millis(3),
            },
        }
    }
}

/// Everything one run needs from the configuration
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub game_exe: String,
    pub base_args: String,
    pub arg_options: ArgOptions,
    pub manual: Credential,
    /// Raw client amount for single-credential runs
    pub client_amount: Option<String>,
    pub accounts_file: Option<PathBuf>,
    pub map_marker: String,
    pub login_marker: String,
    pub threshold: u32,
    pub poll_interval: Duration,
}

impl LaunchRequest {
    pub fn from_config(config: &LauncherConfig, data_dir: &Path) -> Self {
        Self {
            game_exe: config.game_exe.clone(),
            base_args: config.game_args.clone(),
            arg_options: ArgOptions::from(config),
            manual: Credential::new(config.username.clone(), config.password.clone()),
            client_amount: Some(config.client_amount.clone()),
            accounts_file: Some(config.accounts_path(data_dir)),
            map_marker: config.map_marker.clone(),
            login_marker: config.login_marker.clone(),
            threshold: config.confirm_threshold(),
            poll_interval: config.poll_interval(),
        }
    }
}

impl From<MonitorOutcome> for RunOutcome {
    fn from(outcome: MonitorOutcome) -> Self {
        match outcome {
            MonitorOutcome::AllConfirmed(pids) => RunOutcome::AllConfirmed(pids),
            MonitorOutcome::Winner(pid) => RunOutcome::Winner(pid),
            MonitorOutcome::Stopped => RunOutcome::Stopped,
            MonitorOutcome::NoWindows => RunOutcome::NoWindows,
        }
    }
}

pub struct Orchestrator {
    spawner: Arc<dyn ProcessSpawner>,
    desktop: Arc<dyn Desktop>,
    probe: Arc<dyn OpenFileProbe>,
    session: SharedSession,
    stop: StopSignal,
    events: EventSink,
    timings: LaunchTimings,
}

impl Orchestrator {
    pub fn new(
        spawner: Arc<dyn ProcessSpawner>,
        desktop: Arc<dyn Desktop>,
        probe: Arc<dyn OpenFileProbe>,
        stop: StopSignal,
        events: EventSink,
    ) -> Self {
        Self {
            spawner,
            desktop,
            probe,
            session: new_shared_session(),
            stop,
            events,
            timings: LaunchTimings::default(),
        }
    }

    pub fn with_timings(mut self, timings: LaunchTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn session(&self) -> SharedSession {
        self.session.clone()
    }

    /// Run the whole pipeline; never returns an error
    pub fn run(&self, request: &LaunchRequest) -> RunOutcome {
        self.stop.reset();
        self.session.lock().clear();

        let outcome = match self.execute(request) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Launch failed: {:#}", e);
                RunOutcome::Aborted(format!("{:#}", e))
            }
        };

        info!("Run finished: {:?}", outcome);
        self.events.send(RunEvent::Finished(outcome.clone()));
        outcome
    }

    fn execute(&self, request: &LaunchRequest) -> Result<RunOutcome> {
        let resolved = self
            .spawner
            .resolve(&request.game_exe)
            .context("Failed to resolve game executable")?;
        info!(
            "Game executable: {:?} (working dir {:?})",
            resolved.path, resolved.working_dir
        );

        let args = build_game_args(&request.base_args, &request.arg_options);
        info!("Final args: {}", args.args);
        self.spawner.prepare(&resolved, &args);

        let accounts = request
            .accounts_file
            .as_deref()
            .map(load_account_store)
            .unwrap_or_default();
        let plan = plan_credentials(
            accounts,
            request.manual.clone(),
            request.client_amount.as_deref(),
        );

        let launched = self.spawn_clients(&resolved, &args.args, plan.client_count)?;
        if !self.stop.sleep(self.timings.settle(launched)) {
            return Ok(RunOutcome::Stopped);
        }

        let windows = self.locate_windows();
        if self.stop.is_requested() {
            return Ok(RunOutcome::Stopped);
        }
        if windows.is_empty() {
            warn!("No client windows found");
            return Ok(RunOutcome::NoWindows);
        }

        let fallback = (
            request.arg_options.res_x as i32,
            request.arg_options.res_y as i32,
        );
        let moved = tile_windows(
            self.desktop.as_ref(),
            &windows,
            fallback,
            self.timings.tile_throttle,
            &self.stop,
        );
        self.events.send(RunEvent::Tiled { moved });

        let injector = InputInjector::new(
            self.desktop.clone(),
            self.timings.input,
            self.stop.clone(),
        );
        self.send_logins(&injector, &windows, &plan);
        if self.stop.is_requested() {
            return Ok(RunOutcome::Stopped);
        }

        let (screen_w, screen_h) = self.desktop.screen_size();
        let monitor = LoginMonitor::new(
            self.session.clone(),
            self.probe.clone(),
            injector.clone(),
            self.events.clone(),
            self.stop.clone(),
            MonitorSettings {
                poll_interval: request.poll_interval,
                threshold: request.threshold,
                include: request.map_marker.clone(),
                exclude: request.login_marker.clone(),
                winner_settle: self.timings.winner_settle,
                command_pause: self.timings.command_pause,
                submit_pause: self.timings.submit_pause,
                resize_command: resize_command(screen_w, screen_h),
            },
        );

        // Spam loops follow the run's stop and are also released as soon as
        // the monitor returns
        let spam_stop = self.stop.child();
        let mut spam = SpamRetryPool::new();
        if let Err(e) = spam.start_all(
            &windows,
            &self.session,
            &injector,
            self.timings.spam,
            &spam_stop,
        ) {
            spam_stop.request();
            spam.join_all();
            return Err(e).context("Failed to start spam retry threads");
        }

        let outcome = monitor.run(plan.multi_credential);
        spam_stop.request();
        let presses = spam.join_all();
        info!("Spam retry loops done ({} presses)", presses);

        Ok(outcome.into())
    }

    fn spawn_clients(
        &self,
        resolved: &ResolvedExecutable,
        args: &str,
        count: usize,
    ) -> Result<usize> {
        let mut launched = 0;
        for _ in 0..count {
            if self.stop.is_requested() {
                break;
            }
            let process = self
                .spawner
                .spawn(resolved, args)
                .with_context(|| format!("Failed to launch client {} of {}", launched + 1, count))?;

            info!("Launched PID {}", process.pid);
            self.events.send(RunEvent::Launched { pid: process.pid });
            self.session.lock().processes.push(process);
            launched += 1;
        }
        Ok(launched)
    }

    /// Windows of every spawned client, in spawn order
    fn locate_windows(&self) -> Vec<ClientWindow> {
        let pids: Vec<u32> = self.session.lock().processes.iter().map(|p| p.pid).collect();

        let mut windows = Vec::new();
        for pid in pids {
            if self.stop.is_requested() {
                break;
            }
            windows.extend(self.desktop.locate_windows(pid));
        }

        info!("Located {} client windows", windows.len());
        self.session.lock().windows = windows.clone();
        self.events.send(RunEvent::WindowsLocated {
            count: windows.len(),
        });
        windows
    }

    fn send_logins(&self, injector: &InputInjector, windows: &[ClientWindow], plan: &CredentialPlan) {
        let pause = self.timings.login_pause(windows.len());

        for (index, window) in windows.iter().enumerate() {
            if self.stop.is_requested() {
                return;
            }
            let Some(credential) = plan.credential_for(index) else {
                return;
            };

            let text = credential.login_text();
            injector.type_text(window.handle, &text);
            self.session
                .lock()
                .pid_credentials
                .insert(window.owner_pid, text);
            self.events.send(RunEvent::CredentialSent {
                pid: window.owner_pid,
                username: credential.username.clone(),
            });

            if !self.stop.sleep(pause) {
                return;
            }
        }
    }
}
