//! Login Confirmation State Machine
//!
//! Polls the handle introspector for every client that is not yet confirmed
//! and turns consecutive map-file observations into a login verdict:
//! - Multi-credential runs finish once every tracked client is confirmed
//! - Single-credential runs finish at the first confirmation: all siblings are
//!   terminated and the winner gets a final Enter plus a resize command
//!
//! Probing happens outside the session lock; only the counter update and the
//! pruning take it.

use crate::desktop::ClientWindow;
use crate::events::{EventSink, RunEvent};
use crate::input::InputInjector;
use crate::introspect::OpenFileProbe;
use crate::session::{LoginTransition, SharedSession};
use crate::stop::StopSignal;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Chat command that makes the winning client fill the screen
pub fn resize_command(width: i32, height: i32) -> String {
    format!("/setres {}x{}b", width, height)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    /// Consecutive matching polls needed to confirm
    pub threshold: u32,
    /// Substring of an in-game map path
    pub include: String,
    /// Substring marking the login-screen map
    pub exclude: String,
    /// Wait after terminating siblings before talking to the winner
    pub winner_settle: Duration,
    /// Pause between the winner's first Enter and the resize command
    pub command_pause: Duration,
    /// Pause between the resize command and its Enter
    pub submit_pause: Duration,
    pub resize_command: String,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            threshold: 1,
            include: crate::config::DEFAULT_MAP_MARKER.to_string(),
            exclude: crate::config::DEFAULT_LOGIN_MARKER.to_string(),
            winner_settle: Duration::from_secs(20),
            command_pause: Duration::from_millis(250),
            submit_pause: Duration::from_millis(150),
            resize_command: resize_command(1920, 1080),
        }
    }
}

/// How the confirmation poll ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorOutcome {
    AllConfirmed(Vec<u32>),
    Winner(u32),
    Stopped,
    NoWindows,
}

pub struct LoginMonitor {
    session: SharedSession,
    probe: Arc<dyn OpenFileProbe>,
    injector: InputInjector,
    events: EventSink,
    stop: StopSignal,
    settings: MonitorSettings,
}

impl LoginMonitor {
    pub fn new(
        session: SharedSession,
        probe: Arc<dyn OpenFileProbe>,
        injector: InputInjector,
        events: EventSink,
        stop: StopSignal,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            session,
            probe,
            injector,
            events,
            stop,
            settings,
        }
    }

    /// Poll until done or stopped
    pub fn run(&self, multi_credential: bool) -> MonitorOutcome {
        info!(
            "Monitoring logins (multi_credential={}, threshold={}, every {:?})",
            multi_credential, self.settings.threshold, self.settings.poll_interval
        );

        loop {
            if let Some(outcome) = self.completion() {
                return outcome;
            }
            if let Some(outcome) = self.poll_once(multi_credential) {
                return outcome;
            }
            if let Some(outcome) = self.completion() {
                return outcome;
            }
            if !self.stop.sleep(self.settings.poll_interval) {
                return MonitorOutcome::Stopped;
            }
        }
    }

    fn completion(&self) -> Option<MonitorOutcome> {
        if self.stop.is_requested() {
            return Some(MonitorOutcome::Stopped);
        }

        let state = self.session.lock();
        if state.windows.is_empty() {
            return Some(MonitorOutcome::NoWindows);
        }
        if state.all_confirmed() {
            info!("All clients confirmed in game");
            return Some(MonitorOutcome::AllConfirmed(
                state.window_pids().into_iter().collect(),
            ));
        }
        None
    }

    /// One pass over every unconfirmed client
    pub fn poll_once(&self, multi_credential: bool) -> Option<MonitorOutcome> {
        let pending = self.session.lock().unconfirmed_windows();
        let mut polled = HashSet::new();

        for window in pending {
            if self.stop.is_requested() {
                return Some(MonitorOutcome::Stopped);
            }
            let pid = window.owner_pid;
            if !polled.insert(pid) {
                continue;
            }

            {
                let state = self.session.lock();
                if !state.is_tracked(pid) || state.is_logged_in(pid) {
                    continue;
                }
            }

            let matched = self
                .probe
                .find_open_file(pid, &self.settings.include, &self.settings.exclude);
            // A scan can outlast a stop request; drop its result
            if self.stop.is_requested() {
                return Some(MonitorOutcome::Stopped);
            }
            if let Some(path) = &matched {
                info!("PID {} opened map file: {}", pid, path);
                self.events.send(RunEvent::MapObserved {
                    pid,
                    path: PathBuf::from(path),
                });
            }

            let transition =
                self.session
                    .lock()
                    .record_observation(pid, matched.is_some(), self.settings.threshold);

            match transition {
                LoginTransition::Confirmed => {
                    info!("MAP CONFIRMED PID {}", pid);
                    self.events.send(RunEvent::Confirmed { pid });
                    if !multi_credential {
                        return Some(self.finish_winner(window));
                    }
                }
                LoginTransition::Pending(count) => {
                    debug!("PID {} map confirmations: {}", pid, count);
                }
                LoginTransition::AlreadyConfirmed => {}
            }
        }

        None
    }

    /// Reclaim every sibling and hand the winner its final input
    fn finish_winner(&self, window: ClientWindow) -> MonitorOutcome {
        let pid = window.owner_pid;
        if self.stop.is_requested() {
            return MonitorOutcome::Stopped;
        }
        let siblings = self.session.lock().prune_except(pid);
        info!("PID {} won, terminating {} siblings", pid, siblings.len());

        for mut sibling in siblings {
            sibling.terminate();
            self.events.send(RunEvent::Terminated { pid: sibling.pid });
        }

        if !self.stop.sleep(self.settings.winner_settle) {
            return MonitorOutcome::Stopped;
        }

        self.injector.press_enter(window.handle);
        self.stop.sleep(self.settings.command_pause);
        self.injector
            .type_text(window.handle, &self.settings.resize_command);
        self.stop.sleep(self.settings.submit_pause);
        self.injector.press_enter(window.handle);

        MonitorOutcome::Winner(pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desktop::testing::FakeDesktop;
    use crate::desktop::{Rect, WindowHandle};
    use crate::input::InputTiming;
    use crate::introspect::testing::ScriptedProbe;
    use crate::process::ClientProcess;
    use crate::session::new_shared_session;
    use std::thread;
    use std::time::Instant;

    const MAP: &str = r"C:\Games\TgGame\CookedPC\Maps\Dome.upk";

    fn instant_settings(threshold: u32) -> MonitorSettings {
        MonitorSettings {
            poll_interval: Duration::ZERO,
            threshold,
            winner_settle: Duration::ZERO,
            command_pause: Duration::ZERO,
            submit_pause: Duration::ZERO,
            resize_command: resize_command(800, 600),
            ..MonitorSettings::default()
        }
    }

    fn track(session: &SharedSession, pids: &[u32]) {
        let mut state = session.lock();
        for pid in pids {
            state.processes.push(ClientProcess::new(*pid, None));
            state.windows.push(ClientWindow {
                handle: WindowHandle(*pid as isize * 100),
                owner_pid: *pid,
                rect: Rect::default(),
            });
        }
    }

    fn monitor(
        session: &SharedSession,
        probe: Arc<ScriptedProbe>,
        desktop: Arc<FakeDesktop>,
        stop: StopSignal,
        settings: MonitorSettings,
    ) -> (LoginMonitor, crossbeam_channel::Receiver<RunEvent>) {
        let injector = InputInjector::new(desktop, InputTiming::instant(), stop.clone());
        let (events, rx) = EventSink::channel();
        let monitor = LoginMonitor::new(session.clone(), probe, injector, events, stop, settings);
        (monitor, rx)
    }

    #[test]
    fn test_multi_credential_waits_for_every_client() {
        let session = new_shared_session();
        track(&session, &[1, 2]);
        let probe = Arc::new(ScriptedProbe::new().script(1, &[None, Some(MAP)]).script(2, &[Some(MAP)]));
        let desktop = Arc::new(FakeDesktop::new((800, 600)));
        let (monitor, rx) = monitor(&session, probe.clone(), desktop.clone(), StopSignal::new(), instant_settings(1));

        assert_eq!(monitor.run(true), MonitorOutcome::AllConfirmed(vec![1, 2]));
        assert_eq!(probe.calls_for(1), 2);
        assert_eq!(probe.calls_for(2), 1);
        assert_eq!(session.lock().processes.len(), 2);
        assert!(desktop.posted.lock().is_empty());

        let confirmed: Vec<_> = rx
            .try_iter()
            .filter_map(|e| match e {
                RunEvent::Confirmed { pid } => Some(pid),
                _ => None,
            })
            .collect();
        assert_eq!(confirmed, vec![2, 1]);
    }

    #[test]
    fn test_confirmation_needs_consecutive_matches() {
        let session = new_shared_session();
        track(&session, &[4]);
        let probe = Arc::new(ScriptedProbe::new().script(
            4,
            &[Some(MAP), None, Some(MAP), Some(MAP), Some(MAP)],
        ));
        let desktop = Arc::new(FakeDesktop::new((800, 600)));
        let (monitor, _rx) = monitor(&session, probe.clone(), desktop, StopSignal::new(), instant_settings(2));

        assert_eq!(monitor.run(true), MonitorOutcome::AllConfirmed(vec![4]));
        assert_eq!(probe.calls_for(4), 4);
    }

    #[test]
    fn test_single_credential_winner_prunes_siblings() {
        let session = new_shared_session();
        track(&session, &[10, 20, 30]);
        let probe = Arc::new(
            ScriptedProbe::new()
                .script(10, &[None, None])
                .script(20, &[Some(MAP)])
                .script(30, &[None, None]),
        );
        let desktop = Arc::new(FakeDesktop::new((800, 600)));
        let (monitor, rx) = monitor(&session, probe.clone(), desktop.clone(), StopSignal::new(), instant_settings(1));

        assert_eq!(monitor.run(false), MonitorOutcome::Winner(20));

        let state = session.lock();
        assert_eq!(state.processes.iter().map(|p| p.pid).collect::<Vec<_>>(), vec![20]);
        assert_eq!(state.window_pids().into_iter().collect::<Vec<_>>(), vec![20]);
        drop(state);

        // Later polls never see the pruned siblings
        assert_eq!(monitor.poll_once(false), None);
        assert_eq!(probe.calls_for(10), 1);
        assert_eq!(probe.calls_for(30), 0);

        assert_eq!(desktop.typed_chars(WindowHandle(2000)), "\r/setres 800x600b\r");
        assert!(desktop.posted_to(WindowHandle(1000)).is_empty());

        let terminated: Vec<_> = rx
            .try_iter()
            .filter_map(|e| match e {
                RunEvent::Terminated { pid } => Some(pid),
                _ => None,
            })
            .collect();
        assert_eq!(terminated, vec![10, 30]);
    }

    #[test]
    fn test_no_windows_and_prior_stop() {
        let session = new_shared_session();
        let probe = Arc::new(ScriptedProbe::new());
        let desktop = Arc::new(FakeDesktop::new((800, 600)));
        let (idle, _rx) = monitor(&session, probe.clone(), desktop.clone(), StopSignal::new(), instant_settings(1));
        assert_eq!(idle.run(true), MonitorOutcome::NoWindows);

        track(&session, &[1]);
        let stop = StopSignal::new();
        stop.request();
        let (stopped, _rx) = monitor(&session, probe.clone(), desktop, stop, instant_settings(1));
        assert_eq!(stopped.run(false), MonitorOutcome::Stopped);
        assert!(probe.calls.lock().is_empty());
    }

    #[test]
    fn test_stop_mid_poll_exits_promptly() {
        let session = new_shared_session();
        track(&session, &[1, 2]);
        let probe = Arc::new(ScriptedProbe::new());
        let desktop = Arc::new(FakeDesktop::new((800, 600)));
        let stop = StopSignal::new();
        let settings = MonitorSettings {
            poll_interval: Duration::from_secs(60),
            ..instant_settings(1)
        };
        let (monitor, _rx) = monitor(&session, probe.clone(), desktop.clone(), stop.clone(), settings);

        let start = Instant::now();
        let handle = thread::spawn(move || monitor.run(false));
        thread::sleep(Duration::from_millis(30));
        stop.request();

        assert_eq!(handle.join().unwrap(), MonitorOutcome::Stopped);
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(desktop.posted.lock().is_empty());
        assert_eq!(session.lock().processes.len(), 2);
    }

    #[test]
    fn test_stop_during_scan_discards_match() {
        let session = new_shared_session();
        track(&session, &[100, 101, 102]);
        let probe = Arc::new(
            ScriptedProbe::new()
                .script(100, &[Some(MAP)])
                .slow(Duration::from_millis(200)),
        );
        let desktop = Arc::new(FakeDesktop::new((800, 600)));
        let stop = StopSignal::new();
        let (monitor, rx) = monitor(&session, probe.clone(), desktop.clone(), stop.clone(), instant_settings(1));

        let handle = thread::spawn(move || monitor.run(false));
        thread::sleep(Duration::from_millis(50));
        stop.request();

        assert_eq!(handle.join().unwrap(), MonitorOutcome::Stopped);
        assert_eq!(probe.calls.lock().clone(), vec![100]);

        let state = session.lock();
        assert_eq!(state.processes.len(), 3);
        assert!(!state.is_logged_in(100));
        drop(state);

        let events: Vec<_> = rx.try_iter().collect();
        assert!(!events.iter().any(|e| matches!(
            e,
            RunEvent::Confirmed { .. } | RunEvent::Terminated { .. }
        )));
        assert!(desktop.posted.lock().is_empty());
    }
}
