//! Shared run state
//!
//! Everything the orchestrator, spam retry threads and confirmation poll share
//! lives in one [`SessionState`] behind one lock. Multi-field reads and every
//! mutation happen inside a single acquisition.

use crate::desktop::ClientWindow;
use crate::process::ClientProcess;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Per-pid login confirmation progress
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PidLoginState {
    pub consecutive_map_confirmations: u32,
    pub logged_in: bool,
}

/// Result of recording one poll for a pid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginTransition {
    /// Still unconfirmed, with the current consecutive count
    Pending(u32),
    /// This observation reached the threshold
    Confirmed,
    /// Already confirmed before this observation
    AlreadyConfirmed,
}

#[derive(Debug, Default)]
pub struct SessionState {
    pub processes: Vec<ClientProcess>,
    /// Windows in discovery order
    pub windows: Vec<ClientWindow>,
    /// Login text sent to each pid
    pub pid_credentials: HashMap<u32, String>,
    pub login: HashMap<u32, PidLoginState>,
}

pub type SharedSession = Arc<Mutex<SessionState>>;

pub fn new_shared_session() -> SharedSession {
    Arc::new(Mutex::new(SessionState::default()))
}

impl SessionState {
    /// Drop everything from a previous run
    pub fn clear(&mut self) {
        self.processes.clear();
        self.windows.clear();
        self.pid_credentials.clear();
        self.login.clear();
    }

    /// Record one poll result.
    ///
    /// A match increments the consecutive count, a miss resets it to zero.
    /// Reaching `threshold` confirms the pid for the rest of the run.
    pub fn record_observation(&mut self, pid: u32, matched: bool, threshold: u32) -> LoginTransition {
        let state = self.login.entry(pid).or_default();
        if state.logged_in {
            return LoginTransition::AlreadyConfirmed;
        }

        state.consecutive_map_confirmations = if matched {
            state.consecutive_map_confirmations + 1
        } else {
            0
        };

        if state.consecutive_map_confirmations >= threshold.max(1) {
            state.logged_in = true;
            LoginTransition::Confirmed
        } else {
            LoginTransition::Pending(state.consecutive_map_confirmations)
        }
    }

    pub fn is_logged_in(&self, pid: u32) -> bool {
        self.login.get(&pid).is_some_and(|s| s.logged_in)
    }

    /// Whether any tracked window belongs to `pid`
    pub fn is_tracked(&self, pid: u32) -> bool {
        self.windows.iter().any(|w| w.owner_pid == pid)
    }

    /// Distinct owner pids of tracked windows, ascending
    pub fn window_pids(&self) -> BTreeSet<u32> {
        self.windows.iter().map(|w| w.owner_pid).collect()
    }

    /// Tracked windows whose owner is not yet confirmed
    pub fn unconfirmed_windows(&self) -> Vec<ClientWindow> {
        self.windows
            .iter()
            .filter(|w| !self.is_logged_in(w.owner_pid))
            .copied()
            .collect()
    }

    /// True once every distinct window owner is confirmed
    pub fn all_confirmed(&self) -> bool {
        let pids = self.window_pids();
        !pids.is_empty() && pids.iter().all(|pid| self.is_logged_in(*pid))
    }

    /// Remove every process, window and login record not owned by `keep`.
    ///
    /// Returns the removed processes so the caller can terminate them outside
    /// the lock.
    pub fn prune_except(&mut self, keep: u32) -> Vec<ClientProcess> {
        self.windows.retain(|w| w.owner_pid == keep);
        self.pid_credentials.retain(|pid, _| *pid == keep);
        self.login.retain(|pid, _| *pid == keep);

        let (kept, removed): (Vec<_>, Vec<_>) = std::mem::take(&mut self.processes)
            .into_iter()
            .partition(|p| p.pid == keep);
        self.processes = kept;
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desktop::{Rect, WindowHandle};

    fn window(handle: isize, pid: u32) -> ClientWindow {
        ClientWindow {
            handle: WindowHandle(handle),
            owner_pid: pid,
            rect: Rect::default(),
        }
    }

    #[test]
    fn test_threshold_one_confirms_on_first_match() {
        let mut state = SessionState::default();
        assert_eq!(state.record_observation(5, false, 1), LoginTransition::Pending(0));
        assert_eq!(state.record_observation(5, true, 1), LoginTransition::Confirmed);
        assert!(state.is_logged_in(5));
        assert_eq!(state.record_observation(5, false, 1), LoginTransition::AlreadyConfirmed);
        assert!(state.is_logged_in(5));
    }

    #[test]
    fn test_miss_resets_counter() {
        let mut state = SessionState::default();
        assert_eq!(state.record_observation(9, true, 3), LoginTransition::Pending(1));
        assert_eq!(state.record_observation(9, true, 3), LoginTransition::Pending(2));
        assert_eq!(state.record_observation(9, false, 3), LoginTransition::Pending(0));
        assert_eq!(state.login[&9].consecutive_map_confirmations, 0);

        assert_eq!(state.record_observation(9, true, 3), LoginTransition::Pending(1));
        assert_eq!(state.record_observation(9, true, 3), LoginTransition::Pending(2));
        assert_eq!(state.record_observation(9, true, 3), LoginTransition::Confirmed);
    }

    #[test]
    fn test_zero_threshold_acts_as_one() {
        let mut state = SessionState::default();
        assert_eq!(state.record_observation(1, false, 0), LoginTransition::Pending(0));
        assert_eq!(state.record_observation(1, true, 0), LoginTransition::Confirmed);
    }

    #[test]
    fn test_all_confirmed_counts_distinct_pids() {
        let mut state = SessionState::default();
        assert!(!state.all_confirmed());

        state.windows = vec![window(1, 10), window(2, 10), window(3, 20)];
        state.record_observation(10, true, 1);
        assert!(!state.all_confirmed());
        assert_eq!(state.unconfirmed_windows(), vec![window(3, 20)]);

        state.record_observation(20, true, 1);
        assert!(state.all_confirmed());
    }

    #[test]
    fn test_prune_except_keeps_winner() {
        let mut state = SessionState::default();
        state.processes = vec![
            ClientProcess::new(10, None),
            ClientProcess::new(20, None),
            ClientProcess::new(30, None),
        ];
        state.windows = vec![window(1, 10), window(2, 20), window(3, 30)];
        state.pid_credentials.insert(20, "u\tp".into());
        state.pid_credentials.insert(30, "u\tp".into());
        state.record_observation(10, false, 1);
        state.record_observation(20, true, 1);

        let removed = state.prune_except(20);
        let removed: Vec<_> = removed.iter().map(|p| p.pid).collect();
        assert_eq!(removed, vec![10, 30]);
        assert_eq!(state.processes.len(), 1);
        assert!(state.is_tracked(20));
        assert!(!state.is_tracked(10));
        assert!(!state.login.contains_key(&10));
        assert_eq!(state.pid_credentials.len(), 1);
    }

    #[test]
    fn test_clear_resets_run() {
        let mut state = SessionState::default();
        state.windows.push(window(1, 1));
        state.record_observation(1, true, 1);
        state.clear();
        assert!(state.windows.is_empty());
        assert!(!state.is_logged_in(1));
    }
}
