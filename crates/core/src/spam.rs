//! Spam retry loops
//!
//! One background thread per client window keeps pressing Enter at a random
//! interval so the client clicks through its news, menu and loading dialogs.
//! A loop exits when its pid is confirmed, when the pid is no longer tracked
//! (pruned sibling) or when a stop is requested.

use crate::desktop::ClientWindow;
use crate::input::InputInjector;
use crate::session::SharedSession;
use crate::stop::StopSignal;
use rand::Rng;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};

/// Interval bounds between Enter presses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpamSettings {
    pub min_interval: Duration,
    pub max_interval: Duration,
}

impl Default for SpamSettings {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(5200),
            max_interval: Duration::from_millis(15000),
        }
    }
}

impl SpamSettings {
    /// Uniform pick from `[min, max)`; a degenerate range yields `min`
    pub fn next_interval<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.min_interval >= self.max_interval {
            return self.min_interval;
        }
        rng.gen_range(self.min_interval..self.max_interval)
    }
}

/// Whether the loop for `pid` should keep going
fn should_continue(session: &SharedSession, pid: u32) -> bool {
    let state = session.lock();
    state.is_tracked(pid) && !state.is_logged_in(pid)
}

/// Start the spam loop for one window. The thread returns the number of
/// Enter presses it sent.
pub fn spawn_spam_retry(
    window: ClientWindow,
    session: SharedSession,
    injector: InputInjector,
    settings: SpamSettings,
    stop: StopSignal,
) -> std::io::Result<JoinHandle<usize>> {
    thread::Builder::new()
        .name(format!("spam-{}", window.owner_pid))
        .spawn(move || {
            let pid = window.owner_pid;
            let mut rng = rand::thread_rng();
            let mut presses = 0;

            while !stop.is_requested() && should_continue(&session, pid) {
                injector.press_enter(window.handle);
                presses += 1;
                if !stop.sleep(settings.next_interval(&mut rng)) {
                    break;
                }
            }

            debug!("Spam loop for PID {} done after {} presses", pid, presses);
            presses
        })
}

/// Spam loops of one run
#[derive(Debug, Default)]
pub struct SpamRetryPool {
    handles: Vec<JoinHandle<usize>>,
}

impl SpamRetryPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start one loop per window; stops starting loops once stop is requested
    pub fn start_all(
        &mut self,
        windows: &[ClientWindow],
        session: &SharedSession,
        injector: &InputInjector,
        settings: SpamSettings,
        stop: &StopSignal,
    ) -> std::io::Result<()> {
        for window in windows {
            if stop.is_requested() {
                break;
            }
            let handle = spawn_spam_retry(
                *window,
                session.clone(),
                injector.clone(),
                settings,
                stop.clone(),
            )?;
            self.handles.push(handle);
        }
        info!("Started {} spam retry loops", self.handles.len());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every loop; returns the total number of presses
    pub fn join_all(&mut self) -> usize {
        self.handles
            .drain(..)
            .map(|handle| match handle.join() {
                Ok(presses) => presses,
                Err(_) => {
                    error!("Spam retry thread panicked");
                    0
                }
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desktop::testing::FakeDesktop;
    use crate::desktop::{Rect, WindowHandle};
    use crate::input::InputTiming;
    use crate::session::new_shared_session;
    use std::sync::Arc;

    fn setup(pid: u32) -> (Arc<FakeDesktop>, SharedSession, ClientWindow) {
        let desktop = Arc::new(FakeDesktop::new((800, 600)));
        let session = new_shared_session();
        let window = ClientWindow {
            handle: WindowHandle(pid as isize * 10),
            owner_pid: pid,
            rect: Rect::default(),
        };
        session.lock().windows.push(window);
        (desktop, session, window)
    }

    fn fast() -> SpamSettings {
        SpamSettings {
            min_interval: Duration::from_millis(2),
            max_interval: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_interval_within_bounds() {
        let settings = SpamSettings::default();
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let d = settings.next_interval(&mut rng);
            assert!(d >= settings.min_interval && d < settings.max_interval);
        }

        let fixed = SpamSettings {
            min_interval: Duration::from_secs(3),
            max_interval: Duration::from_secs(1),
        };
        assert_eq!(fixed.next_interval(&mut rng), Duration::from_secs(3));
    }

    #[test]
    fn test_loop_exits_on_confirmation() {
        let (desktop, session, window) = setup(7);
        let stop = StopSignal::new();
        let injector = InputInjector::new(desktop.clone(), InputTiming::instant(), stop.clone());

        let handle = spawn_spam_retry(window, session.clone(), injector, fast(), stop).unwrap();
        thread::sleep(Duration::from_millis(30));
        session.lock().record_observation(7, true, 1);

        let presses = handle.join().unwrap();
        assert!(presses >= 1);
        assert_eq!(desktop.posted_to(window.handle).len(), presses * 3);
    }

    #[test]
    fn test_loop_skips_untracked_and_stopped() {
        let (desktop, session, window) = setup(8);
        let stop = StopSignal::new();
        let injector = InputInjector::new(desktop.clone(), InputTiming::instant(), stop.clone());

        session.lock().windows.clear();
        let handle = spawn_spam_retry(window, session.clone(), injector.clone(), fast(), stop.clone())
            .unwrap();
        assert_eq!(handle.join().unwrap(), 0);

        session.lock().windows.push(window);
        stop.request();
        let handle = spawn_spam_retry(window, session, injector, fast(), stop).unwrap();
        assert_eq!(handle.join().unwrap(), 0);
        assert!(desktop.posted_to(window.handle).is_empty());
    }

    #[test]
    fn test_pool_stops_all_loops() {
        let (desktop, session, first) = setup(1);
        let second = ClientWindow {
            handle: WindowHandle(99),
            owner_pid: 2,
            rect: Rect::default(),
        };
        session.lock().windows.push(second);

        let stop = StopSignal::new();
        let injector = InputInjector::new(desktop.clone(), InputTiming::instant(), stop.clone());
        let slow = SpamSettings {
            min_interval: Duration::from_secs(30),
            max_interval: Duration::from_secs(60),
        };

        let mut pool = SpamRetryPool::new();
        pool.start_all(&[first, second], &session, &injector, slow, &stop)
            .unwrap();
        assert_eq!(pool.len(), 2);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while desktop.posted.lock().len() < 6 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        stop.request();
        assert_eq!(pool.join_all(), 2);
        assert!(pool.is_empty());
    }
}
