//! Cooperative stop signal
//!
//! A process-wide flag set by the F8 hotkey or the front end's stop action.
//! Every blocking point in a run sleeps through [`StopSignal::sleep`], which
//! wakes as soon as a stop is requested instead of finishing its interval.
//! A [`StopSignal::child`] can be stopped on its own, and is also stopped
//! whenever its parent is.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

#[derive(Default)]
struct StopInner {
    requested: AtomicBool,
    lock: Mutex<()>,
    cvar: Condvar,
    children: Mutex<Vec<Weak<StopInner>>>,
}

impl StopInner {
    fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        {
            let _guard = self.lock.lock();
            self.cvar.notify_all();
        }
        for child in self.children.lock().iter().filter_map(Weak::upgrade) {
            child.request();
        }
    }
}

/// Shared, cloneable stop flag with prompt wake-up
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop and wake every sleeper
    pub fn request(&self) {
        self.inner.request();
    }

    /// A signal that can be stopped alone and also follows this one.
    ///
    /// Resetting the parent does not reset its children.
    pub fn child(&self) -> StopSignal {
        let child = StopSignal::new();
        {
            let mut children = self.inner.children.lock();
            children.retain(|c| c.strong_count() > 0);
            children.push(Arc::downgrade(&child.inner));
        }
        if self.is_requested() {
            child.request();
        }
        child
    }

    /// Clear the flag before a new run
    pub fn reset(&self) {
        self.inner.requested.store(false, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless a stop is requested first.
    ///
    /// Returns `true` if the full duration elapsed, `false` if woken by stop.
    pub fn sleep(&self, duration: Duration) -> bool {
        if self.is_requested() {
            return false;
        }
        if duration.is_zero() {
            return true;
        }

        let deadline = Instant::now() + duration;
        let mut guard = self.inner.lock.lock();
        loop {
            if self.is_requested() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            self.inner.cvar.wait_for(&mut guard, deadline - now);
        }
    }
}

impl std::fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopSignal")
            .field("requested", &self.is_requested())
            .finish()
    }
}
