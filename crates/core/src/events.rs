//! Run progress events
//!
//! The orchestrator reports progress over a crossbeam channel so a front end
//! can show it without touching the shared session.

use crossbeam_channel::{Receiver, Sender};
use std::path::PathBuf;

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every tracked client reached a game map
    AllConfirmed(Vec<u32>),
    /// Single-credential race won by this pid; siblings were terminated
    Winner(u32),
    /// No client window was found
    NoWindows,
    /// Stop was requested
    Stopped,
    /// The pipeline failed
    Aborted(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Launched { pid: u32 },
    WindowsLocated { count: usize },
    Tiled { moved: usize },
    CredentialSent { pid: u32, username: String },
    MapObserved { pid: u32, path: PathBuf },
    Confirmed { pid: u32 },
    Terminated { pid: u32 },
    Finished(RunOutcome),
}

/// Sending half handed to the orchestrator; sends never block or fail
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<Sender<RunEvent>>,
}

impl EventSink {
    /// Sink with an attached receiver
    pub fn channel() -> (Self, Receiver<RunEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx: Some(tx) }, rx)
    }

    /// Sink that discards everything
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn send(&self, event: RunEvent) {
        if let Some(tx) = &self.tx {
            // Receiver may be gone once the front end shuts down
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_delivers_in_order() {
        let (sink, rx) = EventSink::channel();
        sink.send(RunEvent::Launched { pid: 1 });
        sink.send(RunEvent::Finished(RunOutcome::Stopped));
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                RunEvent::Launched { pid: 1 },
                RunEvent::Finished(RunOutcome::Stopped)
            ]
        );
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.send(RunEvent::Confirmed { pid: 3 });
        EventSink::disabled().send(RunEvent::Confirmed { pid: 3 });
    }
}
