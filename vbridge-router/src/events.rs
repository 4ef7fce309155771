//! Status and error events published to the controller

use crate::error::BridgeError;
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    Idle,
    Starting,
    /// Source and sink attached
    Running,
    /// Source attached, frames go to preview subscribers only
    Preview,
    Stopping,
}

impl RouterState {
    /// A source is delivering frames
    pub fn is_active(&self) -> bool {
        matches!(self, RouterState::Running | RouterState::Preview)
    }
}

impl fmt::Display for RouterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RouterState::Idle => "idle",
            RouterState::Starting => "starting",
            RouterState::Running => "running",
            RouterState::Preview => "preview",
            RouterState::Stopping => "stopping",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterEvent {
    State(RouterState),
    Error(BridgeError),
}

/// Non-blocking publisher shared by the router and its endpoints
///
/// A full channel drops the new event instead of stalling the thread that
/// reports it, which may be a driver callback.
#[derive(Clone)]
pub struct EventReporter {
    tx: Sender<RouterEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventReporter {
    pub fn channel(depth: usize) -> (Self, Receiver<RouterEvent>) {
        let (tx, rx) = channel::bounded(depth.max(1));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    pub fn state(&self, state: RouterState) {
        self.publish(RouterEvent::State(state));
    }

    pub fn error(&self, error: BridgeError) {
        self.publish(RouterEvent::Error(error));
    }

    /// Events nobody had room for
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn publish(&self, event: RouterEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_channel_drops() {
        let (events, rx) = EventReporter::channel(2);
        events.state(RouterState::Starting);
        events.error(BridgeError::Transport("x".into()));
        events.state(RouterState::Idle);

        assert_eq!(events.dropped(), 1);
        assert_eq!(rx.try_recv().unwrap(), RouterEvent::State(RouterState::Starting));
        assert!(matches!(rx.try_recv().unwrap(), RouterEvent::Error(BridgeError::Transport(_))));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_active_states() {
        assert!(RouterState::Preview.is_active());
        assert!(!RouterState::Stopping.is_active());
    }
}
