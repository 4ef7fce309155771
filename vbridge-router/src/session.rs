//! Native resource lifecycle shared by every source and sink

use crate::error::{BridgeError, Result};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initialized,
    Running,
    Stopped,
    Destroyed,
}

impl SessionState {
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, next),
            (Uninitialized, Initialized)
                | (Initialized, Running)
                | (Running, Stopped)
                | (Stopped, Running)
                | (Uninitialized | Initialized | Running | Stopped, Destroyed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Owns one native resource from acquisition to release
///
/// The native calls themselves are passed in as closures so one state machine
/// serves capture inputs, receivers, senders and playback outputs alike.
/// Dropping the session destroys the resource.
pub struct DeviceSession<R> {
    label: String,
    state: SessionState,
    resource: Option<R>,
}

impl<R> DeviceSession<R> {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: SessionState::Uninitialized,
            resource: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    pub fn resource(&self) -> Option<&R> {
        self.resource.as_ref()
    }

    pub fn resource_mut(&mut self) -> Option<&mut R> {
        self.resource.as_mut()
    }

    /// Acquire the native resource
    pub fn initialize(&mut self, acquire: impl FnOnce() -> Result<R>) -> Result<()> {
        self.check(SessionState::Initialized)?;
        self.resource = Some(acquire()?);
        self.transition(SessionState::Initialized);
        Ok(())
    }

    /// Start the resource; allowed from `Initialized` and `Stopped`
    pub fn start(&mut self, start: impl FnOnce(&mut R) -> Result<()>) -> Result<()> {
        self.check(SessionState::Running)?;
        let resource = self.resource.as_mut().ok_or_else(|| {
            BridgeError::Initialization(format!("{}: no native resource", self.label))
        })?;
        start(resource)?;
        self.transition(SessionState::Running);
        Ok(())
    }

    /// Stop the resource if it is running
    ///
    /// The session counts as stopped even when the native call fails.
    pub fn stop(&mut self, stop: impl FnOnce(&mut R) -> Result<()>) -> Result<()> {
        if self.state != SessionState::Running {
            return Ok(());
        }
        let result = match self.resource.as_mut() {
            Some(resource) => stop(resource),
            None => Ok(()),
        };
        self.transition(SessionState::Stopped);
        result
    }

    /// Release the native resource
    pub fn destroy(&mut self) {
        if self.state == SessionState::Destroyed {
            return;
        }
        drop(self.resource.take());
        self.transition(SessionState::Destroyed);
    }

    fn check(&self, next: SessionState) -> Result<()> {
        if self.state.can_transition_to(next) {
            Ok(())
        } else {
            Err(BridgeError::Initialization(format!(
                "{}: cannot go from {} to {}",
                self.label, self.state, next
            )))
        }
    }

    fn transition(&mut self, next: SessionState) {
        log::debug!("{}: {} -> {}", self.label, self.state, next);
        self.state = next;
    }
}

impl<R> Drop for DeviceSession<R> {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Recorder(Rc<RefCell<Vec<&'static str>>>);

    impl Drop for Recorder {
        fn drop(&mut self) {
            self.0.borrow_mut().push("released");
        }
    }

    #[test]
    fn test_transitions() {
        use SessionState::*;

        assert!(Uninitialized.can_transition_to(Initialized));
        assert!(Stopped.can_transition_to(Running));
        assert!(Running.can_transition_to(Destroyed));
        assert!(!Uninitialized.can_transition_to(Running));
        assert!(!Destroyed.can_transition_to(Initialized));
        assert!(!Destroyed.can_transition_to(Destroyed));
    }

    #[test]
    fn test_full_lifecycle() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut session = DeviceSession::new("scratch");

        session.initialize(|| Ok(Recorder(Rc::clone(&log)))).unwrap();
        session.start(|p| {
            p.0.borrow_mut().push("start");
            Ok(())
        })
        .unwrap();
        assert!(session.is_running());

        session.stop(|p| {
            p.0.borrow_mut().push("stop");
            Ok(())
        })
        .unwrap();
        // Already stopped; closure is not called
        session.stop(|_| panic!("stopped twice")).unwrap();

        session.start(|p| {
            p.0.borrow_mut().push("restart");
            Ok(())
        })
        .unwrap();

        drop(session);
        assert_eq!(*log.borrow(), vec!["start", "stop", "restart", "released"]);
    }

    #[test]
    fn test_rejects_start_before_initialize() {
        let mut session: DeviceSession<()> = DeviceSession::new("early");
        let err = session.start(|_| Ok(())).unwrap_err();
        assert!(matches!(err, BridgeError::Initialization(_)));
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[test]
    fn test_failed_acquire_stays_uninitialized() {
        let mut session: DeviceSession<()> = DeviceSession::new("missing");
        let err = session
            .initialize(|| Err(BridgeError::Initialization("no device".into())))
            .unwrap_err();
        assert_eq!(err, BridgeError::Initialization("no device".into()));
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[test]
    fn test_failed_stop_still_stops() {
        let mut session = DeviceSession::new("flaky");
        session.initialize(|| Ok(())).unwrap();
        session.start(|_| Ok(())).unwrap();

        assert!(session
            .stop(|_| Err(BridgeError::Transport("gone".into())))
            .is_err());
        assert_eq!(session.state(), SessionState::Stopped);

        session.destroy();
        assert_eq!(session.state(), SessionState::Destroyed);
        assert!(session.resource().is_none());
    }
}
