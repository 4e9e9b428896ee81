//! Scoped session ownership
//!
//! A [`SessionGuard`] owns an open session and closes it exactly once: when
//! [`SessionGuard::close`] is called, or when the guard is dropped on any
//! other path (early return, cancellation, unwinding panic).

use crate::context::Session;
use std::ops::{Deref, DerefMut};

/// Owns a session and guarantees it is closed
pub struct SessionGuard<S: Session> {
    session: S,
    device: String,
    closed: bool,
}

impl<S: Session> SessionGuard<S> {
    pub fn new(session: S, device: impl Into<String>) -> Self {
        let device = device.into();
        log::debug!("{device}: session opened");
        Self {
            session,
            device,
            closed: false,
        }
    }

    /// Close the session now instead of at drop
    pub fn close(mut self) {
        self.release();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn release(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.session.close();
        log::debug!("{}: session closed", self.device);
    }
}

impl<S: Session> Deref for SessionGuard<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.session
    }
}

impl<S: Session> DerefMut for SessionGuard<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.session
    }
}

impl<S: Session> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{DeviceScript, ScriptedConnector};
    use crate::types::{Credentials, Datastore, DeviceTarget};
    use crate::context::Connector;

    fn open(connector: &ScriptedConnector) -> SessionGuard<crate::testing::ScriptedSession> {
        let device = DeviceTarget::new("r1", "10.0.0.1");
        let session = connector
            .open(&device, &Credentials::default())
            .expect("scripted connect succeeds");
        SessionGuard::new(session, "r1")
    }

    #[test]
    fn test_explicit_close_closes_once() {
        let connector = ScriptedConnector::new().with_device("r1", DeviceScript::default());
        let guard = open(&connector);
        guard.close();
        assert_eq!(connector.opens("r1"), 1);
        assert_eq!(connector.closes("r1"), 1);
    }

    #[test]
    fn test_drop_closes_session() {
        let connector = ScriptedConnector::new().with_device("r1", DeviceScript::default());
        {
            let mut guard = open(&connector);
            let _ = guard.lock(Datastore::Candidate);
            assert!(!guard.is_closed());
        }
        assert_eq!(connector.closes("r1"), 1);
    }

    #[test]
    fn test_unwind_closes_session() {
        let connector = ScriptedConnector::new().with_device("r1", DeviceScript::default());
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = open(&connector);
            panic!("worker defect");
        }));
        assert!(result.is_err());
        assert_eq!(connector.closes("r1"), 1);
    }
}
