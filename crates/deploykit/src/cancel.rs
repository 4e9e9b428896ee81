//! Run cancellation
//!
//! Workers check the token between steps. A cancelled worker still unlocks a
//! granted lock and closes its session before it returns.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Shared cancellation flag
///
/// A child token is cancelled when it or any of its ancestors is, while
/// cancelling the child leaves the parent untouched.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    parent: Option<Box<CancelToken>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal every worker holding this token to stop
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }

    /// A token scoped to one run that also observes this one
    pub fn child(&self) -> Self {
        Self {
            cancelled: Arc::default(),
            parent: Some(Box::new(self.clone())),
        }
    }
}

fn deadline_message(after: Duration) -> String {
    format!("Run deadline of {after:?} reached, cancelling remaining devices")
}

/// Cancels a token once a timeout elapses, unless dropped first
pub struct Deadline {
    disarm: Option<mpsc::Sender<()>>,
    watcher: Option<JoinHandle<()>>,
}

impl Deadline {
    pub fn arm(token: CancelToken, after: Duration) -> Self {
        let (disarm, expired) = mpsc::channel::<()>();

        let watcher = thread::spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = expired.recv_timeout(after) {
                log::warn!("{}", deadline_message(after));
                token.cancel();
            }
        });

        Self {
            disarm: Some(disarm),
            watcher: Some(watcher),
        }
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        // Disconnecting the channel wakes the watcher without cancelling
        drop(self.disarm.take());
        if let Some(watcher) = self.watcher.take() {
            let _ = watcher.join();
        }
    }
}
