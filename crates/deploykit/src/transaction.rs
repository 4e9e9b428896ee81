//! Transaction executor - lock, push, commit, unlock against one session

use crate::cancel::CancelToken;
use crate::context::{ProgressCallback, Session};
use crate::error::ProtocolError;
use crate::types::{Datastore, DeviceTarget, RenderedConfig, RpcReply, Step, StepResult};
use std::time::Instant;

/// Runs the fixed four-step transaction for one device
///
/// Steps run strictly in order and each starts only after the previous
/// step's result is known:
///
/// 1. `lock` - on failure nothing else is attempted
/// 2. `push` - on failure commit is skipped, unlock still runs
/// 3. `commit` - on failure unlock still runs
/// 4. `unlock` - runs whenever lock succeeded
///
/// The executor reports what the device reports. It does not assume the
/// device rolls back a partially applied push.
pub struct TransactionExecutor<'a> {
    device: &'a DeviceTarget,
    cancel: &'a CancelToken,
    progress: &'a dyn ProgressCallback,
}

impl<'a> TransactionExecutor<'a> {
    pub fn new(
        device: &'a DeviceTarget,
        cancel: &'a CancelToken,
        progress: &'a dyn ProgressCallback,
    ) -> Self {
        Self {
            device,
            cancel,
            progress,
        }
    }

    /// Execute the transaction, returning a result for every attempted step
    pub fn execute<S: Session + ?Sized>(
        &self,
        session: &mut S,
        datastore: Datastore,
        config: &RenderedConfig,
    ) -> Vec<StepResult> {
        let mut steps = Vec::with_capacity(Step::ALL.len());

        let lock = self.run_step(Step::Lock, || session.lock(datastore));
        let locked = lock.success;
        steps.push(lock);
        if !locked {
            return steps;
        }

        // From here on the lock is held and must be released
        if self.cancelled(Step::Push) {
            log::info!("{}: cancelled with lock held, releasing", self.device.name);
        } else {
            let push = self.run_step(Step::Push, || session.push(datastore, config));
            let applied = push.success;
            steps.push(push);

            if applied && !self.cancelled(Step::Commit) {
                steps.push(self.run_step(Step::Commit, || session.commit()));
            }
        }

        let unlock = self.run_step(Step::Unlock, || session.unlock(datastore));
        if !unlock.success {
            log::warn!(
                "{}: {} lock could not be released: {}",
                self.device.name,
                datastore,
                unlock.detail()
            );
        }
        steps.push(unlock);

        steps
    }

    fn cancelled(&self, next: Step) -> bool {
        let cancelled = self.cancel.is_cancelled();
        if cancelled {
            log::debug!("{}: cancelled before {}", self.device.name, next);
        }
        cancelled
    }

    fn run_step<F>(&self, step: Step, op: F) -> StepResult
    where
        F: FnOnce() -> Result<RpcReply, ProtocolError>,
    {
        log::debug!("{}: {} ({})", self.device.name, step, step.operation());
        let started = Instant::now();

        let result = match op() {
            Ok(reply) => StepResult::from_reply(step, reply, started.elapsed()),
            Err(e) => StepResult::from_error(step, &e, started.elapsed()),
        };

        if result.success {
            log::debug!("{}: {} ok in {}ms", self.device.name, step, result.elapsed_ms);
        } else {
            log::debug!("{}: {} failed: {}", self.device.name, step, result.detail());
        }

        self.progress.on_step_complete(self.device, &result);
        result
    }
}
