//! Device worker - one device's end-to-end deployment

use crate::cancel::CancelToken;
use crate::context::{Connector, ProgressCallback, Renderer};
use crate::session::SessionGuard;
use crate::transaction::TransactionExecutor;
use crate::types::{Classification, Credentials, Datastore, DeviceOutcome, DeviceTarget};

/// Renders, connects, runs the transaction and releases the session
///
/// `run` never fails: every error ends up in the returned outcome.
pub struct DeviceWorker<'a, C: Connector, R: Renderer + ?Sized> {
    pub connector: &'a C,
    pub renderer: &'a R,
    pub credentials: &'a Credentials,
    pub datastore: Datastore,
    pub cancel: &'a CancelToken,
    pub progress: &'a dyn ProgressCallback,
}

impl<C: Connector, R: Renderer + ?Sized> DeviceWorker<'_, C, R> {
    pub fn run(&self, device: &DeviceTarget) -> DeviceOutcome {
        self.progress.on_device_start(device);
        let outcome = self.deploy(device);
        log::info!(
            "{}: {} ({} step(s))",
            device.name,
            outcome.classification,
            outcome.steps.len()
        );
        self.progress.on_device_complete(&outcome);
        outcome
    }

    fn deploy(&self, device: &DeviceTarget) -> DeviceOutcome {
        if self.cancel.is_cancelled() {
            return DeviceOutcome::short_circuit(
                device.clone(),
                Classification::Cancelled,
                "run cancelled before the device was started",
            );
        }

        let config = match self.renderer.render(device) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("{}: render failed: {e}", device.name);
                return DeviceOutcome::short_circuit(
                    device.clone(),
                    Classification::RenderFailed,
                    e.to_string(),
                );
            }
        };
        log::debug!("{}: rendered {} bytes", device.name, config.len());

        if self.cancel.is_cancelled() {
            return DeviceOutcome::short_circuit(
                device.clone(),
                Classification::Cancelled,
                "run cancelled before connecting",
            );
        }

        let session = match self.connector.open(device, self.credentials) {
            Ok(session) => session,
            Err(e) => {
                log::warn!(
                    "{}: {} ({})",
                    device.name,
                    e,
                    e.category().description()
                );
                return DeviceOutcome::short_circuit(
                    device.clone(),
                    Classification::ConnectFailed,
                    e.to_string(),
                );
            }
        };

        let mut session = SessionGuard::new(session, device.name.as_str());
        let steps = TransactionExecutor::new(device, self.cancel, self.progress).execute(
            &mut *session,
            self.datastore,
            &config,
        );
        session.close();

        DeviceOutcome::from_steps(device.clone(), steps)
    }
}
