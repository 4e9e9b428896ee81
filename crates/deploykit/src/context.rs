//! Provider traits for the deployment engine
//!
//! These traits allow the orchestrator to be used without depending on a
//! specific inventory format, template engine, transport or UI.

use crate::error::{ConnectError, ProtocolError, RenderError};
use crate::types::{
    Credentials, Datastore, DeviceOutcome, DeviceTarget, RenderedConfig, RpcReply, StepResult,
};

/// Source of the devices to deploy to
pub trait Inventory {
    /// Devices in deployment order
    fn list_devices(&self) -> Vec<DeviceTarget>;
}

impl Inventory for Vec<DeviceTarget> {
    fn list_devices(&self) -> Vec<DeviceTarget> {
        self.clone()
    }
}

impl Inventory for [DeviceTarget] {
    fn list_devices(&self) -> Vec<DeviceTarget> {
        self.to_vec()
    }
}

/// Produces the configuration document for a device
///
/// Rendering is local work. It is called from worker threads, so
/// implementations must be shareable.
pub trait Renderer: Send + Sync {
    fn render(&self, device: &DeviceTarget) -> Result<RenderedConfig, RenderError>;
}

impl<F> Renderer for F
where
    F: Fn(&DeviceTarget) -> Result<RenderedConfig, RenderError> + Send + Sync,
{
    fn render(&self, device: &DeviceTarget) -> Result<RenderedConfig, RenderError> {
        self(device)
    }
}

/// An open, authenticated management session to one device
///
/// Each operation returns the device's reply, which may itself carry
/// errors. `Err` means no usable reply arrived.
pub trait Session: Send {
    /// Take the exclusive write lock on a datastore
    fn lock(&mut self, datastore: Datastore) -> Result<RpcReply, ProtocolError>;

    /// Load the configuration into a datastore
    fn push(
        &mut self,
        datastore: Datastore,
        config: &RenderedConfig,
    ) -> Result<RpcReply, ProtocolError>;

    /// Make the candidate configuration the running configuration
    fn commit(&mut self) -> Result<RpcReply, ProtocolError>;

    /// Release the write lock on a datastore
    fn unlock(&mut self, datastore: Datastore) -> Result<RpcReply, ProtocolError>;

    /// Close the session
    ///
    /// Must be idempotent, must not panic, and always completes locally
    /// even when the device is unreachable.
    fn close(&mut self);
}

/// Opens sessions to devices
pub trait Connector: Send + Sync {
    type Session: Session;

    fn open(
        &self,
        device: &DeviceTarget,
        credentials: &Credentials,
    ) -> Result<Self::Session, ConnectError>;
}

/// Progress callback for deployment runs
///
/// Called concurrently from worker threads.
pub trait ProgressCallback: Sync {
    /// Called when a worker picks up a device
    fn on_device_start(&self, device: &DeviceTarget);

    /// Called after each attempted step
    fn on_step_complete(&self, device: &DeviceTarget, result: &StepResult);

    /// Called when a device reaches its final outcome
    fn on_device_complete(&self, outcome: &DeviceOutcome);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_device_start(&self, _device: &DeviceTarget) {}
    fn on_step_complete(&self, _device: &DeviceTarget, _result: &StepResult) {}
    fn on_device_complete(&self, _outcome: &DeviceOutcome) {}
}
