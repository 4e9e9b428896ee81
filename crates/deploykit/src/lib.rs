//! # Deploykit
//!
//! Transactional configuration deployment across a fleet of network devices.
//!
//! Every device goes through the same fixed transaction over its own
//! management session:
//!
//! ```text
//! lock(datastore) -> push(datastore, config) -> commit -> unlock(datastore)
//! ```
//!
//! Devices run concurrently and independently. One device failing never
//! aborts, delays or changes the result of another, and every session that
//! was opened is closed again on every exit path.
//!
//! ## Core Concepts
//!
//! - **DeviceTarget**: A device from the inventory (name + address)
//! - **Session**: An open management connection to one device
//! - **SessionGuard**: Owns a session and closes it exactly once
//! - **TransactionExecutor**: Runs lock/push/commit/unlock in order
//! - **DeviceWorker**: Render, connect, transact, release for one device
//! - **FleetOrchestrator**: One worker per device, report in inventory order
//!
//! ## Example
//!
//! ```ignore
//! use deploykit::{
//!     Credentials, DeployOptions, DeviceTarget, FleetOrchestrator, RenderedConfig,
//! };
//!
//! let devices = vec![
//!     DeviceTarget::new("r1", "10.0.0.1"),
//!     DeviceTarget::new("r2", "10.0.0.2"),
//! ];
//!
//! let renderer = |device: &DeviceTarget| {
//!     Ok(RenderedConfig::new(&device.name, "<config/>"))
//! };
//!
//! let orchestrator = FleetOrchestrator::new(
//!     connector,
//!     renderer,
//!     Credentials::new("admin", Some("secret".into())),
//!     DeployOptions::default(),
//! );
//!
//! let report = orchestrator.run(&devices)?;
//! assert_eq!(report.outcomes.len(), 2);
//! ```
//!
//! ## Provider Traits
//!
//! The crate uses traits for dependency injection:
//!
//! - [`Inventory`]: Supplies the devices to deploy to
//! - [`Renderer`]: Produces the configuration document for a device
//! - [`Connector`] / [`Session`]: Open and drive a management session
//! - [`ProgressCallback`]: Receives progress updates from worker threads
//!
//! This keeps the orchestration logic free of any particular transport,
//! template engine or UI.

pub mod cancel;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod session;
pub mod transaction;
pub mod types;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types at crate root
pub use cancel::{CancelToken, Deadline};
pub use context::{Connector, Inventory, NoProgress, ProgressCallback, Renderer, Session};
pub use error::{ConnectCategory, ConnectError, DeployError, ProtocolError, RenderError};
pub use orchestrator::FleetOrchestrator;
pub use session::SessionGuard;
pub use transaction::TransactionExecutor;
pub use types::{
    Classification, Credentials, Datastore, DeployOptions, DeviceOutcome, DeviceTarget,
    FleetReport, FleetSummary, RenderedConfig, RpcError, RpcReply, Severity, Step, StepResult,
    StepStatus,
};
pub use worker::DeviceWorker;
