//! Fleet orchestrator - runs one device worker per device concurrently
//!
//! Results are collected positionally, so the report lists devices in
//! inventory order no matter which device finishes first.

use crate::cancel::{CancelToken, Deadline};
use crate::context::{Connector, Inventory, NoProgress, ProgressCallback, Renderer};
use crate::error::Result;
use crate::types::{Credentials, DeployOptions, DeviceOutcome, DeviceTarget, FleetReport};
use crate::worker::DeviceWorker;
use chrono::Utc;
use rayon::prelude::*;
use std::time::Instant;

/// Deploys a rendered configuration to every device of a fleet
pub struct FleetOrchestrator<C: Connector, R: Renderer> {
    connector: C,
    renderer: R,
    credentials: Credentials,
    options: DeployOptions,
    cancel: CancelToken,
}

impl<C: Connector, R: Renderer> FleetOrchestrator<C, R> {
    pub fn new(connector: C, renderer: R, credentials: Credentials, options: DeployOptions) -> Self {
        Self {
            connector,
            renderer,
            credentials,
            options,
            cancel: CancelToken::new(),
        }
    }

    /// Use an externally owned token, e.g. one wired to a signal handler
    ///
    /// Cancelling it cancels the current run and every later one.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels this orchestrator's runs
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn run(&self, devices: &[DeviceTarget]) -> Result<FleetReport> {
        self.run_with_progress(devices, &NoProgress)
    }

    /// Run against every device an inventory lists
    pub fn run_inventory<I: Inventory + ?Sized>(
        &self,
        inventory: &I,
        progress: &dyn ProgressCallback,
    ) -> Result<FleetReport> {
        self.run_with_progress(&inventory.list_devices(), progress)
    }

    /// Run the transaction on every device and report in input order
    ///
    /// Only failing to start the worker pool is an error. Every device-level
    /// failure is captured in that device's outcome.
    pub fn run_with_progress(
        &self,
        devices: &[DeviceTarget],
        progress: &dyn ProgressCallback,
    ) -> Result<FleetReport> {
        let started_at = Utc::now();
        let started = Instant::now();

        if devices.is_empty() {
            log::info!("No devices to deploy to");
            return Ok(FleetReport::new(
                Vec::new(),
                false,
                started_at,
                started.elapsed(),
            ));
        }

        let workers = match self.options.jobs {
            0 => devices.len(),
            jobs => jobs.min(devices.len()),
        };
        log::info!(
            "Deploying to {} device(s) with {} worker(s), datastore {}",
            devices.len(),
            workers,
            self.options.datastore
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("deploy-worker-{i}"))
            .build()?;

        // The deadline only cancels this run, never the shared token
        let run_cancel = self.cancel.child();
        let worker = DeviceWorker {
            connector: &self.connector,
            renderer: &self.renderer,
            credentials: &self.credentials,
            datastore: self.options.datastore,
            cancel: &run_cancel,
            progress,
        };

        let _deadline = self
            .options
            .deadline
            .map(|after| Deadline::arm(run_cancel.clone(), after));

        // One task per device so a slow device never holds back a queued one
        let outcomes: Vec<DeviceOutcome> = pool.install(|| {
            devices
                .par_iter()
                .with_max_len(1)
                .map(|device| worker.run(device))
                .collect()
        });

        let cancelled = run_cancel.is_cancelled();
        let report = FleetReport::new(outcomes, cancelled, started_at, started.elapsed());

        let summary = report.summary();
        log::info!(
            "Run finished in {}ms: {} committed, {} warning(s), {} failed",
            report.elapsed_ms,
            summary.succeeded,
            summary.warnings,
            summary.failed
        );
        for outcome in report.left_locked() {
            log::warn!("{}: {} left locked", outcome.device, self.options.datastore);
        }

        Ok(report)
    }
}
