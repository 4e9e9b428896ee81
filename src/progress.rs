//! Progress bar for deployment runs

use colored::Colorize;
use deploykit::{DeviceOutcome, DeviceTarget, ProgressCallback, Severity, StepResult};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

const TEMPLATE: &str = "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}";

/// One tick per finished device, with a line per device printed above the bar
pub struct DeployProgress {
    bar: ProgressBar,
}

impl DeployProgress {
    pub fn new(devices: usize) -> Self {
        let bar = ProgressBar::new(devices as u64);
        match ProgressStyle::default_bar().template(TEMPLATE) {
            Ok(style) => bar.set_style(style.progress_chars("=>-")),
            Err(e) => log::debug!("progress template rejected: {e}"),
        }
        Self { bar }
    }

    /// A bar that draws nothing (quiet or JSON output)
    pub fn hidden(devices: usize) -> Self {
        let bar = ProgressBar::with_draw_target(Some(devices as u64), ProgressDrawTarget::hidden());
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressCallback for DeployProgress {
    fn on_device_start(&self, device: &DeviceTarget) {
        self.bar.set_message(device.name.clone());
    }

    fn on_step_complete(&self, device: &DeviceTarget, result: &StepResult) {
        log::debug!(
            "{}: {} {} in {}ms",
            device.name,
            result.step,
            if result.success { "ok" } else { "failed" },
            result.elapsed_ms
        );
    }

    fn on_device_complete(&self, outcome: &DeviceOutcome) {
        let glyph = match outcome.severity() {
            Severity::Success => "✓".green(),
            Severity::Warning => "⚠".yellow(),
            Severity::Failure => "✗".red(),
        };
        if !self.bar.is_hidden() {
            self.bar.suspend(|| {
                println!(
                    "  {} {} {}",
                    glyph,
                    outcome.device.name,
                    outcome.classification.to_string().dimmed()
                );
            });
        }
        self.bar.inc(1);
    }
}
