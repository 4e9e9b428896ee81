use crate::Context;
use crate::cli::DeployArgs;
use crate::commands::load_template;
use crate::config::{Project, Settings};
use crate::inventory::FileInventory;
use crate::progress::DeployProgress;
use crate::render::HostVarsRenderer;
use crate::report;
use crate::ui;
use anyhow::{Context as _, Result};
use chrono::Local;
use colored::Colorize;
use deploykit::{CancelToken, Credentials, DeployOptions, FleetOrchestrator};
use netconf::SshConnector;
use std::io::IsTerminal;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Flags override netpush.toml
fn deploy_options(settings: &Settings, args: &DeployArgs) -> DeployOptions {
    DeployOptions {
        datastore: args.datastore.unwrap_or(settings.datastore),
        jobs: args.jobs.unwrap_or(settings.jobs),
        deadline: args
            .deadline
            .map(Duration::from_secs)
            .or_else(|| settings.deadline()),
    }
}

fn confirm_proceed(devices: usize) -> Result<bool> {
    use dialoguer::Confirm;

    let confirmed = Confirm::new()
        .with_prompt(format!("Deploy to {devices} device(s)?"))
        .default(false)
        .interact()?;

    Ok(confirmed)
}

/// First Ctrl-C cancels the run so workers still unlock and close, a second one exits
struct Interrupt {
    cancel: CancelToken,
    pressed: AtomicBool,
}

impl Interrupt {
    fn new(cancel: CancelToken) -> Self {
        Self {
            cancel,
            pressed: AtomicBool::new(false),
        }
    }

    /// Returns true when the process should exit right away
    fn on_signal(&self) -> bool {
        if self.pressed.swap(true, Ordering::SeqCst) {
            return true;
        }
        log::warn!("Interrupted: releasing locks and closing sessions (Ctrl-C again to force)");
        self.cancel.cancel();
        false
    }
}

fn cancel_on_interrupt(cancel: CancelToken) -> Result<()> {
    let interrupt = Interrupt::new(cancel);
    ctrlc::set_handler(move || {
        if interrupt.on_signal() {
            std::process::exit(130);
        }
    })
    .context("Could not install the Ctrl-C handler")
}

pub fn run(ctx: &Context, args: DeployArgs) -> Result<ExitCode> {
    let project = Project::load(&args.project.project)?;
    let inventory = FileInventory::load(&project.inventory_path())?.only(&args.only)?;

    if inventory.is_empty() {
        ui::info("No devices to deploy to");
        return Ok(ExitCode::SUCCESS);
    }

    // Parse before prompting so template errors surface without a connection
    let renderer = HostVarsRenderer::new(load_template(&project)?, project.host_vars_dir());
    let options = deploy_options(&project.settings, &args);
    let ssh = project.settings.ssh_options();

    if !ctx.quiet && !args.json {
        ui::header("Deploy");
        ui::kv("Project", &project.root.display().to_string());
        ui::kv("Devices", &inventory.len().to_string());
        ui::kv("Datastore", options.datastore.as_str());
        ui::kv(
            "Workers",
            &match options.jobs {
                0 => "one per device".to_string(),
                n => n.to_string(),
            },
        );
        if let Some(deadline) = options.deadline {
            ui::kv("Deadline", &format!("{}s", deadline.as_secs()));
        }
        if args.username.is_empty() {
            ui::kv("User", &"(ssh default)".dimmed().to_string());
        } else {
            ui::kv("User", &args.username);
        }
        println!();
    }

    if !args.yes && !args.json && std::io::stdin().is_terminal() && !confirm_proceed(inventory.len())? {
        ui::info("Aborted");
        return Ok(ExitCode::SUCCESS);
    }

    log::debug!(
        "ssh: port {}, strict host keys {}, connect {}s, rpc {}s",
        ssh.port,
        ssh.strict_host_key_checking,
        ssh.connect_timeout.as_secs(),
        ssh.rpc_timeout.as_secs()
    );

    let credentials = Credentials::new(args.username, args.password);
    let orchestrator =
        FleetOrchestrator::new(SshConnector::new(ssh), renderer, credentials, options);
    cancel_on_interrupt(orchestrator.cancel_token())?;

    let progress = if ctx.quiet || args.json {
        DeployProgress::hidden(inventory.len())
    } else {
        DeployProgress::new(inventory.len())
    };
    let result = orchestrator.run_inventory(&inventory, &progress);
    progress.finish();
    let report = result?;

    if args.json {
        println!("{}", report::render_json(&report)?);
    } else {
        if !ctx.quiet {
            println!();
        }
        print!("{}", report::render_text(&report));
        ui::dim(&format!(
            "started {}",
            report
                .started_at
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
        ));
    }

    if report.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        let failed = report.summary().failed;
        ui::error(&format!("{failed} device(s) did not get the configuration"));
        Ok(ExitCode::FAILURE)
    }
}
