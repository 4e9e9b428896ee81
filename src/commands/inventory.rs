use crate::Context;
use crate::cli::ProjectArgs;
use crate::config::Project;
use crate::inventory::FileInventory;
use crate::render::host_vars_path;
use crate::ui;
use anyhow::Result;
use colored::Colorize;
use deploykit::DeviceTarget;
use std::path::Path;

struct Row<'a> {
    device: &'a DeviceTarget,
    has_vars: bool,
}

fn rows<'a>(inventory: &'a FileInventory, host_vars_dir: &Path) -> Vec<Row<'a>> {
    inventory
        .devices()
        .iter()
        .map(|device| Row {
            device,
            has_vars: host_vars_path(host_vars_dir, &device.name).is_file(),
        })
        .collect()
}

/// List devices in deployment order with their host vars status
pub fn run(ctx: &Context, args: &ProjectArgs) -> Result<()> {
    let project = Project::load(&args.project)?;
    let inventory = FileInventory::load(&project.inventory_path())?;

    if inventory.is_empty() {
        ui::info("Inventory has no devices");
        return Ok(());
    }

    let host_vars_dir = project.host_vars_dir();
    let rows = rows(&inventory, &host_vars_dir);
    let width = rows.iter().map(|r| r.device.name.len()).max().unwrap_or(0);

    if !ctx.quiet {
        ui::header("Inventory");
        ui::kv("Project", &project.root.display().to_string());
        ui::kv("Template", &project.template_path().display().to_string());
        println!();
    }

    for row in &rows {
        let glyph = if row.has_vars {
            "✓".green()
        } else {
            "✗".red()
        };
        println!(
            "  {} {:<width$}  {}",
            glyph,
            row.device.name,
            row.device.address.dimmed()
        );
        if !row.has_vars {
            ui::dim(&format!(
                "  missing {}",
                host_vars_path(&host_vars_dir, &row.device.name).display()
            ));
        }
    }

    let missing = rows.iter().filter(|r| !r.has_vars).count();
    println!();
    if missing == 0 {
        ui::success(&format!("{} device(s), all with host vars", rows.len()));
    } else {
        ui::warn(&format!(
            "{} of {} device(s) have no host vars and will fail to render",
            missing,
            rows.len()
        ));
    }

    Ok(())
}
