use crate::Context;
use crate::cli::ProjectArgs;
use crate::commands::load_template;
use crate::config::Project;
use crate::inventory::{FileInventory, InventoryError};
use crate::render::HostVarsRenderer;
use anyhow::Result;
use deploykit::Renderer;

/// Render one device's configuration without contacting it
pub fn run(ctx: &Context, hostname: &str, args: &ProjectArgs) -> Result<()> {
    let config = render_device(ctx, hostname, args)?;
    print!("{config}");
    if !config.ends_with('\n') {
        println!();
    }
    Ok(())
}

fn render_device(ctx: &Context, hostname: &str, args: &ProjectArgs) -> Result<String> {
    let project = Project::load(&args.project)?;
    let inventory = FileInventory::load(&project.inventory_path())?;
    let device = inventory
        .get(hostname)
        .ok_or_else(|| InventoryError::UnknownDevice(hostname.to_string()))?;

    let renderer = HostVarsRenderer::new(load_template(&project)?, project.host_vars_dir());
    if ctx.verbose > 0 {
        log::info!(
            "Rendering {} from {}",
            project.template_path().display(),
            renderer.host_vars_path(device).display()
        );
    }

    let config = renderer.render(device)?;
    Ok(config.as_str().to_string())
}
