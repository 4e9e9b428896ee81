pub mod deploy;
pub mod inventory;
pub mod render;

use crate::config::Project;
use crate::template::Template;
use anyhow::{Context as _, Result};
use std::fs;

/// Read and parse the project's template once for the whole run
pub fn load_template(project: &Project) -> Result<Template> {
    let path = project.template_path();
    let text = fs::read_to_string(&path)
        .with_context(|| format!("Could not read template {}", path.display()))?;
    Template::parse(&text).with_context(|| format!("In template {}", path.display()))
}
