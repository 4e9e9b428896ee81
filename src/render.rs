//! Per-device configuration rendering from host vars

use crate::template::Template;
use deploykit::{DeviceTarget, RenderError, RenderedConfig, Renderer};
use serde_yaml::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Renders one shared template with `host_vars/<hostname>.yaml`
pub struct HostVarsRenderer {
    template: Template,
    host_vars_dir: PathBuf,
}

impl HostVarsRenderer {
    pub fn new(template: Template, host_vars_dir: impl Into<PathBuf>) -> Self {
        Self {
            template,
            host_vars_dir: host_vars_dir.into(),
        }
    }

    pub fn host_vars_path(&self, device: &DeviceTarget) -> PathBuf {
        host_vars_path(&self.host_vars_dir, &device.name)
    }

    fn load_vars(&self, device: &DeviceTarget) -> Result<Value, RenderError> {
        let path = self.host_vars_path(device);
        let text = fs::read_to_string(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => RenderError::MissingHostData {
                device: device.name.clone(),
                path: path.clone(),
            },
            _ => RenderError::InvalidHostData {
                device: device.name.clone(),
                message: format!("{}: {e}", path.display()),
            },
        })?;

        serde_yaml::from_str(&text).map_err(|e| RenderError::InvalidHostData {
            device: device.name.clone(),
            message: format!("{}: {e}", path.display()),
        })
    }
}

impl Renderer for HostVarsRenderer {
    fn render(&self, device: &DeviceTarget) -> Result<RenderedConfig, RenderError> {
        let vars = self.load_vars(device)?;
        let text = self.template.render(&vars)?;
        log::debug!("{}: rendered {} bytes", device.name, text.len());
        Ok(RenderedConfig::new(device.name.as_str(), text))
    }
}

pub fn host_vars_path(dir: &Path, hostname: &str) -> PathBuf {
    dir.join(format!("{hostname}.yaml"))
}
