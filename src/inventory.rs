//! `inventory.toml` loading and device selection

use deploykit::{DeviceTarget, Inventory};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("inventory not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid inventory {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("device #{index} has an empty {field}")]
    EmptyField { index: usize, field: &'static str },

    #[error("duplicate hostname '{0}' in inventory")]
    DuplicateHostname(String),

    #[error("unknown device '{0}' (not in inventory)")]
    UnknownDevice(String),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct InventoryFile {
    #[serde(default)]
    devices: Vec<DeviceEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeviceEntry {
    hostname: String,
    host: String,
}

/// Devices from `inventory.toml`, in file order
#[derive(Debug, Clone)]
pub struct FileInventory {
    devices: Vec<DeviceTarget>,
}

impl FileInventory {
    pub fn load(path: &Path) -> Result<Self, InventoryError> {
        let text = fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => InventoryError::NotFound(path.to_path_buf()),
            _ => InventoryError::Io {
                path: path.to_path_buf(),
                source: e,
            },
        })?;
        Self::parse(&text, path)
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self, InventoryError> {
        let file: InventoryFile = toml::from_str(text).map_err(|e| InventoryError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut seen = HashSet::new();
        let mut devices = Vec::with_capacity(file.devices.len());
        for (i, entry) in file.devices.into_iter().enumerate() {
            let hostname = entry.hostname.trim();
            let host = entry.host.trim();
            if hostname.is_empty() {
                return Err(InventoryError::EmptyField {
                    index: i + 1,
                    field: "hostname",
                });
            }
            if host.is_empty() {
                return Err(InventoryError::EmptyField {
                    index: i + 1,
                    field: "host",
                });
            }
            if !seen.insert(hostname.to_string()) {
                return Err(InventoryError::DuplicateHostname(hostname.to_string()));
            }
            devices.push(DeviceTarget::new(hostname, host));
        }

        Ok(Self { devices })
    }

    /// Keep only the named devices, still in inventory order
    pub fn only(self, names: &[String]) -> Result<Self, InventoryError> {
        if names.is_empty() {
            return Ok(self);
        }
        if let Some(unknown) = names.iter().find(|n| self.get(n).is_none()) {
            return Err(InventoryError::UnknownDevice(unknown.clone()));
        }

        let devices = self
            .devices
            .into_iter()
            .filter(|d| names.contains(&d.name))
            .collect();
        Ok(Self { devices })
    }

    pub fn get(&self, name: &str) -> Option<&DeviceTarget> {
        self.devices.iter().find(|d| d.name == name)
    }

    pub fn devices(&self) -> &[DeviceTarget] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl Inventory for FileInventory {
    fn list_devices(&self) -> Vec<DeviceTarget> {
        self.devices.clone()
    }
}
