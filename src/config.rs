use anyhow::{Context, Result};
use deploykit::Datastore;
use netconf::SshOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SETTINGS_FILE: &str = "netpush.toml";
pub const INVENTORY_FILE: &str = "inventory.toml";
pub const HOST_VARS_DIR: &str = "host_vars";
pub const TEMPLATES_DIR: &str = "templates";

// ============================================================================
// Settings (netpush.toml)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Template file under `templates/`
    pub template: String,
    pub datastore: Datastore,
    /// Devices in flight at once, 0 = one worker per device
    pub jobs: usize,
    pub ssh: SshSettings,
    pub timeouts: TimeoutSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            template: "config.xml.j2".to_string(),
            datastore: Datastore::Candidate,
            jobs: 0,
            ssh: SshSettings::default(),
            timeouts: TimeoutSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SshSettings {
    pub port: u16,
    pub program: String,
    pub strict_host_key_checking: bool,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            port: netconf::DEFAULT_PORT,
            program: "ssh".to_string(),
            strict_host_key_checking: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutSettings {
    pub connect_secs: u64,
    pub rpc_secs: u64,
    /// Whole-run deadline; unset means no deadline
    pub run_secs: Option<u64>,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            connect_secs: 30,
            rpc_secs: 60,
            run_secs: None,
        }
    }
}

impl Settings {
    /// Parse netpush.toml
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("Invalid netpush.toml format")
    }

    pub fn ssh_options(&self) -> SshOptions {
        SshOptions {
            program: self.ssh.program.clone(),
            port: self.ssh.port,
            strict_host_key_checking: self.ssh.strict_host_key_checking,
            connect_timeout: Duration::from_secs(self.timeouts.connect_secs),
            rpc_timeout: Duration::from_secs(self.timeouts.rpc_secs),
        }
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.timeouts.run_secs.map(Duration::from_secs)
    }
}

// ============================================================================
// Project directory
// ============================================================================

/// A deployment project: inventory, host vars, templates and settings
#[derive(Debug, Clone)]
pub struct Project {
    pub root: PathBuf,
    pub settings: Settings,
}

impl Project {
    /// Load the project at `dir` (`~` is expanded)
    pub fn load(dir: &Path) -> Result<Self> {
        let expanded = shellexpand::tilde(&dir.to_string_lossy()).into_owned();
        let root = PathBuf::from(expanded);
        if !root.is_dir() {
            anyhow::bail!("Project directory not found: {}", root.display());
        }

        let settings_path = root.join(SETTINGS_FILE);
        let settings = if settings_path.exists() {
            let text = fs::read_to_string(&settings_path)
                .with_context(|| format!("Could not read {}", settings_path.display()))?;
            Settings::from_toml(&text)
                .with_context(|| format!("In {}", settings_path.display()))?
        } else {
            log::debug!("No {SETTINGS_FILE} in {}, using defaults", root.display());
            Settings::default()
        };

        Ok(Self { root, settings })
    }

    pub fn inventory_path(&self) -> PathBuf {
        self.root.join(INVENTORY_FILE)
    }

    pub fn host_vars_dir(&self) -> PathBuf {
        self.root.join(HOST_VARS_DIR)
    }

    pub fn template_path(&self) -> PathBuf {
        self.root.join(TEMPLATES_DIR).join(&self.settings.template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings.template, "config.xml.j2");
        assert_eq!(settings.datastore, Datastore::Candidate);
        assert_eq!(settings.jobs, 0);
        assert_eq!(settings.deadline(), None);

        let ssh = settings.ssh_options();
        assert_eq!(ssh.port, 830);
        assert_eq!(ssh.program, "ssh");
        assert!(!ssh.strict_host_key_checking);
        assert_eq!(ssh.connect_timeout, Duration::from_secs(30));
        assert_eq!(ssh.rpc_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_full_settings() {
        let settings = Settings::from_toml(
            r#"
template = "ospf.j2"
datastore = "running"
jobs = 8

[ssh]
port = 2830
strict_host_key_checking = true

[timeouts]
rpc_secs = 15
run_secs = 600
"#,
        )
        .unwrap();
        assert_eq!(settings.template, "ospf.j2");
        assert_eq!(settings.datastore, Datastore::Running);
        assert_eq!(settings.jobs, 8);
        assert_eq!(settings.ssh.port, 2830);
        assert_eq!(settings.ssh.program, "ssh");
        assert_eq!(settings.timeouts.connect_secs, 30);
        assert_eq!(settings.ssh_options().rpc_timeout, Duration::from_secs(15));
        assert_eq!(settings.deadline(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(Settings::from_toml("templates = \"x\"").is_err());
        assert!(Settings::from_toml("[ssh]\nuser = \"admin\"").is_err());
        assert!(Settings::from_toml("datastore = \"scratch\"").is_err());
    }

    #[test]
    fn test_project_paths() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(SETTINGS_FILE), "template = \"ospf.j2\"\n").unwrap();

        let project = Project::load(dir.path()).unwrap();
        assert_eq!(project.inventory_path(), dir.path().join("inventory.toml"));
        assert_eq!(project.host_vars_dir(), dir.path().join("host_vars"));
        assert_eq!(
            project.template_path(),
            dir.path().join("templates").join("ospf.j2")
        );
    }

    #[test]
    fn test_project_without_settings_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let project = Project::load(dir.path()).unwrap();
        assert_eq!(project.settings.template, "config.xml.j2");
    }

    #[test]
    fn test_missing_project_dir() {
        let dir = TempDir::new().unwrap();
        assert!(Project::load(&dir.path().join("nope")).is_err());
    }
}
