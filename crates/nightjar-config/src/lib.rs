//! Configuration loading for nightjar daemons.
//!
//! Two formats live here: the TOML daemon configuration ([`AppConfig`])
//! and the INI-style run files (value, mode, defaults, autosave) handled
//! by [`inifile`].

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub mod inifile;

pub use inifile::{IniFile, Section};

/// Configuration loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub daemon: DaemonSection,
    #[serde(default)]
    pub device: DeviceSection,
    #[serde(default)]
    pub files: FilesSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            daemon: DaemonSection::default(),
            device: DeviceSection::default(),
            files: FilesSection::default(),
            logging: LoggingSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonSection {
    /// Address the TCP listener binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: IpAddr,
    /// Port the TCP listener binds to; 0 picks an ephemeral port.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Directory prefix for the exclusive lock file.
    #[serde(default = "default_lock_prefix")]
    pub lock_prefix: PathBuf,
    /// Seconds between idle hardware refreshes; 0 disables them.
    #[serde(default = "default_idle_info_secs")]
    pub idle_info_secs: u64,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            listen_port: default_listen_port(),
            lock_prefix: default_lock_prefix(),
            idle_info_secs: default_idle_info_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceSection {
    /// Device name announced on the wire and used for the lock file.
    #[serde(default = "default_device_name")]
    pub name: String,
    /// Device kind; only "generic" ships in this workspace, concrete
    /// drivers register their own.
    #[serde(rename = "type", default = "default_device_type")]
    pub device_type: String,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            name: default_device_name(),
            device_type: default_device_type(),
        }
    }
}

/// Optional run files consumed at value initialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilesSection {
    pub valuefile: Option<PathBuf>,
    pub modefile: Option<PathBuf>,
    pub defaults: Option<PathBuf>,
    pub autosave: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    /// Default log filter, overridable with `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen_addr() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_listen_port() -> u16 {
    0
}

fn default_lock_prefix() -> PathBuf {
    PathBuf::from("/var/run/nightjar")
}

fn default_idle_info_secs() -> u64 {
    60
}

fn default_device_name() -> String {
    "D0".to_string()
}

fn default_device_type() -> String {
    "generic".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load and validate a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: AppConfig = toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.name.is_empty() {
            return Err(ConfigError::Validation(
                "device name must not be empty".to_string(),
            ));
        }
        if self
            .device
            .name
            .chars()
            .any(|c| c.is_whitespace() || c == '"')
        {
            return Err(ConfigError::Validation(format!(
                "device name '{}' contains whitespace or quotes",
                self.device.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.daemon.listen_port, 0);
        assert_eq!(config.daemon.idle_info_secs, 60);
        assert_eq!(config.device.name, "D0");
        assert!(config.files.valuefile.is_none());
        config.validate().unwrap();
    }

    #[test_log::test]
    fn test_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nightjar.toml");
        std::fs::write(
            &path,
            r#"
[daemon]
listen_port = 617
idle_info_secs = 10

[device]
name = "C0"

[files]
valuefile = "/etc/nightjar/c0.values"
"#,
        )
        .unwrap();
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.daemon.listen_port, 617);
        assert_eq!(config.device.name, "C0");
        assert_eq!(
            config.files.valuefile.as_deref(),
            Some(Path::new("/etc/nightjar/c0.values"))
        );
        assert_eq!(config.logging.level, "info");
    }

    #[test_log::test]
    fn test_unknown_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nightjar.toml");
        std::fs::write(&path, "[daemon]\nlisten_prot = 617\n").unwrap();
        let err = AppConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_device_name_validated() {
        let mut config = AppConfig::default();
        config.device.name = "two words".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(_))
        ));
    }
}
