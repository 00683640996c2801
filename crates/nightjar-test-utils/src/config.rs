//! Configuration builders for tests.
//!
//! Use [`TestConfigBuilder`] to create customised [`AppConfig`] values without
//! repeating boilerplate across crate boundaries.

use std::path::PathBuf;

use nightjar_config::AppConfig;

/// Fluent builder for [`AppConfig`] in tests.
///
/// # Example
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .device_name("C0")
///     .listen_port(0)
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn device_name(mut self, name: &str) -> Self {
        self.config.device.name = name.to_string();
        self
    }

    pub fn listen_port(mut self, port: u16) -> Self {
        self.config.daemon.listen_port = port;
        self
    }

    pub fn lock_prefix(mut self, prefix: impl Into<PathBuf>) -> Self {
        self.config.daemon.lock_prefix = prefix.into();
        self
    }

    pub fn idle_info_secs(mut self, secs: u64) -> Self {
        self.config.daemon.idle_info_secs = secs;
        self
    }

    pub fn valuefile(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.files.valuefile = Some(path.into());
        self
    }

    pub fn modefile(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.files.modefile = Some(path.into());
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
