//! Daemon test helpers.
//!
//! Helpers for constructing [`Daemon`] instances in tests, with an owned
//! temp directory for run files and a captive client channel for
//! asserting on broadcast protocol lines.

use std::path::PathBuf;

use nightjar_core::daemon::Daemon;
use nightjar_core::device::GenericDevice;
use nightjar_core::ConnId;
use tempfile::TempDir;
use tokio::sync::mpsc;

/// A test-scoped daemon with an owned temp directory for run files.
///
/// The temp directory is deleted automatically when this value is dropped,
/// guaranteeing cleanup even on panic.
pub struct TestDaemon {
    pub daemon: Daemon<GenericDevice>,
    temp_dir: TempDir,
}

impl TestDaemon {
    pub fn new(name: &str) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let daemon = Daemon::new(GenericDevice, name).expect("failed to create daemon");
        Self { daemon, temp_dir }
    }

    /// Write a run file (value/mode/defaults) into the temp directory and
    /// return its path.
    pub fn write_run_file(&self, file_name: &str, content: &str) -> PathBuf {
        let path = self.temp_dir.path().join(file_name);
        std::fs::write(&path, content).expect("failed to write run file");
        path
    }

    /// Register a captive client and swallow the initial metainfo replay,
    /// so tests only see the lines their own actions produce.
    pub fn connect(&mut self) -> (ConnId, mpsc::UnboundedReceiver<String>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = self.daemon.register_connection(tx);
        while rx.try_recv().is_ok() {}
        (conn, rx)
    }
}

/// Drain every line currently buffered on a captive client channel.
pub fn drain_lines(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Ok(line) = rx.try_recv() {
        lines.push(line);
    }
    lines
}
