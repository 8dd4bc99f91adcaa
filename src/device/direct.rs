//! ADB over the network: `adb connect` to a remote address, with an optional session key.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::NamedTempFile;

use super::adb::{normalize_address, AdbClient};
use super::command::{DeviceCommand, Platform};
use super::connector::{ensure_connected, ConnectionConfig, ConnectionKind, DeviceConnector, DeviceHandle};
use super::runner::CommandRunner;
use super::screenshot::{capture_with_retry, CaptureOptions, Screenshot};
use super::DeviceError;

/// Remote device reached with `adb connect <address>`.
///
/// When a private key is supplied it is written to a temporary file that
/// lives only as long as the session and is removed on disconnect.
pub struct DirectAdbConnector {
    address: String,
    adb_key: Option<String>,
    base: AdbClient,
    adb: AdbClient,
    key_file: Option<NamedTempFile>,
    handle: Option<DeviceHandle>,
}

impl DirectAdbConnector {
    /// Connector for `address` (`host[:port]`).
    pub fn new(runner: Arc<dyn CommandRunner>, address: impl Into<String>) -> Self {
        let address = normalize_address(&address.into());
        let base = AdbClient::new(runner).with_serial(address.clone());
        Self {
            address,
            adb_key: None,
            adb: base.clone(),
            base,
            key_file: None,
            handle: None,
        }
    }

    /// Build from connection parameters: `address` (required), `adb_key`, `adb_path`.
    pub fn from_config(config: &ConnectionConfig, runner: Arc<dyn CommandRunner>) -> Result<Self, DeviceError> {
        let mut connector = Self::new(runner, config.require("address")?);
        if let Some(path) = config.param("adb_path") {
            connector.base = connector.base.with_path(path);
            connector.adb = connector.base.clone();
        }
        connector.adb_key = config.param("adb_key").map(str::to_string);
        Ok(connector)
    }

    /// Authenticate with this private key content.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.adb_key = Some(key.into());
        self
    }

    /// Path of the session key file while connected.
    pub fn key_path(&self) -> Option<&Path> {
        self.key_file.as_ref().map(|f| f.path())
    }

    fn write_key(key: &str) -> Result<NamedTempFile, DeviceError> {
        let mut file = tempfile::Builder::new()
            .prefix("mobile_agent_")
            .suffix("_adbkey")
            .tempfile()?;
        file.write_all(key.as_bytes())?;
        file.flush()?;
        Ok(file)
    }

    fn remove_key(&mut self) {
        if let Some(file) = self.key_file.take() {
            let path = file.path().to_path_buf();
            match file.close() {
                Ok(()) => tracing::debug!(path = %path.display(), "removed ADB key file"),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove ADB key file"),
            }
        }
        self.adb = self.base.clone();
    }
}

#[async_trait]
impl DeviceConnector for DirectAdbConnector {
    fn kind(&self) -> ConnectionKind {
        ConnectionKind::Direct
    }

    async fn connect(&mut self) -> Result<DeviceHandle, DeviceError> {
        tracing::info!(address = %self.address, "connecting to remote ADB device");

        if let Some(key) = &self.adb_key {
            let file = Self::write_key(key)?;
            self.adb = self
                .base
                .clone()
                .with_env("ADB_VENDOR_KEYS", file.path().to_string_lossy());
            self.key_file = Some(file);
        }

        if let Err(e) = self.adb.connect(&self.address).await {
            self.remove_key();
            return Err(e);
        }

        let model = self.adb.get_prop("ro.product.model").await;
        tracing::info!(address = %self.address, model = ?model, "connected to remote ADB device");

        let handle = DeviceHandle {
            serial: self.address.clone(),
            model,
            platform: Platform::Android,
        };
        self.handle = Some(handle.clone());
        Ok(handle)
    }

    async fn execute_shell(&self, args: &[String]) -> Result<String, DeviceError> {
        ensure_connected(&self.handle)?;
        self.adb.shell(args).await
    }

    async fn dispatch(&self, command: &DeviceCommand) -> Result<String, DeviceError> {
        ensure_connected(&self.handle)?;
        self.adb.dispatch(command).await
    }

    async fn capture_screen(&self, options: &CaptureOptions) -> Result<Screenshot, DeviceError> {
        ensure_connected(&self.handle)?;
        capture_with_retry(&self.adb, options).await
    }

    async fn disconnect(&mut self) {
        if self.handle.take().is_some() {
            match self.adb.disconnect(&self.address).await {
                Ok(_) => tracing::info!(address = %self.address, "disconnected remote ADB device"),
                Err(e) => tracing::warn!(address = %self.address, error = %e, "adb disconnect failed"),
            }
        }
        self.remove_key();
    }
}
