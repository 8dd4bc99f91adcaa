//! ADB through the local adb server.

use std::sync::Arc;

use async_trait::async_trait;

use super::adb::AdbClient;
use super::command::{DeviceCommand, Platform};
use super::connector::{ensure_connected, ConnectionConfig, ConnectionKind, DeviceConnector, DeviceHandle};
use super::runner::CommandRunner;
use super::screenshot::{capture_with_retry, CaptureOptions, Screenshot};
use super::DeviceError;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 5037;

/// Device attached to the ADB server on this host.
///
/// Parameters: `host` (default 127.0.0.1), `port` (default 5037),
/// `serial` (default: first attached device), `adb_path`.
pub struct LocalAdbConnector {
    adb: AdbClient,
    requested_serial: Option<String>,
    handle: Option<DeviceHandle>,
}

impl LocalAdbConnector {
    /// Connector for the ADB server at `host:port`.
    pub fn new(runner: Arc<dyn CommandRunner>, host: impl Into<String>, port: u16) -> Self {
        Self {
            adb: AdbClient::new(runner).with_server(host, port),
            requested_serial: None,
            handle: None,
        }
    }

    /// Build from connection parameters.
    pub fn from_config(config: &ConnectionConfig, runner: Arc<dyn CommandRunner>) -> Result<Self, DeviceError> {
        let host = config.param("host").unwrap_or(DEFAULT_HOST).to_string();
        let port = config.parse_or("port", DEFAULT_PORT)?;
        let mut connector = Self::new(runner, host, port);
        if let Some(path) = config.param("adb_path") {
            connector.adb = connector.adb.with_path(path);
        }
        connector.requested_serial = config.param("serial").map(str::to_string);
        Ok(connector)
    }

    /// Pin the connector to one device serial.
    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.requested_serial = Some(serial.into());
        self
    }
}

#[async_trait]
impl DeviceConnector for LocalAdbConnector {
    fn kind(&self) -> ConnectionKind {
        ConnectionKind::Local
    }

    async fn connect(&mut self) -> Result<DeviceHandle, DeviceError> {
        let devices = self.adb.list_devices().await?;
        let serial = match &self.requested_serial {
            Some(wanted) if devices.iter().any(|d| d == wanted) => wanted.clone(),
            Some(wanted) => return Err(DeviceError::DeviceNotFound(wanted.clone())),
            None => devices
                .into_iter()
                .next()
                .ok_or_else(|| DeviceError::DeviceNotFound("no device attached".to_string()))?,
        };

        self.adb.set_serial(serial.clone());
        let model = self.adb.get_prop("ro.product.model").await;
        tracing::info!(serial = %serial, model = ?model, "connected to local ADB device");

        let handle = DeviceHandle {
            serial,
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
            tracing::info!("released local ADB device");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::adb::tests::ScriptedRunner;
    use crate::device::CommandOutput;

    fn runner() -> Arc<ScriptedRunner> {
        Arc::new(ScriptedRunner::new(|spec| {
            if spec.args.last().map(String::as_str) == Some("devices") {
                Ok(CommandOutput::ok("List of devices attached\nemulator-5554\tdevice\n"))
            } else if spec.args.contains(&"getprop".to_string()) {
                Ok(CommandOutput::ok("Pixel 7\n"))
            } else {
                Ok(CommandOutput::ok(""))
            }
        }))
    }

    #[tokio::test]
    async fn test_connect_picks_first_device() {
        let runner = runner();
        let mut connector = LocalAdbConnector::new(runner.clone(), "127.0.0.1", 5037);
        let handle = connector.connect().await.unwrap();
        assert_eq!(handle.serial, "emulator-5554");
        assert_eq!(handle.model.as_deref(), Some("Pixel 7"));

        connector
            .execute_shell(&["echo".to_string(), "hi".to_string()])
            .await
            .unwrap();
        assert!(runner
            .lines()
            .last()
            .unwrap()
            .contains("-s emulator-5554 shell echo hi"));
    }

    #[tokio::test]
    async fn test_missing_requested_serial() {
        let mut connector =
            LocalAdbConnector::new(runner(), "127.0.0.1", 5037).with_serial("R58M");
        assert!(matches!(
            connector.connect().await,
            Err(DeviceError::DeviceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_shell_requires_connection_and_disconnect_is_idempotent() {
        let mut connector = LocalAdbConnector::new(runner(), "127.0.0.1", 5037);
        assert!(matches!(
            connector.execute_shell(&[]).await,
            Err(DeviceError::NotConnected)
        ));
        connector.connect().await.unwrap();
        connector.disconnect().await;
        connector.disconnect().await;
        assert!(matches!(
            connector.execute_shell(&[]).await,
            Err(DeviceError::NotConnected)
        ));
    }
}
