//! HarmonyOS transport over `hdc`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::command::Platform;
use super::connector::{ensure_connected, ConnectionConfig, ConnectionKind, DeviceConnector, DeviceHandle};
use super::runner::{CommandOutput, CommandRunner, CommandSpec};
use super::screenshot::{capture_with_retry, CaptureOptions, CaptureTarget, CaptureVariant, Screenshot};
use super::DeviceError;

/// HarmonyOS only writes JPEG screenshots.
const REMOTE_SCREENSHOT_PATH: &str = "/data/local/tmp/tmp_screenshot.jpeg";
const SHELL_TIMEOUT: Duration = Duration::from_secs(30);

/// HarmonyOS device reached through `hdc`.
///
/// Parameters: `device_id` (`-t` target), `address` (connect via `tconn`
/// first), `hdc_path`.
pub struct HdcConnector {
    hdc_path: String,
    device_id: Option<String>,
    address: Option<String>,
    runner: Arc<dyn CommandRunner>,
    handle: Option<DeviceHandle>,
}

impl HdcConnector {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            hdc_path: "hdc".to_string(),
            device_id: None,
            address: None,
            runner,
            handle: None,
        }
    }

    pub fn from_config(config: &ConnectionConfig, runner: Arc<dyn CommandRunner>) -> Result<Self, DeviceError> {
        let mut connector = Self::new(runner);
        if let Some(path) = config.param("hdc_path") {
            connector.hdc_path = path.to_string();
        }
        connector.device_id = config.param("device_id").map(str::to_string);
        connector.address = config.param("address").map(str::to_string);
        Ok(connector)
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    fn command(&self) -> CommandSpec {
        let spec = CommandSpec::new(&self.hdc_path);
        match &self.device_id {
            Some(id) => spec.args(["-t", id.as_str()]),
            None => spec,
        }
    }

    async fn run(&self, spec: CommandSpec, timeout: Duration) -> Result<CommandOutput, DeviceError> {
        self.runner.run(&spec, timeout).await
    }

    async fn list_targets(&self) -> Result<Vec<String>, DeviceError> {
        let output = self
            .run(CommandSpec::new(&self.hdc_path).args(["list", "targets"]), SHELL_TIMEOUT)
            .await?;
        Ok(parse_targets(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn shell_raw(&self, args: &[String]) -> Result<String, DeviceError> {
        let spec = self.command().arg("shell").args(args.iter().cloned());
        Ok(self.run(spec, SHELL_TIMEOUT).await?.combined())
    }
}

#[async_trait]
impl DeviceConnector for HdcConnector {
    fn kind(&self) -> ConnectionKind {
        ConnectionKind::Hdc
    }

    fn platform(&self) -> Platform {
        Platform::Harmony
    }

    async fn connect(&mut self) -> Result<DeviceHandle, DeviceError> {
        if let Some(address) = self.address.clone() {
            let output = self
                .run(
                    CommandSpec::new(&self.hdc_path).args(["tconn", address.as_str()]),
                    SHELL_TIMEOUT,
                )
                .await?
                .combined();
            let lower = output.to_lowercase();
            if lower.contains("fail") || lower.contains("error") {
                return Err(DeviceError::Connection(output.trim().to_string()));
            }
            if self.device_id.is_none() {
                self.device_id = Some(address);
            }
        }

        let targets = self.list_targets().await?;
        let serial = match &self.device_id {
            Some(id) if targets.iter().any(|t| t == id) => id.clone(),
            Some(id) => return Err(DeviceError::DeviceNotFound(id.clone())),
            None => targets
                .into_iter()
                .next()
                .ok_or_else(|| DeviceError::DeviceNotFound("no HarmonyOS device attached".to_string()))?,
        };
        self.device_id = Some(serial.clone());

        let model = self
            .shell_raw(&[
                "param".to_string(),
                "get".to_string(),
                "const.product.model".to_string(),
            ])
            .await
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty() && !s.to_lowercase().contains("fail"));
        tracing::info!(device_id = %serial, model = ?model, "connected to HarmonyOS device");

        let handle = DeviceHandle {
            serial,
            model,
            platform: Platform::Harmony,
        };
        self.handle = Some(handle.clone());
        Ok(handle)
    }

    async fn execute_shell(&self, args: &[String]) -> Result<String, DeviceError> {
        ensure_connected(&self.handle)?;
        self.shell_raw(args).await
    }

    async fn capture_screen(&self, options: &CaptureOptions) -> Result<Screenshot, DeviceError> {
        ensure_connected(&self.handle)?;
        capture_with_retry(self, options).await
    }

    async fn disconnect(&mut self) {
        if self.handle.take().is_none() {
            return;
        }
        if let Some(address) = &self.address {
            let spec = CommandSpec::new(&self.hdc_path).args(["tconn", address.as_str(), "-remove"]);
            if let Err(e) = self.run(spec, SHELL_TIMEOUT).await {
                tracing::warn!(address = %address, error = %e, "hdc disconnect failed");
            }
        }
        tracing::info!("released HarmonyOS device");
    }
}

#[async_trait]
impl CaptureTarget for HdcConnector {
    async fn run_capture(
        &self,
        variant: CaptureVariant,
        timeout: Duration,
    ) -> Result<CommandOutput, DeviceError> {
        let spec = match variant {
            CaptureVariant::Primary => self
                .command()
                .args(["shell", "screenshot", REMOTE_SCREENSHOT_PATH]),
            CaptureVariant::Alternate => self
                .command()
                .args(["shell", "snapshot_display", "-f", REMOTE_SCREENSHOT_PATH]),
        };
        self.run(spec, timeout).await
    }

    async fn pull(&self, local: &Path, timeout: Duration) -> Result<(), DeviceError> {
        let spec = self
            .command()
            .args(["file", "recv", REMOTE_SCREENSHOT_PATH])
            .arg(local.to_string_lossy());
        let output = self.run(spec, timeout).await?;
        let text = output.combined().to_lowercase();
        if !output.success() || text.contains("fail") {
            return Err(DeviceError::CommandFailed(output.combined().trim().to_string()));
        }
        Ok(())
    }
}

/// Parse `hdc list targets`, which prints `[Empty]` when nothing is attached.
fn parse_targets(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.contains("[Empty]"))
        .map(|line| line.split_whitespace().next().unwrap_or(line).to_string())
        .collect()
}
