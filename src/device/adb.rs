//! ADB command plumbing shared by the local, direct and tunnel connectors.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::command::{DeviceCommand, Platform};
use super::runner::{CommandOutput, CommandRunner, CommandSpec};
use super::screenshot::{CaptureTarget, CaptureVariant};
use super::DeviceError;

/// ADB keyboard IME used for Unicode text injection.
pub const ADB_KEYBOARD_IME: &str = "com.android.adbkeyboard/.AdbIME";

const REMOTE_SCREENSHOT_PATH: &str = "/data/local/tmp/mobile_agent_screen.png";
const DEFAULT_SHELL_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Issues `adb` commands against one device.
///
/// # Example
/// ```rust,no_run
/// use std::sync::Arc;
/// use mobile_agent::device::{AdbClient, ProcessRunner};
///
/// # async fn demo() -> Result<(), mobile_agent::device::DeviceError> {
/// let adb = AdbClient::new(Arc::new(ProcessRunner)).with_serial("192.168.1.100:5555");
/// adb.connect("192.168.1.100:5555").await?;
/// let model = adb.get_prop("ro.product.model").await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AdbClient {
    adb_path: String,
    server: Option<(String, u16)>,
    serial: Option<String>,
    envs: Vec<(String, String)>,
    runner: Arc<dyn CommandRunner>,
    shell_timeout: Duration,
    keyboard_settle: Duration,
}

impl AdbClient {
    /// Create a client using `adb` from `PATH` and the default server.
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            adb_path: "adb".to_string(),
            server: None,
            serial: None,
            envs: Vec::new(),
            runner,
            shell_timeout: DEFAULT_SHELL_TIMEOUT,
            keyboard_settle: Duration::from_secs(1),
        }
    }

    /// Use a custom ADB binary.
    pub fn with_path(mut self, adb_path: impl Into<String>) -> Self {
        self.adb_path = adb_path.into();
        self
    }

    /// Talk to the ADB server at `host:port` instead of the default.
    pub fn with_server(mut self, host: impl Into<String>, port: u16) -> Self {
        self.server = Some((host.into(), port));
        self
    }

    /// Target a specific device serial.
    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    /// Pass an environment variable to every `adb` invocation.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Delay between keyboard switch steps when typing.
    pub fn with_keyboard_settle(mut self, settle: Duration) -> Self {
        self.keyboard_settle = settle;
        self
    }

    /// Set the device serial after discovery.
    pub fn set_serial(&mut self, serial: impl Into<String>) {
        self.serial = Some(serial.into());
    }

    /// Current device serial.
    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    /// `adb` plus server flags, without a device selector.
    fn host_command(&self) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.adb_path);
        if let Some((host, port)) = &self.server {
            spec = spec.args(["-H", host.as_str(), "-P"]).arg(port.to_string());
        }
        for (key, value) in &self.envs {
            spec = spec.env(key, value);
        }
        spec
    }

    /// `adb` plus server flags and `-s <serial>` when known.
    fn device_command(&self) -> CommandSpec {
        let spec = self.host_command();
        match &self.serial {
            Some(serial) => spec.args(["-s", serial.as_str()]),
            None => spec,
        }
    }

    async fn run(&self, spec: CommandSpec, timeout: Duration) -> Result<CommandOutput, DeviceError> {
        self.runner.run(&spec, timeout).await
    }

    /// Run `adb shell <args>` and return combined output.
    pub async fn shell(&self, args: &[String]) -> Result<String, DeviceError> {
        let spec = self.device_command().arg("shell").args(args.iter().cloned());
        let output = self.run(spec, self.shell_timeout).await?;
        Ok(output.combined())
    }

    /// Connect to a remote device via TCP/IP.
    ///
    /// # Arguments
    /// * `address` - Device address in format "host:port"; port 5555 is assumed when missing.
    pub async fn connect(&self, address: &str) -> Result<String, DeviceError> {
        let address = normalize_address(address);
        let output = self
            .run(self.host_command().args(["connect", address.as_str()]), CONNECT_TIMEOUT)
            .await?
            .combined();

        let lower = output.to_lowercase();
        // "failed to connect" and "unable to connect" both contain "connect"
        if lower.contains("connected to") || lower.contains("already connected") {
            Ok(format!("Connected to {}", address))
        } else {
            Err(DeviceError::Connection(output.trim().to_string()))
        }
    }

    /// Disconnect from a remote device.
    pub async fn disconnect(&self, address: &str) -> Result<String, DeviceError> {
        let address = normalize_address(address);
        let output = self
            .run(
                self.host_command().args(["disconnect", address.as_str()]),
                DISCONNECT_TIMEOUT,
            )
            .await?;
        Ok(output.combined().trim().to_string())
    }

    /// Serials of all devices in the `device` state.
    pub async fn list_devices(&self) -> Result<Vec<String>, DeviceError> {
        let output = self
            .run(self.host_command().arg("devices"), CONNECT_TIMEOUT)
            .await?;
        Ok(parse_device_list(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Read a system property; `None` when unavailable.
    pub async fn get_prop(&self, name: &str) -> Option<String> {
        match self.shell(&["getprop".to_string(), name.to_string()]).await {
            Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(property = name, error = %e, "getprop failed");
                None
            }
        }
    }

    /// Send one device command, switching to the ADB keyboard for text.
    pub async fn dispatch(&self, command: &DeviceCommand) -> Result<String, DeviceError> {
        if let DeviceCommand::InputText { .. } = command {
            return self.type_text(command).await;
        }
        let output = self.shell(&command.shell_args(Platform::Android)).await?;
        command.check_output(&output)?;
        Ok(output)
    }

    /// Switch IME, clear the field, type, then restore the original IME.
    ///
    /// The restore is attempted whether or not typing succeeded.
    async fn type_text(&self, command: &DeviceCommand) -> Result<String, DeviceError> {
        let original_ime = self
            .shell(&strings(&["settings", "get", "secure", "default_input_method"]))
            .await
            .map(|s| s.trim().to_string())
            .unwrap_or_default();

        let switched = !original_ime.contains(ADB_KEYBOARD_IME);
        if switched {
            self.shell(&strings(&["ime", "set", ADB_KEYBOARD_IME])).await?;
            tokio::time::sleep(self.keyboard_settle).await;
        }

        let typed = self.clear_and_type(command).await;

        if switched && !original_ime.is_empty() {
            if let Err(e) = self.shell(&strings(&["ime", "set", original_ime.as_str()])).await {
                tracing::warn!(ime = %original_ime, error = %e, "failed to restore keyboard");
            }
        }

        typed
    }

    async fn clear_and_type(&self, command: &DeviceCommand) -> Result<String, DeviceError> {
        self.shell(&strings(&["am", "broadcast", "-a", "ADB_CLEAR_TEXT"]))
            .await?;
        tokio::time::sleep(self.keyboard_settle).await;

        let output = self.shell(&command.shell_args(Platform::Android)).await?;
        command.check_output(&output)?;
        tokio::time::sleep(self.keyboard_settle).await;
        Ok(output)
    }
}

#[async_trait]
impl CaptureTarget for AdbClient {
    async fn run_capture(
        &self,
        variant: CaptureVariant,
        timeout: Duration,
    ) -> Result<CommandOutput, DeviceError> {
        let tool = match variant {
            CaptureVariant::Primary => "screencap",
            CaptureVariant::Alternate => "/system/bin/screencap",
        };
        let spec = self
            .device_command()
            .args(["shell", tool, "-p", REMOTE_SCREENSHOT_PATH]);
        self.run(spec, timeout).await
    }

    async fn pull(&self, local: &Path, timeout: Duration) -> Result<(), DeviceError> {
        let spec = self
            .device_command()
            .args(["pull", REMOTE_SCREENSHOT_PATH])
            .arg(local.to_string_lossy());
        let output = self.run(spec, timeout).await?;
        if !output.success() {
            return Err(DeviceError::CommandFailed(output.combined().trim().to_string()));
        }
        Ok(())
    }
}

/// Append the default ADB port when missing.
pub(crate) fn normalize_address(address: &str) -> String {
    if address.contains(':') {
        address.to_string()
    } else {
        format!("{}:5555", address)
    }
}

/// Parse `adb devices` output into serials in the `device` state.
pub(crate) fn parse_device_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(serial), Some("device")) => Some(serial.to_string()),
                _ => None,
            }
        })
        .collect()
}

fn strings(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}
