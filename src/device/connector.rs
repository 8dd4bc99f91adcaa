//! Connector abstraction and the factory that picks a transport once.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::command::{DeviceCommand, Platform};
use super::direct::DirectAdbConnector;
use super::hdc::HdcConnector;
use super::local::LocalAdbConnector;
use super::runner::CommandRunner;
use super::screenshot::{CaptureOptions, Screenshot};
use super::ssh_tunnel::SshTunnelConnector;
use super::DeviceError;

/// Transport strategy for reaching a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    /// ADB server on this host.
    Local,
    /// `adb connect` to a remote address, optionally with a session key.
    Direct,
    /// ADB through an SSH port forward.
    SshTunnel,
    /// HarmonyOS device via `hdc`.
    Hdc,
}

impl FromStr for ConnectionKind {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "direct" => Ok(Self::Direct),
            "ssh_tunnel" | "ssh" => Ok(Self::SshTunnel),
            "hdc" | "harmony" => Ok(Self::Hdc),
            other => Err(DeviceError::UnsupportedKind(other.to_string())),
        }
    }
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Local => "local",
            Self::Direct => "direct",
            Self::SshTunnel => "ssh_tunnel",
            Self::Hdc => "hdc",
        };
        f.write_str(name)
    }
}

/// Connection kind plus free-form parameters for that kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub kind: ConnectionKind,
    #[serde(default)]
    pub params: HashMap<String, String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new(ConnectionKind::Local)
    }
}

impl ConnectionConfig {
    /// Create a config for `kind` with no parameters.
    pub fn new(kind: ConnectionKind) -> Self {
        Self {
            kind,
            params: HashMap::new(),
        }
    }

    /// Set a parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Look up a non-empty parameter.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Look up a parameter that must be present.
    pub(crate) fn require(&self, key: &str) -> Result<&str, DeviceError> {
        self.param(key).ok_or_else(|| {
            DeviceError::InvalidConfig(format!("{} connection requires '{}'", self.kind, key))
        })
    }

    /// Parse a numeric parameter, falling back to `default` when absent.
    pub(crate) fn parse_or<T: FromStr>(&self, key: &str, default: T) -> Result<T, DeviceError> {
        match self.param(key) {
            Some(raw) => raw.parse().map_err(|_| {
                DeviceError::InvalidConfig(format!("invalid value for '{}': {}", key, raw))
            }),
            None => Ok(default),
        }
    }
}

/// Identity of a connected device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceHandle {
    pub serial: String,
    pub model: Option<String>,
    pub platform: Platform,
}

/// Uniform transport surface over one device.
///
/// A connector is owned by exactly one task. `disconnect` is idempotent and
/// never fails: cleanup errors are logged.
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    /// Strategy this connector implements.
    fn kind(&self) -> ConnectionKind;

    /// Shell vocabulary of the connected device.
    fn platform(&self) -> Platform {
        Platform::Android
    }

    /// Establish the transport and identify the device.
    async fn connect(&mut self) -> Result<DeviceHandle, DeviceError>;

    /// Run a device shell command and return its output.
    async fn execute_shell(&self, args: &[String]) -> Result<String, DeviceError>;

    /// Send one device command.
    async fn dispatch(&self, command: &DeviceCommand) -> Result<String, DeviceError> {
        let output = self.execute_shell(&command.shell_args(self.platform())).await?;
        command.check_output(&output)?;
        Ok(output)
    }

    /// Capture the screen with retry and fallback.
    async fn capture_screen(&self, options: &CaptureOptions) -> Result<Screenshot, DeviceError>;

    /// Tear down the transport and any session artifacts.
    async fn disconnect(&mut self);
}

/// Build the connector for `config`.
///
/// Missing required parameters are reported here, before any I/O.
pub fn create_connector(
    config: &ConnectionConfig,
    runner: Arc<dyn CommandRunner>,
) -> Result<Box<dyn DeviceConnector>, DeviceError> {
    tracing::debug!(kind = %config.kind, "creating device connector");
    let connector: Box<dyn DeviceConnector> = match config.kind {
        ConnectionKind::Local => Box::new(LocalAdbConnector::from_config(config, runner)?),
        ConnectionKind::Direct => Box::new(DirectAdbConnector::from_config(config, runner)?),
        ConnectionKind::SshTunnel => Box::new(SshTunnelConnector::from_config(config, runner)?),
        ConnectionKind::Hdc => Box::new(HdcConnector::from_config(config, runner)?),
    };
    Ok(connector)
}

/// Fail with `NotConnected` when no handle is present.
pub(crate) fn ensure_connected(handle: &Option<DeviceHandle>) -> Result<(), DeviceError> {
    if handle.is_some() {
        Ok(())
    } else {
        Err(DeviceError::NotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ProcessRunner;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("local".parse::<ConnectionKind>().unwrap(), ConnectionKind::Local);
        assert_eq!("SSH_TUNNEL".parse::<ConnectionKind>().unwrap(), ConnectionKind::SshTunnel);
        assert_eq!("hdc".parse::<ConnectionKind>().unwrap(), ConnectionKind::Hdc);
        assert!(matches!(
            "bluetooth".parse::<ConnectionKind>(),
            Err(DeviceError::UnsupportedKind(_))
        ));
        assert_eq!(ConnectionKind::SshTunnel.to_string(), "ssh_tunnel");
    }

    #[test]
    fn test_kind_serde() {
        let config: ConnectionConfig =
            serde_json::from_str(r#"{"kind":"direct","params":{"address":"10.0.0.2"}}"#).unwrap();
        assert_eq!(config.kind, ConnectionKind::Direct);
        assert_eq!(config.param("address"), Some("10.0.0.2"));
    }

    #[test]
    fn test_device_handle_serde() {
        let handle = DeviceHandle {
            serial: "FMR0223".to_string(),
            model: Some("Mate 60".to_string()),
            platform: Platform::Harmony,
        };
        let json = serde_json::to_value(&handle).unwrap();
        assert_eq!(json["platform"], "harmony");
        assert_eq!(serde_json::from_value::<DeviceHandle>(json).unwrap(), handle);
    }

    #[test]
    fn test_factory_validates_params_up_front() {
        let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner);

        let direct = ConnectionConfig::new(ConnectionKind::Direct);
        assert!(matches!(
            create_connector(&direct, runner.clone()),
            Err(DeviceError::InvalidConfig(_))
        ));

        let tunnel = ConnectionConfig::new(ConnectionKind::SshTunnel).with_param("ssh_command", "  ");
        assert!(matches!(
            create_connector(&tunnel, runner.clone()),
            Err(DeviceError::InvalidConfig(_))
        ));

        let local = create_connector(&ConnectionConfig::default(), runner.clone()).unwrap();
        assert_eq!(local.kind(), ConnectionKind::Local);

        let hdc = create_connector(&ConnectionConfig::new(ConnectionKind::Hdc), runner).unwrap();
        assert_eq!(hdc.platform(), Platform::Harmony);
    }

    #[test]
    fn test_numeric_param() {
        let config = ConnectionConfig::new(ConnectionKind::Local).with_param("port", "abc");
        assert!(config.parse_or("port", 5037u16).is_err());
        assert_eq!(config.parse_or("missing", 7u16).unwrap(), 7);
    }
}
