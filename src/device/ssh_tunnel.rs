//! ADB through an SSH port forward that the connector starts and tears down.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::AsyncReadExt;
use tokio::process::Child;

use super::adb::{normalize_address, AdbClient};
use super::command::{shell_quote, DeviceCommand, Platform};
use super::connector::{ensure_connected, ConnectionConfig, ConnectionKind, DeviceConnector, DeviceHandle};
use super::runner::{CommandRunner, CommandSpec};
use super::screenshot::{capture_with_retry, CaptureOptions, Screenshot};
use super::DeviceError;

const DEFAULT_ADB_ADDRESS: &str = "127.0.0.1:5555";
const DEFAULT_SETTLE_SECS: u64 = 2;
const TOOL_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

static SSH_USER_HOST: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\S+@\S+)").unwrap());
static SSH_PORT: Lazy<Regex> = Lazy::new(|| Regex::new(r"-p\s+(\d+)").unwrap());
static SSH_FORWARD: Lazy<Regex> = Lazy::new(|| Regex::new(r"-L\s+(\S+)").unwrap());

/// ADB through a local SSH port forward.
///
/// Parameters: `ssh_command` (required, e.g.
/// `ssh user@host -p 2222 -L 8011:127.0.0.1:5555 -N`), `ssh_password`,
/// `adb_address` (tunnel's local end, default 127.0.0.1:5555),
/// `settle_secs` (default 2).
pub struct SshTunnelConnector {
    ssh_command: String,
    ssh_password: Option<String>,
    adb_address: String,
    settle: Duration,
    runner: Arc<dyn CommandRunner>,
    adb: AdbClient,
    tunnel: Option<Child>,
    tunnel_started: bool,
    handle: Option<DeviceHandle>,
}

impl SshTunnelConnector {
    /// Connector that runs `ssh_command` and then connects to `adb_address`.
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        ssh_command: impl Into<String>,
        adb_address: impl Into<String>,
    ) -> Self {
        let adb_address = normalize_address(&adb_address.into());
        Self {
            ssh_command: ssh_command.into(),
            ssh_password: None,
            adb: AdbClient::new(runner.clone()).with_serial(adb_address.clone()),
            adb_address,
            settle: Duration::from_secs(DEFAULT_SETTLE_SECS),
            runner,
            tunnel: None,
            tunnel_started: false,
            handle: None,
        }
    }

    /// Build from connection parameters.
    pub fn from_config(config: &ConnectionConfig, runner: Arc<dyn CommandRunner>) -> Result<Self, DeviceError> {
        let ssh_command = config.require("ssh_command")?;
        let adb_address = config.param("adb_address").unwrap_or(DEFAULT_ADB_ADDRESS);
        let settle = config.parse_or("settle_secs", DEFAULT_SETTLE_SECS)?;

        let mut connector = Self::new(runner, ssh_command, adb_address)
            .with_settle(Duration::from_secs(settle));
        if let Some(path) = config.param("adb_path") {
            connector.adb = connector.adb.with_path(path);
        }
        connector.ssh_password = config.param("ssh_password").map(str::to_string);
        Ok(connector)
    }

    /// Authenticate the tunnel with a password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.ssh_password = Some(password.into());
        self
    }

    /// Wait this long after spawning before using the tunnel.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Whether a tunnel process is being tracked.
    pub fn tunnel_running(&self) -> bool {
        self.tunnel.is_some()
    }

    /// `ssh -f` forks into the background; the spawned shell exits early.
    fn is_detached(&self) -> bool {
        self.ssh_command.contains("-Nf") || self.ssh_command.contains("-fN")
    }

    fn mask(&self, text: &str) -> String {
        match &self.ssh_password {
            Some(pw) if !pw.is_empty() => text.replace(pw.as_str(), "***"),
            _ => text.to_string(),
        }
    }

    async fn tool_available(&self, tool: &str) -> bool {
        let probe = if cfg!(windows) { "where" } else { "which" };
        match self
            .runner
            .run(&CommandSpec::new(probe).arg(tool), TOOL_PROBE_TIMEOUT)
            .await
        {
            Ok(output) => output.success(),
            Err(_) => false,
        }
    }

    /// Final shell command line, with password injection when needed.
    async fn tunnel_command(&self) -> String {
        let Some(password) = &self.ssh_password else {
            return self.ssh_command.clone();
        };

        if self.tool_available("sshpass").await {
            return format!("sshpass -p {} {}", shell_quote(password), self.ssh_command);
        }

        tracing::warn!("sshpass not found, trying plink");
        if self.tool_available("plink").await {
            if let Some(cmd) = plink_command(&self.ssh_command, password) {
                return cmd;
            }
        }

        tracing::warn!("cannot inject SSH password; relying on key-based auth");
        self.ssh_command.clone()
    }

    async fn establish_tunnel(&mut self) -> Result<(), DeviceError> {
        let command = self.tunnel_command().await;
        tracing::info!(command = %self.mask(&command), "starting SSH tunnel");

        let child = self.runner.spawn_shell(&command).await?;
        self.tunnel = Some(child);
        self.tunnel_started = true;

        tokio::time::sleep(self.settle).await;

        if self.is_detached() {
            return Ok(());
        }

        let exited = match self.tunnel.as_mut() {
            Some(child) => child.try_wait()?,
            None => None,
        };
        if let Some(status) = exited {
            let mut stderr = String::new();
            if let Some(mut pipe) = self.tunnel.as_mut().and_then(|c| c.stderr.take()) {
                let _ = pipe.read_to_string(&mut stderr).await;
            }
            self.tunnel = None;
            return Err(DeviceError::Connection(format!(
                "SSH tunnel exited ({}): {}",
                status,
                self.mask(stderr.trim())
            )));
        }

        tracing::info!("SSH tunnel established");
        Ok(())
    }

    async fn teardown_tunnel(&mut self) {
        if let Some(mut child) = self.tunnel.take() {
            #[cfg(unix)]
            if let Some(pid) = child.id() {
                let kill = CommandSpec::new("kill").args(["-TERM", "--"]).arg(format!("-{}", pid));
                if let Err(e) = self.runner.run(&kill, TEARDOWN_TIMEOUT).await {
                    tracing::debug!(error = %e, "process group signal failed");
                }
            }
            let _ = child.start_kill();
            match tokio::time::timeout(TEARDOWN_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => tracing::debug!(%status, "SSH tunnel process stopped"),
                Ok(Err(e)) => tracing::warn!(error = %e, "failed to reap SSH tunnel process"),
                Err(_) => tracing::warn!("SSH tunnel process did not exit in time"),
            }
        }

        if self.tunnel_started && self.is_detached() {
            self.release_forwarded_port().await;
        }
        self.tunnel_started = false;
    }

    /// Kill whatever holds the tunnel's local port (detached `ssh -f`).
    async fn release_forwarded_port(&self) {
        let port = local_port(&self.adb_address);
        if cfg!(windows) {
            let netstat = CommandSpec::new("netstat").arg("-ano");
            match self.runner.run(&netstat, TEARDOWN_TIMEOUT).await {
                Ok(output) => {
                    for pid in pids_on_port(&String::from_utf8_lossy(&output.stdout), port) {
                        let kill = CommandSpec::new("taskkill").args(["/F", "/PID", pid.as_str()]);
                        if let Err(e) = self.runner.run(&kill, TEARDOWN_TIMEOUT).await {
                            tracing::warn!(pid = %pid, error = %e, "taskkill failed");
                        }
                    }
                }
                Err(e) => tracing::warn!(error = %e, "netstat failed"),
            }
        } else {
            let fuser = CommandSpec::new("fuser").args(["-k".to_string(), format!("{}/tcp", port)]);
            if let Err(e) = self.runner.run(&fuser, TEARDOWN_TIMEOUT).await {
                tracing::warn!(port = %port, error = %e, "failed to release tunnel port");
            }
        }
    }
}

#[async_trait]
impl DeviceConnector for SshTunnelConnector {
    fn kind(&self) -> ConnectionKind {
        ConnectionKind::SshTunnel
    }

    async fn connect(&mut self) -> Result<DeviceHandle, DeviceError> {
        if let Err(e) = self.establish_tunnel().await {
            self.teardown_tunnel().await;
            return Err(e);
        }

        if let Err(e) = self.adb.connect(&self.adb_address).await {
            tracing::error!(address = %self.adb_address, error = %e, "ADB connect through tunnel failed");
            self.teardown_tunnel().await;
            return Err(e);
        }

        let model = self.adb.get_prop("ro.product.model").await;
        tracing::info!(address = %self.adb_address, model = ?model, "connected through SSH tunnel");

        let handle = DeviceHandle {
            serial: self.adb_address.clone(),
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
            if let Err(e) = self.adb.disconnect(&self.adb_address).await {
                tracing::warn!(address = %self.adb_address, error = %e, "adb disconnect failed");
            }
        }
        self.teardown_tunnel().await;
    }
}

/// Rewrite an OpenSSH command line for PuTTY's `plink`.
pub(crate) fn plink_command(ssh_command: &str, password: &str) -> Option<String> {
    let host = SSH_USER_HOST.captures(ssh_command)?.get(1)?.as_str();
    let port = SSH_PORT
        .captures(ssh_command)
        .and_then(|c| c.get(1))
        .map_or("22", |m| m.as_str());

    let mut cmd = format!("plink -ssh -pw {} -P {}", shell_quote(password), port);
    if let Some(forward) = SSH_FORWARD.captures(ssh_command).and_then(|c| c.get(1)) {
        cmd.push_str(" -L ");
        cmd.push_str(forward.as_str());
    }
    cmd.push_str(" -N ");
    cmd.push_str(host);
    Some(cmd)
}

fn local_port(address: &str) -> &str {
    address.rsplit(':').next().unwrap_or(address)
}

/// PIDs from `netstat -ano` rows bound to `port`.
fn pids_on_port(netstat: &str, port: &str) -> Vec<String> {
    let needle = format!(":{}", port);
    netstat
        .lines()
        .filter(|line| line.contains(&needle))
        .filter(|line| line.contains("LISTENING") || line.contains("ESTABLISHED"))
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            (parts.len() >= 5).then(|| parts[parts.len() - 1].to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::adb::tests::ScriptedRunner;
    use crate::device::CommandOutput;

    #[test]
    fn test_plink_conversion() {
        let cmd = plink_command(
            "ssh -oHostKeyAlgorithms=+ssh-rsa admin@10.1.2.3 -p 2222 -L 8011:127.0.0.1:5555 -Nf",
            "s3cret",
        )
        .unwrap();
        assert_eq!(
            cmd,
            "plink -ssh -pw 's3cret' -P 2222 -L 8011:127.0.0.1:5555 -N admin@10.1.2.3"
        );
        assert!(plink_command("ssh -N somehost", "pw").is_none());
    }

    #[test]
    fn test_netstat_pid_extraction() {
        let out = "  TCP    127.0.0.1:8011   0.0.0.0:0   LISTENING   4242\n  TCP    127.0.0.1:9000   0.0.0.0:0   LISTENING   1\n";
        assert_eq!(pids_on_port(out, "8011"), vec!["4242"]);
        assert_eq!(local_port("127.0.0.1:8011"), "8011");
    }

    #[test]
    fn test_password_masked() {
        let connector = SshTunnelConnector::new(Arc::new(ScriptedRunner::new(|_| Ok(CommandOutput::ok("")))), "ssh h", "127.0.0.1:8011")
            .with_password("hunter2");
        assert_eq!(connector.mask("sshpass -p 'hunter2' ssh h"), "sshpass -p '***' ssh h");
    }

    fn tunnel_runner() -> Arc<ScriptedRunner> {
        Arc::new(ScriptedRunner::new(|spec| {
            if spec.program == "which" || spec.program == "where" {
                Ok(CommandOutput {
                    status: Some(1),
                    ..Default::default()
                })
            } else if spec.args.contains(&"connect".to_string()) {
                Ok(CommandOutput::ok("connected to 127.0.0.1:8011"))
            } else {
                Ok(CommandOutput::ok(""))
            }
        }))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tunnel_lifecycle_and_idempotent_disconnect() {
        let runner = tunnel_runner();
        let mut connector = SshTunnelConnector::new(runner.clone(), "sleep 30", "127.0.0.1:8011")
            .with_settle(Duration::from_millis(50));

        let handle = connector.connect().await.unwrap();
        assert_eq!(handle.serial, "127.0.0.1:8011");
        assert!(connector.tunnel_running());

        connector.disconnect().await;
        assert!(!connector.tunnel_running());
        connector.disconnect().await;

        let lines = runner.lines();
        assert_eq!(lines.iter().filter(|l| l.starts_with("kill -TERM")).count(), 1);
        assert_eq!(lines.iter().filter(|l| l.contains(" disconnect ")).count(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tunnel_that_exits_early_is_reported() {
        let runner = tunnel_runner();
        let mut connector = SshTunnelConnector::new(
            runner.clone(),
            "echo tunnel refused >&2; exit 1",
            "127.0.0.1:8011",
        )
        .with_settle(Duration::from_millis(300));

        let err = connector.connect().await.unwrap_err();
        assert!(err.to_string().contains("tunnel refused"));
        assert!(!connector.tunnel_running());
        assert!(!runner.lines().iter().any(|l| l.contains("connect 127.0.0.1")));
        connector.disconnect().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_detached_tunnel_releases_port() {
        let runner = tunnel_runner();
        let mut connector = SshTunnelConnector::new(runner.clone(), "true -Nf", "127.0.0.1:8011")
            .with_settle(Duration::from_millis(10));

        connector.connect().await.unwrap();
        connector.disconnect().await;
        connector.disconnect().await;

        let lines = runner.lines();
        assert_eq!(lines.iter().filter(|l| *l == "fuser -k 8011/tcp").count(), 1);
    }
}
