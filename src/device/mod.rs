//! Device transport: connectors for ADB (local, direct remote, SSH tunnel)
//! and HDC, plus screenshot capture.

mod adb;
pub mod command;
mod connector;
mod direct;
mod hdc;
mod local;
pub mod runner;
pub mod screenshot;
mod ssh_tunnel;

use thiserror::Error;

pub use adb::AdbClient;
pub use command::{DeviceCommand, DeviceKey, Platform};
pub use connector::{
    create_connector, ConnectionConfig, ConnectionKind, DeviceConnector, DeviceHandle,
};
pub use direct::DirectAdbConnector;
pub use hdc::HdcConnector;
pub use local::LocalAdbConnector;
pub use runner::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
pub use screenshot::{capture_with_retry, CaptureOptions, CaptureTarget, CaptureVariant, Screenshot};
pub use ssh_tunnel::SshTunnelConnector;

/// Device transport errors.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Unsupported connection type: {0}")]
    UnsupportedKind(String),
    #[error("Invalid connection config: {0}")]
    InvalidConfig(String),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Device not found: {0}")]
    DeviceNotFound(String),
    #[error("Not connected")]
    NotConnected,
    #[error("Command timed out after {secs:.1}s: {command}")]
    Timeout { command: String, secs: f64 },
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Command execution failed: {0}")]
    CommandFailed(String),
    #[error("Screen capture blocked: {0}")]
    CaptureBlocked(String),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
