// Copyright 2025 Zhipu AI (Original Python implementation)
// Copyright 2025 ModerRAS (Rust implementation)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Mobile Agent
//!
//! Drives an Android or HarmonyOS device through a natural-language task.
//!
//! Each step captures the screen, asks a vision-language model to plan, act,
//! reflect and take notes, and dispatches the chosen action over ADB, an SSH
//! tunnel, or HDC. Finished tasks can be posted to a webhook.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use mobile_agent::agent::{CancelToken, ControlLoop, LoopConfig, Task};
//! use mobile_agent::device::{
//!     create_connector, ConnectionConfig, ConnectionKind, DeviceConnector, ProcessRunner,
//! };
//! use mobile_agent::model::{ModelClient, ModelConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let oracle = Arc::new(ModelClient::new(ModelConfig::default())?);
//!     let control = ControlLoop::new(oracle, LoopConfig::default());
//!
//!     let config = ConnectionConfig::new(ConnectionKind::Local);
//!     let mut device = create_connector(&config, Arc::new(ProcessRunner))?;
//!     device.connect().await?;
//!
//!     let result = control
//!         .run(Task::new("Open Settings and turn on Wi-Fi"), device.as_ref(), &CancelToken::new())
//!         .await;
//!     device.disconnect().await;
//!
//!     println!("{:?}: {} steps", result.status, result.steps);
//!     Ok(())
//! }
//! ```

pub mod actions;
pub mod agent;
pub mod config;
pub mod delivery;
pub mod device;
pub mod model;
pub mod retry;
pub mod settings;

pub use actions::{ActionRecord, ActionTranslator, CoordinateTransform, ProposedAction};
pub use agent::{
    CancelToken, ControlLoop, DecisionOracle, InfoPool, LoopConfig, Task, TaskResult,
    TaskScheduler, TaskStatus,
};
pub use delivery::{DeliveryConfig, WebhookDelivery};
pub use device::{ConnectionConfig, ConnectionKind, DeviceConnector, DeviceError, Screenshot};
pub use model::{ModelClient, ModelConfig};
pub use retry::RetryPolicy;
pub use settings::AgentSettings;
