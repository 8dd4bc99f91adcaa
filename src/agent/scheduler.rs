//! Single-slot task admission and background execution.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::control_loop::{CancelToken, ControlLoop};
use super::task::{Task, TaskResult, DEFAULT_MAX_STEPS};
use crate::delivery::{DeliveryReport, WebhookDelivery};
use crate::device::{DeviceConnector, DeviceError};

/// Scheduler errors.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("A task is already running")]
    Busy,
    #[error("Invalid task request: {0}")]
    InvalidRequest(String),
    #[error("Task worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Builds a fresh, unconnected connector for each task.
pub type ConnectorFactory =
    Arc<dyn Fn() -> Result<Box<dyn DeviceConnector>, DeviceError> + Send + Sync>;

/// A request to run one instruction.
#[derive(Debug, Clone, Default)]
pub struct TaskRequest {
    pub instruction: String,
    pub max_steps: Option<u32>,
    pub callback_url: Option<String>,
}

impl TaskRequest {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            ..Default::default()
        }
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    pub fn with_callback_url(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }
}

/// What a finished worker hands back.
#[derive(Debug)]
pub struct FinishedTask {
    pub result: TaskResult,
    /// Background webhook delivery, when a callback URL was given.
    pub delivery: Option<JoinHandle<DeliveryReport>>,
}

/// Handle to a submitted task.
#[derive(Debug)]
pub struct TaskHandle {
    task_id: Uuid,
    cancel: CancelToken,
    worker: JoinHandle<FinishedTask>,
}

impl TaskHandle {
    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    /// Ask the loop to stop before its next step.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token that outlives `join`, for signal handlers.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub async fn join(self) -> Result<FinishedTask, SchedulerError> {
        Ok(self.worker.await?)
    }
}

/// Admits one task at a time and runs it in the background.
///
/// A submission while a task holds the slot is rejected, not queued.
pub struct TaskScheduler {
    gate: Arc<Semaphore>,
    control: Arc<ControlLoop>,
    connectors: ConnectorFactory,
    delivery: Option<Arc<WebhookDelivery>>,
    default_max_steps: u32,
}

impl TaskScheduler {
    pub fn new(control: ControlLoop, connectors: ConnectorFactory) -> Self {
        Self {
            gate: Arc::new(Semaphore::new(1)),
            control: Arc::new(control),
            connectors,
            delivery: None,
            default_max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn with_delivery(mut self, delivery: Arc<WebhookDelivery>) -> Self {
        self.delivery = Some(delivery);
        self
    }

    pub fn with_default_max_steps(mut self, max_steps: u32) -> Self {
        self.default_max_steps = max_steps;
        self
    }

    /// Whether a task currently holds the slot.
    pub fn is_busy(&self) -> bool {
        self.gate.available_permits() == 0
    }

    /// Start `request` in the background.
    pub fn submit(&self, request: TaskRequest) -> Result<TaskHandle, SchedulerError> {
        let instruction = request.instruction.trim();
        if instruction.is_empty() {
            return Err(SchedulerError::InvalidRequest("instruction is empty".to_string()));
        }

        let permit = Arc::clone(&self.gate)
            .try_acquire_owned()
            .map_err(|_| SchedulerError::Busy)?;

        let task = Task::new(instruction)
            .with_max_steps(request.max_steps.unwrap_or(self.default_max_steps));
        let task_id = task.id;
        let cancel = CancelToken::new();
        tracing::info!(%task_id, "task admitted");

        let control = Arc::clone(&self.control);
        let connectors = Arc::clone(&self.connectors);
        let delivery = self.delivery.clone();
        let token = cancel.clone();
        let callback_url = request.callback_url;

        let worker = tokio::spawn(async move {
            let result = run_task(&control, &connectors, task, &token).await;
            // free the slot before the webhook goes out
            drop(permit);

            let delivery = match (callback_url, delivery) {
                (Some(url), Some(delivery)) => Some(delivery.spawn(url, result.clone())),
                (Some(url), None) => {
                    tracing::warn!(%task_id, url, "callback requested but no webhook delivery configured");
                    None
                }
                _ => None,
            };
            FinishedTask { result, delivery }
        });

        Ok(TaskHandle {
            task_id,
            cancel,
            worker,
        })
    }
}

/// Connect, run and always disconnect.
async fn run_task(
    control: &ControlLoop,
    connectors: &ConnectorFactory,
    task: Task,
    cancel: &CancelToken,
) -> TaskResult {
    let started_at = Utc::now();

    let mut connector = match connectors() {
        Ok(connector) => connector,
        Err(e) => {
            tracing::error!(task_id = %task.id, error = %e, "cannot build device connector");
            return TaskResult::failed(&task, format!("device connection failed: {}", e), started_at);
        }
    };

    match connector.connect().await {
        Ok(handle) => {
            tracing::info!(task_id = %task.id, serial = %handle.serial, kind = %connector.kind(), "device connected");
        }
        Err(e) => {
            tracing::error!(task_id = %task.id, error = %e, "device connection failed");
            connector.disconnect().await;
            return TaskResult::failed(&task, format!("device connection failed: {}", e), started_at);
        }
    }

    let result = control.run(task, connector.as_ref(), cancel).await;
    connector.disconnect().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::control_loop::LoopConfig;
    use crate::agent::oracle::{DecisionOracle, OracleError, OracleRequest};
    use crate::agent::stages::StageKind;
    use crate::agent::task::TaskStatus;
    use crate::delivery::tests::responder;
    use crate::delivery::DeliveryConfig;
    use crate::device::{CaptureOptions, ConnectionKind, DeviceCommand, DeviceHandle, Platform, Screenshot};
    use crate::retry::RetryPolicy;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    struct TrackedConnector {
        disconnects: Arc<AtomicU32>,
        fail_connect: bool,
    }

    #[async_trait]
    impl DeviceConnector for TrackedConnector {
        fn kind(&self) -> ConnectionKind {
            ConnectionKind::Local
        }

        async fn connect(&mut self) -> Result<DeviceHandle, DeviceError> {
            if self.fail_connect {
                return Err(DeviceError::DeviceNotFound("no devices attached".to_string()));
            }
            Ok(DeviceHandle {
                serial: "emulator-5554".to_string(),
                model: None,
                platform: Platform::Android,
            })
        }

        async fn execute_shell(&self, _args: &[String]) -> Result<String, DeviceError> {
            Ok(String::new())
        }

        async fn dispatch(&self, _command: &DeviceCommand) -> Result<String, DeviceError> {
            Ok(String::new())
        }

        async fn capture_screen(&self, _options: &CaptureOptions) -> Result<Screenshot, DeviceError> {
            Ok(Screenshot::new(Vec::new(), 1080, 2400))
        }

        async fn disconnect(&mut self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Blocks the Act stage until released.
    struct GatedOracle {
        release: Arc<Notify>,
        action: &'static str,
    }

    #[async_trait]
    impl DecisionOracle for GatedOracle {
        async fn invoke(&self, request: &OracleRequest<'_>) -> Result<String, OracleError> {
            match request.stage {
                StageKind::Plan => Ok("### Plan ###\n1. do it".to_string()),
                StageKind::Act => {
                    self.release.notified().await;
                    Ok(format!("### Action ###\n{}", self.action))
                }
                StageKind::Reflect => Ok("### Outcome ###\nA".to_string()),
                StageKind::Note => Ok("### Important Notes ###\nNone".to_string()),
            }
        }
    }

    fn scheduler(action: &'static str, fail_connect: bool) -> (TaskScheduler, Arc<Notify>, Arc<AtomicU32>) {
        let release = Arc::new(Notify::new());
        let disconnects = Arc::new(AtomicU32::new(0));
        let oracle = Arc::new(GatedOracle {
            release: release.clone(),
            action,
        });
        let control = ControlLoop::new(
            oracle,
            LoopConfig::default()
                .with_settle(Duration::ZERO)
                .with_resize_bounds(None),
        );
        let counter = disconnects.clone();
        let factory: ConnectorFactory = Arc::new(move || {
            Ok(Box::new(TrackedConnector {
                disconnects: counter.clone(),
                fail_connect,
            }) as Box<dyn DeviceConnector>)
        });
        (TaskScheduler::new(control, factory), release, disconnects)
    }

    const ANSWER: &str = "{\"action\":\"answer\",\"text\":\"done\"}";
    const CLICK: &str = "{\"action\":\"click\",\"coordinate\":[5,5]}";

    #[tokio::test]
    async fn test_second_submission_is_rejected_while_busy() {
        let (scheduler, release, disconnects) = scheduler(ANSWER, false);

        let first = scheduler.submit(TaskRequest::new("first")).unwrap();
        assert!(scheduler.is_busy());
        assert!(matches!(
            scheduler.submit(TaskRequest::new("second")),
            Err(SchedulerError::Busy)
        ));

        release.notify_one();
        let finished = first.join().await.unwrap();
        assert_eq!(finished.result.status, TaskStatus::Success);
        assert!(finished.delivery.is_none());
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_busy());

        let third = scheduler.submit(TaskRequest::new("third")).unwrap();
        release.notify_one();
        assert_eq!(third.join().await.unwrap().result.status, TaskStatus::Success);
        assert_eq!(disconnects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_connect_failure_reports_error_and_cleans_up() {
        let (scheduler, _release, disconnects) = scheduler(ANSWER, true);

        let finished = scheduler
            .submit(TaskRequest::new("anything"))
            .unwrap()
            .join()
            .await
            .unwrap();

        assert_eq!(finished.result.status, TaskStatus::Error);
        assert!(finished.result.message.unwrap().contains("no devices attached"));
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_busy());
    }

    #[tokio::test]
    async fn test_cancel_stops_before_next_step() {
        let (scheduler, release, disconnects) = scheduler(CLICK, false);

        let handle = scheduler
            .submit(TaskRequest::new("tap forever").with_max_steps(10))
            .unwrap();
        handle.cancel();
        release.notify_one();

        let finished = handle.join().await.unwrap();
        assert_eq!(finished.result.status, TaskStatus::Cancelled);
        assert!(finished.result.steps <= 1);
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_instruction_is_rejected() {
        let (scheduler, _, _) = scheduler(ANSWER, false);
        assert!(matches!(
            scheduler.submit(TaskRequest::new("   ")),
            Err(SchedulerError::InvalidRequest(_))
        ));
        assert!(!scheduler.is_busy());
    }

    #[tokio::test]
    async fn test_result_is_posted_to_callback() {
        let (url, requests) = responder(vec![200]).await;
        let (scheduler, release, _) = scheduler(ANSWER, false);
        let retry = RetryPolicy::exponential(2, Duration::ZERO, Duration::ZERO, Duration::ZERO);
        let delivery = Arc::new(WebhookDelivery::new(DeliveryConfig::default().with_retry(retry)).unwrap());
        let scheduler = scheduler.with_delivery(delivery);

        let handle = scheduler
            .submit(TaskRequest::new("report back").with_callback_url(url))
            .unwrap();
        let task_id = handle.task_id();
        release.notify_one();

        let finished = handle.join().await.unwrap();
        let report = finished.delivery.unwrap().await.unwrap();
        assert!(report.delivered);

        let requests = requests.lock().unwrap();
        assert!(requests[0].contains(&format!("\"task_id\":\"{}\"", task_id)));
        assert!(requests[0].contains("\"status\":\"success\""));
    }
}
