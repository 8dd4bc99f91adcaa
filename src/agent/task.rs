//! Task identity, terminal status and the caller-facing result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default step budget.
pub const DEFAULT_MAX_STEPS: u32 = 50;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Success,
    Infeasible,
    NoAction,
    MaxStepsReached,
    Error,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Infeasible => "infeasible",
            Self::NoAction => "no_action",
            Self::MaxStepsReached => "max_steps_reached",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One instruction execution.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: Uuid,
    pub instruction: String,
    pub max_steps: u32,
    pub step: u32,
    pub status: TaskStatus,
}

impl Task {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            instruction: instruction.into(),
            max_steps: DEFAULT_MAX_STEPS,
            step: 0,
            status: TaskStatus::Running,
        }
    }

    /// Set the step budget (minimum 1).
    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn budget_exhausted(&self) -> bool {
        self.step >= self.max_steps
    }
}

/// Final outcome of a task, returned to the caller and posted to webhooks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub instruction: String,
    /// Steps started, including the terminating one.
    pub steps: u32,
    /// Action summaries in execution order.
    pub history: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TaskResult {
    /// Result for a task that never reached the control loop.
    pub fn failed(task: &Task, message: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            task_id: task.id,
            status: TaskStatus::Error,
            instruction: task.instruction.clone(),
            steps: task.step,
            history: Vec::new(),
            answer: None,
            message: Some(message.into()),
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }
}
