//! Task execution: shared state, stage prompts, the control loop and admission.

mod artifacts;
mod control_loop;
mod info_pool;
mod oracle;
mod prompts;
mod scheduler;
mod stages;
mod task;

pub use artifacts::{ArtifactSink, FsArtifactSink, NullSink, StepLog};
pub use control_loop::{CancelToken, ControlLoop, LoopConfig, NotePolicy, PlanCadence};
pub use info_pool::{InfoPool, Outcome, StepView, DEFAULT_ESCALATION_THRESHOLD};
pub use oracle::{DecisionOracle, OracleError, OracleRequest, StageOracleClient};
pub use prompts::{PromptRenderer, DEFAULT_HISTORY_WINDOW};
pub use scheduler::{
    ConnectorFactory, FinishedTask, SchedulerError, TaskHandle, TaskRequest, TaskScheduler,
};
pub use stages::{
    is_finished_plan, split_sections, ActOutput, NoteOutput, PlanOutput, ReflectOutput, Sections,
    StageKind, FINISHED_MAX_LEN,
};
pub use task::{Task, TaskResult, TaskStatus, DEFAULT_MAX_STEPS};
