//! Plan, act, reflect and note loop for one task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::sleep;

use super::artifacts::{ArtifactSink, NullSink, StepLog};
use super::info_pool::{InfoPool, Outcome, DEFAULT_ESCALATION_THRESHOLD};
use super::oracle::{DecisionOracle, StageOracleClient};
use super::prompts::{PromptRenderer, DEFAULT_HISTORY_WINDOW};
use super::stages::{is_finished_plan, ActOutput, NoteOutput, PlanOutput, ReflectOutput, StageKind};
use super::task::{Task, TaskResult, TaskStatus};
use crate::actions::{
    parse_action, ActionRecord, ActionTranslator, CoordinateTransform, DeviceStep, GoalStatus,
    ProposedAction, ResizeBounds, SwipeCheck,
};
use crate::device::{CaptureOptions, DeviceConnector, Screenshot};

/// When the Plan stage runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlanCadence {
    /// Only with no plan yet, when escalated, or after an invalid action.
    #[default]
    OnDemand,
    /// Every step, except right after an invalid action that did not escalate.
    EveryStep,
}

/// Decides whether the notetaker runs after a successful action.
pub type NotePolicy = Arc<dyn Fn(&InfoPool, &ActionRecord) -> bool + Send + Sync>;

/// Cooperative cancellation flag shared with the loop.
///
/// Checked before each step's capture; a step in flight always finishes.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Loop tuning.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub escalation_threshold: usize,
    /// History entries shown to the Act stage.
    pub history_window: usize,
    pub plan_cadence: PlanCadence,
    /// Wait after dispatch before looking at the screen again.
    pub settle: Duration,
    pub capture: CaptureOptions,
    /// Oracle image space; `None` means device pixels.
    pub resize_bounds: Option<ResizeBounds>,
    /// Task-specific guidance for Plan and Act.
    pub guidelines: Option<String>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            escalation_threshold: DEFAULT_ESCALATION_THRESHOLD,
            history_window: DEFAULT_HISTORY_WINDOW,
            plan_cadence: PlanCadence::default(),
            settle: Duration::from_secs(2),
            capture: CaptureOptions::default(),
            resize_bounds: Some(ResizeBounds::default()),
            guidelines: None,
        }
    }
}

impl LoopConfig {
    pub fn with_escalation_threshold(mut self, threshold: usize) -> Self {
        self.escalation_threshold = threshold;
        self
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    pub fn with_plan_cadence(mut self, cadence: PlanCadence) -> Self {
        self.plan_cadence = cadence;
        self
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn with_capture(mut self, capture: CaptureOptions) -> Self {
        self.capture = capture;
        self
    }

    pub fn with_resize_bounds(mut self, bounds: Option<ResizeBounds>) -> Self {
        self.resize_bounds = bounds;
        self
    }

    pub fn with_guidelines(mut self, guidelines: impl Into<String>) -> Self {
        self.guidelines = Some(guidelines.into());
        self
    }
}

/// What one step decided about the task.
enum StepEnd {
    Continue,
    Finish(TaskStatus, Option<String>),
}

/// Outcome of dispatch plus reflection for one action.
struct Judgement {
    outcome: Outcome,
    error: String,
    after: Option<Screenshot>,
}

/// Runs tasks against a connected device.
pub struct ControlLoop {
    stages: StageOracleClient,
    translator: ActionTranslator,
    config: LoopConfig,
    sink: Arc<dyn ArtifactSink>,
    note_policy: Option<NotePolicy>,
}

impl ControlLoop {
    pub fn new(oracle: Arc<dyn DecisionOracle>, config: LoopConfig) -> Self {
        let mut renderer = PromptRenderer::new().with_history_window(config.history_window);
        if let Some(guidelines) = &config.guidelines {
            renderer = renderer.with_guidelines(guidelines.clone());
        }
        Self {
            stages: StageOracleClient::new(oracle).with_renderer(renderer),
            translator: ActionTranslator::default(),
            config,
            sink: Arc::new(NullSink),
            note_policy: None,
        }
    }

    pub fn with_translator(mut self, translator: ActionTranslator) -> Self {
        self.translator = translator;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ArtifactSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Restrict when the notetaker runs. Without a policy it runs after
    /// every successful non-answer action.
    pub fn with_note_policy(mut self, policy: NotePolicy) -> Self {
        self.note_policy = Some(policy);
        self
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Drive `task` to a terminal status.
    ///
    /// Step-level failures become outcomes in the history; only a failed
    /// capture, the step budget or cancellation end the run early.
    pub async fn run(&self, mut task: Task, connector: &dyn DeviceConnector, cancel: &CancelToken) -> TaskResult {
        let started_at = Utc::now();
        let mut pool = InfoPool::new(task.instruction.clone())
            .with_escalation_threshold(self.config.escalation_threshold);
        let mut answer = None;

        self.sink_op("begin task", || self.sink.begin_task(task.id, &task.instruction));
        tracing::info!(task_id = %task.id, instruction = %task.instruction, max_steps = task.max_steps, "task started");

        let (status, message) = loop {
            if task.budget_exhausted() {
                break (
                    TaskStatus::MaxStepsReached,
                    Some(format!("step budget of {} exhausted", task.max_steps)),
                );
            }
            if cancel.is_cancelled() {
                break (TaskStatus::Cancelled, Some("cancelled by caller".to_string()));
            }

            task.step += 1;
            match self.step(&task, &mut pool, connector, &mut answer).await {
                StepEnd::Continue => {}
                StepEnd::Finish(status, message) => break (status, message),
            }
        };

        task.status = status;
        let result = TaskResult {
            task_id: task.id,
            status,
            instruction: task.instruction.clone(),
            steps: task.step,
            history: pool.actions().iter().map(ActionRecord::summary).collect(),
            answer,
            message,
            started_at,
            finished_at: Utc::now(),
        };
        self.sink_op("finish task", || self.sink.finish_task(&result));
        tracing::info!(task_id = %task.id, status = status.as_str(), steps = task.step, "task finished");
        result
    }

    async fn step(
        &self,
        task: &Task,
        pool: &mut InfoPool,
        connector: &dyn DeviceConnector,
        answer: &mut Option<String>,
    ) -> StepEnd {
        let step = task.step;

        let before = match connector.capture_screen(&self.config.capture).await {
            Ok(shot) => shot,
            Err(e) => {
                tracing::error!(task_id = %task.id, step, error = %e, "screen capture failed");
                return StepEnd::Finish(TaskStatus::Error, Some(format!("screen capture failed: {}", e)));
            }
        };
        if before.is_fallback {
            tracing::warn!(task_id = %task.id, step, sensitive = before.is_sensitive, "continuing with fallback screenshot");
        }
        pool.screen_width = before.width;
        pool.screen_height = before.height;
        self.sink_op("save screenshot", || self.sink.save_screenshot(task.id, step, "before", &before));

        let transform = self.transform_for(&before);
        let dims = (transform.resized_width, transform.resized_height);

        if self.should_plan(pool) {
            self.plan(task, pool, dims, &before).await;
            if is_finished_plan(&pool.plan) {
                tracing::info!(task_id = %task.id, step, "plan reports the task finished");
                let record = ActionRecord::Status { goal: GoalStatus::Complete };
                self.record(task, pool, record, Outcome::Success, "plan finished".to_string(), String::new());
                return StepEnd::Finish(TaskStatus::Success, None);
            }
        }

        let (record, swipe_check, description) = match self.act(task, pool, dims, &before, &transform).await {
            Some(chosen) => chosen,
            None => {
                return StepEnd::Finish(TaskStatus::NoAction, Some("oracle returned no action".to_string()));
            }
        };
        tracing::info!(task_id = %task.id, step, action = %record.summary(), "action chosen");
        pool.current_action = Some(record.clone());
        pool.action_description = description.clone();

        let mut end = StepEnd::Continue;
        let judgement = match &record {
            ActionRecord::Invalid { reason } => Judgement {
                outcome: Outcome::HardFailure,
                error: reason.clone(),
                after: None,
            },
            ActionRecord::Answer { text } => {
                *answer = Some(text.clone());
                end = StepEnd::Finish(TaskStatus::Success, None);
                Judgement {
                    outcome: Outcome::Success,
                    error: String::new(),
                    after: None,
                }
            }
            ActionRecord::Status { goal: GoalStatus::Infeasible } => {
                end = StepEnd::Finish(TaskStatus::Infeasible, Some("task judged infeasible".to_string()));
                Judgement {
                    outcome: Outcome::HardFailure,
                    error: "task judged infeasible".to_string(),
                    after: None,
                }
            }
            ActionRecord::Status { goal: GoalStatus::Complete } => {
                end = StepEnd::Finish(TaskStatus::Success, None);
                Judgement {
                    outcome: Outcome::Success,
                    error: String::new(),
                    after: None,
                }
            }
            _ => self.dispatch_and_reflect(task, pool, connector, &record, dims, &before).await,
        };

        pool.advisory = swipe_check.and_then(|check| check.guideline());
        let summary = if description.is_empty() { record.summary() } else { description };
        let is_answer = matches!(record, ActionRecord::Answer { .. });
        let outcome = judgement.outcome;
        self.record(task, pool, record.clone(), outcome, summary, judgement.error);

        if outcome == Outcome::Success && !is_answer && matches!(end, StepEnd::Continue) && self.notes_allowed(pool, &record) {
            let shot = judgement.after.as_ref().unwrap_or(&before);
            self.note(task, pool, dims, shot).await;
        }
        end
    }

    fn should_plan(&self, pool: &InfoPool) -> bool {
        let last_invalid = pool.last_action().is_some_and(ActionRecord::is_invalid);
        if pool.plan.trim().is_empty() || pool.error_escalated() {
            return true;
        }
        match self.config.plan_cadence {
            PlanCadence::OnDemand => last_invalid,
            PlanCadence::EveryStep => !last_invalid,
        }
    }

    fn transform_for(&self, shot: &Screenshot) -> CoordinateTransform {
        let Some(bounds) = self.config.resize_bounds else {
            return CoordinateTransform::identity(shot.width, shot.height);
        };
        CoordinateTransform::for_screen(shot.width, shot.height, bounds).unwrap_or_else(|e| {
            tracing::warn!(width = shot.width, height = shot.height, error = %e, "cannot resize screen, using device pixels");
            CoordinateTransform::identity(shot.width, shot.height)
        })
    }

    async fn plan(&self, task: &Task, pool: &mut InfoPool, dims: (u32, u32), before: &Screenshot) {
        let text = match self
            .stages
            .run(StageKind::Plan, pool, dims, std::slice::from_ref(before))
            .await
        {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(task_id = %task.id, step = task.step, error = %e, "plan stage failed, keeping previous plan");
                return;
            }
        };
        self.sink_op("save plan text", || self.sink.save_text(task.id, task.step, "plan", &text));

        let output = PlanOutput::parse(&text);
        if let Some(thought) = output.thought {
            pool.plan_thought = thought;
        }
        if let Some(completed) = output.completed_plan {
            pool.completed_plan = completed;
        }
        pool.plan = output.plan.unwrap_or_default();
        tracing::debug!(task_id = %task.id, step = task.step, plan = %pool.plan, "plan updated");
    }

    /// `None` when the oracle answered with nothing at all.
    async fn act(
        &self,
        task: &Task,
        pool: &mut InfoPool,
        dims: (u32, u32),
        before: &Screenshot,
        transform: &CoordinateTransform,
    ) -> Option<(ActionRecord, Option<SwipeCheck>, String)> {
        let text = match self
            .stages
            .run(StageKind::Act, pool, dims, std::slice::from_ref(before))
            .await
        {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(task_id = %task.id, step = task.step, error = %e, "act stage failed");
                let reason = format!("oracle call failed: {}", e);
                return Some((ActionRecord::Invalid { reason }, None, String::new()));
            }
        };
        self.sink_op("save act text", || self.sink.save_text(task.id, task.step, "act", &text));
        if text.trim().is_empty() {
            return None;
        }

        let output = ActOutput::parse(&text);
        pool.action_thought = output.thought.unwrap_or_default();
        let description = output.description.unwrap_or_default();

        let proposed = match output.action {
            Some(action_text) => parse_action(&action_text),
            None => {
                tracing::debug!(task_id = %task.id, step = task.step, "no action section, waiting");
                Ok(ProposedAction::Wait { seconds: 1.0 })
            }
        };
        match proposed {
            Ok(proposed) => {
                let translation = self.translator.translate(&proposed, transform);
                Some((translation.record, translation.swipe_check, description))
            }
            Err(e) => {
                tracing::warn!(task_id = %task.id, step = task.step, error = %e, "unparseable action");
                Some((ActionRecord::Invalid { reason: e.to_string() }, None, description))
            }
        }
    }

    async fn dispatch_and_reflect(
        &self,
        task: &Task,
        pool: &InfoPool,
        connector: &dyn DeviceConnector,
        record: &ActionRecord,
        dims: (u32, u32),
        before: &Screenshot,
    ) -> Judgement {
        let dispatched = match self.translator.device_step(record, connector.platform()) {
            Ok(DeviceStep::Command(command)) => connector
                .dispatch(&command)
                .await
                .map(|_| ())
                .map_err(|e| format!("{} failed: {}", command.name(), e)),
            Ok(DeviceStep::Delay(duration)) => {
                sleep(duration).await;
                Ok(())
            }
            Ok(DeviceStep::Skip) => Ok(()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(error) = dispatched {
            tracing::warn!(task_id = %task.id, step = task.step, %error, "dispatch failed");
            return Judgement {
                outcome: Outcome::HardFailure,
                error,
                after: None,
            };
        }

        if !self.config.settle.is_zero() {
            sleep(self.config.settle).await;
        }

        let after = match connector.capture_screen(&self.config.capture).await {
            Ok(shot) => shot,
            Err(e) => {
                tracing::warn!(task_id = %task.id, step = task.step, error = %e, "after-action capture failed");
                return Judgement {
                    outcome: Outcome::SoftFailure,
                    error: format!("could not capture the screen after the action: {}", e),
                    after: None,
                };
            }
        };
        self.sink_op("save screenshot", || self.sink.save_screenshot(task.id, task.step, "after", &after));

        let images = [before.clone(), after];
        let (outcome, error) = match self.stages.run(StageKind::Reflect, pool, dims, &images).await {
            Ok(text) => {
                self.sink_op("save reflect text", || self.sink.save_text(task.id, task.step, "reflect", &text));
                let output = ReflectOutput::parse(&text);
                match output.outcome {
                    Some(outcome) => (outcome, output.error_description.unwrap_or_default()),
                    None => (
                        Outcome::SoftFailure,
                        "reflection output could not be parsed".to_string(),
                    ),
                }
            }
            Err(e) => {
                tracing::warn!(task_id = %task.id, step = task.step, error = %e, "reflect stage failed");
                (Outcome::SoftFailure, format!("reflection failed: {}", e))
            }
        };
        let [_, after] = images;
        Judgement {
            outcome,
            error,
            after: Some(after),
        }
    }

    fn record(
        &self,
        task: &Task,
        pool: &mut InfoPool,
        record: ActionRecord,
        outcome: Outcome,
        summary: String,
        error: String,
    ) {
        tracing::info!(
            task_id = %task.id,
            step = task.step,
            action = record.name(),
            outcome = %outcome.letter(),
            "step recorded"
        );
        let entry = StepLog {
            step: task.step,
            action: record.clone(),
            outcome,
            summary: summary.clone(),
            error_description: error.clone(),
            timestamp: Utc::now(),
        };
        self.sink_op("append action", || self.sink.append_action(task.id, &entry));

        pool.record_step(record, outcome, summary, error);
        pool.current_action = None;
        if pool.evaluate_escalation() {
            tracing::warn!(task_id = %task.id, step = task.step, "repeated failures, forcing a replan");
        }
    }

    fn notes_allowed(&self, pool: &InfoPool, record: &ActionRecord) -> bool {
        self.note_policy.as_ref().map_or(true, |policy| policy(pool, record))
    }

    async fn note(&self, task: &Task, pool: &mut InfoPool, dims: (u32, u32), shot: &Screenshot) {
        match self
            .stages
            .run(StageKind::Note, pool, dims, std::slice::from_ref(shot))
            .await
        {
            Ok(text) => {
                self.sink_op("save note text", || self.sink.save_text(task.id, task.step, "note", &text));
                if let Some(notes) = NoteOutput::parse(&text).notes {
                    pool.replace_notes(notes);
                }
            }
            Err(e) => {
                tracing::warn!(task_id = %task.id, step = task.step, error = %e, "note stage failed");
            }
        }
    }

    fn sink_op(&self, what: &str, op: impl FnOnce() -> std::io::Result<()>) {
        if let Err(e) = op() {
            tracing::warn!(error = %e, "artifact sink failed to {}", what);
        }
    }
}
