//! Per-task shared state threaded between pipeline stages.

use serde::{Deserialize, Serialize};

use crate::actions::ActionRecord;

/// Default number of trailing failures that flags the task as stuck.
pub const DEFAULT_ESCALATION_THRESHOLD: usize = 2;

/// Effect of an executed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Expected result (reflection answer "A").
    Success,
    /// Wrong page or error (answer "B").
    HardFailure,
    /// No visible change (answer "C").
    SoftFailure,
}

impl Outcome {
    pub fn is_failure(self) -> bool {
        !matches!(self, Self::Success)
    }

    /// Reflection letter for this outcome.
    pub fn letter(self) -> char {
        match self {
            Self::Success => 'A',
            Self::HardFailure => 'B',
            Self::SoftFailure => 'C',
        }
    }
}

/// One history entry, borrowed from the pool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepView<'a> {
    pub action: &'a ActionRecord,
    pub outcome: Outcome,
    pub summary: &'a str,
    pub error_description: &'a str,
}

/// Mutable blackboard owned by one running task.
///
/// The four history sequences always have equal length: they are only
/// appended together through [`InfoPool::record_step`].
#[derive(Debug, Clone)]
pub struct InfoPool {
    instruction: String,

    /// Remaining sub-goals, numbered lines.
    pub plan: String,
    /// Sub-goals judged finished.
    pub completed_plan: String,
    /// Planner reasoning from the last Plan stage.
    pub plan_thought: String,
    /// Advisory guidance for the planner, e.g. a suspicious swipe.
    pub advisory: Option<String>,

    /// Action chosen in the current step, before it is recorded.
    pub current_action: Option<ActionRecord>,
    /// Executor's description of the current action.
    pub action_description: String,
    pub action_thought: String,

    action_history: Vec<ActionRecord>,
    outcome_history: Vec<Outcome>,
    summary_history: Vec<String>,
    error_descriptions: Vec<String>,

    error_escalated: bool,
    escalation_threshold: usize,

    important_notes: String,

    pub screen_width: u32,
    pub screen_height: u32,
}

impl InfoPool {
    /// Fresh state for `instruction`.
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            plan: String::new(),
            completed_plan: String::new(),
            plan_thought: String::new(),
            advisory: None,
            current_action: None,
            action_description: String::new(),
            action_thought: String::new(),
            action_history: Vec::new(),
            outcome_history: Vec::new(),
            summary_history: Vec::new(),
            error_descriptions: Vec::new(),
            error_escalated: false,
            escalation_threshold: DEFAULT_ESCALATION_THRESHOLD,
            important_notes: String::new(),
            screen_width: 0,
            screen_height: 0,
        }
    }

    /// Set the escalation threshold (minimum 1).
    pub fn with_escalation_threshold(mut self, threshold: usize) -> Self {
        self.escalation_threshold = threshold.max(1);
        self
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    /// Append one completed step to all parallel histories.
    pub fn record_step(
        &mut self,
        action: ActionRecord,
        outcome: Outcome,
        summary: impl Into<String>,
        error_description: impl Into<String>,
    ) {
        self.action_history.push(action);
        self.outcome_history.push(outcome);
        self.summary_history.push(summary.into());
        self.error_descriptions.push(error_description.into());
    }

    /// Recompute the escalation flag from the trailing outcome window.
    pub fn evaluate_escalation(&mut self) -> bool {
        let k = self.escalation_threshold;
        self.error_escalated = self.outcome_history.len() >= k
            && self.outcome_history[self.outcome_history.len() - k..]
                .iter()
                .all(|o| o.is_failure());
        self.error_escalated
    }

    pub fn error_escalated(&self) -> bool {
        self.error_escalated
    }

    pub fn escalation_threshold(&self) -> usize {
        self.escalation_threshold
    }

    /// Number of recorded steps.
    pub fn len(&self) -> usize {
        self.action_history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.action_history.is_empty()
    }

    pub fn last_action(&self) -> Option<&ActionRecord> {
        self.action_history.last()
    }

    pub fn last_outcome(&self) -> Option<Outcome> {
        self.outcome_history.last().copied()
    }

    pub fn last_summary(&self) -> Option<&str> {
        self.summary_history.last().map(String::as_str)
    }

    pub fn actions(&self) -> &[ActionRecord] {
        &self.action_history
    }

    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcome_history
    }

    pub fn summaries(&self) -> &[String] {
        &self.summary_history
    }

    pub fn error_descriptions(&self) -> &[String] {
        &self.error_descriptions
    }

    /// The last `n` steps, oldest first.
    pub fn recent(&self, n: usize) -> Vec<StepView<'_>> {
        let start = self.len().saturating_sub(n);
        (start..self.len())
            .map(|i| StepView {
                action: &self.action_history[i],
                outcome: self.outcome_history[i],
                summary: &self.summary_history[i],
                error_description: &self.error_descriptions[i],
            })
            .collect()
    }

    pub fn important_notes(&self) -> &str {
        &self.important_notes
    }

    /// Replace all notes with the notetaker's consolidated version.
    pub fn replace_notes(&mut self, notes: impl Into<String>) {
        self.important_notes = notes.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn click() -> ActionRecord {
        ActionRecord::Click { x: 1, y: 1 }
    }

    #[test]
    fn test_history_lengths_stay_equal() {
        let mut pool = InfoPool::new("open settings");
        for i in 0..7 {
            let outcome = if i % 3 == 0 { Outcome::Success } else { Outcome::SoftFailure };
            pool.record_step(click(), outcome, format!("step {}", i), "");
            assert_eq!(pool.actions().len(), pool.outcomes().len());
            assert_eq!(pool.outcomes().len(), pool.summaries().len());
            assert_eq!(pool.summaries().len(), pool.error_descriptions().len());
        }
        assert_eq!(pool.len(), 7);
    }

    #[test]
    fn test_escalation_after_two_failures() {
        let mut pool = InfoPool::new("task");
        pool.record_step(click(), Outcome::HardFailure, "a", "wrong page");
        assert!(!pool.evaluate_escalation());

        pool.record_step(click(), Outcome::SoftFailure, "b", "no change");
        assert!(pool.evaluate_escalation());
        assert!(pool.error_escalated());
    }

    #[test]
    fn test_escalation_cleared_by_latest_success() {
        let mut pool = InfoPool::new("task");
        for _ in 0..5 {
            pool.record_step(click(), Outcome::HardFailure, "", "");
        }
        assert!(pool.evaluate_escalation());

        pool.record_step(click(), Outcome::Success, "", "");
        assert!(!pool.evaluate_escalation());
    }

    #[test]
    fn test_custom_threshold() {
        let mut pool = InfoPool::new("task").with_escalation_threshold(3);
        pool.record_step(click(), Outcome::SoftFailure, "", "");
        pool.record_step(click(), Outcome::SoftFailure, "", "");
        assert!(!pool.evaluate_escalation());
        pool.record_step(click(), Outcome::SoftFailure, "", "");
        assert!(pool.evaluate_escalation());
    }

    #[test]
    fn test_recent_window() {
        let mut pool = InfoPool::new("task");
        for i in 0..8 {
            pool.record_step(click(), Outcome::Success, format!("s{}", i), "");
        }
        let recent = pool.recent(5);
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].summary, "s3");
        assert_eq!(recent[4].summary, "s7");
        assert_eq!(InfoPool::new("x").recent(5).len(), 0);
    }

    #[test]
    fn test_notes() {
        let mut pool = InfoPool::new("task");
        assert_eq!(pool.important_notes(), "");
        pool.replace_notes("price: 12\nprice: 15");
        assert_eq!(pool.important_notes(), "price: 12\nprice: 15");
        pool.replace_notes("total 27");
        assert_eq!(pool.important_notes(), "total 27");
    }
}
