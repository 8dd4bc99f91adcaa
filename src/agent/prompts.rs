//! Stage prompt rendering from the info pool.

use std::fmt::Write;

use super::info_pool::InfoPool;
use super::stages::StageKind;
use crate::config::prompts::{
    context_header, ACT_FORMAT, ACT_ROLE, ATOMIC_ACTIONS, FIRST_PLAN_FORMAT, NOTE_FORMAT,
    NOTE_ROLE, PLAN_GUIDELINES, PLAN_ROLE, REFLECT_FORMAT, REFLECT_ROLE, REPLAN_FORMAT,
};

/// Default number of history entries shown to the Act stage.
pub const DEFAULT_HISTORY_WINDOW: usize = 5;

/// Renders the four stage prompts.
///
/// Coordinates in prompts are always in the oracle's image space, so the
/// caller passes the resized dimensions rather than device pixels.
#[derive(Debug, Clone)]
pub struct PromptRenderer {
    history_window: usize,
    guidelines: Option<String>,
}

impl Default for PromptRenderer {
    fn default() -> Self {
        Self {
            history_window: DEFAULT_HISTORY_WINDOW,
            guidelines: None,
        }
    }
}

impl PromptRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    /// Extra task-specific guidance appended to the Plan and Act prompts.
    pub fn with_guidelines(mut self, guidelines: impl Into<String>) -> Self {
        self.guidelines = Some(guidelines.into());
        self
    }

    pub fn history_window(&self) -> usize {
        self.history_window
    }

    pub fn render(&self, stage: StageKind, pool: &InfoPool, width: u32, height: u32) -> String {
        let mut prompt = String::new();
        match stage {
            StageKind::Plan => {
                prompt.push_str(PLAN_ROLE);
                prompt.push_str(&context_header(width, height));
                self.plan(&mut prompt, pool);
            }
            StageKind::Act => {
                prompt.push_str(ACT_ROLE);
                prompt.push_str(&context_header(width, height));
                self.act(&mut prompt, pool);
            }
            StageKind::Reflect => {
                prompt.push_str(REFLECT_ROLE);
                prompt.push_str(&context_header(width, height));
                reflect(&mut prompt, pool);
            }
            StageKind::Note => {
                prompt.push_str(NOTE_ROLE);
                note(&mut prompt, pool);
            }
        }
        prompt
    }

    fn plan(&self, out: &mut String, pool: &InfoPool) {
        request(out, pool);

        if pool.plan.is_empty() {
            out.push_str(PLAN_GUIDELINES);
            self.extra_guidelines(out);
            out.push_str(FIRST_PLAN_FORMAT);
            return;
        }

        let _ = write!(out, "### Historical Operations ###\n{}\n\n", or_none(&pool.completed_plan));
        let _ = write!(out, "### Plan ###\n{}\n\n", pool.plan);
        if let Some(last) = pool.last_action() {
            let _ = write!(
                out,
                "### Last Action ###\n{}\n\n### Last Action Description ###\n{}\n\n",
                last.summary(),
                pool.last_summary().unwrap_or_default()
            );
        }
        notes(out, pool);

        if pool.error_escalated() {
            out.push_str("### Potentially Stuck! ###\n");
            out.push_str("You have encountered several failed attempts. Here are some logs:\n");
            for step in pool.recent(pool.escalation_threshold()) {
                let _ = writeln!(
                    out,
                    "- Action: {} | Description: {} | Outcome: Failed | Feedback: {}",
                    step.action.summary(),
                    step.summary,
                    or_none(step.error_description)
                );
            }
            out.push('\n');
        }

        if let Some(advisory) = &pool.advisory {
            let _ = write!(out, "### Advisory ###\n{}\n\n", advisory);
        }

        out.push_str(PLAN_GUIDELINES);
        self.extra_guidelines(out);
        out.push_str(REPLAN_FORMAT);
    }

    fn act(&self, out: &mut String, pool: &InfoPool) {
        request(out, pool);
        let _ = write!(out, "### Overall Plan ###\n{}\n\n", or_none(&pool.plan));
        let _ = write!(out, "### Progress Status ###\n{}\n\n", or_none(&pool.completed_plan));
        notes(out, pool);

        out.push_str("### Latest Action History ###\n");
        let recent = pool.recent(self.history_window);
        if recent.is_empty() {
            out.push_str("No actions have been taken yet.\n\n");
        } else {
            out.push_str("Recent actions you took previously and whether they were successful:\n");
            for step in recent {
                if step.outcome.is_failure() {
                    let _ = writeln!(
                        out,
                        "Action: {} | Description: {} | Outcome: Failed | Feedback: {}",
                        step.action.summary(),
                        step.summary,
                        or_none(step.error_description)
                    );
                } else {
                    let _ = writeln!(
                        out,
                        "Action: {} | Description: {} | Outcome: Successful",
                        step.action.summary(),
                        step.summary
                    );
                }
            }
            out.push('\n');
        }

        out.push_str("### Atomic Actions ###\n");
        for (signature, description) in ATOMIC_ACTIONS {
            let _ = writeln!(out, "- {}: {}", signature, description);
        }
        out.push('\n');
        self.extra_guidelines(out);
        out.push_str(ACT_FORMAT);
    }

    fn extra_guidelines(&self, out: &mut String) {
        if let Some(guidelines) = &self.guidelines {
            let _ = write!(out, "### Task Guidelines ###\n{}\n\n", guidelines);
        }
    }
}

fn request(out: &mut String, pool: &InfoPool) {
    let _ = write!(out, "### User Request ###\n{}\n\n", pool.instruction());
}

fn notes(out: &mut String, pool: &InfoPool) {
    if !pool.important_notes().is_empty() {
        let _ = write!(out, "### Important Notes ###\n{}\n\n", pool.important_notes());
    }
}

fn reflect(out: &mut String, pool: &InfoPool) {
    request(out, pool);
    let _ = write!(out, "### Progress Status ###\n{}\n\n", or_none(&pool.completed_plan));
    out.push_str("### Current Subgoal ###\n");
    let _ = write!(out, "{}\n\n", or_none(&pool.plan));
    out.push_str("---\nThe two attached images are screenshots taken before and after your last action.\n\n");

    let action = pool
        .current_action
        .as_ref()
        .map(|a| a.summary())
        .unwrap_or_else(|| "None".to_string());
    let _ = write!(
        out,
        "### Latest Action ###\nAction: {}\nExpectation: {}\n\n",
        action,
        or_none(&pool.action_description)
    );
    out.push_str(REFLECT_FORMAT);
}

fn note(out: &mut String, pool: &InfoPool) {
    request(out, pool);
    let _ = write!(out, "### Progress Status ###\n{}\n\n", or_none(&pool.completed_plan));
    let _ = write!(out, "### Existing Important Notes ###\n{}\n\n", or_none(pool.important_notes()));
    out.push_str(NOTE_FORMAT);
}

fn or_none(text: &str) -> &str {
    if text.trim().is_empty() {
        "None"
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionRecord;
    use crate::agent::info_pool::Outcome;

    fn pool_with_history() -> InfoPool {
        let mut pool = InfoPool::new("turn on wifi");
        pool.plan = "1. open settings app\n2. tap wifi".to_string();
        for i in 0..7 {
            pool.record_step(
                ActionRecord::Click { x: i, y: i },
                if i == 6 { Outcome::SoftFailure } else { Outcome::Success },
                format!("tap {}", i),
                if i == 6 { "nothing changed" } else { "" },
            );
        }
        pool
    }

    #[test]
    fn test_first_plan_prompt() {
        let pool = InfoPool::new("open settings");
        let prompt = PromptRenderer::new().render(StageKind::Plan, &pool, 1092, 2408);
        assert!(prompt.contains("### User Request ###\nopen settings"));
        assert!(prompt.contains("1092x2408"));
        assert!(prompt.contains("Make a high-level plan"));
        assert!(!prompt.contains("Potentially Stuck"));
    }

    #[test]
    fn test_replan_includes_stuck_block_and_advisory() {
        let mut pool = InfoPool::new("task");
        pool.plan = "1. scroll".to_string();
        pool.record_step(ActionRecord::Click { x: 1, y: 1 }, Outcome::HardFailure, "a", "wrong page");
        pool.record_step(ActionRecord::Click { x: 2, y: 2 }, Outcome::SoftFailure, "b", "no change");
        pool.evaluate_escalation();
        pool.advisory = Some("keep swipes above the keyboard".to_string());

        let prompt = PromptRenderer::new().render(StageKind::Plan, &pool, 100, 200);
        assert!(prompt.contains("### Potentially Stuck! ###"));
        assert!(prompt.contains("Feedback: wrong page"));
        assert!(prompt.contains("Feedback: no change"));
        assert!(prompt.contains("keep swipes above the keyboard"));
        assert!(prompt.contains("\"Finished\""));
    }

    #[test]
    fn test_act_history_window() {
        let pool = pool_with_history();
        let prompt = PromptRenderer::new()
            .with_history_window(3)
            .render(StageKind::Act, &pool, 100, 200);
        assert!(!prompt.contains("tap 3 |"));
        assert!(prompt.contains("tap 4 | Outcome: Successful"));
        assert!(prompt.contains("tap 6 | Outcome: Failed | Feedback: nothing changed"));
        assert!(prompt.contains("swipe(coordinate, coordinate2)"));
    }

    #[test]
    fn test_reflect_uses_current_action() {
        let mut pool = InfoPool::new("task");
        pool.current_action = Some(ActionRecord::OpenApp { app_name: "Settings".into() });
        pool.action_description = "open the settings app".into();
        let prompt = PromptRenderer::new().render(StageKind::Reflect, &pool, 100, 200);
        assert!(prompt.contains("Action: open_app(Settings)"));
        assert!(prompt.contains("Expectation: open the settings app"));
        assert!(prompt.contains("### Outcome ###"));
    }

    #[test]
    fn test_guidelines_and_notes() {
        let mut pool = InfoPool::new("task");
        pool.replace_notes("price is 12");
        let renderer = PromptRenderer::new().with_guidelines("Never buy anything.");
        let act = renderer.render(StageKind::Act, &pool, 100, 200);
        assert!(act.contains("Never buy anything."));
        assert!(act.contains("price is 12"));

        let note = renderer.render(StageKind::Note, &pool, 100, 200);
        assert!(note.contains("### Existing Important Notes ###\nprice is 12"));
    }
}
