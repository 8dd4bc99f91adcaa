//! Normalized action records.

use serde::{Deserialize, Serialize};

/// Final goal state reported by a `status` action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    Complete,
    Infeasible,
}

impl GoalStatus {
    /// Map the free-form status vocabulary onto a goal state.
    ///
    /// Only explicit failure words count as infeasible.
    pub fn from_word(word: &str) -> Self {
        match word.trim().to_lowercase().as_str() {
            "infeasible" | "failure" | "failed" | "fail" | "impossible" => Self::Infeasible,
            _ => Self::Complete,
        }
    }
}

/// One executed (or attempted) action in device pixel space.
///
/// Records are immutable once appended to the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionRecord {
    Click { x: i32, y: i32 },
    LongPress { x: i32, y: i32, duration_ms: u64 },
    Swipe { x1: i32, y1: i32, x2: i32, y2: i32 },
    TypeText { text: String },
    KeyPress { key: String },
    SystemButton { button: String },
    OpenApp { app_name: String },
    Wait { seconds: f64 },
    Answer { text: String },
    Status { goal: GoalStatus },
    Invalid { reason: String },
}

impl ActionRecord {
    /// Short action name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Click { .. } => "click",
            Self::LongPress { .. } => "long_press",
            Self::Swipe { .. } => "swipe",
            Self::TypeText { .. } => "type",
            Self::KeyPress { .. } => "key",
            Self::SystemButton { .. } => "system_button",
            Self::OpenApp { .. } => "open_app",
            Self::Wait { .. } => "wait",
            Self::Answer { .. } => "answer",
            Self::Status { .. } => "status",
            Self::Invalid { .. } => "invalid",
        }
    }

    /// One-line human-readable form used in history and prompts.
    pub fn summary(&self) -> String {
        match self {
            Self::Click { x, y } => format!("click({}, {})", x, y),
            Self::LongPress { x, y, duration_ms } => {
                format!("long_press({}, {}, {}ms)", x, y, duration_ms)
            }
            Self::Swipe { x1, y1, x2, y2 } => format!("swipe({}, {} -> {}, {})", x1, y1, x2, y2),
            Self::TypeText { text } => format!("type({:?})", text),
            Self::KeyPress { key } => format!("key({})", key),
            Self::SystemButton { button } => format!("system_button({})", button),
            Self::OpenApp { app_name } => format!("open_app({})", app_name),
            Self::Wait { seconds } => format!("wait({}s)", seconds),
            Self::Answer { text } => format!("answer({:?})", text),
            Self::Status { goal } => match goal {
                GoalStatus::Complete => "status(complete)".to_string(),
                GoalStatus::Infeasible => "status(infeasible)".to_string(),
            },
            Self::Invalid { reason } => format!("invalid({})", reason),
        }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid { .. })
    }

    /// Answer and Status outcomes cannot be judged from screenshots.
    pub fn skips_reflection(&self) -> bool {
        matches!(self, Self::Answer { .. } | Self::Status { .. } | Self::Invalid { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_shape() {
        let record = ActionRecord::Click { x: 540, y: 1200 };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["action"], "click");
        assert_eq!(json["x"], 540);

        let status: ActionRecord =
            serde_json::from_str(r#"{"action":"status","goal":"infeasible"}"#).unwrap();
        assert_eq!(status, ActionRecord::Status { goal: GoalStatus::Infeasible });
    }

    #[test]
    fn test_goal_words() {
        assert_eq!(GoalStatus::from_word("success"), GoalStatus::Complete);
        assert_eq!(GoalStatus::from_word("Infeasible"), GoalStatus::Infeasible);
        assert_eq!(GoalStatus::from_word("failure"), GoalStatus::Infeasible);
    }

    #[test]
    fn test_summary_and_reflection() {
        let swipe = ActionRecord::Swipe { x1: 1, y1: 2, x2: 3, y2: 4 };
        assert_eq!(swipe.summary(), "swipe(1, 2 -> 3, 4)");
        assert!(!swipe.skips_reflection());
        assert!(ActionRecord::Answer { text: "42".into() }.skips_reflection());
    }
}
