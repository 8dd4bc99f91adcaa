//! Parsing of oracle action text.
//!
//! The oracle answers with a JSON object such as
//! `{"action": "click", "coordinate": [540, 960]}`. Coordinates are in the
//! resized image space sent to the model, not device pixels.

use serde::Deserialize;
use serde_json::Value;

use super::record::GoalStatus;
use super::ActionError;

/// An action as proposed by the oracle, before coordinate mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum ProposedAction {
    Click { x: f64, y: f64 },
    LongPress { x: f64, y: f64, seconds: Option<f64> },
    Swipe { x1: f64, y1: f64, x2: f64, y2: f64 },
    Type { text: String },
    Key { name: String },
    SystemButton { name: String },
    OpenApp { name: String },
    Wait { seconds: f64 },
    Answer { text: String },
    Status { goal: GoalStatus },
}

#[derive(Debug, Deserialize)]
struct RawAction {
    action: String,
    #[serde(default)]
    coordinate: Option<Vec<f64>>,
    #[serde(default)]
    coordinate2: Option<Vec<f64>>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    button: Option<String>,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    app_name: Option<String>,
    #[serde(default)]
    time: Option<f64>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    goal_status: Option<String>,
}

/// Parse the oracle's action text.
///
/// Tolerates markdown code fences and prose around the JSON object.
pub fn parse_action(text: &str) -> Result<ProposedAction, ActionError> {
    let json = extract_json_object(text)
        .ok_or_else(|| ActionError::Parse(format!("no JSON object in action text: {}", text.trim())))?;

    let value: Value = serde_json::from_str(json)
        .map_err(|e| ActionError::Parse(format!("{}: {}", e, json)))?;
    let raw: RawAction =
        serde_json::from_value(value).map_err(|e| ActionError::Parse(e.to_string()))?;

    raw.into_proposed()
}

impl RawAction {
    fn into_proposed(self) -> Result<ProposedAction, ActionError> {
        let action = self.action.trim().to_lowercase();
        match action.as_str() {
            "click" | "tap" => {
                let (x, y) = point(&action, "coordinate", self.coordinate.as_deref())?;
                Ok(ProposedAction::Click { x, y })
            }
            "long_press" => {
                let (x, y) = point(&action, "coordinate", self.coordinate.as_deref())?;
                Ok(ProposedAction::LongPress { x, y, seconds: self.time })
            }
            "swipe" => {
                let (x1, y1) = point(&action, "coordinate", self.coordinate.as_deref())?;
                let (x2, y2) = point(&action, "coordinate2", self.coordinate2.as_deref())?;
                Ok(ProposedAction::Swipe { x1, y1, x2, y2 })
            }
            "type" => Ok(ProposedAction::Type {
                text: required(&action, "text", self.text)?,
            }),
            "key" => Ok(ProposedAction::Key {
                name: required(&action, "text", self.key.or(self.text))?,
            }),
            "system_button" => Ok(ProposedAction::SystemButton {
                name: required(&action, "button", self.button)?,
            }),
            "open_app" | "open" => Ok(ProposedAction::OpenApp {
                name: required(&action, "text", self.app_name.or(self.text))?,
            }),
            "wait" => Ok(ProposedAction::Wait {
                seconds: self.time.filter(|t| t.is_finite() && *t >= 0.0).unwrap_or(1.0),
            }),
            "answer" => Ok(ProposedAction::Answer {
                text: self.text.unwrap_or_default(),
            }),
            "done" => Ok(ProposedAction::Status { goal: GoalStatus::Complete }),
            "terminate" | "status" => {
                let word = self.goal_status.or(self.status).unwrap_or_default();
                Ok(ProposedAction::Status { goal: GoalStatus::from_word(&word) })
            }
            other => Err(ActionError::UnknownAction(other.to_string())),
        }
    }
}

fn point(action: &str, param: &str, coords: Option<&[f64]>) -> Result<(f64, f64), ActionError> {
    match coords {
        Some([x, y, ..]) if x.is_finite() && y.is_finite() => Ok((*x, *y)),
        Some(_) => Err(ActionError::Parse(format!(
            "{} needs '{}' as [x, y]",
            action, param
        ))),
        None => Err(ActionError::MissingParameter {
            action: action.to_string(),
            param: param.to_string(),
        }),
    }
}

fn required(action: &str, param: &str, value: Option<String>) -> Result<String, ActionError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ActionError::MissingParameter {
            action: action.to_string(),
            param: param.to_string(),
        })
}

/// Slice out the first balanced `{...}` object, skipping braces in strings.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
