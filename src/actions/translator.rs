//! Oracle actions to device commands.

use std::time::Duration;

use super::parser::ProposedAction;
use super::record::ActionRecord;
use super::resize::CoordinateTransform;
use super::ActionError;
use crate::config::resolve_app;
use crate::device::{DeviceCommand, DeviceKey, Platform};

/// Default hold time for long presses.
pub const DEFAULT_LONG_PRESS_MS: u64 = 1000;
/// Default swipe duration.
pub const DEFAULT_SWIPE_MS: u64 = 500;
/// Default top edge of the on-screen keyboard, in device pixels.
pub const DEFAULT_KEYBOARD_TOP: i32 = 1400;
/// Longest wait an oracle can ask for.
pub const DEFAULT_MAX_WAIT_SECS: f64 = 60.0;
/// Longest long-press hold an oracle can ask for.
pub const DEFAULT_MAX_LONG_PRESS_MS: u64 = 10_000;

/// Advisory validation of a swipe's endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwipeCheck {
    pub start_on_screen: bool,
    pub end_on_screen: bool,
    pub clear_of_keyboard: bool,
}

impl SwipeCheck {
    pub fn is_valid(&self) -> bool {
        self.start_on_screen && self.end_on_screen && self.clear_of_keyboard
    }

    /// Planner guidance for a failed check.
    pub fn guideline(&self) -> Option<String> {
        if self.is_valid() {
            return None;
        }
        let mut problems = Vec::new();
        if !self.start_on_screen || !self.end_on_screen {
            problems.push("an endpoint was outside the screen");
        }
        if !self.clear_of_keyboard {
            problems.push("an endpoint was inside the keyboard area");
        }
        Some(format!(
            "The last swipe may not have worked: {}. Keep swipes within the scrollable area and away from the keyboard.",
            problems.join(" and ")
        ))
    }
}

/// Result of translating one proposed action.
#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub record: ActionRecord,
    pub swipe_check: Option<SwipeCheck>,
}

/// What dispatching a record means on the device.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceStep {
    /// Send this command.
    Command(DeviceCommand),
    /// Sleep locally; no device I/O.
    Delay(Duration),
    /// Nothing to send.
    Skip,
}

/// Turns oracle actions into records and device commands.
#[derive(Debug, Clone)]
pub struct ActionTranslator {
    long_press_ms: u64,
    swipe_ms: u64,
    keyboard_top: Option<i32>,
    max_wait_secs: f64,
    max_long_press_ms: u64,
}

impl Default for ActionTranslator {
    fn default() -> Self {
        Self {
            long_press_ms: DEFAULT_LONG_PRESS_MS,
            swipe_ms: DEFAULT_SWIPE_MS,
            keyboard_top: Some(DEFAULT_KEYBOARD_TOP),
            max_wait_secs: DEFAULT_MAX_WAIT_SECS,
            max_long_press_ms: DEFAULT_MAX_LONG_PRESS_MS,
        }
    }
}

impl ActionTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_long_press_ms(mut self, ms: u64) -> Self {
        self.long_press_ms = ms;
        self
    }

    pub fn with_swipe_ms(mut self, ms: u64) -> Self {
        self.swipe_ms = ms;
        self
    }

    /// Upper bound for wait actions. Non-finite or negative values are ignored.
    pub fn with_max_wait_secs(mut self, secs: f64) -> Self {
        if secs.is_finite() && secs >= 0.0 {
            self.max_wait_secs = secs;
        }
        self
    }

    pub fn with_max_long_press_ms(mut self, ms: u64) -> Self {
        self.max_long_press_ms = ms;
        self
    }

    /// Device y where the keyboard band starts; `None` disables the check.
    pub fn with_keyboard_top(mut self, keyboard_top: Option<i32>) -> Self {
        self.keyboard_top = keyboard_top;
        self
    }

    /// Map a proposed action into device pixel space.
    pub fn translate(&self, action: &ProposedAction, transform: &CoordinateTransform) -> Translation {
        let mut swipe_check = None;
        let record = match action {
            ProposedAction::Click { x, y } => {
                let (x, y) = transform.to_device(*x, *y);
                ActionRecord::Click { x, y }
            }
            ProposedAction::LongPress { x, y, seconds } => {
                let (x, y) = transform.to_device(*x, *y);
                let duration_ms = seconds
                    .filter(|s| s.is_finite() && *s > 0.0)
                    .map_or(self.long_press_ms, |s| (s * 1000.0).round() as u64)
                    .min(self.max_long_press_ms);
                ActionRecord::LongPress { x, y, duration_ms }
            }
            ProposedAction::Swipe { x1, y1, x2, y2 } => {
                let (x1, y1) = transform.to_device(*x1, *y1);
                let (x2, y2) = transform.to_device(*x2, *y2);
                let check = self.check_swipe(transform, (x1, y1), (x2, y2));
                if !check.is_valid() {
                    tracing::warn!(x1, y1, x2, y2, ?check, "swipe endpoints look wrong; dispatching anyway");
                }
                swipe_check = Some(check);
                ActionRecord::Swipe { x1, y1, x2, y2 }
            }
            ProposedAction::Type { text } => ActionRecord::TypeText { text: text.clone() },
            ProposedAction::Key { name } => ActionRecord::KeyPress { key: name.clone() },
            ProposedAction::SystemButton { name } => ActionRecord::SystemButton { button: name.clone() },
            ProposedAction::OpenApp { name } => ActionRecord::OpenApp { app_name: name.clone() },
            ProposedAction::Wait { seconds } if seconds.is_finite() => ActionRecord::Wait {
                seconds: seconds.clamp(0.0, self.max_wait_secs),
            },
            ProposedAction::Wait { seconds } => ActionRecord::Invalid {
                reason: format!("wait time must be a finite number of seconds, got {}", seconds),
            },
            ProposedAction::Answer { text } => ActionRecord::Answer { text: text.clone() },
            ProposedAction::Status { goal } => ActionRecord::Status { goal: *goal },
        };
        Translation { record, swipe_check }
    }

    fn check_swipe(&self, transform: &CoordinateTransform, start: (i32, i32), end: (i32, i32)) -> SwipeCheck {
        let clear = |y: i32| self.keyboard_top.map_or(true, |top| y < top);
        SwipeCheck {
            start_on_screen: transform.contains(start.0, start.1),
            end_on_screen: transform.contains(end.0, end.1),
            clear_of_keyboard: clear(start.1) && clear(end.1),
        }
    }

    /// Device work for a record.
    ///
    /// Unknown key names are a logged no-op. Unknown apps are an error so
    /// the loop can record a descriptive failure.
    pub fn device_step(&self, record: &ActionRecord, platform: Platform) -> Result<DeviceStep, ActionError> {
        let command = match record {
            ActionRecord::Click { x, y } => DeviceCommand::Tap { x: *x, y: *y },
            ActionRecord::LongPress { x, y, duration_ms } => DeviceCommand::LongPress {
                x: *x,
                y: *y,
                duration_ms: *duration_ms,
            },
            ActionRecord::Swipe { x1, y1, x2, y2 } => DeviceCommand::Swipe {
                x1: *x1,
                y1: *y1,
                x2: *x2,
                y2: *y2,
                duration_ms: self.swipe_ms,
            },
            ActionRecord::TypeText { text } => DeviceCommand::InputText { text: text.clone() },
            ActionRecord::KeyPress { key: name } | ActionRecord::SystemButton { button: name } => {
                match DeviceKey::from_name(name) {
                    Some(key) => DeviceCommand::Key(key),
                    None => {
                        tracing::warn!(key = %name, "unknown key name, ignoring");
                        return Ok(DeviceStep::Skip);
                    }
                }
            }
            ActionRecord::OpenApp { app_name } => {
                let package = resolve_app(app_name, platform)
                    .ok_or_else(|| ActionError::AppNotFound(app_name.clone()))?;
                DeviceCommand::LaunchApp { package }
            }
            ActionRecord::Wait { seconds } => {
                let delay = Duration::try_from_secs_f64(*seconds)
                    .map_err(|e| ActionError::Parse(format!("invalid wait time {}: {}", seconds, e)))?;
                return Ok(DeviceStep::Delay(delay));
            }
            ActionRecord::Answer { .. } | ActionRecord::Status { .. } | ActionRecord::Invalid { .. } => {
                return Ok(DeviceStep::Skip);
            }
        };
        Ok(DeviceStep::Command(command))
    }
}
