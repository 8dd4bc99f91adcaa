//! Oracle action parsing, coordinate mapping and device translation.

mod parser;
mod record;
mod resize;
mod translator;

use thiserror::Error;

pub use parser::{parse_action, ProposedAction};
pub use record::{ActionRecord, GoalStatus};
pub use resize::{smart_resize, CoordinateTransform, ResizeBounds, MAX_PIXELS, MIN_PIXELS, RESIZE_FACTOR};
pub use translator::{
    ActionTranslator, DeviceStep, SwipeCheck, Translation, DEFAULT_KEYBOARD_TOP,
    DEFAULT_LONG_PRESS_MS, DEFAULT_MAX_LONG_PRESS_MS, DEFAULT_MAX_WAIT_SECS, DEFAULT_SWIPE_MS,
};

/// Action errors.
#[derive(Error, Debug)]
pub enum ActionError {
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Unknown action: {0}")]
    UnknownAction(String),
    #[error("Missing required parameter '{param}' for {action}")]
    MissingParameter { action: String, param: String },
    #[error("App not found: {0}")]
    AppNotFound(String),
    #[error("Resize error: {0}")]
    Resize(String),
}
