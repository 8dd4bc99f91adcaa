//! Device-side shell vocabulary.
//!
//! Every action reaches the device as one of these commands. The rendered
//! strings are the device wire protocol: all ADB-based connectors send the
//! same arguments for the same command, HDC has its own rendering.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use super::DeviceError;

/// Device operating system family, which decides the shell vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Android,
    Harmony,
}

/// Named hardware/system keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKey {
    Back,
    Home,
    Menu,
    Enter,
}

impl DeviceKey {
    /// Look up a key by name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "back" | "keycode_back" => Some(Self::Back),
            "home" | "keycode_home" => Some(Self::Home),
            "menu" | "keycode_menu" => Some(Self::Menu),
            "enter" | "keycode_enter" => Some(Self::Enter),
            _ => None,
        }
    }

    /// Android `input keyevent` code.
    pub fn android_code(self) -> u32 {
        match self {
            Self::Back => 4,
            Self::Home => 3,
            Self::Menu => 82,
            Self::Enter => 66,
        }
    }

    /// HarmonyOS `uitest uiInput keyEvent` name.
    pub fn harmony_name(self) -> &'static str {
        match self {
            Self::Back => "Back",
            Self::Home => "Home",
            Self::Menu => "Menu",
            Self::Enter => "Enter",
        }
    }
}

/// A single device-native command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    Tap { x: i32, y: i32 },
    Swipe { x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: u64 },
    /// Zero-displacement swipe held for `duration_ms`.
    LongPress { x: i32, y: i32, duration_ms: u64 },
    InputText { text: String },
    Key(DeviceKey),
    /// Launch by package (Android) or bundle (HarmonyOS).
    LaunchApp { package: String },
}

impl DeviceCommand {
    /// Arguments passed after `adb shell` / `hdc shell`.
    pub fn shell_args(&self, platform: Platform) -> Vec<String> {
        match platform {
            Platform::Android => self.android_args(),
            Platform::Harmony => self.harmony_args(),
        }
    }

    fn android_args(&self) -> Vec<String> {
        match self {
            Self::Tap { x, y } => strings(&["input", "tap", &x.to_string(), &y.to_string()]),
            Self::Swipe { x1, y1, x2, y2, duration_ms } => strings(&[
                "input",
                "swipe",
                &x1.to_string(),
                &y1.to_string(),
                &x2.to_string(),
                &y2.to_string(),
                &duration_ms.to_string(),
            ]),
            Self::LongPress { x, y, duration_ms } => strings(&[
                "input",
                "swipe",
                &x.to_string(),
                &y.to_string(),
                &x.to_string(),
                &y.to_string(),
                &duration_ms.to_string(),
            ]),
            Self::InputText { text } => {
                let encoded = STANDARD.encode(text.as_bytes());
                strings(&["am", "broadcast", "-a", "ADB_INPUT_B64", "--es", "msg", &encoded])
            }
            Self::Key(key) => strings(&["input", "keyevent", &key.android_code().to_string()]),
            Self::LaunchApp { package } => strings(&[
                "monkey",
                "-p",
                package,
                "-c",
                "android.intent.category.LAUNCHER",
                "1",
            ]),
        }
    }

    fn harmony_args(&self) -> Vec<String> {
        match self {
            Self::Tap { x, y } => {
                strings(&["uitest", "uiInput", "click", &x.to_string(), &y.to_string()])
            }
            Self::Swipe { x1, y1, x2, y2, duration_ms } => strings(&[
                "uitest",
                "uiInput",
                "swipe",
                &x1.to_string(),
                &y1.to_string(),
                &x2.to_string(),
                &y2.to_string(),
                &duration_ms.to_string(),
            ]),
            Self::LongPress { x, y, .. } => {
                strings(&["uitest", "uiInput", "longClick", &x.to_string(), &y.to_string()])
            }
            Self::InputText { text } => strings(&["uitest", "uiInput", "text", &shell_quote(text)]),
            Self::Key(key) => strings(&["uitest", "uiInput", "keyEvent", key.harmony_name()]),
            Self::LaunchApp { package } => {
                strings(&["aa", "start", "-b", package, "-a", "EntryAbility"])
            }
        }
    }

    /// Inspect command output for device-reported failures.
    ///
    /// `adb shell` exits 0 even when the device-side tool fails, so the
    /// output text is the only reliable signal.
    pub fn check_output(&self, output: &str) -> Result<(), DeviceError> {
        let lower = output.to_lowercase();
        let failed = match self {
            Self::LaunchApp { .. } => {
                lower.contains("monkey aborted")
                    || lower.contains("no activities found")
                    || lower.contains("error")
            }
            _ => lower.contains("exception") || lower.contains("error:"),
        };

        if failed {
            Err(DeviceError::CommandFailed(output.trim().to_string()))
        } else {
            Ok(())
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Tap { .. } => "tap",
            Self::Swipe { .. } => "swipe",
            Self::LongPress { .. } => "long_press",
            Self::InputText { .. } => "input_text",
            Self::Key(_) => "key",
            Self::LaunchApp { .. } => "launch_app",
        }
    }
}

fn strings(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Quote an argument for the device shell.
pub fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_android_tap_and_swipe() {
        let tap = DeviceCommand::Tap { x: 100, y: 200 };
        assert_eq!(tap.shell_args(Platform::Android), vec!["input", "tap", "100", "200"]);

        let long = DeviceCommand::LongPress { x: 5, y: 6, duration_ms: 1000 };
        assert_eq!(
            long.shell_args(Platform::Android),
            vec!["input", "swipe", "5", "6", "5", "6", "1000"]
        );
    }

    #[test]
    fn test_android_text_is_base64_broadcast() {
        let cmd = DeviceCommand::InputText { text: "Hello, 世界!".to_string() };
        let args = cmd.shell_args(Platform::Android);
        assert_eq!(&args[..4], &["am", "broadcast", "-a", "ADB_INPUT_B64"]);
        let decoded = STANDARD.decode(args.last().unwrap()).unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), "Hello, 世界!");
    }

    #[test]
    fn test_key_lookup() {
        assert_eq!(DeviceKey::from_name("Back"), Some(DeviceKey::Back));
        assert_eq!(DeviceKey::from_name(" ENTER "), Some(DeviceKey::Enter));
        assert_eq!(DeviceKey::from_name("volume_up"), None);
        assert_eq!(DeviceKey::Menu.android_code(), 82);
        assert_eq!(
            DeviceCommand::Key(DeviceKey::Home).shell_args(Platform::Harmony),
            vec!["uitest", "uiInput", "keyEvent", "Home"]
        );
    }

    #[test]
    fn test_launch_failure_detected() {
        let cmd = DeviceCommand::LaunchApp { package: "com.example".to_string() };
        assert!(cmd
            .check_output("** No activities found to run, monkey aborted.")
            .is_err());
        assert!(cmd.check_output("Events injected: 1").is_ok());
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
