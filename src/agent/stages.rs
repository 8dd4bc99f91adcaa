//! Stage kinds and parsing of `### Section ###` delimited oracle output.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::info_pool::Outcome;

/// A plan whose trimmed text is shorter than this and says "Finished" ends the task.
pub const FINISHED_MAX_LEN: usize = 15;

static SECTION_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#{2,4}[ \t]*([A-Za-z][A-Za-z ]*[A-Za-z])[ \t]*#*").unwrap());
static OUTCOME_LETTER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([ABC])\b").unwrap());

/// Pipeline stage that consults the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Plan,
    Act,
    Reflect,
    Note,
}

impl StageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Act => "act",
            Self::Reflect => "reflect",
            Self::Note => "note",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Oracle text split on section markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sections {
    /// Section name (lowercase) to trimmed body.
    Parsed(HashMap<String, String>),
    /// No markers found.
    Unparsed(String),
}

impl Sections {
    /// Body of a section, if present and non-empty.
    pub fn get(&self, name: &str) -> Option<&str> {
        match self {
            Self::Parsed(map) => map
                .get(&name.to_lowercase())
                .map(String::as_str)
                .filter(|s| !s.is_empty()),
            Self::Unparsed(_) => None,
        }
    }

    /// Named section, or the whole text when there were no markers.
    pub fn get_or_raw(&self, name: &str) -> Option<&str> {
        match self {
            Self::Parsed(_) => self.get(name),
            Self::Unparsed(raw) => Some(raw.as_str()).filter(|s| !s.is_empty()),
        }
    }
}

/// Split oracle output on `### Name ###` markers.
///
/// Later duplicates of a section overwrite earlier ones, so an echoed
/// prompt followed by the real answer resolves to the answer.
pub fn split_sections(text: &str) -> Sections {
    let markers: Vec<_> = SECTION_MARKER.captures_iter(text).collect();
    if markers.is_empty() {
        return Sections::Unparsed(text.trim().to_string());
    }

    let mut map = HashMap::new();
    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(text.len(), |m| m.start());
        let body = text[whole.end()..end].trim().to_string();
        map.insert(name.as_str().trim().to_lowercase(), body);
    }
    Sections::Parsed(map)
}

/// Parsed Plan stage output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanOutput {
    pub thought: Option<String>,
    pub completed_plan: Option<String>,
    pub plan: Option<String>,
}

impl PlanOutput {
    pub fn parse(text: &str) -> Self {
        let sections = split_sections(text);
        Self {
            thought: sections.get("thought").map(str::to_string),
            completed_plan: sections.get("historical operations").map(str::to_string),
            plan: sections.get_or_raw("plan").map(str::to_string),
        }
    }
}

/// Whether a plan is the short "Finished" sentinel.
pub fn is_finished_plan(plan: &str) -> bool {
    let plan = plan.trim();
    plan.len() < FINISHED_MAX_LEN && plan.to_lowercase().contains("finished")
}

/// Parsed Act stage output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActOutput {
    pub thought: Option<String>,
    pub action: Option<String>,
    pub description: Option<String>,
}

impl ActOutput {
    pub fn parse(text: &str) -> Self {
        let sections = split_sections(text);
        Self {
            thought: sections.get("thought").map(str::to_string),
            action: sections.get_or_raw("action").map(str::to_string),
            description: sections.get("description").map(str::to_string),
        }
    }
}

/// Parsed Reflect stage output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReflectOutput {
    pub outcome: Option<Outcome>,
    pub error_description: Option<String>,
}

impl ReflectOutput {
    pub fn parse(text: &str) -> Self {
        let sections = split_sections(text);
        let outcome = sections.get_or_raw("outcome").and_then(outcome_from_text);
        let error_description = sections
            .get("error description")
            .filter(|d| !d.eq_ignore_ascii_case("none"))
            .map(str::to_string);
        Self {
            outcome,
            error_description,
        }
    }
}

/// First outcome letter found, checked in priority order A, B, C.
fn outcome_from_text(text: &str) -> Option<Outcome> {
    let letters: Vec<&str> = OUTCOME_LETTER
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    [("A", Outcome::Success), ("B", Outcome::HardFailure), ("C", Outcome::SoftFailure)]
        .into_iter()
        .find(|(letter, _)| letters.contains(letter))
        .map(|(_, outcome)| outcome)
}

/// Parsed Note stage output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteOutput {
    pub notes: Option<String>,
}

impl NoteOutput {
    pub fn parse(text: &str) -> Self {
        Self {
            notes: split_sections(text)
                .get_or_raw("important notes")
                .map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sections() {
        let text = "### Thought ###\nNeed settings.\n\n### Plan ###\n1. open settings app\n2. find wifi";
        let sections = split_sections(text);
        assert_eq!(sections.get("thought"), Some("Need settings."));
        assert_eq!(sections.get("Plan"), Some("1. open settings app\n2. find wifi"));
        assert_eq!(sections.get("action"), None);
    }

    #[test]
    fn test_markers_without_trailing_hashes() {
        let sections = split_sections("### Action\n{\"action\":\"wait\"}\n### Description\nwait a bit");
        assert_eq!(sections.get("action"), Some("{\"action\":\"wait\"}"));
        assert_eq!(sections.get("description"), Some("wait a bit"));
    }

    #[test]
    fn test_unparsed_text() {
        let sections = split_sections("  Finished  ");
        assert_eq!(sections, Sections::Unparsed("Finished".to_string()));
        assert_eq!(sections.get("plan"), None);
        assert_eq!(sections.get_or_raw("plan"), Some("Finished"));
    }

    #[test]
    fn test_plan_output() {
        let out = PlanOutput::parse("### Thought ###\nx\n### Historical Operations ###\nopened app\n### Plan ###\nFinished");
        assert_eq!(out.completed_plan.as_deref(), Some("opened app"));
        assert_eq!(out.plan.as_deref(), Some("Finished"));
        assert!(is_finished_plan(out.plan.as_deref().unwrap()));
    }

    #[test]
    fn test_finished_sentinel_requires_short_text() {
        assert!(is_finished_plan("Finished."));
        assert!(is_finished_plan(" finished "));
        assert!(!is_finished_plan("1. Finished reading the settings page, then"));
        assert!(!is_finished_plan("1. open settings"));
    }

    #[test]
    fn test_act_output_without_action_section() {
        let out = ActOutput::parse("### Thought ###\nhmm\n### Description ###\nnothing");
        assert_eq!(out.action, None);
        assert_eq!(out.description.as_deref(), Some("nothing"));

        let raw = ActOutput::parse("{\"action\":\"open_app\",\"text\":\"settings\"}");
        assert_eq!(raw.action.as_deref(), Some("{\"action\":\"open_app\",\"text\":\"settings\"}"));
    }

    #[test]
    fn test_reflect_outcome_priority() {
        let out = ReflectOutput::parse("### Outcome ###\nA: Successful\n### Error Description ###\nNone");
        assert_eq!(out.outcome, Some(Outcome::Success));
        assert_eq!(out.error_description, None);

        let out = ReflectOutput::parse("### Outcome ###\nC or maybe B\n### Error Description ###\nwrong page");
        assert_eq!(out.outcome, Some(Outcome::HardFailure));
        assert_eq!(out.error_description.as_deref(), Some("wrong page"));

        assert_eq!(ReflectOutput::parse("A").outcome, Some(Outcome::Success));
        assert_eq!(ReflectOutput::parse("no idea").outcome, None);
    }

    #[test]
    fn test_note_output() {
        assert_eq!(
            NoteOutput::parse("### Important Notes ###\nBattery 80%").notes.as_deref(),
            Some("Battery 80%")
        );
    }
}
