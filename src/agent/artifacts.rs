//! Per-task debugging artifacts: screenshots, raw oracle text, step log.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::info_pool::Outcome;
use super::task::TaskResult;
use crate::actions::ActionRecord;
use crate::device::Screenshot;

/// One line of the execution log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepLog {
    pub step: u32,
    pub action: ActionRecord,
    pub outcome: Outcome,
    pub summary: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_description: String,
    pub timestamp: DateTime<Utc>,
}

/// Receives artifacts as a task runs.
///
/// Callers log failures and carry on; a sink can never fail a task.
pub trait ArtifactSink: Send + Sync {
    fn begin_task(&self, task_id: Uuid, instruction: &str) -> io::Result<()>;
    fn save_screenshot(&self, task_id: Uuid, step: u32, label: &str, shot: &Screenshot) -> io::Result<()>;
    fn save_text(&self, task_id: Uuid, step: u32, stage: &str, text: &str) -> io::Result<()>;
    fn append_action(&self, task_id: Uuid, entry: &StepLog) -> io::Result<()>;
    fn finish_task(&self, result: &TaskResult) -> io::Result<()>;
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ArtifactSink for NullSink {
    fn begin_task(&self, _: Uuid, _: &str) -> io::Result<()> {
        Ok(())
    }

    fn save_screenshot(&self, _: Uuid, _: u32, _: &str, _: &Screenshot) -> io::Result<()> {
        Ok(())
    }

    fn save_text(&self, _: Uuid, _: u32, _: &str, _: &str) -> io::Result<()> {
        Ok(())
    }

    fn append_action(&self, _: Uuid, _: &StepLog) -> io::Result<()> {
        Ok(())
    }

    fn finish_task(&self, _: &TaskResult) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Serialize)]
struct TaskMetadata<'a> {
    task_id: Uuid,
    instruction: &'a str,
    started_at: DateTime<Utc>,
}

/// Writes artifacts under `<root>/<task_id>/`.
#[derive(Debug, Clone)]
pub struct FsArtifactSink {
    root: PathBuf,
}

impl FsArtifactSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for one task.
    pub fn task_dir(&self, task_id: Uuid) -> PathBuf {
        self.root.join(task_id.to_string())
    }

    fn ensure_dir(&self, task_id: Uuid) -> io::Result<PathBuf> {
        let dir = self.task_dir(task_id);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

impl ArtifactSink for FsArtifactSink {
    fn begin_task(&self, task_id: Uuid, instruction: &str) -> io::Result<()> {
        let dir = self.ensure_dir(task_id)?;
        let metadata = TaskMetadata {
            task_id,
            instruction,
            started_at: Utc::now(),
        };
        let content = serde_json::to_string_pretty(&metadata)?;
        fs::write(dir.join("task.json"), content)
    }

    fn save_screenshot(&self, task_id: Uuid, step: u32, label: &str, shot: &Screenshot) -> io::Result<()> {
        let dir = self.ensure_dir(task_id)?;
        fs::write(dir.join(format!("step_{}_{}.png", step, label)), &shot.data)
    }

    fn save_text(&self, task_id: Uuid, step: u32, stage: &str, text: &str) -> io::Result<()> {
        let dir = self.ensure_dir(task_id)?;
        fs::write(dir.join(format!("step_{}_{}.txt", step, stage)), text)
    }

    fn append_action(&self, task_id: Uuid, entry: &StepLog) -> io::Result<()> {
        let dir = self.ensure_dir(task_id)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("actions.jsonl"))?;
        writeln!(file, "{}", serde_json::to_string(entry)?)
    }

    fn finish_task(&self, result: &TaskResult) -> io::Result<()> {
        let dir = self.ensure_dir(result.task_id)?;
        fs::write(dir.join("result.json"), serde_json::to_string_pretty(result)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::task::{Task, TaskStatus};
    use std::io::BufRead;

    #[test]
    fn test_fs_sink_layout() {
        let root = tempfile::tempdir().unwrap();
        let sink = FsArtifactSink::new(root.path());
        let task = Task::new("open settings");

        sink.begin_task(task.id, &task.instruction).unwrap();
        sink.save_screenshot(task.id, 1, "before", &Screenshot::new(vec![1, 2, 3], 1, 1))
            .unwrap();
        sink.save_text(task.id, 1, "plan", "### Plan ###\n1. open").unwrap();
        for step in 1..=2 {
            let entry = StepLog {
                step,
                action: ActionRecord::Click { x: 1, y: 2 },
                outcome: Outcome::Success,
                summary: "tap".into(),
                error_description: String::new(),
                timestamp: Utc::now(),
            };
            sink.append_action(task.id, &entry).unwrap();
        }
        let mut result = TaskResult::failed(&task, "x", Utc::now());
        result.status = TaskStatus::Success;
        sink.finish_task(&result).unwrap();

        let dir = sink.task_dir(task.id);
        let meta: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.join("task.json")).unwrap()).unwrap();
        assert_eq!(meta["instruction"], "open settings");
        assert_eq!(fs::read(dir.join("step_1_before.png")).unwrap(), vec![1, 2, 3]);
        assert!(dir.join("step_1_plan.txt").exists());
        assert!(dir.join("result.json").exists());

        let file = fs::File::open(dir.join("actions.jsonl")).unwrap();
        let lines: Vec<StepLog> = io::BufReader::new(file)
            .lines()
            .map(|l| serde_json::from_str(&l.unwrap()).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].step, 2);
    }

    #[test]
    fn test_fs_sink_reports_io_errors() {
        let file = tempfile::NamedTempFile::new().unwrap();
        // a regular file cannot be used as the root directory
        let sink = FsArtifactSink::new(file.path());
        assert!(sink.begin_task(Uuid::new_v4(), "x").is_err());
    }
}
