//! Pipeline tasks and their stage machine.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use pow_core::{Cid, JobId, StorageConfig};
use serde::{Deserialize, Serialize};

use crate::error::ClientError;
use crate::folder::walk_files;

/// Progress of one task, in order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStage {
    #[default]
    Init,
    Staging,
    StagingComplete,
    Pushing,
    PushComplete,
    DealStarting,
    DealQueued,
    DealExecuting,
    DealComplete,
    Complete,
    DryRunComplete,
}

impl TaskStage {
    /// No further work happens for the task.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Complete | Self::DryRunComplete)
    }

    /// Stages owned by the summary watcher.
    pub fn is_watched(&self) -> bool {
        *self >= Self::PushComplete && *self < Self::DealComplete
    }
}

/// One top-level file or folder moving through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    pub path: PathBuf,
    pub bytes: u64,
    pub is_dir: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<Cid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(default)]
    pub stage: TaskStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Every job id applied for this task, oldest first.
    #[serde(default)]
    pub jobs: Vec<JobId>,
    /// Overrides the pipeline's storage config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<StorageConfig>,
}

impl Task {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, bytes: u64, is_dir: bool) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            bytes,
            is_dir,
            cid: None,
            job_id: None,
            stage: TaskStage::Init,
            error: None,
            jobs: Vec::new(),
            config: None,
        }
    }

    pub fn is_errored(&self) -> bool {
        self.error.is_some()
    }

    /// Whether a run should pick the task up.
    pub fn is_pending(&self) -> bool {
        !self.stage.is_final() && !self.is_errored()
    }

    /// Bring a task loaded from a results file back to a stage it can
    /// safely continue from.
    ///
    /// Staging or push may not have finished for anything before
    /// `PUSH_COMPLETE`, so such tasks start over. Later tasks keep their
    /// cid and job and go back to the watcher.
    pub fn rewind(&mut self, retry_errors: bool) {
        if self.is_errored() {
            if !retry_errors {
                return;
            }
            self.error = None;
            self.stage = TaskStage::Init;
        }
        if self.stage < TaskStage::PushComplete {
            self.stage = TaskStage::Init;
            self.cid = None;
            self.job_id = None;
        } else if self.stage == TaskStage::DealComplete {
            self.stage = TaskStage::Complete;
        } else if self.stage > TaskStage::PushComplete && !self.stage.is_final() {
            self.stage = TaskStage::DealStarting;
        }
        if self.stage >= TaskStage::PushComplete && self.job_id.is_none() {
            self.stage = TaskStage::Init;
            self.cid = None;
        }
    }
}

/// One task per top-level entry of `root`. Hidden entries are skipped
/// unless `include_hidden`.
pub fn scan_folder(root: &Path, include_hidden: bool) -> Result<Vec<Task>, ClientError> {
    let entries = std::fs::read_dir(root).map_err(|e| ClientError::io(root, e))?;
    let mut tasks = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ClientError::io(root, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !include_hidden && name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        let meta = entry.metadata().map_err(|e| ClientError::io(&path, e))?;
        let task = if meta.is_dir() {
            let mut bytes = 0;
            for file in walk_files(&path)? {
                bytes += std::fs::metadata(&file)
                    .map_err(|e| ClientError::io(&file, e))?
                    .len();
            }
            Task::new(name, path, bytes, true)
        } else if meta.is_file() {
            Task::new(name, path, meta.len(), false)
        } else {
            continue;
        };
        tasks.push(task);
    }
    tasks.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(tasks)
}

/// Merge freshly scanned tasks into known ones by path. Known tasks win;
/// new paths are appended.
pub fn merge(known: Vec<Task>, scanned: Vec<Task>) -> Vec<Task> {
    let index: HashMap<PathBuf, usize> = known
        .iter()
        .enumerate()
        .map(|(i, t)| (t.path.clone(), i))
        .collect();
    let mut merged = known;
    for task in scanned {
        if !index.contains_key(&task.path) {
            merged.push(task);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use pow_core::Codec;

    fn pushed(stage: TaskStage) -> Task {
        let mut task = Task::new("a", "/data/a", 10, false);
        task.cid = Some(Cid::for_content(Codec::Raw, b"a"));
        task.job_id = Some(JobId::new());
        task.stage = stage;
        task
    }

    #[test]
    fn stage_order_and_wire_names() {
        assert!(TaskStage::Init < TaskStage::Staging);
        assert!(TaskStage::PushComplete < TaskStage::DealStarting);
        assert!(TaskStage::DealComplete < TaskStage::Complete);
        assert_eq!(
            serde_json::to_string(&TaskStage::StagingComplete).unwrap(),
            "\"STAGING_COMPLETE\""
        );
        assert_eq!(
            serde_json::to_string(&TaskStage::DryRunComplete).unwrap(),
            "\"DRY_RUN_COMPLETE\""
        );
    }

    #[test]
    fn early_stages_restart_from_init() {
        for stage in [TaskStage::Staging, TaskStage::StagingComplete, TaskStage::Pushing] {
            let mut task = pushed(stage);
            task.rewind(false);
            assert_eq!(task.stage, TaskStage::Init);
            assert!(task.cid.is_none());
            assert!(task.job_id.is_none());
        }
    }

    #[test]
    fn pushed_tasks_keep_their_job() {
        let mut task = pushed(TaskStage::DealExecuting);
        let job = task.job_id;
        task.rewind(false);
        assert_eq!(task.stage, TaskStage::DealStarting);
        assert_eq!(task.job_id, job);

        let mut task = pushed(TaskStage::PushComplete);
        task.rewind(false);
        assert_eq!(task.stage, TaskStage::PushComplete);
    }

    #[test]
    fn errors_reset_only_when_retrying() {
        let mut task = pushed(TaskStage::DealQueued);
        task.error = Some("deal failed".into());
        task.rewind(false);
        assert!(task.is_errored());
        assert!(!task.is_pending());

        task.rewind(true);
        assert!(!task.is_errored());
        assert_eq!(task.stage, TaskStage::Init);
        assert!(task.job_id.is_none());
    }

    #[test]
    fn merge_keeps_known_tasks() {
        let mut known = Task::new("a", "/data/a", 1, false);
        known.stage = TaskStage::Complete;
        let scanned = vec![
            Task::new("a", "/data/a", 99, false),
            Task::new("b", "/data/b", 2, false),
        ];
        let merged = merge(vec![known.clone()], scanned);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0], known);
        assert_eq!(merged[1].name, "b");
    }

    #[test]
    fn scan_skips_hidden_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("file.bin"), vec![0u8; 5]).unwrap();
        std::fs::write(dir.path().join(".hidden"), b"x").unwrap();
        std::fs::create_dir_all(dir.path().join("folder/sub")).unwrap();
        std::fs::write(dir.path().join("folder/one"), vec![0u8; 3]).unwrap();
        std::fs::write(dir.path().join("folder/sub/two"), vec![0u8; 4]).unwrap();

        let tasks = scan_folder(dir.path(), false).unwrap();
        let names: Vec<&str> = tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["file.bin", "folder"]);
        assert_eq!(tasks[0].bytes, 5);
        assert!(!tasks[0].is_dir);
        assert_eq!(tasks[1].bytes, 7);
        assert!(tasks[1].is_dir);

        let all = scan_folder(dir.path(), true).unwrap();
        assert_eq!(all.len(), 3);
    }
}
