//! The results file: the full task list as pretty JSON, rewritten after
//! every task update.

use std::path::{Path, PathBuf};

use super::task::Task;
use super::PipelineError;

#[derive(Debug, Clone)]
pub struct ResultsFile {
    path: PathBuf,
}

impl ResultsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Tasks from a previous run; empty when the file does not exist.
    pub fn load(&self) -> Result<Vec<Task>, PipelineError> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(PipelineError::Results {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        serde_json::from_slice(&raw).map_err(|source| PipelineError::ResultsFormat {
            path: self.path.clone(),
            source,
        })
    }

    /// Replace the file with `tasks`. Writes a sibling temp file first so
    /// a crash never leaves a truncated file behind.
    pub fn save(&self, tasks: &[Task]) -> Result<(), PipelineError> {
        let json = serde_json::to_vec_pretty(tasks).map_err(|source| {
            PipelineError::ResultsFormat {
                path: self.path.clone(),
                source,
            }
        })?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        let io = |source| PipelineError::Results {
            path: self.path.clone(),
            source,
        };
        std::fs::write(&tmp, json).map_err(io)?;
        std::fs::rename(&tmp, &self.path).map_err(io)
    }
}
