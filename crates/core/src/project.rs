//! Project and run directory layout.
//!
//! ```text
//! <projects_root>/<project_id>/
//!     input/train.csv
//!     models/agent.pt
//!     runs/<run_id>/{config.toml, <kind>.log, raw_results.csv, results.csv, error.log, ...}
//! ```
//!
//! Path computation is pure. Only [`ProjectLayout::create_dirs`],
//! [`create_project`] and [`ProjectLayout::save_training_data`] touch the
//! filesystem.

use std::path::{Path, PathBuf};

use crate::error::CoreError;
use crate::job::JobType;
use crate::naming::{new_project_id, validate_identifier};
use crate::types::ProjectId;

pub const INPUT_DIR: &str = "input";
pub const MODELS_DIR: &str = "models";
pub const RUNS_DIR: &str = "runs";

pub const TRAINING_DATA_FILE: &str = "train.csv";
pub const AGENT_MODEL_FILE: &str = "agent.pt";

pub const CONFIG_FILE: &str = "config.toml";
pub const RAW_RESULTS_FILE: &str = "raw_results.csv";
pub const RESULTS_FILE: &str = "results.csv";
pub const ERROR_LOG_FILE: &str = "error.log";
pub const JSON_OUT_FILE: &str = "sampling.json";
pub const TENSORBOARD_DIR: &str = "tb";

/// Maximum accepted size of an uploaded training file (256 MiB).
const MAX_TRAINING_DATA_BYTES: usize = 256 * 1024 * 1024;

// ---------------------------------------------------------------------------
// ProjectLayout
// ---------------------------------------------------------------------------

/// Paths owned by a single project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    root: PathBuf,
    project_id: ProjectId,
}

impl ProjectLayout {
    /// Build the layout for `project_id` under `projects_root`.
    ///
    /// Fails if the id could escape the root directory.
    pub fn new(projects_root: impl Into<PathBuf>, project_id: &str) -> Result<Self, CoreError> {
        validate_identifier("project_id", project_id)?;
        Ok(Self {
            root: projects_root.into(),
            project_id: project_id.to_string(),
        })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn projects_root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self) -> PathBuf {
        self.root.join(&self.project_id)
    }

    pub fn input_dir(&self) -> PathBuf {
        self.dir().join(INPUT_DIR)
    }

    pub fn models_dir(&self) -> PathBuf {
        self.dir().join(MODELS_DIR)
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.dir().join(RUNS_DIR)
    }

    /// Uploaded SMILES training data.
    pub fn training_data(&self) -> PathBuf {
        self.input_dir().join(TRAINING_DATA_FILE)
    }

    /// Agent model produced by transfer learning and consumed by
    /// reinforcement and generation.
    pub fn agent_model(&self) -> PathBuf {
        self.models_dir().join(AGENT_MODEL_FILE)
    }

    /// Layout of the run `run_id` inside this project.
    pub fn run(&self, run_id: &str) -> Result<RunLayout, CoreError> {
        validate_identifier("run_id", run_id)?;
        Ok(RunLayout {
            dir: self.runs_dir().join(run_id),
        })
    }

    /// Create `input/`, `models/` and `runs/` if they do not exist.
    pub fn create_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.input_dir())?;
        std::fs::create_dir_all(self.models_dir())?;
        std::fs::create_dir_all(self.runs_dir())?;
        Ok(())
    }

    /// Store uploaded training data as `input/train.csv`, replacing any
    /// previous upload.
    pub fn save_training_data(&self, contents: &[u8]) -> Result<PathBuf, CoreError> {
        validate_training_data(contents)?;
        std::fs::create_dir_all(self.input_dir())
            .map_err(|e| CoreError::Internal(format!("Failed to create input directory: {e}")))?;
        let path = self.training_data();
        std::fs::write(&path, contents)
            .map_err(|e| CoreError::Internal(format!("Failed to write training data: {e}")))?;
        Ok(path)
    }
}

/// Create a new project with a fresh id and its directory skeleton.
pub fn create_project(projects_root: impl Into<PathBuf>) -> Result<ProjectLayout, CoreError> {
    let layout = ProjectLayout::new(projects_root, &new_project_id())?;
    layout
        .create_dirs()
        .map_err(|e| CoreError::Internal(format!("Failed to create project directories: {e}")))?;
    Ok(layout)
}

/// Training data must be a non-empty UTF-8 CSV with at least one row after
/// the header.
fn validate_training_data(contents: &[u8]) -> Result<(), CoreError> {
    if contents.is_empty() {
        return Err(CoreError::Validation("Training data must not be empty".into()));
    }
    if contents.len() > MAX_TRAINING_DATA_BYTES {
        return Err(CoreError::Validation(format!(
            "Training data must not exceed {MAX_TRAINING_DATA_BYTES} bytes"
        )));
    }
    let text = std::str::from_utf8(contents)
        .map_err(|_| CoreError::Validation("Training data must be UTF-8 text".into()))?;
    if text.lines().filter(|l| !l.trim().is_empty()).count() < 2 {
        return Err(CoreError::Validation(
            "Training data must contain a header and at least one SMILES row".into(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// RunLayout
// ---------------------------------------------------------------------------

/// Paths owned by a single run. Only the worker that created the run
/// writes here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    dir: PathBuf,
}

impl RunLayout {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    /// Engine log file, named after the kind of run.
    pub fn log_file(&self, job_type: JobType) -> PathBuf {
        let name = match job_type {
            JobType::Train => "train.log",
            JobType::Reinforce => "reinforce.log",
            JobType::Generate | JobType::Design => "sample.log",
        };
        self.dir.join(name)
    }

    pub fn raw_results(&self) -> PathBuf {
        self.dir.join(RAW_RESULTS_FILE)
    }

    pub fn results(&self) -> PathBuf {
        self.dir.join(RESULTS_FILE)
    }

    pub fn error_log(&self) -> PathBuf {
        self.dir.join(ERROR_LOG_FILE)
    }

    pub fn json_out(&self) -> PathBuf {
        self.dir.join(JSON_OUT_FILE)
    }

    pub fn tensorboard_dir(&self) -> PathBuf {
        self.dir.join(TENSORBOARD_DIR)
    }

    /// Checkpoint written at the end of stage `stage` (1-based).
    pub fn stage_checkpoint(&self, stage: usize) -> PathBuf {
        self.dir.join(format!("stage{stage}.chkpt"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn project_paths() {
        let layout = ProjectLayout::new("/app/projects", "p1").unwrap();
        assert_eq!(layout.dir(), PathBuf::from("/app/projects/p1"));
        assert_eq!(
            layout.training_data(),
            PathBuf::from("/app/projects/p1/input/train.csv")
        );
        assert_eq!(
            layout.agent_model(),
            PathBuf::from("/app/projects/p1/models/agent.pt")
        );
    }

    #[test]
    fn run_paths() {
        let layout = ProjectLayout::new("/app/projects", "p1").unwrap();
        let run = layout.run("run_abc").unwrap();
        assert_eq!(run.dir(), Path::new("/app/projects/p1/runs/run_abc"));
        assert_eq!(run.config_file(), run.dir().join("config.toml"));
        assert_eq!(run.log_file(JobType::Generate), run.dir().join("sample.log"));
        assert_eq!(run.log_file(JobType::Train), run.dir().join("train.log"));
        assert_eq!(run.stage_checkpoint(1), run.dir().join("stage1.chkpt"));
    }

    #[test]
    fn rejects_escaping_ids() {
        assert_matches!(
            ProjectLayout::new("/app/projects", "../other"),
            Err(CoreError::Validation(_))
        );
        let layout = ProjectLayout::new("/app/projects", "p1").unwrap();
        assert_matches!(layout.run("../../x"), Err(CoreError::Validation(_)));
    }

    #[test]
    fn create_project_builds_skeleton() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = create_project(tmp.path()).unwrap();
        assert!(layout.input_dir().is_dir());
        assert!(layout.models_dir().is_dir());
        assert!(layout.runs_dir().is_dir());
    }

    #[test]
    fn save_training_data_writes_train_csv() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = create_project(tmp.path()).unwrap();
        let path = layout
            .save_training_data(b"SMILES\nCCO\nc1ccccc1\n")
            .unwrap();
        assert_eq!(path, layout.training_data());
        assert_eq!(std::fs::read_to_string(path).unwrap(), "SMILES\nCCO\nc1ccccc1\n");
    }

    #[test]
    fn save_training_data_rejects_header_only() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = create_project(tmp.path()).unwrap();
        assert_matches!(
            layout.save_training_data(b"SMILES\n"),
            Err(CoreError::Validation(_))
        );
        assert_matches!(layout.save_training_data(b""), Err(CoreError::Validation(_)));
        assert!(!layout.training_data().exists());
    }
}
