//! Checkpoint — the pre-image (if any) of a step's file-tool target,
//! captured before dispatch so `rollback_all` can restore it.
//!
//! Grounded in `workflow_engine.py`'s `_create_checkpoint`: one checkpoint
//! directory per step under `checkpoint_dir/checkpoint_<step_id>_<epoch>/`,
//! holding a copy of the original file keyed by its basename. `execute_bash`
//! steps still get a checkpoint record (to preserve rollback ordering) but
//! it carries no backup path — shell side-effects are not reversed.

use chrono::{DateTime, Utc};
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct Checkpoint {
    pub step_id: String,
    pub timestamp: DateTime<Utc>,
    pub backup_directory: PathBuf,
    /// `(original_path, backup_path)`; `backup_path` is `None` when there
    /// was no pre-image to capture (new file, or a bash step).
    pub snapshot: Vec<(PathBuf, Option<PathBuf>)>,
}

impl Checkpoint {
    pub fn new(step_id: impl Into<String>, backup_directory: PathBuf) -> Self {
        Self { step_id: step_id.into(), timestamp: Utc::now(), backup_directory, snapshot: Vec::new() }
    }
}
