use std::path::{Path, PathBuf};

use vidgen_core::types::new_task_id;

/// Identity and scratch space of one job run.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// `task_<uuid>`, echoed in every result.
    pub task_id: String,
    /// Engine client id shared by submission and the event stream.
    pub client_id: String,
    /// `<work_root>/<task_id>`, created lazily by the input resolver.
    pub work_dir: PathBuf,
}

impl RunContext {
    pub fn new(client_id: &str, work_root: &Path) -> Self {
        let task_id = new_task_id();
        let work_dir = work_root.join(&task_id);
        Self {
            task_id,
            client_id: client_id.to_string(),
            work_dir,
        }
    }

    /// Remove the working directory. Failures are logged, never raised.
    pub async fn cleanup(&self) {
        match tokio::fs::remove_dir_all(&self.work_dir).await {
            Ok(()) => {
                tracing::debug!(task_id = %self.task_id, path = %self.work_dir.display(), "Removed work dir");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    task_id = %self.task_id,
                    path = %self.work_dir.display(),
                    error = %e,
                    "Failed to remove work dir",
                );
            }
        }
    }
}
