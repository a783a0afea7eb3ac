// Per-run working directory
//
// Layout: <base>/<run id>/{src,artifacts}
// Decision: Any leftover directory for the same run id is wiped before staging

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use super::SandboxError;

#[derive(Debug)]
pub struct RunWorkspace {
    root: PathBuf,
    src: PathBuf,
    artifacts: PathBuf,
    removed: bool,
}

impl RunWorkspace {
    pub async fn create(base: &Path, run_id: Uuid) -> Result<Self, SandboxError> {
        let root = base.join(run_id.to_string());

        if tokio::fs::try_exists(&root).await.unwrap_or(false) {
            debug!(path = %root.display(), "removing stale workspace");
            tokio::fs::remove_dir_all(&root)
                .await
                .map_err(|e| SandboxError::Workspace(format!("{}: {}", root.display(), e)))?;
        }

        let src = root.join("src");
        let artifacts = root.join("artifacts");
        for dir in [&src, &artifacts] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| SandboxError::Workspace(format!("{}: {}", dir.display(), e)))?;
        }

        Ok(Self {
            root,
            src,
            artifacts,
            removed: false,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn src_dir(&self) -> &Path {
        &self.src
    }

    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts
    }

    /// Write `contents` to `src/<name>`
    pub async fn write_source(&self, name: &str, contents: &str) -> Result<(), SandboxError> {
        let path = self.src.join(name);
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| SandboxError::Workspace(format!("{}: {}", path.display(), e)))
    }

    /// Whether `artifacts/<name>` exists
    pub async fn has_artifact(&self, name: &str) -> bool {
        tokio::fs::try_exists(self.artifacts.join(name))
            .await
            .unwrap_or(false)
    }

    /// Delete the whole tree. Failures are logged, never returned.
    pub async fn cleanup(mut self) {
        self.removed = true;
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => debug!(path = %self.root.display(), "workspace removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.root.display(), error = %e, "failed to remove workspace"),
        }
    }
}

impl Drop for RunWorkspace {
    // Covers panics and early returns that skip `cleanup`
    fn drop(&mut self) {
        if !self.removed {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }
}
