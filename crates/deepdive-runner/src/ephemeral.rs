//! Per-request task files that never outlive their request.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use deepdive_core::ids::random_suffix;
use deepdive_core::{RequestId, WorkerVariant};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::RunnerError;

const MAX_NAME_ATTEMPTS: usize = 8;

/// Creates, verifies and deletes task files in one directory.
#[derive(Debug, Clone)]
pub struct EphemeralFileManager {
    dir: PathBuf,
}

impl EphemeralFileManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Write `content` to a fresh file and return its guard.
    ///
    /// Names are never reused: the file is opened with create-new semantics
    /// and a colliding name is retried with a new random suffix.
    pub async fn create(
        &self,
        request_id: &RequestId,
        variant: WorkerVariant,
        content: &str,
    ) -> Result<EphemeralScript, RunnerError> {
        let mut last_path = self.dir.clone();
        for _ in 0..MAX_NAME_ATTEMPTS {
            let path = self.dir.join(file_name(variant));
            let opened = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;

            let mut file = match opened {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!(path = %path.display(), "Task file name collision, retrying");
                    last_path = path;
                    continue;
                }
                Err(source) => return Err(RunnerError::ScriptWrite { path, source }),
            };

            // The guard exists before the first byte is written, so a failed
            // write still removes the partial file.
            let guard = EphemeralScript::new(path.clone());
            let written = async {
                file.write_all(content.as_bytes()).await?;
                file.sync_all().await
            }
            .await;
            if let Err(source) = written {
                guard.delete().await;
                return Err(RunnerError::ScriptWrite { path, source });
            }

            debug!(
                request_id = %request_id,
                path = %path.display(),
                bytes = content.len(),
                "Task file written"
            );
            return Ok(guard);
        }

        Err(RunnerError::ScriptWrite {
            path: last_path,
            source: std::io::Error::new(
                ErrorKind::AlreadyExists,
                "could not find an unused task file name",
            ),
        })
    }

    /// Confirm the file exists and is a regular file.
    pub async fn verify(&self, path: &Path) -> Result<(), RunnerError> {
        let metadata = fs::metadata(path)
            .await
            .map_err(|source| RunnerError::FileVerification {
                path: path.to_path_buf(),
                source,
            })?;
        if !metadata.is_file() {
            return Err(RunnerError::FileVerification {
                path: path.to_path_buf(),
                source: std::io::Error::new(ErrorKind::InvalidInput, "not a regular file"),
            });
        }
        Ok(())
    }

    /// Remove a task file. Absence is not an error.
    pub async fn delete(&self, path: &Path) -> std::io::Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn file_name(variant: WorkerVariant) -> String {
    format!(
        "deepdive_{}_{}_{}.json",
        variant.as_str(),
        chrono::Utc::now().timestamp_millis(),
        random_suffix()
    )
}

/// Scoped guard for one task file.
///
/// Call [`delete`](Self::delete) at the end of a run. Any other way out
/// (an error, a panic, the run future being dropped) removes the file in
/// `Drop`. The file is removed at most once.
#[derive(Debug)]
pub struct EphemeralScript {
    path: PathBuf,
    deleted: bool,
}

impl EphemeralScript {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            deleted: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file now.
    pub async fn delete(mut self) {
        self.deleted = true;
        match fs::remove_file(&self.path).await {
            Ok(()) => debug!(path = %self.path.display(), "Task file deleted"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to delete task file"),
        }
    }
}

impl Drop for EphemeralScript {
    fn drop(&mut self) {
        if self.deleted {
            return;
        }
        // Only reached when a run is dropped or panics; normal paths call `delete`.
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Task file deleted on drop"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to delete task file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> RequestId {
        RequestId::new("req_1_ephemeral")
    }

    #[tokio::test]
    async fn test_create_verify_delete() {
        let dir = tempfile::tempdir().unwrap();
        let manager = EphemeralFileManager::new(dir.path());

        let script = manager
            .create(&id(), WorkerVariant::DeepResearch, "{\"query\":\"q\"}")
            .await
            .unwrap();
        let path = script.path().to_path_buf();

        assert!(path.starts_with(dir.path()));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("deepdive_deep_research_"));
        assert!(name.ends_with(".json"));
        manager.verify(&path).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"query\":\"q\"}");

        script.delete().await;
        assert!(!path.exists());
        assert!(matches!(
            manager.verify(&path).await,
            Err(RunnerError::FileVerification { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let manager = EphemeralFileManager::new(dir.path());
        let missing = dir.path().join("never_created.json");

        manager.delete(&missing).await.unwrap();
        manager.delete(&missing).await.unwrap();
    }

    #[tokio::test]
    async fn test_drop_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = EphemeralFileManager::new(dir.path());

        let script = manager
            .create(&id(), WorkerVariant::BingGrounding, "{}")
            .await
            .unwrap();
        let path = script.path().to_path_buf();
        assert!(path.exists());

        drop(script);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_concurrent_creates_never_share_a_path() {
        let dir = tempfile::tempdir().unwrap();
        let manager = EphemeralFileManager::new(dir.path());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                manager
                    .create(&id(), WorkerVariant::DeepResearch, "{}")
                    .await
                    .unwrap()
            }));
        }

        let mut scripts = Vec::new();
        for handle in handles {
            scripts.push(handle.await.unwrap());
        }
        let mut paths: Vec<_> = scripts.iter().map(|s| s.path().to_path_buf()).collect();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 16);
    }

    #[tokio::test]
    async fn test_create_in_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let manager = EphemeralFileManager::new(dir.path().join("missing"));

        let result = manager.create(&id(), WorkerVariant::DeepResearch, "{}").await;
        assert!(matches!(result, Err(RunnerError::ScriptWrite { .. })));
    }
}
