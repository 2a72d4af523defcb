//! File-per-job durable store.
//!
//! Every pending job lives in `<directory>/<id>.json`. Writes go to a hidden
//! temp file first and are renamed over the job file, so a crash leaves
//! either the old or the new record, never a torn one. Finalized jobs are
//! renamed to a hidden marker name (or deleted); anything starting with `.`
//! is invisible to [`JobStore::scan`].

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{Disposition, JobId, JobRecord, Outcome};

/// Prefix for files that failed to parse during recovery.
pub const CORRUPT_PREFIX: &str = ".corrupt-";

const TEMP_PREFIX: &str = ".tmp-";

/// What finalization did to a job's file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finalized {
    Moved(PathBuf),
    Destroyed,
}

/// Storage backend. Owns the queue directory.
#[derive(Debug, Clone)]
pub struct JobStore {
    dir: PathBuf,
    pretty: bool,
}

impl JobStore {
    pub fn new(dir: impl Into<PathBuf>, pretty: bool) -> Self {
        Self {
            dir: dir.into(),
            pretty,
        }
    }

    /// Create the queue directory if it does not exist.
    pub async fn open(dir: impl Into<PathBuf>, pretty: bool) -> Result<Self> {
        let store = Self::new(dir, pretty);
        tokio::fs::create_dir_all(&store.dir).await?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Build a fresh record that belongs to this store.
    pub fn create(
        &self,
        payload: serde_json::Value,
        due_at: chrono::DateTime<chrono::Utc>,
    ) -> JobRecord {
        JobRecord::new(&self.dir, payload, due_at, self.pretty)
    }

    /// Write the record to its backing file, replacing any previous version.
    pub async fn persist(&self, job: &JobRecord) -> Result<()> {
        let bytes = job.to_json()?;
        let target = self.dir.join(job.id.file_name());
        let temp = self.dir.join(format!("{TEMP_PREFIX}{}", job.id.file_name()));

        let mut file = tokio::fs::File::create(&temp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&temp, &target).await?;
        self.sync_dir().await?;
        debug!(id = %job.id, attempts = job.attempts, "job persisted");
        Ok(())
    }

    /// Flush directory entries so a completed rename survives a crash.
    #[cfg(unix)]
    async fn sync_dir(&self) -> Result<()> {
        tokio::fs::File::open(&self.dir).await?.sync_all().await?;
        Ok(())
    }

    #[cfg(not(unix))]
    async fn sync_dir(&self) -> Result<()> {
        Ok(())
    }

    /// Parse one backing file. The file must be named after the record's id;
    /// anything else is treated as corrupt.
    pub async fn load(&self, path: &Path) -> Result<JobRecord> {
        let bytes = tokio::fs::read(path).await?;
        let corrupt = |source| Error::Deserialize {
            path: path.to_path_buf(),
            source,
        };
        let job: JobRecord = serde_json::from_slice(&bytes).map_err(corrupt)?;

        let expected = job.id.file_name();
        if path.file_name().and_then(|n| n.to_str()) != Some(expected.as_str()) {
            return Err(corrupt(<serde_json::Error as serde::de::Error>::custom(
                format!("file name does not match job id, expected {expected}"),
            )));
        }
        Ok(job.bind(&self.dir, self.pretty))
    }

    /// Load a job by id.
    pub async fn get(&self, id: JobId) -> Result<JobRecord> {
        let path = self.dir.join(id.file_name());
        match tokio::fs::try_exists(&path).await? {
            true => self.load(&path).await,
            false => Err(Error::NotFound(format!("job {id}"))),
        }
    }

    /// Paths of all active job files, sorted by name. Hidden entries and
    /// anything that is not a regular file are skipped.
    pub async fn scan(&self) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if is_hidden(&entry.file_name().to_string_lossy()) {
                continue;
            }
            if !entry.file_type().await?.is_file() {
                continue;
            }
            paths.push(entry.path());
        }
        paths.sort();
        Ok(paths)
    }

    /// Every active record, ordered by due time.
    pub async fn list(&self) -> Result<Vec<JobRecord>> {
        let mut jobs = Vec::new();
        for path in self.scan().await? {
            jobs.push(self.load(&path).await?);
        }
        jobs.sort_by_key(|j| (j.due_at, j.created_at));
        Ok(jobs)
    }

    /// Move the job's file to its outcome marker, or delete it.
    pub async fn finalize(
        &self,
        job: &JobRecord,
        outcome: Outcome,
        disposition: Disposition,
    ) -> Result<Finalized> {
        let source = self.dir.join(job.id.file_name());
        match disposition {
            Disposition::Move => {
                let target = self.terminal_path(job.id, outcome);
                tokio::fs::rename(&source, &target).await?;
                self.sync_dir().await?;
                debug!(id = %job.id, %outcome, target = %target.display(), "job file moved");
                Ok(Finalized::Moved(target))
            }
            Disposition::Destroy => {
                tokio::fs::remove_file(&source).await?;
                self.sync_dir().await?;
                debug!(id = %job.id, %outcome, "job file destroyed");
                Ok(Finalized::Destroyed)
            }
        }
    }

    /// Hide a file that could not be parsed so later scans skip it.
    pub async fn quarantine(&self, path: &Path) -> Result<PathBuf> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::NotFound(path.display().to_string()))?;
        let target = self.dir.join(format!("{CORRUPT_PREFIX}{name}"));
        tokio::fs::rename(path, &target).await?;
        Ok(target)
    }

    /// Where a finalized job's file ends up.
    pub fn terminal_path(&self, id: JobId, outcome: Outcome) -> PathBuf {
        self.dir
            .join(format!("{}{}", outcome.file_prefix(), id.file_name()))
    }
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    async fn store() -> (tempfile::TempDir, JobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::open(dir.path(), false).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn persist_overwrites_in_place() {
        let (_dir, store) = store().await;
        let mut job = store.create(serde_json::json!({"n": 1}), Utc::now());
        store.persist(&job).await.unwrap();
        job.attempts = 2;
        store.persist(&job).await.unwrap();
        store.persist(&job).await.unwrap();

        let paths = store.scan().await.unwrap();
        assert_eq!(paths, vec![job.file()]);
        assert_eq!(store.load(&paths[0]).await.unwrap().attempts, 2);
    }

    #[tokio::test]
    async fn scan_skips_hidden_entries_and_directories() {
        let (dir, store) = store().await;
        let job = store.create(serde_json::json!(null), Utc::now());
        store.persist(&job).await.unwrap();
        std::fs::write(dir.path().join(".success-old.json"), b"{}").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        assert_eq!(store.scan().await.unwrap(), vec![job.file()]);
    }

    #[tokio::test]
    async fn load_reports_corrupt_path() {
        let (dir, store) = store().await;
        let path = dir.path().join("broken.json");
        std::fs::write(&path, b"{not json").unwrap();

        match store.load(&path).await {
            Err(Error::Deserialize { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected Deserialize error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn load_rejects_record_under_foreign_name() {
        let (dir, store) = store().await;
        let job = store.create(serde_json::json!(1), Utc::now());
        store.persist(&job).await.unwrap();
        let renamed = dir.path().join("renamed.json");
        std::fs::rename(job.file(), &renamed).unwrap();

        match store.load(&renamed).await {
            Err(Error::Deserialize { path, source }) => {
                assert_eq!(path, renamed);
                assert!(source.to_string().contains("does not match"));
            }
            other => panic!("expected Deserialize error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn persist_leaves_only_the_job_file() {
        let (dir, store) = store().await;
        let job = store.create(serde_json::json!({"n": 1}), Utc::now());
        store.persist(&job).await.unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec![job.id.file_name()]);
    }

    #[tokio::test]
    async fn finalize_move_hides_file() {
        let (_dir, store) = store().await;
        let job = store.create(serde_json::json!(1), Utc::now());
        store.persist(&job).await.unwrap();

        let result = store
            .finalize(&job, Outcome::Failed, Disposition::Move)
            .await
            .unwrap();

        let target = store.terminal_path(job.id, Outcome::Failed);
        assert_eq!(result, Finalized::Moved(target.clone()));
        assert!(target.exists());
        assert!(!job.file().exists());
        assert!(store.scan().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn finalize_destroy_removes_file() {
        let (dir, store) = store().await;
        let job = store.create(serde_json::json!(1), Utc::now());
        store.persist(&job).await.unwrap();

        let result = store
            .finalize(&job, Outcome::Success, Disposition::Destroy)
            .await
            .unwrap();

        assert_eq!(result, Finalized::Destroyed);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn get_missing_job_is_not_found() {
        let (_dir, store) = store().await;
        assert!(matches!(
            store.get(JobId::new()).await,
            Err(Error::NotFound(_))
        ));
    }
}
