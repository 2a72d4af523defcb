//! Job records: the durable unit of work.
//!
//! A job record is an opaque payload plus the scheduling metadata the queue
//! needs to order, retry, and recover it. One record maps to one file in the
//! queue directory, named after the job id.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Extension used for active job files.
pub const JOB_FILE_EXT: &str = "json";

// ---------------------------------------------------------------------------
// Job Record
// ---------------------------------------------------------------------------

/// A unit of work tracked by the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique identifier. Also the stem of the backing file name.
    pub id: JobId,

    /// Caller-supplied data. The queue never interprets it.
    pub payload: serde_json::Value,

    /// The job is never dispatched before this instant.
    pub due_at: DateTime<Utc>,

    /// Number of execution attempts so far, including the current one while
    /// the job is in flight.
    pub attempts: u32,

    /// True only while the job occupies an execution slot.
    #[serde(default)]
    pub processing: bool,

    pub created_at: DateTime<Utc>,

    #[serde(skip)]
    directory: PathBuf,

    #[serde(skip)]
    pretty: bool,
}

impl JobRecord {
    pub(crate) fn new(
        directory: &Path,
        payload: serde_json::Value,
        due_at: DateTime<Utc>,
        pretty: bool,
    ) -> Self {
        Self {
            id: JobId::new(),
            payload,
            due_at,
            attempts: 0,
            processing: false,
            created_at: Utc::now(),
            directory: directory.to_path_buf(),
            pretty,
        }
    }

    /// Attach storage context to a record parsed from disk.
    pub(crate) fn bind(mut self, directory: &Path, pretty: bool) -> Self {
        self.directory = directory.to_path_buf();
        self.pretty = pretty;
        self
    }

    /// Queue directory that holds this record's file.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Absolute path of the backing file.
    pub fn file(&self) -> PathBuf {
        self.directory.join(self.id.file_name())
    }

    /// Whether the record is written with indentation.
    pub fn is_pretty(&self) -> bool {
        self.pretty
    }

    /// Decode the payload into a concrete type.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(|source| Error::Deserialize {
            path: self.file(),
            source,
        })
    }

    pub(crate) fn to_json(&self) -> Result<Vec<u8>> {
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(self)
        } else {
            serde_json::to_vec(self)
        };
        bytes.map_err(Error::Serialize)
    }
}

/// Newtype for job IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 characters, for tables and log lines.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }

    /// Name of the active backing file for this id.
    pub fn file_name(&self) -> String {
        format!("{}.{JOB_FILE_EXT}", self.0)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Terminal result of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failed,
}

impl Outcome {
    /// Hidden prefix given to a finalized file. The leading dot keeps it out
    /// of the next recovery scan.
    pub fn file_prefix(self) -> &'static str {
        match self {
            Outcome::Success => ".success-",
            Outcome::Failed => ".failed-",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Outcome::Success => "success",
            Outcome::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// What happens to a job's file once it reaches an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Rename to a hidden marker name and leave it for inspection.
    #[default]
    Move,
    /// Delete the file.
    Destroy,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Scheduling options for a push.
#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    pub(crate) due_at: Option<DateTime<Utc>>,
}

impl PushOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run no earlier than `at`.
    pub fn due_at(mut self, at: DateTime<Utc>) -> Self {
        self.due_at = Some(at);
        self
    }

    /// Run no earlier than `delay` from now.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.due_at = Some(due_in(delay));
        self
    }
}

/// Latest due time a record can carry: 9999-12-31T23:59:59Z. Later instants
/// do not survive an RFC 3339 round trip.
pub fn far_future() -> DateTime<Utc> {
    DateTime::from_timestamp(253_402_300_799, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// The instant `delay` from now, saturating at [`far_future`].
pub fn due_in(delay: Duration) -> DateTime<Utc> {
    let far = far_future();
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delta| Utc::now().checked_add_signed(delta))
        .map_or(far, |at| at.min(far))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn huge_delays_saturate_instead_of_overflowing() {
        assert_eq!(due_in(Duration::from_secs(10u64.pow(15))), far_future());
        assert_eq!(due_in(Duration::MAX), far_future());

        let job = JobRecord::new(Path::new("/q"), serde_json::json!(1), far_future(), false);
        let back: JobRecord = serde_json::from_slice(&job.to_json().unwrap()).unwrap();
        assert_eq!(back.due_at, far_future());
    }

    #[test]
    fn short_delays_are_relative_to_now() {
        let before = Utc::now();
        let at = due_in(Duration::from_millis(500));
        assert!(at >= before + chrono::Duration::milliseconds(500));
        assert!(at < far_future());
    }

    #[test]
    fn file_is_derived_from_directory_and_id() {
        let job = JobRecord::new(Path::new("/q"), serde_json::json!(1), Utc::now(), false);
        assert_eq!(job.file(), Path::new("/q").join(format!("{}.json", job.id.0)));
        assert_eq!(job.directory(), Path::new("/q"));
    }

    #[test]
    fn storage_context_is_not_serialized() {
        let job = JobRecord::new(Path::new("/q"), serde_json::json!({"a": 1}), Utc::now(), true);
        let value: serde_json::Value = serde_json::from_slice(&job.to_json().unwrap()).unwrap();
        assert!(value.get("directory").is_none());
        assert!(value.get("pretty").is_none());
        assert_eq!(value["attempts"], 0);
    }

    #[test]
    fn pretty_records_are_indented() {
        let job = JobRecord::new(Path::new("/q"), serde_json::json!(null), Utc::now(), true);
        let text = String::from_utf8(job.to_json().unwrap()).unwrap();
        assert!(text.contains("\n  \"id\""));

        let compact = job.bind(Path::new("/q"), false);
        assert!(!String::from_utf8(compact.to_json().unwrap()).unwrap().contains('\n'));
    }

    #[test]
    fn outcome_prefixes_are_hidden() {
        assert!(Outcome::Success.file_prefix().starts_with('.'));
        assert!(Outcome::Failed.file_prefix().starts_with('.'));
    }

    #[test]
    fn job_id_parses_from_display() {
        let id = JobId::new();
        assert_eq!(id.to_string().parse::<JobId>().unwrap(), id);
        assert_eq!(id.short().len(), 8);
    }
}
