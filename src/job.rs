//! Job records as seen by pollers.
//!
//! A [`Job`] is always handed out as an owned snapshot; the live record sits
//! inside [`crate::tracker::ProgressTracker`] and is only mutated through the
//! job's [`crate::tracker::JobHandle`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque, time-derived job identifier.
///
/// The value is a millisecond Unix timestamp rendered as decimal text; the
/// same number suffixes the job's output folder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn from_millis(millis: u64) -> Self {
        Self(millis.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Hands out strictly increasing millisecond timestamps.
///
/// Two registrations within the same millisecond would otherwise share a job
/// id and an output folder; the generator bumps the second one by 1 ms.
#[derive(Debug, Default)]
pub struct JobIdGenerator {
    last: AtomicU64,
}

impl JobIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next timestamp: `max(now, last + 1)`.
    pub fn next_millis(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(last + 1);
            match self.last.compare_exchange_weak(
                last,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(actual) => last = actual,
            }
        }
    }
}

/// Lifecycle of a job: `processing → completed` or `processing → error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
    Error,
}

impl JobStatus {
    /// `completed` and `error` never transition again.
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Processing)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        })
    }
}

/// One produced page file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageFile {
    /// `<originalBaseName>_page<ordinal>.pdf`
    pub name: String,
    /// URL path the file is served under.
    pub path: String,
    /// 1-indexed page number in the source document.
    pub page_number: usize,
}

/// Descriptive data fixed at job creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobMeta {
    pub folder_name: String,
    pub original_filename: String,
}

/// Snapshot of a job's progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    #[serde(rename = "processId")]
    pub id: JobId,
    pub total: usize,
    pub current: usize,
    pub status: JobStatus,
    pub files: Vec<PageFile>,
    pub folder_name: String,
    pub original_filename: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl Job {
    pub(crate) fn new(id: JobId, total: usize, meta: JobMeta) -> Self {
        Self {
            id,
            total,
            current: 0,
            status: JobStatus::Processing,
            files: Vec::with_capacity(total),
            folder_name: meta.folder_name,
            original_filename: meta.original_filename,
            error: None,
        }
    }
}

/// What the caller of [`crate::orchestrator::SplitService::submit`] gets back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub process_id: JobId,
    pub original_filename: String,
    pub page_count: usize,
    pub folder_name: String,
}

/// Payload of the result view for a completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub files: Vec<PageFile>,
    pub original_filename: String,
    pub page_count: usize,
    pub folder_name: String,
}

impl From<Job> for JobResult {
    fn from(job: Job) -> Self {
        Self {
            files: job.files,
            original_filename: job.original_filename,
            page_count: job.total,
            folder_name: job.folder_name,
        }
    }
}
