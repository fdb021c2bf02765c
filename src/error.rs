//! Error types for the edgequake-pdfsplit library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`SplitError`]: **Synchronous**: the request cannot be served at all
//!   (wrong file type, corrupt PDF, unknown job, archive failure). Returned as
//!   `Err(SplitError)` to whoever made the call.
//!
//! * [`PageError`]: **Asynchronous**: a single page failed inside a
//!   background split. Nobody is waiting on the background task, so the
//!   error is recorded on the job (status `error`, detail string) and is only
//!   observable by polling.

use std::path::PathBuf;
use thiserror::Error;

/// All synchronous errors returned by the edgequake-pdfsplit library.
///
/// Page-level failures use [`PageError`] and end up in
/// [`crate::job::Job::error`] rather than propagated here.
#[derive(Debug, Error)]
pub enum SplitError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The uploaded file name does not end in `.pdf`.
    #[error("Only PDF uploads are accepted, got '{filename}'")]
    InvalidFileType { filename: String },

    /// The request carried no file.
    #[error("No file was uploaded")]
    MissingUpload,

    /// The bytes do not start with the `%PDF` magic.
    #[error("Upload '{filename}' is not a PDF (first bytes: {magic:?})")]
    NotAPdf { filename: String, magic: Vec<u8> },

    /// The PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{filename}' could not be parsed: {detail}")]
    CorruptPdf { filename: String, detail: String },

    // ── Lookup errors ─────────────────────────────────────────────────────
    /// No job with this identifier is tracked (never existed or evicted).
    #[error("Job '{id}' not found")]
    JobNotFound { id: String },

    /// The output folder does not exist.
    #[error("Folder '{folder}' not found")]
    FolderNotFound { folder: String },

    /// The requested page file does not exist.
    #[error("File '{file}' not found in folder '{folder}'")]
    FileNotFound { folder: String, file: String },

    // ── Tracker errors ────────────────────────────────────────────────────
    /// A job with the same identifier is already tracked.
    #[error("Job '{id}' already exists")]
    DuplicateJob { id: String },

    /// A mutation would break a job invariant; the record is left untouched.
    #[error("Job '{id}': {detail}")]
    InvariantViolation { id: String, detail: String },

    /// Every tracked job is still processing and the store is at capacity.
    #[error("Job store is full ({capacity} jobs in progress), try again later")]
    StoreFull { capacity: usize },

    // ── Archive errors ────────────────────────────────────────────────────
    /// Bulk download requested while the owning job is still splitting.
    #[error("Folder '{folder}' is still being produced, wait for the job to finish")]
    JobInProgress { folder: String },

    /// Building the ZIP container failed; the partial container is removed.
    #[error("Failed to build archive for '{folder}': {detail}")]
    ArchiveFailed { folder: String, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Filesystem operation failed outside the per-page path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SplitError {
    /// `true` for the "not found" family, which callers must report
    /// distinctly from server-side failures.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SplitError::JobNotFound { .. }
                | SplitError::FolderNotFound { .. }
                | SplitError::FileNotFound { .. }
        )
    }

    /// Stable machine-readable code, used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            SplitError::InvalidFileType { .. } => "invalid_file_type",
            SplitError::MissingUpload => "missing_upload",
            SplitError::NotAPdf { .. } => "not_a_pdf",
            SplitError::CorruptPdf { .. } => "corrupt_pdf",
            SplitError::JobNotFound { .. } => "job_not_found",
            SplitError::FolderNotFound { .. } => "folder_not_found",
            SplitError::FileNotFound { .. } => "file_not_found",
            SplitError::DuplicateJob { .. } => "duplicate_job",
            SplitError::InvariantViolation { .. } => "invariant_violation",
            SplitError::StoreFull { .. } => "store_full",
            SplitError::JobInProgress { .. } => "job_in_progress",
            SplitError::ArchiveFailed { .. } => "archive_failed",
            SplitError::Io { .. } => "io_error",
            SplitError::InvalidConfig(_) => "invalid_config",
            SplitError::Internal(_) => "internal_error",
        }
    }
}

/// A failure of a single page inside a background split.
///
/// The display string becomes the job's error detail.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Copying the page into a new document or serialising it failed.
    #[error("Page {page}: extraction failed: {detail}")]
    ExtractFailed { page: usize, detail: String },

    /// The page was produced but could not be written to the output folder.
    #[error("Page {page}: write to '{path}' failed: {detail}")]
    WriteFailed {
        page: usize,
        path: PathBuf,
        detail: String,
    },

    /// The blocking worker running the splitter died.
    #[error("Page {page}: split worker failed: {detail}")]
    WorkerFailed { page: usize, detail: String },
}

impl PageError {
    /// 1-indexed page the error refers to.
    pub fn page(&self) -> usize {
        match self {
            PageError::ExtractFailed { page, .. }
            | PageError::WriteFailed { page, .. }
            | PageError::WorkerFailed { page, .. } => *page,
        }
    }
}
