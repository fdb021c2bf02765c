//! # edgequake-pdfsplit
//!
//! Split PDF documents into one file per page, in the background, with
//! progress polling and ZIP bulk download.
//!
//! ## Why this crate?
//!
//! Splitting a 400-page scan is not a request-sized task. This crate accepts
//! the document, answers immediately with a job id and the page count, and
//! produces the pages on a bounded worker pool while clients poll. Every page
//! is a standalone PDF copied structurally with lopdf (fonts, images and
//! inherited resources intact), not a re-rendered image.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload
//!  │
//!  ├─ 1. Input     check `.pdf` + `%PDF` magic, stage under a generated name
//!  ├─ 2. Load      parse with lopdf, count pages (spawn_blocking)
//!  ├─ 3. Register  tracker entry + output folder, reply with the job id
//!  ├─ 4. Split     background task: one single-page PDF per page, paced
//!  ├─ 5. Poll      snapshots from the progress tracker until terminal
//!  └─ 6. Bundle    on demand, stream the folder as a transient ZIP
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdfsplit::{SplitConfig, SplitService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = SplitService::new(SplitConfig::default())?;
//!     service.prepare_dirs().await?;
//!
//!     let bytes = std::fs::read("report.pdf")?;
//!     let reg = service.submit(bytes, "report.pdf").await?;
//!     println!("job {} has {} pages", reg.process_id, reg.page_count);
//!
//!     let job = service.progress(&reg.process_id)?;
//!     println!("{}/{} pages, {}", job.current, job.total, job.status);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfsplit` server binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when embedding the library to avoid pulling in CLI-only deps:
//! ```toml
//! edgequake-pdfsplit = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod api;
pub mod archive;
pub mod config;
pub mod error;
pub mod job;
pub mod naming;
pub mod orchestrator;
pub mod pipeline;
pub mod tracker;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use api::{create_router, serve, AppState};
pub use archive::{ArchiveFile, ArchiveStream};
pub use config::{SplitConfig, SplitConfigBuilder};
pub use error::{PageError, SplitError};
pub use job::{Job, JobId, JobResult, JobStatus, PageFile, Registration};
pub use orchestrator::SplitService;
pub use pipeline::split::{split, PageSource, SourceDocument, SplitPage};
pub use tracker::{JobHandle, ProgressTracker};
