//! Split job orchestration: register a job, split it in the background.
//!
//! ## Why return before the first page?
//!
//! Splitting a long document takes seconds to minutes. [`SplitService::submit`]
//! does only the work needed to answer "how many pages, which job id": vet,
//! stage and parse the upload, create the output folder and the tracker
//! entry. The pages are produced by a spawned task, and clients follow along
//! by polling [`SplitService::progress`].
//!
//! ## Background task
//!
//! ```text
//! start delay ──▶ worker permit ──▶ spawn_blocking(split) ──mpsc(1)──▶ write + append_file
//!                                                                      └─ pacing pause
//! ```
//!
//! The splitter runs on a blocking thread because lopdf is CPU-bound and
//! synchronous. It hands pages over a channel with room for one page, so at
//! most two serialised pages of a job are in memory at any time. The async
//! side writes each page, then records it through the job's
//! [`JobHandle`], the only writer the job has.

use crate::archive::{self, ArchiveFile};
use crate::config::SplitConfig;
use crate::error::{PageError, SplitError};
use crate::job::{Job, JobId, JobIdGenerator, JobMeta, JobResult, JobStatus, PageFile, Registration};
use crate::naming;
use crate::pipeline::input;
use crate::pipeline::split::{split, PageSource, SourceDocument, SplitPage};
use crate::tracker::{JobHandle, ProgressTracker};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Entry point for everything the HTTP layer does.
///
/// Share it behind an `Arc`; every method takes `&self`.
#[derive(Debug)]
pub struct SplitService {
    config: Arc<SplitConfig>,
    tracker: Arc<ProgressTracker>,
    workers: Arc<Semaphore>,
    ids: JobIdGenerator,
}

/// What a background task needs from the service.
struct JobContext {
    config: Arc<SplitConfig>,
    workers: Arc<Semaphore>,
    out_dir: PathBuf,
    folder: String,
    base: String,
}

impl SplitService {
    /// Create a service over `config`.
    ///
    /// # Errors
    /// [`SplitError::InvalidConfig`] if `config` breaks a constraint the
    /// builder enforces (it may have been built by hand or deserialised).
    pub fn new(config: SplitConfig) -> Result<Self, SplitError> {
        config.validate()?;
        let tracker = Arc::new(ProgressTracker::from_config(&config));
        let workers = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        Ok(Self {
            config: Arc::new(config),
            tracker,
            workers,
            ids: JobIdGenerator::new(),
        })
    }

    pub fn config(&self) -> &SplitConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }

    /// Create the staging and output areas if they do not exist.
    pub async fn prepare_dirs(&self) -> Result<(), SplitError> {
        for dir in [&self.config.upload_dir, &self.config.download_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| SplitError::Io {
                    path: dir.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Start the tracker's retention sweep at the configured interval.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        self.tracker.spawn_sweeper(self.config.sweep_interval())
    }

    /// Accept an uploaded document and start splitting it.
    ///
    /// Returns as soon as the job is registered; no page has been produced
    /// yet.
    ///
    /// # Errors
    /// - [`SplitError::InvalidFileType`] / [`SplitError::NotAPdf`] for
    ///   anything that is not a PDF
    /// - [`SplitError::CorruptPdf`] if the document cannot be parsed
    /// - [`SplitError::StoreFull`] if the tracker cannot take another job
    /// - [`SplitError::Io`] if staging or creating the output folder fails
    pub async fn submit(
        &self,
        bytes: Vec<u8>,
        original_name: &str,
    ) -> Result<Registration, SplitError> {
        input::validate_upload(original_name, &bytes)?;

        let millis = self.ids.next_millis();
        let staged = input::stage_upload(&self.config.upload_dir, millis, &bytes).await?;

        let name = original_name.to_string();
        let loaded = tokio::task::spawn_blocking(move || SourceDocument::load(&bytes, &name))
            .await
            .map_err(|e| SplitError::Internal(format!("Load task panicked: {}", e)))?;

        let source = match loaded {
            Ok(source) => source,
            Err(e) => {
                warn!("Rejected upload '{}': {}", original_name, e);
                if let Err(rm) = tokio::fs::remove_file(&staged).await {
                    warn!("Failed to remove staged upload {}: {}", staged.display(), rm);
                }
                return Err(e);
            }
        };

        self.register(Arc::new(source), original_name, millis).await
    }

    /// Register a job over an already-loaded page source.
    ///
    /// Used by [`submit`](Self::submit); also lets callers plug in their own
    /// [`PageSource`].
    pub async fn submit_source(
        &self,
        source: Arc<dyn PageSource>,
        original_name: &str,
    ) -> Result<Registration, SplitError> {
        let millis = self.ids.next_millis();
        self.register(source, original_name, millis).await
    }

    async fn register(
        &self,
        source: Arc<dyn PageSource>,
        original_name: &str,
        millis: u64,
    ) -> Result<Registration, SplitError> {
        let base = naming::base_name(original_name);
        let folder = naming::folder_name(&base, millis);
        let out_dir = self.config.download_dir.join(&folder);
        let total = source.page_count();
        let id = JobId::from_millis(millis);

        let handle = self.tracker.create(
            id.clone(),
            total,
            JobMeta {
                folder_name: folder.clone(),
                original_filename: base.clone(),
            },
        )?;

        if let Err(io_err) = tokio::fs::create_dir_all(&out_dir).await {
            let detail = format!("cannot create output folder: {}", io_err);
            if let Err(e) = handle.fail(detail) {
                warn!("Job {}: {}", id, e);
            }
            self.tracker.evict(&id);
            return Err(SplitError::Io {
                path: out_dir,
                source: io_err,
            });
        }

        info!(
            "Job {} registered: '{}' ({} pages) → {}",
            id,
            base,
            total,
            out_dir.display()
        );

        let ctx = JobContext {
            config: Arc::clone(&self.config),
            workers: Arc::clone(&self.workers),
            out_dir,
            folder: folder.clone(),
            base: base.clone(),
        };
        tokio::spawn(run_job(ctx, handle, source));

        Ok(Registration {
            process_id: id,
            original_filename: base,
            page_count: total,
            folder_name: folder,
        })
    }

    /// Snapshot of a job.
    ///
    /// # Errors
    /// [`SplitError::JobNotFound`] for unknown or evicted ids.
    pub fn progress(&self, id: &JobId) -> Result<Job, SplitError> {
        self.tracker
            .get(id)
            .ok_or_else(|| SplitError::JobNotFound { id: id.to_string() })
    }

    /// Result view of a job, available only once it has `completed`.
    pub fn result(&self, id: &JobId) -> Option<JobResult> {
        self.tracker
            .get(id)
            .filter(|job| job.status == JobStatus::Completed)
            .map(JobResult::from)
    }

    /// Path of one produced page.
    ///
    /// # Errors
    /// [`SplitError::FileNotFound`] if either name is not a plain path
    /// component or the file does not exist.
    pub async fn locate_file(&self, folder: &str, file: &str) -> Result<PathBuf, SplitError> {
        let not_found = || SplitError::FileNotFound {
            folder: folder.to_string(),
            file: file.to_string(),
        };
        if !naming::is_safe_component(folder) || !naming::is_safe_component(file) {
            return Err(not_found());
        }

        let path = self.config.download_dir.join(folder).join(file);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            _ => Err(not_found()),
        }
    }

    /// Bundle an output folder into a ZIP container for bulk download.
    ///
    /// Folders whose job is still `processing` are refused, so an archive
    /// never silently misses pages that were about to be written. Folders
    /// of failed jobs, and folders no longer tracked, are archived as they
    /// are.
    ///
    /// # Errors
    /// - [`SplitError::FolderNotFound`] for unsafe names or missing folders
    /// - [`SplitError::JobInProgress`] while the owning job is processing
    /// - [`SplitError::ArchiveFailed`] if building the container fails
    pub async fn download_all(&self, folder: &str) -> Result<ArchiveFile, SplitError> {
        if !naming::is_safe_component(folder) {
            return Err(SplitError::FolderNotFound {
                folder: folder.to_string(),
            });
        }
        if let Some(job) = self.tracker.find_by_folder(folder) {
            if job.status == JobStatus::Processing {
                return Err(SplitError::JobInProgress {
                    folder: folder.to_string(),
                });
            }
        }
        archive::assemble(
            &self.config.download_dir,
            folder,
            self.config.compression_level,
        )
        .await
    }
}

/// Background body of one job. Always leaves the job terminal.
async fn run_job(ctx: JobContext, handle: JobHandle, source: Arc<dyn PageSource>) {
    let id = handle.id().clone();

    tokio::time::sleep(ctx.config.start_delay()).await;

    let _permit = match Arc::clone(&ctx.workers).acquire_owned().await {
        Ok(permit) => permit,
        Err(e) => {
            error!("Job {}: worker pool closed: {}", id, e);
            if let Err(e) = handle.fail(format!("worker pool unavailable: {}", e)) {
                warn!("Job {}: {}", id, e);
            }
            return;
        }
    };

    let start = Instant::now();
    info!("Job {} started splitting {} pages", id, source.page_count());

    let outcome = produce_pages(&ctx, &handle, source).await;
    let finished = match outcome {
        Ok(()) => handle.complete(),
        Err(e) => {
            error!("Job {} failed: {}", id, e);
            handle.fail(e.to_string())
        }
    };

    match finished {
        Ok(()) => info!(
            "Job {} finished in {}ms",
            id,
            start.elapsed().as_millis()
        ),
        Err(e) => warn!("Job {}: could not record final status: {}", id, e),
    }
}

/// Drive the splitter and record each page. Stops at the first failure.
async fn produce_pages(
    ctx: &JobContext,
    handle: &JobHandle,
    source: Arc<dyn PageSource>,
) -> Result<(), PageError> {
    let total = source.page_count();
    if total == 0 {
        return Ok(());
    }

    let (tx, mut rx) = mpsc::channel::<Result<SplitPage, PageError>>(1);
    let producer = tokio::task::spawn_blocking(move || {
        for page in split(source.as_ref()) {
            if tx.blocking_send(page).is_err() {
                break;
            }
        }
    });

    let mut written = 0usize;
    let mut outcome = Ok(());
    while let Some(item) = rx.recv().await {
        let step = match item {
            Ok(page) => store_page(ctx, handle, page, total).await,
            Err(e) => Err(e),
        };
        match step {
            Ok(()) => written += 1,
            Err(e) => {
                outcome = Err(e);
                break;
            }
        }
    }
    // Unblocks the producer if it is waiting to send.
    drop(rx);

    if let Err(e) = producer.await {
        if outcome.is_ok() {
            outcome = Err(PageError::WorkerFailed {
                page: written + 1,
                detail: e.to_string(),
            });
        }
    }

    if outcome.is_ok() && written != total {
        outcome = Err(PageError::WorkerFailed {
            page: written + 1,
            detail: format!("splitter stopped after {} of {} pages", written, total),
        });
    }
    outcome
}

/// Write one page, record it, pause if the pacing schedule says so.
async fn store_page(
    ctx: &JobContext,
    handle: &JobHandle,
    page: SplitPage,
    total: usize,
) -> Result<(), PageError> {
    let name = naming::page_file_name(&ctx.base, page.ordinal);
    let path = ctx.out_dir.join(&name);

    write_page(&path, &page).await?;

    let file = PageFile {
        path: naming::retrieval_path(&ctx.folder, &name),
        name,
        page_number: page.ordinal,
    };
    let current = handle
        .append_file(file)
        .map_err(|e| PageError::WorkerFailed {
            page: page.ordinal,
            detail: e.to_string(),
        })?;
    debug!("Job {}: page {}/{} written", handle.id(), current, total);

    if ctx.config.should_pause_after(page.ordinal - 1, total) {
        tokio::time::sleep(ctx.config.pacing_delay()).await;
    }
    Ok(())
}

async fn write_page(path: &Path, page: &SplitPage) -> Result<(), PageError> {
    tokio::fs::write(path, &page.bytes)
        .await
        .map_err(|e| PageError::WriteFailed {
            page: page.ordinal,
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
}
