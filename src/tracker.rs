//! Process-wide progress store for split jobs.
//!
//! ## Single writer by ownership
//!
//! [`ProgressTracker::create`] returns the job's only [`JobHandle`]. The
//! handle is not `Clone`; whoever owns it (the orchestrator's background
//! task) is the only code able to append pages or finish the job. Pollers
//! get owned [`Job`] snapshots through [`ProgressTracker::get`] and never
//! see a half-applied update: the file list and the `current` counter change
//! inside one critical section.
//!
//! ## Bounded memory
//!
//! Terminal jobs are evicted `retention` after they finished, by
//! [`ProgressTracker::spawn_sweeper`], whether or not anybody polled them.
//! The store also has a hard capacity: when it is full, expired jobs are
//! swept, then the oldest terminal job goes; if every job is still
//! processing the new registration is refused with
//! [`SplitError::StoreFull`].

use crate::config::SplitConfig;
use crate::error::SplitError;
use crate::job::{Job, JobId, JobMeta, JobStatus, PageFile};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A tracked job plus bookkeeping the pollers never see.
#[derive(Debug)]
struct Entry {
    job: Job,
    created_at: Instant,
    finished_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant, retention: Duration) -> bool {
        self.finished_at
            .is_some_and(|t| now.saturating_duration_since(t) >= retention)
    }
}

/// Keyed store of job progress. Share it behind an `Arc`.
#[derive(Debug)]
pub struct ProgressTracker {
    jobs: RwLock<HashMap<JobId, Entry>>,
    capacity: usize,
    retention: Duration,
}

impl ProgressTracker {
    pub fn new(capacity: usize, retention: Duration) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            retention,
        }
    }

    pub fn from_config(config: &SplitConfig) -> Self {
        Self::new(config.max_jobs, config.retention())
    }

    /// Register a new job in `processing` state and return its write handle.
    ///
    /// # Errors
    /// - [`SplitError::DuplicateJob`] if `id` is already tracked
    /// - [`SplitError::StoreFull`] if the store is at capacity with no
    ///   terminal job left to evict
    pub fn create(
        self: &Arc<Self>,
        id: JobId,
        total: usize,
        meta: JobMeta,
    ) -> Result<JobHandle, SplitError> {
        let now = Instant::now();
        let mut jobs = self.write();

        if jobs.contains_key(&id) {
            return Err(SplitError::DuplicateJob { id: id.to_string() });
        }

        if jobs.len() >= self.capacity {
            let swept = sweep_locked(&mut jobs, now, self.retention);
            if swept > 0 {
                debug!("Swept {} expired jobs to make room", swept);
            }
        }

        if jobs.len() >= self.capacity {
            let oldest_terminal = jobs
                .iter()
                .filter_map(|(id, e)| e.finished_at.map(|t| (t, e.created_at, id)))
                .min()
                .map(|(_, _, id)| id.clone());

            match oldest_terminal {
                Some(victim) => {
                    info!("Job store full, evicting finished job {}", victim);
                    jobs.remove(&victim);
                }
                None => {
                    warn!(
                        "Job store full ({} jobs processing), refusing job {}",
                        self.capacity, id
                    );
                    return Err(SplitError::StoreFull {
                        capacity: self.capacity,
                    });
                }
            }
        }

        jobs.insert(
            id.clone(),
            Entry {
                job: Job::new(id.clone(), total, meta),
                created_at: now,
                finished_at: None,
            },
        );
        debug!("Tracking job {} ({} pages)", id, total);

        Ok(JobHandle {
            tracker: Arc::clone(self),
            id,
        })
    }

    /// Snapshot of a job, or `None` if it is unknown or evicted.
    pub fn get(&self, id: &JobId) -> Option<Job> {
        self.read().get(id).map(|e| e.job.clone())
    }

    /// Snapshot of the job that owns output folder `folder`, if tracked.
    pub fn find_by_folder(&self, folder: &str) -> Option<Job> {
        self.read()
            .values()
            .find(|e| e.job.folder_name == folder)
            .map(|e| e.job.clone())
    }

    /// Append one produced page and bump `current`, atomically.
    ///
    /// Returns the new `current`. The page's ordinal must be `current + 1`.
    pub(crate) fn append_file(&self, id: &JobId, file: PageFile) -> Result<usize, SplitError> {
        let mut jobs = self.write();
        let entry = jobs
            .get_mut(id)
            .ok_or_else(|| SplitError::JobNotFound { id: id.to_string() })?;
        let job = &mut entry.job;

        if job.status.is_terminal() {
            return Err(violation(id, format!("cannot append to a {} job", job.status)));
        }
        if job.current >= job.total {
            return Err(violation(
                id,
                format!("all {} pages already recorded", job.total),
            ));
        }
        if file.page_number != job.current + 1 {
            return Err(violation(
                id,
                format!(
                    "expected page {}, got page {}",
                    job.current + 1,
                    file.page_number
                ),
            ));
        }

        job.files.push(file);
        job.current += 1;
        Ok(job.current)
    }

    /// Move a job to a terminal status.
    ///
    /// `completed` requires every page recorded; `error` requires a detail.
    /// Terminal jobs never change again.
    pub(crate) fn set_status(
        &self,
        id: &JobId,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<(), SplitError> {
        let mut jobs = self.write();
        let entry = jobs
            .get_mut(id)
            .ok_or_else(|| SplitError::JobNotFound { id: id.to_string() })?;
        let job = &mut entry.job;

        if job.status.is_terminal() {
            return Err(violation(
                id,
                format!("already {}, cannot become {}", job.status, status),
            ));
        }

        match status {
            JobStatus::Processing => {
                return Err(violation(id, "processing is only the initial status".into()));
            }
            JobStatus::Completed if job.current != job.total => {
                return Err(violation(
                    id,
                    format!("cannot complete with {}/{} pages", job.current, job.total),
                ));
            }
            JobStatus::Error if error.as_deref().map_or(true, str::is_empty) => {
                return Err(violation(id, "error status requires a detail".into()));
            }
            _ => {}
        }

        job.status = status;
        job.error = error;
        entry.finished_at = Some(Instant::now());
        Ok(())
    }

    /// Drop a job from the store. Unknown ids are a no-op.
    ///
    /// Returns `true` if something was removed.
    pub fn evict(&self, id: &JobId) -> bool {
        self.write().remove(id).is_some()
    }

    /// Evict terminal jobs that finished at least `retention` before `now`.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        sweep_locked(&mut self.write(), now, self.retention)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `interval`.
    ///
    /// The task holds only a weak reference and exits once the tracker is
    /// dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(tracker) = weak.upgrade() else {
                    debug!("Tracker dropped, sweeper exiting");
                    break;
                };
                let evicted = tracker.sweep_expired(Instant::now());
                if evicted > 0 {
                    info!("Evicted {} finished jobs past retention", evicted);
                }
            }
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<JobId, Entry>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<JobId, Entry>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn sweep_locked(jobs: &mut HashMap<JobId, Entry>, now: Instant, retention: Duration) -> usize {
    let before = jobs.len();
    jobs.retain(|_, e| !e.expired(now, retention));
    before - jobs.len()
}

fn violation(id: &JobId, detail: String) -> SplitError {
    SplitError::InvariantViolation {
        id: id.to_string(),
        detail,
    }
}

/// Exclusive write access to one tracked job.
///
/// Finishing consumes the handle. A handle dropped while its job is still
/// `processing` (the owning task panicked or returned early) moves the job
/// to `error`, so pollers always reach a terminal status.
#[derive(Debug)]
pub struct JobHandle {
    tracker: Arc<ProgressTracker>,
    id: JobId,
}

impl JobHandle {
    pub fn id(&self) -> &JobId {
        &self.id
    }

    /// Record the next produced page. Returns the new `current`.
    pub fn append_file(&self, file: PageFile) -> Result<usize, SplitError> {
        self.tracker.append_file(&self.id, file)
    }

    /// `processing → completed`.
    pub fn complete(self) -> Result<(), SplitError> {
        self.tracker.set_status(&self.id, JobStatus::Completed, None)
    }

    /// `processing → error` with `detail`.
    pub fn fail(self, detail: impl Into<String>) -> Result<(), SplitError> {
        self.tracker
            .set_status(&self.id, JobStatus::Error, Some(detail.into()))
    }

    /// Current snapshot of the owned job.
    pub fn snapshot(&self) -> Option<Job> {
        self.tracker.get(&self.id)
    }
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        let still_processing = self
            .tracker
            .get(&self.id)
            .is_some_and(|job| job.status == JobStatus::Processing);
        if still_processing {
            warn!("Job {} abandoned while processing, marking as error", self.id);
            let _ = self.tracker.set_status(
                &self.id,
                JobStatus::Error,
                Some("split task ended unexpectedly".to_string()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(folder: &str) -> JobMeta {
        JobMeta {
            folder_name: folder.to_string(),
            original_filename: "doc".to_string(),
        }
    }

    fn page(n: usize) -> PageFile {
        PageFile {
            name: format!("doc_page{n}.pdf"),
            path: format!("/download/doc_1/doc_page{n}.pdf"),
            page_number: n,
        }
    }

    fn tracker(capacity: usize, retention: Duration) -> Arc<ProgressTracker> {
        Arc::new(ProgressTracker::new(capacity, retention))
    }

    #[test]
    fn create_append_complete() {
        let t = tracker(10, Duration::from_secs(60));
        let h = t.create("1".into(), 2, meta("doc_1")).unwrap();

        let job = t.get(&"1".into()).unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!((job.current, job.total), (0, 2));

        assert_eq!(h.append_file(page(1)).unwrap(), 1);
        assert_eq!(h.append_file(page(2)).unwrap(), 2);
        h.complete().unwrap();

        let job = t.get(&"1".into()).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.files.len(), job.current);
        assert_eq!(
            job.files.iter().map(|f| f.page_number).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let t = tracker(10, Duration::from_secs(60));
        let _h = t.create("1".into(), 1, meta("a_1")).unwrap();
        let err = t.create("1".into(), 1, meta("b_1")).unwrap_err();
        assert!(matches!(err, SplitError::DuplicateJob { .. }));
        assert_eq!(t.get(&"1".into()).unwrap().folder_name, "a_1");
    }

    #[test]
    fn unknown_id_is_none() {
        let t = tracker(10, Duration::from_secs(60));
        assert!(t.get(&"nope".into()).is_none());
        assert!(matches!(
            t.append_file(&"nope".into(), page(1)),
            Err(SplitError::JobNotFound { .. })
        ));
    }

    #[test]
    fn out_of_order_page_leaves_record_untouched() {
        let t = tracker(10, Duration::from_secs(60));
        let h = t.create("1".into(), 3, meta("doc_1")).unwrap();
        h.append_file(page(1)).unwrap();

        let err = h.append_file(page(3)).unwrap_err();
        assert!(matches!(err, SplitError::InvariantViolation { .. }));

        let job = h.snapshot().unwrap();
        assert_eq!(job.current, 1);
        assert_eq!(job.files.len(), 1);
    }

    #[test]
    fn cannot_exceed_total() {
        let t = tracker(10, Duration::from_secs(60));
        let h = t.create("1".into(), 1, meta("doc_1")).unwrap();
        h.append_file(page(1)).unwrap();
        assert!(h.append_file(page(2)).is_err());
        assert_eq!(h.snapshot().unwrap().current, 1);
    }

    #[test]
    fn cannot_complete_early() {
        let t = tracker(10, Duration::from_secs(60));
        let h = t.create("1".into(), 2, meta("doc_1")).unwrap();
        h.append_file(page(1)).unwrap();
        assert!(t.set_status(&"1".into(), JobStatus::Completed, None).is_err());
        assert_eq!(t.get(&"1".into()).unwrap().status, JobStatus::Processing);
        drop(h);
    }

    #[test]
    fn error_requires_detail_and_is_terminal() {
        let t = tracker(10, Duration::from_secs(60));
        let id: JobId = "1".into();
        let h = t.create(id.clone(), 2, meta("doc_1")).unwrap();

        assert!(t.set_status(&id, JobStatus::Error, None).is_err());
        assert!(t.set_status(&id, JobStatus::Error, Some(String::new())).is_err());

        h.fail("page 2 broke").unwrap();
        let job = t.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error.as_deref(), Some("page 2 broke"));

        assert!(t.set_status(&id, JobStatus::Completed, None).is_err());
        assert!(t.append_file(&id, page(1)).is_err());
        assert_eq!(t.get(&id).unwrap().status, JobStatus::Error);
    }

    #[test]
    fn zero_page_job_completes_immediately() {
        let t = tracker(10, Duration::from_secs(60));
        let h = t.create("1".into(), 0, meta("doc_1")).unwrap();
        h.complete().unwrap();
        let job = t.get(&"1".into()).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.files.is_empty());
    }

    #[test]
    fn dropped_handle_marks_job_as_error() {
        let t = tracker(10, Duration::from_secs(60));
        let h = t.create("1".into(), 2, meta("doc_1")).unwrap();
        h.append_file(page(1)).unwrap();
        drop(h);

        let job = t.get(&"1".into()).unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.current, 1);
        assert!(job.error.is_some());
    }

    #[test]
    fn evict_is_idempotent() {
        let t = tracker(10, Duration::from_secs(60));
        let h = t.create("1".into(), 0, meta("doc_1")).unwrap();
        h.complete().unwrap();
        assert!(t.evict(&"1".into()));
        assert!(!t.evict(&"1".into()));
        assert!(!t.evict(&"never".into()));
        assert!(t.is_empty());
    }

    #[test]
    fn sweep_evicts_only_expired_terminal_jobs() {
        let t = tracker(10, Duration::from_secs(60));
        let done = t.create("1".into(), 0, meta("a_1")).unwrap();
        done.complete().unwrap();
        let _running = t.create("2".into(), 5, meta("b_2")).unwrap();

        assert_eq!(t.sweep_expired(Instant::now()), 0);
        assert_eq!(t.len(), 2);

        let later = Instant::now() + Duration::from_secs(61);
        assert_eq!(t.sweep_expired(later), 1);
        assert!(t.get(&"1".into()).is_none());
        assert!(t.get(&"2".into()).is_some());
    }

    #[test]
    fn full_store_evicts_oldest_terminal_job() {
        let t = tracker(2, Duration::from_secs(3600));
        let a = t.create("1".into(), 0, meta("a_1")).unwrap();
        a.complete().unwrap();
        let b = t.create("2".into(), 0, meta("b_2")).unwrap();
        b.complete().unwrap();

        let _c = t.create("3".into(), 1, meta("c_3")).unwrap();
        assert_eq!(t.len(), 2);
        assert!(t.get(&"1".into()).is_none());
        assert!(t.get(&"2".into()).is_some());
    }

    #[test]
    fn full_store_of_running_jobs_refuses() {
        let t = tracker(1, Duration::from_secs(3600));
        let _a = t.create("1".into(), 3, meta("a_1")).unwrap();
        let err = t.create("2".into(), 3, meta("b_2")).unwrap_err();
        assert!(matches!(err, SplitError::StoreFull { capacity: 1 }));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn find_by_folder() {
        let t = tracker(10, Duration::from_secs(60));
        let _h = t.create("1".into(), 1, meta("doc_1")).unwrap();
        assert_eq!(t.find_by_folder("doc_1").unwrap().id, JobId::from("1"));
        assert!(t.find_by_folder("other_2").is_none());
    }

    #[tokio::test]
    async fn sweeper_task_evicts_after_retention() {
        let t = tracker(10, Duration::from_millis(50));
        let h = t.create("1".into(), 0, meta("doc_1")).unwrap();
        h.complete().unwrap();

        let sweeper = t.spawn_sweeper(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(t.get(&"1".into()).is_none());
        sweeper.abort();
    }

    #[tokio::test]
    async fn sweeper_exits_when_tracker_dropped() {
        let t = tracker(10, Duration::from_secs(60));
        let sweeper = t.spawn_sweeper(Duration::from_millis(5));
        drop(t);
        tokio::time::timeout(Duration::from_secs(2), sweeper)
            .await
            .expect("sweeper should stop")
            .unwrap();
    }
}
