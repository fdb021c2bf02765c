//! Configuration for the split service.
//!
//! All service behaviour is controlled through [`SplitConfig`], built via its
//! [`SplitConfigBuilder`]. One struct holds every knob so it can be shared
//! across tasks behind an `Arc`, logged at startup, and overridden piecemeal
//! in tests (zero delays, tiny capacities).

use crate::error::SplitError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the split service.
///
/// Built via [`SplitConfig::builder()`] or using [`SplitConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_pdfsplit::SplitConfig;
///
/// let config = SplitConfig::builder()
///     .download_dir("/var/lib/pdfsplit/download")
///     .max_concurrent_jobs(2)
///     .pacing_delay_ms(0)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_concurrent_jobs, 2);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Staging area for accepted uploads. Default: `upload`.
    pub upload_dir: PathBuf,

    /// Output area; one sub-folder per job. Default: `download`.
    pub download_dir: PathBuf,

    /// Address the HTTP API binds to. Default: `127.0.0.1:3000`.
    pub bind_address: SocketAddr,

    /// Delay between registering a job and starting to split it. Default: 100.
    ///
    /// Registration returns before any page is produced; the delay keeps the
    /// first poll from racing the first page.
    pub start_delay_ms: u64,

    /// Pause after every `pacing_batch` pages (and after the last). Default: 5.
    pub pacing_batch: usize,

    /// Length of each pacing pause in milliseconds; 0 disables it. Default: 100.
    ///
    /// Long documents otherwise hold a worker and the disk for their whole
    /// duration; short yields let other jobs' pages interleave.
    pub pacing_delay_ms: u64,

    /// Maximum number of jobs splitting at the same time. Default: 4.
    ///
    /// Jobs beyond this wait (status `processing`, `current == 0`) for a
    /// free worker.
    pub max_concurrent_jobs: usize,

    /// Maximum number of jobs held by the progress tracker. Default: 1024.
    pub max_jobs: usize,

    /// How long a terminal job stays pollable, in seconds. Default: 3600.
    pub retention_secs: u64,

    /// Interval of the background eviction sweep, in seconds. Default: 60.
    pub sweep_interval_secs: u64,

    /// Largest accepted upload body in bytes. Default: 100 MiB.
    pub max_upload_bytes: usize,

    /// Deflate level for bulk-download archives (0-9). Default: 9.
    pub compression_level: u8,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("upload"),
            download_dir: PathBuf::from("download"),
            bind_address: SocketAddr::from(([127, 0, 0, 1], 3000)),
            start_delay_ms: 100,
            pacing_batch: 5,
            pacing_delay_ms: 100,
            max_concurrent_jobs: 4,
            max_jobs: 1024,
            retention_secs: 3600,
            sweep_interval_secs: 60,
            max_upload_bytes: 100 * 1024 * 1024,
            compression_level: 9,
        }
    }
}

impl SplitConfig {
    /// Create a new builder for `SplitConfig`.
    pub fn builder() -> SplitConfigBuilder {
        SplitConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }

    pub fn pacing_delay(&self) -> Duration {
        Duration::from_millis(self.pacing_delay_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Check the constraints [`SplitConfigBuilder::build`] enforces.
    ///
    /// Needed for configs assembled by hand or deserialised, which bypass
    /// the builder.
    pub fn validate(&self) -> Result<(), SplitError> {
        if self.pacing_batch == 0 {
            return Err(SplitError::InvalidConfig(
                "pacing_batch must be ≥ 1".into(),
            ));
        }
        if self.max_concurrent_jobs == 0 {
            return Err(SplitError::InvalidConfig(
                "max_concurrent_jobs must be ≥ 1".into(),
            ));
        }
        if self.max_jobs == 0 {
            return Err(SplitError::InvalidConfig("max_jobs must be ≥ 1".into()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(SplitError::InvalidConfig(
                "sweep_interval_secs must be ≥ 1".into(),
            ));
        }
        if self.compression_level > 9 {
            return Err(SplitError::InvalidConfig(format!(
                "compression_level must be 0-9, got {}",
                self.compression_level
            )));
        }
        if self.upload_dir == self.download_dir {
            return Err(SplitError::InvalidConfig(
                "upload_dir and download_dir must differ".into(),
            ));
        }
        Ok(())
    }

    /// `true` when the job should pause after finishing the page at
    /// 0-based `index` out of `total`.
    pub fn should_pause_after(&self, index: usize, total: usize) -> bool {
        if self.pacing_delay_ms == 0 {
            return false;
        }
        index % self.pacing_batch == self.pacing_batch - 1 || index + 1 == total
    }
}

/// Builder for [`SplitConfig`].
#[derive(Debug)]
pub struct SplitConfigBuilder {
    config: SplitConfig,
}

impl SplitConfigBuilder {
    pub fn upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.upload_dir = dir.into();
        self
    }

    pub fn download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.download_dir = dir.into();
        self
    }

    pub fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.config.bind_address = addr;
        self
    }

    pub fn start_delay_ms(mut self, ms: u64) -> Self {
        self.config.start_delay_ms = ms;
        self
    }

    pub fn pacing_batch(mut self, n: usize) -> Self {
        self.config.pacing_batch = n;
        self
    }

    pub fn pacing_delay_ms(mut self, ms: u64) -> Self {
        self.config.pacing_delay_ms = ms;
        self
    }

    pub fn max_concurrent_jobs(mut self, n: usize) -> Self {
        self.config.max_concurrent_jobs = n;
        self
    }

    pub fn max_jobs(mut self, n: usize) -> Self {
        self.config.max_jobs = n;
        self
    }

    pub fn retention_secs(mut self, secs: u64) -> Self {
        self.config.retention_secs = secs;
        self
    }

    pub fn sweep_interval_secs(mut self, secs: u64) -> Self {
        self.config.sweep_interval_secs = secs;
        self
    }

    pub fn max_upload_bytes(mut self, bytes: usize) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn compression_level(mut self, level: u8) -> Self {
        self.config.compression_level = level;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<SplitConfig, SplitError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
