//! Upload intake: vet a client-supplied blob and stage it on disk.
//!
//! ## Why check the magic bytes?
//!
//! The extension is whatever the client says it is. Checking for `%PDF`
//! before handing the bytes to lopdf turns "someone renamed a JPEG" into a
//! clear `NotAPdf` error instead of a parser message about a missing xref.
//! Staged files get a generated name (`<millis>-<uuid>.pdf`), so nothing the
//! client sends ends up in a filesystem path here.

use crate::error::SplitError;
use crate::naming;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Leading bytes of every PDF file.
pub const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// Check the client-supplied name and the leading bytes of an upload.
pub fn validate_upload(filename: &str, bytes: &[u8]) -> Result<(), SplitError> {
    if !naming::has_pdf_extension(filename) {
        return Err(SplitError::InvalidFileType {
            filename: filename.to_string(),
        });
    }
    if !bytes.starts_with(PDF_MAGIC) {
        return Err(SplitError::NotAPdf {
            filename: filename.to_string(),
            magic: bytes.iter().take(PDF_MAGIC.len()).copied().collect(),
        });
    }
    Ok(())
}

/// File name under which an upload is staged.
pub fn staged_file_name(millis: u64) -> String {
    format!("{}-{}.{}", millis, uuid::Uuid::new_v4(), naming::PAGE_EXTENSION)
}

/// Write an accepted upload into `upload_dir`; returns the staged path.
pub async fn stage_upload(
    upload_dir: &Path,
    millis: u64,
    bytes: &[u8],
) -> Result<PathBuf, SplitError> {
    tokio::fs::create_dir_all(upload_dir)
        .await
        .map_err(|source| SplitError::Io {
            path: upload_dir.to_path_buf(),
            source,
        })?;

    let path = upload_dir.join(staged_file_name(millis));
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|source| SplitError::Io {
            path: path.clone(),
            source,
        })?;

    debug!("Staged upload ({} bytes) at {}", bytes.len(), path.display());
    Ok(path)
}
