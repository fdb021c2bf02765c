//! Bulk download: bundle one output folder into a transient ZIP container.
//!
//! ## Why a file on disk and not an in-memory buffer?
//!
//! A job folder can hold hundreds of pages. Entries are copied straight from
//! their files into a `ZipWriter` over a buffered file, so peak memory stays
//! at one copy buffer regardless of folder size. The container lives next to
//! the folder (`<download_dir>/<folder>-<uuid>.zip`, one per request) only
//! for as long as the transfer: [`ArchiveFile`] removes it on drop, and
//! [`ArchiveStream`] keeps the `ArchiveFile` alive until the client has the
//! last byte or went away. Clients are offered `<folder>.zip`.

use crate::error::SplitError;
use crate::naming;
use futures::Stream;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// A finished ZIP container on disk. Deleted when dropped.
#[derive(Debug)]
pub struct ArchiveFile {
    path: PathBuf,
    name: String,
    entries: usize,
    size: u64,
}

impl ArchiveFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name offered to the client, `<folder>.zip`.
    pub fn file_name(&self) -> &str {
        &self.name
    }

    /// Number of files in the container.
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Container size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Open the container as a byte stream that owns it.
    pub async fn into_stream(self) -> Result<ArchiveStream, SplitError> {
        let file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|source| SplitError::Io {
                path: self.path.clone(),
                source,
            })?;
        Ok(ArchiveStream {
            inner: ReaderStream::new(file),
            archive: self,
        })
    }
}

impl Drop for ArchiveFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed archive {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove archive {}: {}", self.path.display(), e),
        }
    }
}

/// Byte stream over an [`ArchiveFile`]; the container is removed once the
/// stream is dropped.
pub struct ArchiveStream {
    inner: ReaderStream<tokio::fs::File>,
    archive: ArchiveFile,
}

impl fmt::Debug for ArchiveStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveStream")
            .field("archive", &self.archive)
            .finish_non_exhaustive()
    }
}

impl Stream for ArchiveStream {
    type Item = <ReaderStream<tokio::fs::File> as Stream>::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}

/// Build a fresh container in `download_dir` from every regular file in
/// `<download_dir>/<folder>`, in name order.
///
/// Concurrent calls for the same folder get separate containers.
///
/// # Errors
/// - [`SplitError::FolderNotFound`] if the folder does not exist
/// - [`SplitError::ArchiveFailed`] if a file cannot be read or the container
///   cannot be written; the partial container is removed
pub async fn assemble(
    download_dir: &Path,
    folder: &str,
    compression_level: u8,
) -> Result<ArchiveFile, SplitError> {
    let source_dir = download_dir.join(folder);
    let target = download_dir.join(naming::archive_container_name(folder));
    let folder = folder.to_string();

    tokio::task::spawn_blocking(move || {
        assemble_blocking(&source_dir, &target, &folder, compression_level)
    })
    .await
    .map_err(|e| SplitError::Internal(format!("Archive task panicked: {}", e)))?
}

/// Blocking implementation of [`assemble`].
fn assemble_blocking(
    source_dir: &Path,
    target: &Path,
    folder: &str,
    compression_level: u8,
) -> Result<ArchiveFile, SplitError> {
    if !source_dir.is_dir() {
        return Err(SplitError::FolderNotFound {
            folder: folder.to_string(),
        });
    }

    let failed = |detail: String| SplitError::ArchiveFailed {
        folder: folder.to_string(),
        detail,
    };

    let files = list_files(source_dir).map_err(|e| failed(e.to_string()))?;

    let file = File::create(target)
        .map_err(|e| failed(format!("create {}: {}", target.display(), e)))?;
    // From here on the guard owns the container, so every early return
    // below removes the partial file.
    let mut archive = ArchiveFile {
        path: target.to_path_buf(),
        name: naming::archive_file_name(folder),
        entries: 0,
        size: 0,
    };

    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(i64::from(compression_level)));
    let mut zip = ZipWriter::new(BufWriter::new(file));

    for (name, path) in &files {
        let mut src =
            File::open(path).map_err(|e| failed(format!("open {}: {}", path.display(), e)))?;
        zip.start_file(name.as_str(), options)
            .map_err(|e| failed(format!("add {}: {}", name, e)))?;
        std::io::copy(&mut src, &mut zip)
            .map_err(|e| failed(format!("copy {}: {}", name, e)))?;
        archive.entries += 1;
    }

    let mut writer = zip.finish().map_err(|e| failed(e.to_string()))?;
    writer.flush().map_err(|e| failed(e.to_string()))?;
    drop(writer);

    archive.size = std::fs::metadata(target)
        .map(|m| m.len())
        .map_err(|e| failed(e.to_string()))?;

    info!(
        "Built archive {} ({} files, {} bytes)",
        target.display(),
        archive.entries,
        archive.size
    );
    Ok(archive)
}

/// Regular files directly inside `dir`, sorted by name.
fn list_files(dir: &Path) -> std::io::Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        files.push((name, entry.path()));
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::io::Read;

    fn folder_with(files: &[(&str, &[u8])]) -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("doc_1");
        std::fs::create_dir(&dir).unwrap();
        for (name, bytes) in files {
            std::fs::write(dir.join(name), bytes).unwrap();
        }
        tmp
    }

    fn read_zip(path: &Path) -> Vec<(String, Vec<u8>)> {
        let mut zip = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        (0..zip.len())
            .map(|i| {
                let mut entry = zip.by_index(i).unwrap();
                let mut buf = Vec::new();
                entry.read_to_end(&mut buf).unwrap();
                (entry.name().to_string(), buf)
            })
            .collect()
    }

    #[tokio::test]
    async fn archive_contains_every_file_byte_for_byte() {
        let tmp = folder_with(&[
            ("c_page3.pdf", b"third"),
            ("a_page1.pdf", b"first"),
            ("b_page2.pdf", b"second"),
        ]);
        let archive = assemble(tmp.path(), "doc_1", 9).await.unwrap();

        assert_eq!(archive.entries(), 3);
        assert_eq!(archive.file_name(), "doc_1.zip");
        assert_eq!(
            read_zip(archive.path()),
            vec![
                ("a_page1.pdf".to_string(), b"first".to_vec()),
                ("b_page2.pdf".to_string(), b"second".to_vec()),
                ("c_page3.pdf".to_string(), b"third".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn dropping_archive_removes_container() {
        let tmp = folder_with(&[("a.pdf", b"x")]);
        let archive = assemble(tmp.path(), "doc_1", 9).await.unwrap();
        let path = archive.path().to_path_buf();
        assert!(path.exists());
        drop(archive);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn stream_yields_container_then_removes_it() {
        let tmp = folder_with(&[("a.pdf", b"alpha"), ("b.pdf", b"beta")]);
        let archive = assemble(tmp.path(), "doc_1", 6).await.unwrap();
        let path = archive.path().to_path_buf();
        let expected = std::fs::read(&path).unwrap();

        let mut stream = archive.into_stream().await.unwrap();
        let mut received = Vec::new();
        while let Some(chunk) = stream.next().await {
            received.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(received, expected);
        drop(stream);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn abandoned_stream_still_removes_container() {
        let tmp = folder_with(&[("a.pdf", b"alpha")]);
        let archive = assemble(tmp.path(), "doc_1", 9).await.unwrap();
        let path = archive.path().to_path_buf();
        let stream = archive.into_stream().await.unwrap();
        drop(stream);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn missing_folder_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let err = assemble(tmp.path(), "nope_1", 9).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn empty_folder_gives_empty_archive() {
        let tmp = folder_with(&[]);
        let archive = assemble(tmp.path(), "doc_1", 9).await.unwrap();
        assert_eq!(archive.entries(), 0);
        assert!(read_zip(archive.path()).is_empty());
    }

    #[tokio::test]
    async fn subdirectories_are_skipped() {
        let tmp = folder_with(&[("a.pdf", b"alpha")]);
        std::fs::create_dir(tmp.path().join("doc_1").join("nested")).unwrap();
        let archive = assemble(tmp.path(), "doc_1", 9).await.unwrap();
        assert_eq!(archive.entries(), 1);
    }

    #[tokio::test]
    async fn dangling_symlink_is_skipped() {
        let tmp = folder_with(&[("a.pdf", b"alpha")]);
        let dir = tmp.path().join("doc_1");
        #[cfg(unix)]
        std::os::unix::fs::symlink(dir.join("missing"), dir.join("z.pdf")).unwrap();
        let archive = assemble(tmp.path(), "doc_1", 9).await.unwrap();
        assert_eq!(archive.entries(), 1);
    }

    #[test]
    fn unwritable_container_is_archive_failed() {
        let tmp = folder_with(&[("a.pdf", b"alpha")]);
        // A directory squatting on the container path makes the create fail.
        let target = tmp.path().join("doc_1-taken.zip");
        std::fs::create_dir(&target).unwrap();

        let err =
            assemble_blocking(&tmp.path().join("doc_1"), &target, "doc_1", 9).unwrap_err();
        assert!(matches!(err, SplitError::ArchiveFailed { .. }));
        assert!(!err.is_not_found());
        assert!(target.is_dir());
    }

    #[tokio::test]
    async fn overlapping_downloads_get_separate_containers() {
        let tmp = folder_with(&[("a.pdf", b"alpha"), ("b.pdf", b"beta")]);
        let first = assemble(tmp.path(), "doc_1", 9).await.unwrap();
        let second = assemble(tmp.path(), "doc_1", 9).await.unwrap();
        assert_ne!(first.path(), second.path());
        assert_eq!(first.file_name(), second.file_name());

        let first_path = first.path().to_path_buf();
        drop(first);
        assert!(!first_path.exists());

        let second_path = second.path().to_path_buf();
        let expected = std::fs::read(&second_path).unwrap();
        let mut stream = second.into_stream().await.unwrap();
        let mut received = Vec::new();
        while let Some(chunk) = stream.next().await {
            received.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(received, expected);
        assert_eq!(read_zip(&second_path).len(), 2);
        drop(stream);
        assert!(!second_path.exists());
    }

    #[tokio::test]
    async fn stream_debug_names_the_archive() {
        let tmp = folder_with(&[("a.pdf", b"alpha")]);
        let stream = assemble(tmp.path(), "doc_1", 9)
            .await
            .unwrap()
            .into_stream()
            .await
            .unwrap();
        let shown = format!("{stream:?}");
        assert!(shown.contains("ArchiveStream"));
        assert!(shown.contains("doc_1.zip"));
    }
}
