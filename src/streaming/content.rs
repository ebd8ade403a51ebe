//! Content access: resolving `(file_ref, file_index)` to bytes on disk.
//!
//! The delivery pipeline never touches the download layer directly; it asks a
//! [`ContentProvider`] for a path plus completeness, and for a live byte
//! stream when the file is still being written.

use async_trait::async_trait;
use bytes::Bytes;
use castforge_common::paths::{content_type_for_path, is_partial_file, is_video_file};
use castforge_common::{Error, Result};
use futures::Stream;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// A sequential stream of source bytes.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// A resolved source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentFile {
    pub path: PathBuf,
    /// Bytes currently on disk.
    pub size: u64,
    pub mime: &'static str,
    /// False while the file is still being downloaded.
    pub complete: bool,
}

/// Resolves file references to media on disk.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Resolve the `file_index`-th media file of `file_ref`.
    async fn resolve(&self, file_ref: &str, file_index: usize) -> Result<ContentFile>;

    /// Open a sequential stream over a file that may still be growing.
    async fn open_live(&self, file: &ContentFile) -> Result<ByteStream>;
}

/// Chunk size used when tailing a growing file.
const TAIL_CHUNK: usize = 64 * 1024;

/// Serves files from a directory tree.
///
/// `file_ref` names a file or directory relative to the root; `file_index`
/// selects among the media files below it, sorted by path. Files ending in
/// `.part` are reported as incomplete.
#[derive(Debug, Clone)]
pub struct LocalLibrary {
    root: PathBuf,
    poll_interval: Duration,
}

impl LocalLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            poll_interval: Duration::from_millis(500),
        }
    }

    /// How often a growing file is re-read after hitting its current end.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Reject references that could escape the library root.
fn validate_file_ref(file_ref: &str) -> Result<&Path> {
    let path = Path::new(file_ref);
    if file_ref.is_empty() || !path.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(Error::Validation(format!("invalid file reference: {file_ref}")));
    }
    Ok(path)
}

fn media_files(target: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(target)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && is_video_file(entry.path()))
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

#[async_trait]
impl ContentProvider for LocalLibrary {
    async fn resolve(&self, file_ref: &str, file_index: usize) -> Result<ContentFile> {
        let target = self.root.join(validate_file_ref(file_ref)?);

        let files = tokio::task::spawn_blocking(move || media_files(&target))
            .await
            .map_err(|e| Error::Internal(format!("library scan panicked: {e}")))?;

        let path = files
            .into_iter()
            .nth(file_index)
            .ok_or_else(|| Error::not_found("file", format!("{file_ref}/{file_index}")))?;

        let metadata = tokio::fs::metadata(&path).await?;

        Ok(ContentFile {
            size: metadata.len(),
            mime: content_type_for_path(&path),
            complete: !is_partial_file(&path),
            path,
        })
    }

    async fn open_live(&self, file: &ContentFile) -> Result<ByteStream> {
        let handle = tokio::fs::File::open(&file.path).await?;
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(tail_file(
            handle,
            file.path.clone(),
            self.poll_interval,
            tx,
        ));
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Read `file` to its end, then keep polling for appended bytes while the
/// download is still in progress.
///
/// Ends when the reader goes away, on a read error, or once the `.part` file
/// has been renamed away (download finished) and everything has been read.
async fn tail_file(
    mut file: tokio::fs::File,
    path: PathBuf,
    poll_interval: Duration,
    tx: mpsc::Sender<std::io::Result<Bytes>>,
) {
    let mut buf = vec![0u8; TAIL_CHUNK];
    loop {
        match file.read(&mut buf).await {
            Ok(0) => {
                let still_downloading = match tokio::fs::metadata(&path).await {
                    Ok(_) => is_partial_file(&path),
                    Err(e) if e.kind() == ErrorKind::NotFound => false,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                };
                if !still_downloading {
                    // Drain anything appended between the last read and the rename.
                    match file.read(&mut buf).await {
                        Ok(0) => return,
                        Ok(n) => {
                            if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
                                return;
                            }
                            continue;
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
                tokio::select! {
                    _ = tx.closed() => return,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
            Ok(n) => {
                if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn library() -> (tempfile::TempDir, LocalLibrary) {
        let dir = tempfile::tempdir().unwrap();
        let show = dir.path().join("show");
        std::fs::create_dir_all(show.join("extras")).unwrap();
        std::fs::write(show.join("b.mkv"), b"bbbb").unwrap();
        std::fs::write(show.join("a.mp4"), b"aa").unwrap();
        std::fs::write(show.join("notes.txt"), b"skip").unwrap();
        std::fs::write(show.join("extras").join("c.avi.part"), b"ccc").unwrap();
        std::fs::write(dir.path().join("movie.webm"), b"movie").unwrap();
        let lib = LocalLibrary::new(dir.path()).with_poll_interval(Duration::from_millis(20));
        (dir, lib)
    }

    #[tokio::test]
    async fn test_resolve_directory_by_index() {
        let (_dir, lib) = library();

        let first = lib.resolve("show", 0).await.unwrap();
        assert!(first.path.ends_with("show/a.mp4"));
        assert_eq!(first.size, 2);
        assert_eq!(first.mime, "video/mp4");
        assert!(first.complete);

        let second = lib.resolve("show", 1).await.unwrap();
        assert!(second.path.ends_with("show/b.mkv"));

        let partial = lib.resolve("show", 2).await.unwrap();
        assert!(partial.path.ends_with("extras/c.avi.part"));
        assert!(!partial.complete);
        assert_eq!(partial.mime, "video/x-msvideo");
    }

    #[tokio::test]
    async fn test_resolve_single_file() {
        let (_dir, lib) = library();
        let file = lib.resolve("movie.webm", 0).await.unwrap();
        assert_eq!(file.mime, "video/webm");

        let err = lib.resolve("movie.webm", 1).await.unwrap_err();
        assert_eq!(err.http_status(), 404);
    }

    #[tokio::test]
    async fn test_resolve_rejects_escapes() {
        let (_dir, lib) = library();
        for bad in ["../etc", "/etc/passwd", "", "show/../../x"] {
            let err = lib.resolve(bad, 0).await.unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "accepted {bad:?}");
        }
    }

    #[tokio::test]
    async fn test_resolve_missing() {
        let (_dir, lib) = library();
        let err = lib.resolve("nothing-here", 0).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_open_live_follows_growing_file() {
        let (dir, lib) = library();
        let part = dir.path().join("show").join("extras").join("c.avi.part");
        let file = lib.resolve("show", 2).await.unwrap();
        let mut stream = lib.open_live(&file).await.unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"ccc"));

        // Download appends, then finishes by renaming the .part away.
        {
            use std::io::Write;
            let mut f = std::fs::OpenOptions::new().append(true).open(&part).unwrap();
            f.write_all(b"dd").unwrap();
        }
        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"dd"));

        std::fs::rename(&part, part.with_extension("")).unwrap();
        let rest = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap();
        assert!(rest.is_none());
    }
}
