//! src/services/blob_store.rs
//!
//! Blob storage behind a small trait so the catalog does not care where bytes
//! live. `LocalBlobStore` keeps each blob as a plain file at
//! `base_path/<location>`, where a location is `YYYY/MM/DD/<id>`.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const MAX_LOCATION_LEN: usize = 1024;

/// Content handed to [`BlobStore::create`]. May borrow from the request it
/// is read from.
pub type ContentStream<'a> = BoxStream<'a, io::Result<Bytes>>;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob `{0}` not found")]
    NotFound(String),
    #[error("invalid blob location `{0}`")]
    InvalidLocation(String),
    #[error("failed to write blob `{location}`: {source}")]
    Write {
        location: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to read blob `{location}`: {source}")]
    Read {
        location: String,
        #[source]
        source: io::Error,
    },
}

impl BlobError {
    fn write(location: &str, source: io::Error) -> Self {
        BlobError::Write {
            location: location.to_string(),
            source,
        }
    }

    fn read(location: &str, source: io::Error) -> Self {
        BlobError::Read {
            location: location.to_string(),
            source,
        }
    }
}

pub type BlobResult<T> = Result<T, BlobError>;

/// Durable byte storage addressed by location strings.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write the whole stream to `location` and return the number of bytes
    /// written. Either all of the content becomes visible or none of it does.
    async fn create<'a>(&self, location: &str, content: ContentStream<'a>) -> BlobResult<u64>;

    async fn read(&self, location: &str) -> BlobResult<Bytes>;

    /// Remove `location`. Removing a missing blob succeeds.
    async fn delete(&self, location: &str) -> BlobResult<()>;
}

/// Reject locations that could escape the storage root.
pub fn ensure_location_safe(location: &str) -> BlobResult<()> {
    let invalid = location.is_empty()
        || location.len() > MAX_LOCATION_LEN
        || location.starts_with('/')
        || location.contains("..")
        || location
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\');
    if invalid {
        return Err(BlobError::InvalidLocation(location.to_string()));
    }
    Ok(())
}

/// Blob store on the local filesystem.
#[derive(Clone, Debug)]
pub struct LocalBlobStore {
    base_path: PathBuf,
}

impl LocalBlobStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn blob_path(&self, location: &str) -> BlobResult<PathBuf> {
        ensure_location_safe(location)?;
        Ok(self.base_path.join(location))
    }

    /// Create a temp file in `parent`, creating the directory if needed.
    ///
    /// A concurrent delete may prune `parent` between `create_dir_all` and
    /// `File::create`; that case is retried once.
    async fn open_temp(&self, parent: &Path, location: &str) -> BlobResult<(PathBuf, File)> {
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut retried = false;
        loop {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| BlobError::write(location, err))?;
            match File::create(&tmp_path).await {
                Ok(file) => return Ok((tmp_path, file)),
                Err(err) if err.kind() == ErrorKind::NotFound && !retried => {
                    debug!(location, "blob directory pruned while opening, retrying");
                    retried = true;
                }
                Err(err) => return Err(BlobError::write(location, err)),
            }
        }
    }

    /// Remove empty directories from `start` up to, but not including, `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    /// Streams into a temp file next to the target, fsyncs, then renames into
    /// place. The temp file is removed on every failure path.
    async fn create<'a>(&self, location: &str, mut content: ContentStream<'a>) -> BlobResult<u64> {
        let file_path = self.blob_path(location)?;
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| BlobError::InvalidLocation(location.to_string()))?;
        let (tmp_path, mut file) = self.open_temp(&parent, location).await?;

        let mut written: u64 = 0;
        let outcome: io::Result<()> = async {
            while let Some(chunk) = content.next().await {
                let chunk = chunk?;
                written += chunk.len() as u64;
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;
        drop(file);

        if let Err(err) = outcome {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BlobError::write(location, err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BlobError::write(location, err));
        }

        debug!(location, size = written, "stored blob");
        Ok(written)
    }

    async fn read(&self, location: &str) -> BlobResult<Bytes> {
        let path = self.blob_path(location)?;
        match fs::read(&path).await {
            Ok(data) => {
                debug!(location, size = data.len(), "read blob");
                Ok(Bytes::from(data))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(BlobError::NotFound(location.to_string()))
            }
            Err(err) => Err(BlobError::read(location, err)),
        }
    }

    async fn delete(&self, location: &str) -> BlobResult<()> {
        let path = self.blob_path(location)?;
        match fs::remove_file(&path).await {
            Ok(_) => debug!("removed blob {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("blob {} already missing", path.display());
            }
            Err(err) => return Err(BlobError::write(location, err)),
        }

        if let Some(parent) = path.parent() {
            self.prune_empty_dirs(parent, &self.base_path).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tempfile::TempDir;

    fn chunks(parts: &[&'static [u8]]) -> ContentStream<'static> {
        let items: Vec<io::Result<Bytes>> =
            parts.iter().map(|p| Ok(Bytes::from_static(p))).collect();
        stream::iter(items).boxed()
    }

    #[tokio::test]
    async fn test_create_and_read() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path());

        let written = store
            .create("2024/01/02/abc", chunks(&[b"hello ", b"world"]))
            .await
            .unwrap();
        assert_eq!(written, 11);
        assert_eq!(&store.read("2024/01/02/abc").await.unwrap()[..], b"hello world");
    }

    #[tokio::test]
    async fn test_failed_stream_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path());

        let items: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(ErrorKind::BrokenPipe, "client went away")),
        ];
        let err = store
            .create("2024/01/02/broken", stream::iter(items).boxed())
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::Write { .. }));

        assert!(matches!(
            store.read("2024/01/02/broken").await,
            Err(BlobError::NotFound(_))
        ));
        let mut leftovers = fs::read_dir(dir.path().join("2024/01/02")).await.unwrap();
        assert!(leftovers.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent_and_prunes() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path());

        store
            .create("2024/01/02/gone", chunks(&[b"x"]))
            .await
            .unwrap();
        store.delete("2024/01/02/gone").await.unwrap();
        store.delete("2024/01/02/gone").await.unwrap();

        assert!(!dir.path().join("2024").exists());
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn test_rejects_unsafe_locations() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path());

        for location in ["", "/etc/passwd", "2024/../../x", "a\\b", "a\0b"] {
            assert!(matches!(
                store.read(location).await,
                Err(BlobError::InvalidLocation(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_create_survives_concurrent_prune() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path());

        for round in 0..100 {
            let doomed = format!("2024/01/02/doomed-{round}");
            store.create(&doomed, chunks(&[b"x"])).await.unwrap();

            let writer = store.clone();
            let deleter = store.clone();
            let kept = format!("2024/01/02/kept-{round}");
            let (created, deleted) = tokio::join!(
                tokio::spawn(async move { writer.create(&kept, chunks(&[b"y"])).await }),
                tokio::spawn(async move { deleter.delete(&doomed).await }),
            );
            created.unwrap().unwrap();
            deleted.unwrap().unwrap();

            let kept = format!("2024/01/02/kept-{round}");
            assert_eq!(&store.read(&kept).await.unwrap()[..], b"y");
            store.delete(&kept).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_open_temp_recreates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path());
        let parent = dir.path().join("2024/01/03");

        let (tmp_path, file) = store.open_temp(&parent, "2024/01/03/x").await.unwrap();
        drop(file);
        assert!(tmp_path.starts_with(&parent));
        assert!(tmp_path.exists());
    }
}
