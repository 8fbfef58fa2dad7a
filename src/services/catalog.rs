//! src/services/catalog.rs
//!
//! Catalog: owns file metadata in SQLite and coordinates it with the blob
//! store and the cipher engine.
//!
//! Creation is a two-phase write. A provisional row (empty `file_location`)
//! allocates the identity, the blob is written at a location derived from that
//! identity, and only then is the row finalized. Readers never see provisional
//! rows; anything a failed upload leaves behind is reclaimed by
//! [`Catalog::sweep_incomplete`].
//!
//! Concurrent updates to one record are last-write-wins.

use crate::{
    models::{
        audit::{AnnotatedRevision, AuditAction},
        file_object::{FileObject, NewFile, file_location},
    },
    services::{
        audit::{self, AuditError},
        audit_log::AuditLog,
        blob_store::{BlobError, BlobStore},
        cipher::{CipherEngine, CipherMaterial},
    },
};
use bytes::Bytes;
use chrono::{Duration, Utc};
use futures::{Stream, StreamExt, stream};
use sqlx::SqlitePool;
use std::{io, sync::Arc};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("file `{0}` not found")]
    NotFound(Uuid),
    #[error("storage write failed: {0}")]
    StorageWrite(#[source] BlobError),
    #[error("storage read failed: {0}")]
    StorageRead(#[source] BlobError),
    #[error("content is corrupt or does not match the stored key")]
    CorruptOrMismatchedKey,
    #[error("consistency error: {0}")]
    Consistency(String),
    #[error("declared size {declared} does not match the {actual} bytes received")]
    SizeMismatch { declared: i64, actual: u64 },
    #[error(transparent)]
    Audit(#[from] AuditError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

#[derive(Clone)]
pub struct Catalog {
    /// Shared SQLite pool holding `file_objects` and `audit_entries`.
    pub db: Arc<SqlitePool>,

    blobs: Arc<dyn BlobStore>,
    cipher: CipherEngine,
    audit: AuditLog,

    /// Location whose content is served as-is even when the record says it is
    /// encrypted. Used for seeded fixture files.
    fixture_location: Option<String>,
}

impl Catalog {
    pub fn new(db: Arc<SqlitePool>, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            audit: AuditLog::new(db.clone()),
            db,
            blobs,
            cipher: CipherEngine,
            fixture_location: None,
        }
    }

    pub fn with_fixture_location(mut self, location: Option<String>) -> Self {
        self.fixture_location = location;
        self
    }

    pub fn blobs(&self) -> &dyn BlobStore {
        self.blobs.as_ref()
    }

    /// Finalized files, newest first.
    pub async fn list(&self) -> CatalogResult<Vec<FileObject>> {
        let files = sqlx::query_as::<_, FileObject>(
            "SELECT id, name, description, file_name, file_location, size,
                    uploaded_time, encrypted, encryption_key, encryption_iv
             FROM file_objects
             WHERE file_location <> ''
             ORDER BY uploaded_time DESC",
        )
        .fetch_all(&*self.db)
        .await?;
        Ok(files)
    }

    /// Fetch a finalized file. Provisional rows count as missing.
    pub async fn get(&self, id: Uuid) -> CatalogResult<FileObject> {
        sqlx::query_as::<_, FileObject>(
            "SELECT id, name, description, file_name, file_location, size,
                    uploaded_time, encrypted, encryption_key, encryption_iv
             FROM file_objects
             WHERE id = ? AND file_location <> ''",
        )
        .bind(id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or(CatalogError::NotFound(id))
    }

    /// Store a new file.
    ///
    /// Steps run strictly in order: provisional insert, location, content
    /// write (encrypting first if asked), finalize. On failure the catalog
    /// removes what it already wrote before returning the error.
    pub async fn create<S>(
        &self,
        actor: &str,
        new_file: NewFile,
        content: S,
    ) -> CatalogResult<FileObject>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let provisional = self.insert_provisional(&new_file).await?;
        let id = provisional.id;
        let location = file_location(provisional.uploaded_time, id);
        debug!(%id, %location, encrypted = new_file.encrypted, "allocated file identity");

        let material = match self.write_content(&location, &new_file, content).await {
            Ok(material) => material,
            Err(err) => {
                self.discard_provisional(id).await;
                return Err(err);
            }
        };

        match self.finalize(actor, id, &location, material.as_ref()).await {
            Ok(file) => {
                info!(%id, %location, size = file.size, encrypted = file.encrypted, "stored file");
                Ok(file)
            }
            Err(err) => {
                self.discard_blob(&location).await;
                self.discard_provisional(id).await;
                Err(err)
            }
        }
    }

    /// Return the plaintext of `file`.
    pub async fn fetch_content(&self, file: &FileObject) -> CatalogResult<Bytes> {
        if !file.is_finalized() {
            return Err(CatalogError::Consistency(format!(
                "file `{}` has not been finalized",
                file.id
            )));
        }
        let raw = self
            .blobs
            .read(&file.file_location)
            .await
            .map_err(CatalogError::StorageRead)?;

        if !file.encrypted {
            return Ok(raw);
        }
        if self.fixture_location.as_deref() == Some(file.file_location.as_str()) {
            debug!(id = %file.id, location = %file.file_location, "serving fixture content without decryption");
            return Ok(raw);
        }

        let (Some(key), Some(iv)) = (&file.encryption_key, &file.encryption_iv) else {
            return Err(CatalogError::Consistency(format!(
                "file `{}` is marked encrypted but has no cipher material",
                file.id
            )));
        };
        let material = CipherMaterial::decode(key, iv).map_err(|err| {
            warn!(id = %file.id, "stored cipher material unreadable: {}", err);
            CatalogError::CorruptOrMismatchedKey
        })?;

        let plaintext = self
            .cipher
            .decrypt(&raw, &material)
            .map_err(|_| CatalogError::CorruptOrMismatchedKey)?;
        Ok(Bytes::from(plaintext))
    }

    /// Plaintext plus the name the file was uploaded under.
    pub async fn download(&self, id: Uuid) -> CatalogResult<(Bytes, String)> {
        let file = self.get(id).await?;
        let content = self.fetch_content(&file).await?;
        Ok((content, file.file_name))
    }

    /// Change the mutable fields of a file.
    pub async fn update(
        &self,
        actor: &str,
        id: Uuid,
        name: String,
        description: String,
    ) -> CatalogResult<FileObject> {
        let mut tx = self.db.begin().await?;
        let file = sqlx::query_as::<_, FileObject>(
            "UPDATE file_objects SET name = ?, description = ?
             WHERE id = ? AND file_location <> ''
             RETURNING id, name, description, file_name, file_location, size,
                       uploaded_time, encrypted, encryption_key, encryption_iv",
        )
        .bind(name)
        .bind(description)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(CatalogError::NotFound(id))?;

        AuditLog::append(&mut tx, actor, AuditAction::Updated, &file).await?;
        tx.commit().await?;

        info!(%id, "updated file");
        Ok(file)
    }

    /// Remove the metadata row, then the blob.
    ///
    /// A missing blob is fine. A blob that exists but cannot be removed is
    /// reported as a consistency error, since the row is already gone.
    pub async fn delete(&self, actor: &str, id: Uuid) -> CatalogResult<()> {
        let mut tx = self.db.begin().await?;
        let file = sqlx::query_as::<_, FileObject>(
            "DELETE FROM file_objects
             WHERE id = ? AND file_location <> ''
             RETURNING id, name, description, file_name, file_location, size,
                       uploaded_time, encrypted, encryption_key, encryption_iv",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(CatalogError::NotFound(id))?;

        AuditLog::append(&mut tx, actor, AuditAction::Deleted, &file).await?;
        tx.commit().await?;

        if let Err(err) = self.blobs.delete(&file.file_location).await {
            error!(%id, location = %file.file_location, "metadata deleted but blob remains: {}", err);
            return Err(CatalogError::Consistency(format!(
                "file `{id}` deleted but its blob at `{}` could not be removed: {err}",
                file.file_location
            )));
        }

        info!(%id, "deleted file");
        Ok(())
    }

    /// History of a file, newest revision first.
    ///
    /// Still available after the file is deleted.
    pub async fn audit_history(&self, id: Uuid) -> CatalogResult<Vec<AnnotatedRevision>> {
        let entries = self.audit.entries_for(id).await?;
        if entries.is_empty() {
            return Err(CatalogError::NotFound(id));
        }
        Ok(audit::reconstruct(entries)?)
    }

    /// Reclaim uploads that never finalized.
    ///
    /// Provisional rows older than `grace` have their derived blob location
    /// removed and are then deleted. Rows whose blob cannot be removed are
    /// kept for the next run. Returns the number of rows reclaimed.
    pub async fn sweep_incomplete(&self, grace: Duration) -> CatalogResult<usize> {
        let Some(cutoff) = Utc::now().checked_sub_signed(grace) else {
            return Ok(0);
        };
        let stale = sqlx::query_as::<_, FileObject>(
            "SELECT id, name, description, file_name, file_location, size,
                    uploaded_time, encrypted, encryption_key, encryption_iv
             FROM file_objects
             WHERE file_location = '' AND uploaded_time < ?",
        )
        .bind(cutoff)
        .fetch_all(&*self.db)
        .await?;

        let mut reclaimed = 0;
        for file in stale {
            let location = file_location(file.uploaded_time, file.id);
            if let Err(err) = self.blobs.delete(&location).await {
                warn!(id = %file.id, %location, "could not remove orphaned blob: {}", err);
                continue;
            }
            let result =
                sqlx::query("DELETE FROM file_objects WHERE id = ? AND file_location = ''")
                    .bind(file.id)
                    .execute(&*self.db)
                    .await?;
            reclaimed += result.rows_affected() as usize;
        }

        if reclaimed > 0 {
            info!(reclaimed, "swept incomplete uploads");
        }
        Ok(reclaimed)
    }

    async fn insert_provisional(&self, new_file: &NewFile) -> CatalogResult<FileObject> {
        let file = sqlx::query_as::<_, FileObject>(
            "INSERT INTO file_objects (
                id, name, description, file_name, file_location, size,
                uploaded_time, encrypted, encryption_key, encryption_iv
             ) VALUES (?, ?, ?, ?, '', ?, ?, ?, NULL, NULL)
             RETURNING id, name, description, file_name, file_location, size,
                       uploaded_time, encrypted, encryption_key, encryption_iv",
        )
        .bind(Uuid::new_v4())
        .bind(&new_file.name)
        .bind(&new_file.description)
        .bind(&new_file.file_name)
        .bind(new_file.size)
        .bind(Utc::now())
        .bind(new_file.encrypted)
        .fetch_one(&*self.db)
        .await?;
        Ok(file)
    }

    /// Write the content for a provisional record. Returns the cipher material
    /// when the content was encrypted.
    async fn write_content<S>(
        &self,
        location: &str,
        new_file: &NewFile,
        content: S,
    ) -> CatalogResult<Option<CipherMaterial>>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        if !new_file.encrypted {
            let written = self
                .blobs
                .create(location, content.boxed())
                .await
                .map_err(CatalogError::StorageWrite)?;
            if !size_matches(new_file.size, written) {
                self.discard_blob(location).await;
                return Err(CatalogError::SizeMismatch {
                    declared: new_file.size,
                    actual: written,
                });
            }
            return Ok(None);
        }

        let mut content = content.boxed();
        let mut plaintext = Vec::with_capacity(usize::try_from(new_file.size).unwrap_or(0));
        while let Some(chunk) = content.next().await {
            let chunk = chunk.map_err(|source| {
                CatalogError::StorageWrite(BlobError::Write {
                    location: location.to_string(),
                    source,
                })
            })?;
            plaintext.extend_from_slice(&chunk);
        }
        let received = plaintext.len() as u64;
        if !size_matches(new_file.size, received) {
            return Err(CatalogError::SizeMismatch {
                declared: new_file.size,
                actual: received,
            });
        }

        let material = self.cipher.generate_material();
        let ciphertext = Bytes::from(self.cipher.encrypt(&plaintext, &material));
        self.blobs
            .create(location, stream::once(async move { Ok::<_, io::Error>(ciphertext) }).boxed())
            .await
            .map_err(CatalogError::StorageWrite)?;
        Ok(Some(material))
    }

    /// Set the location (and cipher material) on a provisional row and log
    /// the creation, in one transaction.
    async fn finalize(
        &self,
        actor: &str,
        id: Uuid,
        location: &str,
        material: Option<&CipherMaterial>,
    ) -> CatalogResult<FileObject> {
        let (key, iv) = material.map(CipherMaterial::encode).unzip();

        let mut tx = self.db.begin().await?;
        let file = sqlx::query_as::<_, FileObject>(
            "UPDATE file_objects
             SET file_location = ?, encryption_key = ?, encryption_iv = ?
             WHERE id = ? AND file_location = ''
             RETURNING id, name, description, file_name, file_location, size,
                       uploaded_time, encrypted, encryption_key, encryption_iv",
        )
        .bind(location)
        .bind(key)
        .bind(iv)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            CatalogError::Consistency(format!(
                "no provisional record for file `{id}` at finalize"
            ))
        })?;

        AuditLog::append(&mut tx, actor, AuditAction::Created, &file).await?;
        tx.commit().await?;
        Ok(file)
    }

    async fn discard_provisional(&self, id: Uuid) {
        let result = sqlx::query("DELETE FROM file_objects WHERE id = ? AND file_location = ''")
            .bind(id)
            .execute(&*self.db)
            .await;
        if let Err(err) = result {
            warn!(%id, "could not discard provisional record, leaving it for the sweep: {}", err);
        }
    }

    async fn discard_blob(&self, location: &str) {
        if let Err(err) = self.blobs.delete(location).await {
            warn!(location, "could not discard blob, leaving it for the sweep: {}", err);
        }
    }
}

fn size_matches(declared: i64, actual: u64) -> bool {
    i64::try_from(actual).is_ok_and(|actual| actual == declared)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, services::blob_store::{ContentStream, LocalBlobStore}};
    use async_trait::async_trait;
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::TempDir;

    async fn test_pool() -> Arc<SqlitePool> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        db::run_migrations(&pool).await.unwrap();
        Arc::new(pool)
    }

    async fn test_catalog() -> (Catalog, TempDir) {
        let dir = TempDir::new().unwrap();
        let blobs = Arc::new(LocalBlobStore::new(dir.path()));
        (Catalog::new(test_pool().await, blobs), dir)
    }

    fn content(data: &'static [u8]) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        stream::iter([Ok(Bytes::from_static(data))])
    }

    fn new_file(name: &str, size: i64, encrypted: bool) -> NewFile {
        NewFile {
            name: name.into(),
            description: "test upload".into(),
            file_name: format!("{name}.bin"),
            size,
            encrypted,
        }
    }

    async fn row_count(catalog: &Catalog) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM file_objects")
            .fetch_one(&*catalog.db)
            .await
            .unwrap()
    }

    /// Blob store whose writes and deletes always fail.
    struct BrokenBlobStore;

    #[async_trait]
    impl BlobStore for BrokenBlobStore {
        async fn create<'a>(
            &self,
            location: &str,
            _content: ContentStream<'a>,
        ) -> Result<u64, BlobError> {
            Err(BlobError::Write {
                location: location.to_string(),
                source: io::Error::other("disk full"),
            })
        }

        async fn read(&self, location: &str) -> Result<Bytes, BlobError> {
            Err(BlobError::NotFound(location.to_string()))
        }

        async fn delete(&self, location: &str) -> Result<(), BlobError> {
            Err(BlobError::Write {
                location: location.to_string(),
                source: io::Error::other("read-only filesystem"),
            })
        }
    }

    /// Local blob store that runs `after_write` against the catalog database
    /// once each blob is written, so finalize sees the changed state.
    struct InterferingBlobStore {
        inner: LocalBlobStore,
        db: Arc<SqlitePool>,
        after_write: &'static str,
    }

    #[async_trait]
    impl BlobStore for InterferingBlobStore {
        async fn create<'a>(
            &self,
            location: &str,
            content: ContentStream<'a>,
        ) -> Result<u64, BlobError> {
            let written = self.inner.create(location, content).await?;
            sqlx::query(self.after_write)
                .execute(&*self.db)
                .await
                .unwrap();
            Ok(written)
        }

        async fn read(&self, location: &str) -> Result<Bytes, BlobError> {
            self.inner.read(location).await
        }

        async fn delete(&self, location: &str) -> Result<(), BlobError> {
            self.inner.delete(location).await
        }
    }

    async fn interfering_catalog(after_write: &'static str) -> (Catalog, TempDir) {
        let pool = test_pool().await;
        let dir = TempDir::new().unwrap();
        let blobs = Arc::new(InterferingBlobStore {
            inner: LocalBlobStore::new(dir.path()),
            db: pool.clone(),
            after_write,
        });
        (Catalog::new(pool, blobs), dir)
    }

    #[tokio::test]
    async fn finalize_without_provisional_row_discards_blob() {
        let (catalog, dir) =
            interfering_catalog("DELETE FROM file_objects WHERE file_location = ''").await;

        for encrypted in [false, true] {
            let err = catalog
                .create("alice", new_file("vanished", 4, encrypted), content(b"1234"))
                .await
                .unwrap_err();
            assert!(matches!(err, CatalogError::Consistency(_)));
        }

        assert_eq!(row_count(&catalog).await, 0);
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn finalize_database_failure_discards_blob_and_row() {
        let (catalog, dir) = interfering_catalog("DROP TABLE audit_entries").await;

        let err = catalog
            .create("alice", new_file("unlogged", 4, true), content(b"1234"))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Sqlx(_)));

        assert_eq!(row_count(&catalog).await, 0);
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn encrypted_upload_round_trips() {
        let (catalog, dir) = test_catalog().await;

        let file = catalog
            .create("alice", new_file("invoice", 4, true), content(b"1234"))
            .await
            .unwrap();

        assert!(file.is_finalized());
        assert_eq!(file.file_location, file_location(file.uploaded_time, file.id));
        assert!(file.encryption_key.as_deref().is_some_and(|k| !k.is_empty()));
        assert!(file.encryption_iv.as_deref().is_some_and(|iv| !iv.is_empty()));
        assert_eq!(file.size, 4);

        let on_disk = std::fs::read(dir.path().join(&file.file_location)).unwrap();
        assert_ne!(on_disk, b"1234");
        assert_eq!(on_disk.len(), 16);

        let (bytes, file_name) = catalog.download(file.id).await.unwrap();
        assert_eq!(&bytes[..], b"1234");
        assert_eq!(file_name, "invoice.bin");
    }

    #[tokio::test]
    async fn plain_upload_is_stored_unchanged() {
        let (catalog, dir) = test_catalog().await;

        let file = catalog
            .create("alice", new_file("notes", 5, false), content(b"hello"))
            .await
            .unwrap();

        assert!(file.encryption_key.is_none());
        assert!(file.encryption_iv.is_none());
        assert_eq!(std::fs::read(dir.path().join(&file.file_location)).unwrap(), b"hello");
        assert_eq!(&catalog.fetch_content(&file).await.unwrap()[..], b"hello");
    }

    #[tokio::test]
    async fn each_encrypted_upload_gets_fresh_material() {
        let (catalog, _dir) = test_catalog().await;

        let a = catalog
            .create("alice", new_file("a", 4, true), content(b"same"))
            .await
            .unwrap();
        let b = catalog
            .create("alice", new_file("b", 4, true), content(b"same"))
            .await
            .unwrap();

        assert_ne!(a.encryption_key, b.encryption_key);
        assert_ne!(a.encryption_iv, b.encryption_iv);
        assert_ne!(a.file_location, b.file_location);
    }

    #[tokio::test]
    async fn failed_blob_write_leaves_no_record() {
        let catalog = Catalog::new(test_pool().await, Arc::new(BrokenBlobStore));

        for encrypted in [false, true] {
            let err = catalog
                .create("alice", new_file("doomed", 4, encrypted), content(b"1234"))
                .await
                .unwrap_err();
            assert!(matches!(err, CatalogError::StorageWrite(_)));
        }

        assert_eq!(row_count(&catalog).await, 0);
        assert!(catalog.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn size_mismatch_is_rejected_and_cleaned_up() {
        let (catalog, dir) = test_catalog().await;

        for encrypted in [false, true] {
            let err = catalog
                .create("alice", new_file("short", 10, encrypted), content(b"1234"))
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                CatalogError::SizeMismatch {
                    declared: 10,
                    actual: 4
                }
            ));
        }

        assert_eq!(row_count(&catalog).await, 0);
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn get_update_and_list() {
        let (catalog, _dir) = test_catalog().await;
        let file = catalog
            .create("alice", new_file("draft", 2, false), content(b"hi"))
            .await
            .unwrap();

        let updated = catalog
            .update("bob", file.id, "final".into(), "reviewed".into())
            .await
            .unwrap();
        assert_eq!(updated.name, "final");
        assert_eq!(updated.description, "reviewed");
        assert_eq!(updated.file_name, file.file_name);
        assert_eq!(updated.file_location, file.file_location);
        assert_eq!(updated.uploaded_time, file.uploaded_time);

        assert_eq!(catalog.get(file.id).await.unwrap().name, "final");
        assert_eq!(catalog.list().await.unwrap().len(), 1);

        let missing = Uuid::new_v4();
        assert!(matches!(catalog.get(missing).await, Err(CatalogError::NotFound(id)) if id == missing));
        assert!(matches!(
            catalog.update("bob", missing, "x".into(), "y".into()).await,
            Err(CatalogError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_tolerates_missing_blob() {
        let (catalog, dir) = test_catalog().await;
        let file = catalog
            .create("alice", new_file("temp", 3, false), content(b"abc"))
            .await
            .unwrap();
        std::fs::remove_file(dir.path().join(&file.file_location)).unwrap();

        catalog.delete("alice", file.id).await.unwrap();

        assert!(matches!(catalog.get(file.id).await, Err(CatalogError::NotFound(_))));
        assert!(matches!(
            catalog.delete("alice", file.id).await,
            Err(CatalogError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn failed_blob_delete_is_a_consistency_error() {
        let pool = test_pool().await;
        let dir = TempDir::new().unwrap();
        let working = Catalog::new(pool.clone(), Arc::new(LocalBlobStore::new(dir.path())));
        let file = working
            .create("alice", new_file("stuck", 1, false), content(b"x"))
            .await
            .unwrap();

        let broken = Catalog::new(pool, Arc::new(BrokenBlobStore));
        assert!(matches!(
            broken.delete("alice", file.id).await,
            Err(CatalogError::Consistency(_))
        ));
        assert!(matches!(working.get(file.id).await, Err(CatalogError::NotFound(_))));
    }

    #[tokio::test]
    async fn corrupt_ciphertext_is_reported_distinctly() {
        let (catalog, dir) = test_catalog().await;
        let file = catalog
            .create("alice", new_file("secret", 4, true), content(b"1234"))
            .await
            .unwrap();
        std::fs::write(dir.path().join(&file.file_location), b"not a block").unwrap();

        assert!(matches!(
            catalog.download(file.id).await,
            Err(CatalogError::CorruptOrMismatchedKey)
        ));
    }

    #[tokio::test]
    async fn missing_blob_is_a_read_error() {
        let (catalog, dir) = test_catalog().await;
        let file = catalog
            .create("alice", new_file("lost", 1, false), content(b"x"))
            .await
            .unwrap();
        std::fs::remove_file(dir.path().join(&file.file_location)).unwrap();

        assert!(matches!(
            catalog.download(file.id).await,
            Err(CatalogError::StorageRead(BlobError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn fixture_location_skips_decryption() {
        let dir = TempDir::new().unwrap();
        let blobs = Arc::new(LocalBlobStore::new(dir.path()));
        let catalog = Catalog::new(test_pool().await, blobs.clone())
            .with_fixture_location(Some("fixtures/sample".into()));

        blobs
            .create("fixtures/sample", content(b"plain fixture").boxed())
            .await
            .unwrap();
        let (key, iv) = CipherEngine.generate_material().encode();
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO file_objects (
                id, name, description, file_name, file_location, size,
                uploaded_time, encrypted, encryption_key, encryption_iv
             ) VALUES (?, 'sample', '', 'sample.txt', 'fixtures/sample', 13, ?, 1, ?, ?)",
        )
        .bind(id)
        .bind(Utc::now())
        .bind(key)
        .bind(iv)
        .execute(&*catalog.db)
        .await
        .unwrap();

        let (bytes, _) = catalog.download(id).await.unwrap();
        assert_eq!(&bytes[..], b"plain fixture");
    }

    #[tokio::test]
    async fn sweep_reclaims_stale_provisional_rows() {
        let (catalog, dir) = test_catalog().await;
        let finished = catalog
            .create("alice", new_file("kept", 1, false), content(b"k"))
            .await
            .unwrap();

        let orphan = catalog
            .insert_provisional(&new_file("orphan", 1, false))
            .await
            .unwrap();
        let orphan_location = file_location(orphan.uploaded_time, orphan.id);
        catalog
            .blobs()
            .create(&orphan_location, content(b"o").boxed())
            .await
            .unwrap();

        assert!(matches!(catalog.get(orphan.id).await, Err(CatalogError::NotFound(_))));
        assert_eq!(catalog.sweep_incomplete(Duration::hours(1)).await.unwrap(), 0);

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(catalog.sweep_incomplete(Duration::zero()).await.unwrap(), 1);
        assert!(!dir.path().join(&orphan_location).exists());
        assert_eq!(row_count(&catalog).await, 1);
        assert!(catalog.get(finished.id).await.is_ok());
    }

    #[tokio::test]
    async fn audit_history_tracks_changes() {
        let (catalog, _dir) = test_catalog().await;
        let file = catalog
            .create("alice", new_file("A", 1, false), content(b"a"))
            .await
            .unwrap();
        catalog
            .update("bob", file.id, "B".into(), file.description.clone())
            .await
            .unwrap();

        let history = catalog.audit_history(file.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].action, AuditAction::Updated);
        assert_eq!(history[0].actor, "bob");
        assert!(history[0].highlights.name);
        assert!(!history[0].highlights.description);
        assert!(!history[0].highlights.file_name);
        assert!(!history[0].highlights.file_location);
        assert_eq!(history[1].action, AuditAction::Created);
        assert!(!history[1].highlights.name);

        catalog.delete("carol", file.id).await.unwrap();
        let history = catalog.audit_history(file.id).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].action, AuditAction::Deleted);
        assert_eq!(history[0].fields.name, "B");

        assert!(matches!(
            catalog.audit_history(Uuid::new_v4()).await,
            Err(CatalogError::NotFound(_))
        ));
    }
}
