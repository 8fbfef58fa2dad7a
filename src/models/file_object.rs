//! Represents a stored file and the metadata needed to read it back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Metadata record for one stored file.
///
/// The record does not hold the content bytes. Those live in the blob store at
/// `file_location`, encrypted with `encryption_key`/`encryption_iv` when
/// `encrypted` is set.
///
/// A record is written in two phases: a provisional row with an empty
/// `file_location` is inserted first to allocate the identity, and the
/// location (plus cipher material) is filled in once the blob is durable.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct FileObject {
    /// Identity, allocated by the provisional insert.
    pub id: Uuid,

    /// Display name. Mutable.
    pub name: String,

    /// Free-form description. Mutable.
    pub description: String,

    /// Name of the file as supplied by the uploader.
    pub file_name: String,

    /// Blob address, `YYYY/MM/DD/<id>`. Empty while provisional.
    pub file_location: String,

    /// Length of the original plaintext in bytes.
    pub size: i64,

    /// When the provisional row was inserted.
    pub uploaded_time: DateTime<Utc>,

    /// Whether the blob holds ciphertext.
    pub encrypted: bool,

    /// Base64 AES-256 key, present iff `encrypted`.
    #[serde(skip_serializing)]
    pub encryption_key: Option<String>,

    /// Base64 CBC initialization vector, present iff `encrypted`.
    #[serde(skip_serializing)]
    pub encryption_iv: Option<String>,
}

impl FileObject {
    /// True once the blob has been written and the row finalized.
    pub fn is_finalized(&self) -> bool {
        !self.file_location.is_empty()
    }
}

/// Caller-supplied fields for a new upload.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub name: String,
    pub description: String,
    pub file_name: String,
    pub size: i64,
    pub encrypted: bool,
}

/// Derive the blob address for a record: `YYYY/MM/DD/<id>`.
///
/// Pure in both inputs, so a provisional row is enough to locate any blob it
/// may have left behind.
pub fn file_location(uploaded_time: DateTime<Utc>, id: Uuid) -> String {
    format!("{}/{}", uploaded_time.format("%Y/%m/%d"), id)
}
