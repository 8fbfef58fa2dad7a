//! Audit trail entities: logged snapshots and their diff-annotated view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::file_object::FileObject;

/// What happened to a record at one revision.
///
/// Set by the catalog when it writes the entry; stored as lower-case text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum AuditAction {
    Created,
    Updated,
    Deleted,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Created => "created",
            AuditAction::Updated => "updated",
            AuditAction::Deleted => "deleted",
        }
    }
}

/// One immutable row of the audit log.
///
/// `fields` is the JSON form of [`FileSnapshot`] at this revision.
#[derive(Debug, Clone, FromRow)]
pub struct AuditSnapshot {
    pub entry_id: Uuid,
    pub object_id: Uuid,
    pub actor: String,
    pub action: AuditAction,
    pub timestamp: DateTime<Utc>,
    pub fields: String,
}

/// Business fields of a record as captured in the audit log.
///
/// Cipher material is deliberately absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub name: String,
    pub description: String,
    pub file_name: String,
    pub file_location: String,
    pub size: i64,
    pub encrypted: bool,
    pub uploaded_time: DateTime<Utc>,
}

impl From<&FileObject> for FileSnapshot {
    fn from(file: &FileObject) -> Self {
        Self {
            name: file.name.clone(),
            description: file.description.clone(),
            file_name: file.file_name.clone(),
            file_location: file.file_location.clone(),
            size: file.size,
            encrypted: file.encrypted,
            uploaded_time: file.uploaded_time,
        }
    }
}

/// Per-field change flags relative to the preceding revision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FieldHighlights {
    pub name: bool,
    pub description: bool,
    pub file_name: bool,
    pub file_location: bool,
}

impl FieldHighlights {
    /// Compare `current` against `previous`; all false when there is no
    /// previous revision.
    pub fn between(previous: Option<&FileSnapshot>, current: &FileSnapshot) -> Self {
        match previous {
            None => Self::default(),
            Some(prev) => Self {
                name: prev.name != current.name,
                description: prev.description != current.description,
                file_name: prev.file_name != current.file_name,
                file_location: prev.file_location != current.file_location,
            },
        }
    }
}

/// An audit snapshot enriched with its change flags.
#[derive(Debug, Clone, Serialize)]
pub struct AnnotatedRevision {
    pub entry_id: Uuid,
    pub actor: String,
    pub action: AuditAction,
    pub timestamp: DateTime<Utc>,
    pub fields: FileSnapshot,
    pub highlights: FieldHighlights,
}
