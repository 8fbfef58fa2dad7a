//! Append-only audit log stored in the `audit_entries` table.
//!
//! Entries are written by the catalog inside the same transaction as the
//! metadata change they describe, and are never updated or deleted.

use crate::models::{
    audit::{AuditAction, AuditSnapshot, FileSnapshot},
    file_object::FileObject,
};
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Clone)]
pub struct AuditLog {
    db: Arc<SqlitePool>,
}

impl AuditLog {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Record `action` on `file` as performed by `actor`.
    ///
    /// Takes a connection rather than the pool so callers can run it inside
    /// their own transaction.
    pub async fn append(
        conn: &mut SqliteConnection,
        actor: &str,
        action: AuditAction,
        file: &FileObject,
    ) -> Result<AuditSnapshot, sqlx::Error> {
        let fields = serde_json::to_string(&FileSnapshot::from(file))
            .map_err(|err| sqlx::Error::Encode(Box::new(err)))?;

        debug!(object_id = %file.id, action = action.as_str(), actor, "appending audit entry");
        sqlx::query_as::<_, AuditSnapshot>(
            "INSERT INTO audit_entries (entry_id, object_id, actor, action, timestamp, fields)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING entry_id, object_id, actor, action, timestamp, fields",
        )
        .bind(Uuid::new_v4())
        .bind(file.id)
        .bind(actor)
        .bind(action)
        .bind(Utc::now())
        .bind(fields)
        .fetch_one(conn)
        .await
    }

    /// Every entry for `object_id`, oldest first.
    pub async fn entries_for(&self, object_id: Uuid) -> Result<Vec<AuditSnapshot>, sqlx::Error> {
        sqlx::query_as::<_, AuditSnapshot>(
            "SELECT entry_id, object_id, actor, action, timestamp, fields
             FROM audit_entries
             WHERE object_id = ?
             ORDER BY timestamp ASC, seq ASC",
        )
        .bind(object_id)
        .fetch_all(&*self.db)
        .await
    }
}
