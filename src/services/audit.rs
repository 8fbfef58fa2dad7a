//! Rebuilds a file's history from its audit snapshots.

use crate::models::audit::{AnnotatedRevision, AuditSnapshot, FieldHighlights, FileSnapshot};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit entry `{entry_id}` has malformed fields: {source}")]
    MalformedSnapshot {
        entry_id: Uuid,
        #[source]
        source: serde_json::Error,
    },
}

/// Annotate each snapshot with the fields that changed since the one before.
///
/// Diffs are computed oldest to newest; the result is returned newest first.
/// Input order does not matter, except that snapshots sharing a timestamp are
/// diffed in the order given. All snapshots must belong to one object.
pub fn reconstruct(mut snapshots: Vec<AuditSnapshot>) -> Result<Vec<AnnotatedRevision>, AuditError> {
    debug_assert!(
        snapshots
            .windows(2)
            .all(|pair| pair[0].object_id == pair[1].object_id),
        "audit snapshots from more than one object"
    );
    snapshots.sort_by_key(|s| s.timestamp);

    let mut revisions = Vec::with_capacity(snapshots.len());
    let mut previous: Option<FileSnapshot> = None;

    for snapshot in snapshots {
        let fields: FileSnapshot = serde_json::from_str(&snapshot.fields).map_err(|source| {
            AuditError::MalformedSnapshot {
                entry_id: snapshot.entry_id,
                source,
            }
        })?;
        let highlights = FieldHighlights::between(previous.as_ref(), &fields);

        revisions.push(AnnotatedRevision {
            entry_id: snapshot.entry_id,
            actor: snapshot.actor,
            action: snapshot.action,
            timestamp: snapshot.timestamp,
            fields: fields.clone(),
            highlights,
        });
        previous = Some(fields);
    }

    revisions.reverse();
    Ok(revisions)
}
