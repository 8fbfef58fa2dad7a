//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks DB connectivity and blob storage

use crate::services::catalog::Catalog;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use bytes::Bytes;
use futures::{StreamExt, stream};
use serde::Serialize;
use std::{collections::HashMap, io};
use uuid::Uuid;

const PROBE: &[u8] = b"readyz";

/// `GET /healthz`
///
/// Liveness probe. Always 200, never touches storage.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness probe that:
/// 1. Runs `SELECT 1` against SQLite.
/// 2. Writes, reads back and deletes a probe blob through the blob store.
///
/// HTTP 200 when both pass, 503 otherwise.
pub async fn readyz(State(catalog): State<Catalog>) -> impl IntoResponse {
    let sqlite_check = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*catalog.db)
        .await
    {
        Ok(1) => (true, None::<String>),
        Ok(v) => (false, Some(format!("unexpected result: {}", v))),
        Err(e) => (false, Some(format!("error: {}", e))),
    };

    let blob_check = probe_blob_store(&catalog).await;

    let overall_ok = sqlite_check.0 && blob_check.0;

    let mut checks = HashMap::new();
    checks.insert(
        "sqlite",
        CheckStatus {
            ok: sqlite_check.0,
            error: sqlite_check.1,
        },
    );
    checks.insert(
        "blob_store",
        CheckStatus {
            ok: blob_check.0,
            error: blob_check.1,
        },
    );

    let body = ReadyResponse {
        status: if overall_ok { "ok" } else { "error" }.into(),
        checks,
    };
    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn probe_blob_store(catalog: &Catalog) -> (bool, Option<String>) {
    let blobs = catalog.blobs();
    let location = format!(".readyz/{}", Uuid::new_v4());

    let content = stream::iter([Ok::<_, io::Error>(Bytes::from_static(PROBE))]).boxed();
    if let Err(e) = blobs.create(&location, content).await {
        return (false, Some(format!("could not write probe: {}", e)));
    }

    let read_back = blobs.read(&location).await;
    let cleanup = blobs.delete(&location).await;
    match (read_back, cleanup) {
        (Ok(bytes), Ok(())) if &bytes[..] == PROBE => (true, None),
        (Ok(bytes), Err(e)) if &bytes[..] == PROBE => {
            (true, Some(format!("could not remove probe: {}", e)))
        }
        (Ok(_), _) => (false, Some("probe content mismatch".to_string())),
        (Err(e), _) => (false, Some(format!("could not read probe: {}", e))),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
