//! Defines routes for the file vault API.
//!
//! ## Structure
//! - **Collection**
//!   - `GET    /files` (list finalized files)
//!   - `POST   /files` (multipart upload)
//!
//! - **Single file**
//!   - `GET    /files/{id}` (metadata)
//!   - `PUT    /files/{id}` (update name/description)
//!   - `DELETE /files/{id}` (delete metadata and blob)
//!   - `GET    /files/{id}/content` (download plaintext)
//!   - `GET    /files/{id}/audit` (annotated history, newest first)

use crate::{
    handlers::{
        file_handlers::{
            delete_file, download_file, file_audit, get_file, list_files, update_file, upload_file,
        },
        health_handlers::{healthz, readyz},
    },
    services::catalog::Catalog,
};
use axum::{Router, extract::DefaultBodyLimit, routing::get};

/// Largest multipart upload accepted by `POST /files`.
const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

/// Build the router. Handlers share the `Catalog` as state.
pub fn routes() -> Router<Catalog> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/files",
            get(list_files)
                .post(upload_file)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route(
            "/files/{id}",
            get(get_file).put(update_file).delete(delete_file),
        )
        .route("/files/{id}/content", get(download_file))
        .route("/files/{id}/audit", get(file_audit))
}
