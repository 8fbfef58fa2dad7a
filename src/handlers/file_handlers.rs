//! HTTP handlers for file operations.
//! Handlers only translate between HTTP and `Catalog`; the acting user comes
//! from the `x-actor` header and is recorded in the audit log as-is.

use crate::{
    errors::AppError,
    models::{
        audit::AnnotatedRevision,
        file_object::{FileObject, NewFile},
    },
    services::catalog::Catalog,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::{StreamExt, stream};
use serde::Deserialize;
use std::io;
use uuid::Uuid;

const ACTOR_HEADER: &str = "x-actor";
const ANONYMOUS: &str = "anonymous";

/// Body for `PUT /files/{id}`.
#[derive(Debug, Deserialize)]
pub struct UpdateFileReq {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

fn actor(headers: &HeaderMap) -> String {
    headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(ANONYMOUS)
        .to_string()
}

/// `GET /files`
pub async fn list_files(State(catalog): State<Catalog>) -> Result<Json<Vec<FileObject>>, AppError> {
    Ok(Json(catalog.list().await?))
}

/// `POST /files`: multipart form with `name`, `description`, `encrypted`,
/// `size` and `file` parts.
///
/// Text parts must come before `file`; anything after it is ignored. When
/// `size` is given the file part is streamed into the catalog, otherwise it
/// is buffered to learn its length.
pub async fn upload_file(
    State(catalog): State<Catalog>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut name = None;
    let mut description = String::new();
    let mut encrypted = false;
    let mut declared_size = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(e.to_string()))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "name" => name = Some(read_text(field).await?),
            "description" => description = read_text(field).await?,
            "encrypted" => encrypted = parse_flag(&read_text(field).await?)?,
            "size" => declared_size = Some(parse_size(&read_text(field).await?)?),
            "file" => {
                let file_name = field.file_name().unwrap_or("upload.bin").to_string();
                let acting = actor(&headers);
                let mut new_file = NewFile {
                    name: name.unwrap_or_else(|| file_name.clone()),
                    description,
                    file_name,
                    size: 0,
                    encrypted,
                };

                let file = match declared_size {
                    Some(size) => {
                        new_file.size = size;
                        let content =
                            field.map(|chunk| chunk.map_err(|e| io::Error::other(e.to_string())));
                        catalog.create(&acting, new_file, content).await?
                    }
                    None => {
                        let data = field
                            .bytes()
                            .await
                            .map_err(|e| AppError::bad_request(e.to_string()))?;
                        new_file.size = data.len() as i64;
                        let content = stream::iter([Ok::<_, io::Error>(data)]);
                        catalog.create(&acting, new_file, content).await?
                    }
                };
                return Ok((StatusCode::CREATED, Json(file)));
            }
            other => tracing::debug!("ignoring multipart field `{}`", other),
        }
    }

    Err(AppError::bad_request("missing `file` part"))
}

/// `GET /files/{id}`
pub async fn get_file(
    State(catalog): State<Catalog>,
    Path(id): Path<Uuid>,
) -> Result<Json<FileObject>, AppError> {
    Ok(Json(catalog.get(id).await?))
}

/// `GET /files/{id}/content`: decrypted content as an attachment.
pub async fn download_file(
    State(catalog): State<Catalog>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let (content, file_name) = catalog.download(id).await?;
    let length = content.len();

    let mut response = Response::new(Body::from(content));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&content_disposition(&file_name))
            .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
    );
    Ok(response)
}

/// `PUT /files/{id}`: rename / re-describe.
pub async fn update_file(
    State(catalog): State<Catalog>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<UpdateFileReq>,
) -> Result<Json<FileObject>, AppError> {
    let file = catalog
        .update(&actor(&headers), id, req.name, req.description)
        .await?;
    Ok(Json(file))
}

/// `DELETE /files/{id}`
pub async fn delete_file(
    State(catalog): State<Catalog>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    catalog.delete(&actor(&headers), id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /files/{id}/audit`: newest revision first.
pub async fn file_audit(
    State(catalog): State<Catalog>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<AnnotatedRevision>>, AppError> {
    Ok(Json(catalog.audit_history(id).await?))
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|e| AppError::bad_request(e.to_string()))
}

fn parse_flag(value: &str) -> Result<bool, AppError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Ok(true),
        "false" | "0" | "off" | "no" | "" => Ok(false),
        other => Err(AppError::bad_request(format!(
            "`encrypted` must be a boolean, got `{other}`"
        ))),
    }
}

fn parse_size(value: &str) -> Result<i64, AppError> {
    value
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|size| *size >= 0)
        .ok_or_else(|| {
            AppError::bad_request(format!("`size` must be a non-negative integer, got `{value}`"))
        })
}

/// `attachment; filename="..."` with quotes, backslashes and control
/// characters replaced.
fn content_disposition(file_name: &str) -> String {
    let safe: String = file_name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    format!("attachment; filename=\"{safe}\"")
}
