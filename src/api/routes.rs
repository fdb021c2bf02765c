//! Route handlers.

use super::error_response::ApiError;
use super::AppState;
use crate::error::SplitError;
use crate::job::{Job, JobId, JobResult};
use axum::{
    body::Body,
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    Json,
};
use serde_json::json;

/// Multipart field carrying the uploaded document.
pub const UPLOAD_FIELD: &str = "pdfFile";

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>PDF Split</title>
</head>
<body>
  <h1>Split a PDF into pages</h1>
  <form action="/upload" method="post" enctype="multipart/form-data">
    <input type="file" name="pdfFile" accept="application/pdf,.pdf" required>
    <button type="submit">Upload</button>
  </form>
</body>
</html>
"#;

/// GET / - Upload form
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// POST /upload - Accept a PDF and start splitting it
pub async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let mut upload: Option<(String, Vec<u8>)> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return (
                    e.status(),
                    Json(ApiError::new("invalid_upload", e.body_text())),
                )
                    .into_response();
            }
        };
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        match field.bytes().await {
            Ok(bytes) => upload = Some((filename, bytes.to_vec())),
            Err(e) => {
                return (
                    e.status(),
                    Json(ApiError::new("invalid_upload", e.body_text())),
                )
                    .into_response();
            }
        }
    }

    let Some((filename, bytes)) = upload.filter(|(name, _)| !name.is_empty()) else {
        return SplitError::MissingUpload.into_response();
    };

    match state.service.submit(bytes, &filename).await {
        Ok(registration) => (StatusCode::CREATED, Json(registration)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /progress/{id} - Poll a job
pub async fn progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Job>, SplitError> {
    state.service.progress(&JobId::from(id)).map(Json)
}

/// GET /result/{id} - Files of a completed job; anything else goes back to `/`
pub async fn result(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.service.result(&JobId::from(id)) {
        Some(result) => Json::<JobResult>(result).into_response(),
        None => Redirect::to("/").into_response(),
    }
}

/// GET /download/{folder}/{file} - One produced page
pub async fn download_file(
    State(state): State<AppState>,
    Path((folder, file)): Path<(String, String)>,
) -> Result<Response, SplitError> {
    let path = state.service.locate_file(&folder, &file).await?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|source| SplitError::Io { path, source })?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, attachment(&file)),
        ],
        bytes,
    )
        .into_response())
}

/// GET /download-all/{folder} - Every page of a folder as one ZIP
pub async fn download_all(
    State(state): State<AppState>,
    Path(folder): Path<String>,
) -> Result<Response, SplitError> {
    let archive = state.service.download_all(&folder).await?;
    let name = archive.file_name().to_string();
    let size = archive.size();
    let stream = archive.into_stream().await?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_LENGTH, size.to_string()),
            (header::CONTENT_DISPOSITION, attachment(&name)),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

/// GET /health - Liveness plus the number of tracked jobs
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "jobs": state.service.tracker().len(),
    }))
}

/// `Content-Disposition` value for a download; the name is RFC 5987 encoded.
fn attachment(file_name: &str) -> String {
    format!(
        "attachment; filename*=UTF-8''{}",
        urlencoding::encode(file_name)
    )
}
