//! CSV import, export and preview endpoints

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use std::convert::Infallible;
use tokio::sync::mpsc;

use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::transfer::{CsvPreview, CsvSource, ImportOptions};

/// Largest accepted CSV upload
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Encoded rows held back while the client is slow to read
const EXPORT_BUFFER_CHUNKS: usize = 64;

#[derive(Debug, Default, Deserialize)]
pub struct ImportParams {
    /// Delete every book before importing
    pub replace: Option<bool>,
    /// Look up covers (default true)
    pub covers: Option<bool>,
}

impl ImportParams {
    fn options(&self) -> ImportOptions {
        let defaults = ImportOptions::default();
        ImportOptions {
            replace_existing: self.replace.unwrap_or(defaults.replace_existing),
            resolve_covers: self.covers.unwrap_or(defaults.resolve_covers),
        }
    }
}

/// Import and export, nested under the books API
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/import", post(import_books))
        .route("/export", get(export_books))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

/// Preview, nested under `/api/v1/csv`
pub fn preview_router() -> Router<AppState> {
    Router::new()
        .route("/preview", post(preview_csv))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

/// Import an uploaded CSV, streaming progress as NDJSON.
///
/// One `{"progress":n,"phase":..}` line per new percentage, then a single
/// summary line, or `{"error":..}` when the whole run failed.
async fn import_books(
    State(state): State<AppState>,
    Query(params): Query<ImportParams>,
    mut multipart: Multipart,
) -> Result<Response> {
    let data = read_csv_upload(&mut multipart).await?;
    let options = params.options();
    let pipeline = state.import_pipeline();

    tracing::info!(bytes = data.len(), ?options, "Received CSV import");

    let (line_tx, line_rx) = mpsc::unbounded_channel::<String>();
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let progress_lines = line_tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(update) = progress_rx.recv().await {
                if let Ok(line) = serde_json::to_string(&update) {
                    let _ = progress_lines.send(line);
                }
            }
        });

        let result = pipeline.import_bytes(data, options, Some(progress_tx)).await;
        // The tracker is gone once the import returns, which ends the forwarder
        let _ = forwarder.await;

        let terminal = match result {
            Ok(summary) => serde_json::to_string(&summary),
            Err(e) => {
                tracing::error!("CSV import failed: {}", e);
                serde_json::to_string(&serde_json::json!({ "error": e.to_string() }))
            }
        };
        match terminal {
            Ok(line) => {
                let _ = line_tx.send(line);
            }
            Err(e) => tracing::error!("Failed to encode import result: {}", e),
        }
    });

    let body = futures::stream::unfold(line_rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|line| (Ok::<_, Infallible>(format!("{}\n", line)), rx))
    });

    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(body),
    )
        .into_response())
}

/// Download the whole library as CSV, one chunk per book. A failure after
/// the headers are sent aborts the body so the client never sees a
/// truncated file as complete.
async fn export_books(State(state): State<AppState>) -> Response {
    let pipeline = state.export_pipeline();
    let (chunk_tx, chunk_rx) = mpsc::channel(EXPORT_BUFFER_CHUNKS);

    tokio::spawn(async move {
        if let Err(e) = pipeline.export_chunks(chunk_tx.clone(), None).await {
            tracing::error!("CSV export failed: {}", e);
            let _ = chunk_tx.send(Err(e)).await;
        }
    });

    let body = futures::stream::unfold(chunk_rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    });
    let disposition = format!(
        "attachment; filename=\"library-{}.csv\"",
        Utc::now().format("%Y-%m-%d")
    );

    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

/// Map an uploaded CSV without storing it
async fn preview_csv(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<CsvPreview>> {
    let data = read_csv_upload(&mut multipart).await?;
    let preview = state
        .import_pipeline()
        .preview(&CsvSource::from_bytes(data))?;

    Ok(Json(preview))
}

/// Bytes of the `file` (or `csv`) multipart field
async fn read_csv_upload(multipart: &mut Multipart) -> Result<Vec<u8>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to read upload: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        tracing::debug!(field = %name, filename = ?field.file_name(), "Received multipart field");

        if name == "file" || name == "csv" {
            let data = field
                .bytes()
                .await
                .map_err(|e| AppError::BadRequest(format!("Failed to read file data: {}", e)))?;
            return Ok(data.to_vec());
        }
    }

    Err(AppError::BadRequest(
        "No file provided. Use field name 'file'".to_string(),
    ))
}
