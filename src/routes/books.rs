//! Book API endpoints
//!
//! - List, create, get, update and delete books
//! - Clear the whole library
//! - Location statistics

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::library::{Book, BookData, BookFilter};
use crate::state::AppState;

const STATS_SAMPLE_SIZE: i64 = 5;

/// Response for book list
#[derive(Serialize)]
pub struct BookListResponse {
    pub books: Vec<Book>,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    /// Substring of the physical location
    pub location: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct ClearResponse {
    pub removed: u64,
}

#[derive(Debug, Deserialize)]
pub struct StatsParams {
    /// Location substring to search for
    pub q: Option<String>,
}

/// Library overview, mostly about physical locations
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryStats {
    pub total: i64,
    pub with_location: i64,
    pub without_location: i64,
    pub samples_with_location: Vec<Book>,
    pub samples_without_location: Vec<Book>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matching: Option<Vec<Book>>,
}

/// Create the books router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_books).post(create_book))
        .route("/clear", post(clear_books))
        .route("/stats", get(library_stats))
        .route("/:id", get(get_book).put(update_book).delete(delete_book))
}

/// List books, most recently updated first
async fn list_books(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<BookListResponse>> {
    let filter = params
        .location
        .filter(|l| !l.trim().is_empty())
        .map(BookFilter::LocationContains);

    let books = state
        .store()
        .find_many(filter.as_ref(), params.limit)
        .await?;
    let total = books.len();

    Ok(Json(BookListResponse { books, total }))
}

async fn create_book(
    State(state): State<AppState>,
    Json(data): Json<BookData>,
) -> Result<(StatusCode, Json<Book>)> {
    let book = state.store().create(&data.with_defaults()).await?;
    tracing::info!(id = %book.id, title = %book.data.title, "Created book");

    Ok((StatusCode::CREATED, Json(book)))
}

async fn get_book(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Book>> {
    state
        .store()
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Book '{}' not found", id)))
}

/// Replace every user-editable field of a book
async fn update_book(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(data): Json<BookData>,
) -> Result<Json<Book>> {
    let book = state.store().update(&id, &data.with_defaults()).await?;
    tracing::debug!(id = %book.id, "Updated book");

    Ok(Json(book))
}

async fn delete_book(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode> {
    if !state.store().delete(&id).await? {
        return Err(AppError::NotFound(format!("Book '{}' not found", id)));
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Remove every book
async fn clear_books(State(state): State<AppState>) -> Result<Json<ClearResponse>> {
    let removed = state.store().delete_many().await?;
    Ok(Json(ClearResponse { removed }))
}

async fn library_stats(
    State(state): State<AppState>,
    Query(params): Query<StatsParams>,
) -> Result<Json<LibraryStats>> {
    let store = state.store();

    let total = store.count(None).await?;
    let with_location = store.count(Some(&BookFilter::HasLocation)).await?;
    let samples_with_location = store
        .find_many(Some(&BookFilter::HasLocation), Some(STATS_SAMPLE_SIZE))
        .await?;
    let samples_without_location = store
        .find_many(Some(&BookFilter::MissingLocation), Some(STATS_SAMPLE_SIZE))
        .await?;

    let matching = match params.q.filter(|q| !q.trim().is_empty()) {
        Some(q) => Some(
            store
                .find_many(Some(&BookFilter::LocationContains(q)), None)
                .await?,
        ),
        None => None,
    };

    Ok(Json(LibraryStats {
        total,
        with_location,
        without_location: total - with_location,
        samples_with_location,
        samples_without_location,
        matching,
    }))
}
