//! Book metadata lookup by ISBN

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};

use crate::covers::VolumeInfo;
use crate::error::{AppError, Result};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/isbn/:isbn", get(lookup_isbn))
}

async fn lookup_isbn(
    State(state): State<AppState>,
    Path(isbn): Path<String>,
) -> Result<Json<VolumeInfo>> {
    let isbn = normalize_isbn(&isbn)
        .ok_or_else(|| AppError::BadRequest(format!("Invalid ISBN: {}", isbn)))?;

    state
        .sources()
        .resolver()
        .lookup_metadata(&isbn)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No metadata found for ISBN {}", isbn)))
}

/// Strip separators and check the shape of an ISBN-10 or ISBN-13.
/// Check digits are not verified.
pub fn normalize_isbn(raw: &str) -> Option<String> {
    let isbn: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect();

    let valid = match isbn.len() {
        13 => isbn.chars().all(|c| c.is_ascii_digit()),
        10 => {
            let (body, check) = isbn.split_at(9);
            body.chars().all(|c| c.is_ascii_digit())
                && check.chars().all(|c| c.is_ascii_digit() || c == 'X')
        }
        _ => false,
    };

    valid.then_some(isbn)
}
