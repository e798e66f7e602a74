//! Cover lookup endpoint

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::covers::CoverCandidate;
use crate::error::{AppError, Result};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CoverParams {
    pub title: Option<String>,
    pub author: Option<String>,
    pub isbn: Option<String>,
    /// Candidate URL to verify before asking the metadata sources
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverResponse {
    pub cover_url: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(find_cover))
}

/// Run one cover resolution with a fresh resolver
async fn find_cover(
    State(state): State<AppState>,
    Query(params): Query<CoverParams>,
) -> Result<Json<CoverResponse>> {
    let candidate = params.candidate()?;
    let cover_url = state.sources().resolver().resolve(&candidate).await;

    tracing::debug!(title = %candidate.title, found = cover_url.is_some(), "Cover lookup");

    Ok(Json(CoverResponse { cover_url }))
}

impl CoverParams {
    fn candidate(&self) -> Result<CoverCandidate> {
        let title = self
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::BadRequest("Missing required parameter: title".to_string()))?;

        let mut candidate = CoverCandidate::new(title);
        if let Some(author) = &self.author {
            candidate = candidate.with_author(author.trim());
        }
        if let Some(isbn) = &self.isbn {
            candidate = candidate.with_isbn(isbn.trim());
        }
        if let Some(url) = &self.url {
            candidate = candidate.with_supplied_url(url.trim());
        }

        Ok(candidate)
    }
}
