//! Route modules for Bookshelf Server

pub mod books;
pub mod covers;
pub mod health;
pub mod metadata;
pub mod transfer;

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// The full HTTP surface
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/health", get(health::health_check))
        .nest("/api/v1/books", books::router().merge(transfer::router()))
        .nest("/api/v1/csv", transfer::preview_router())
        .nest("/api/v1/covers", covers::router())
        .nest("/api/v1/metadata", metadata::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
