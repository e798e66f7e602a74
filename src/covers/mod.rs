//! Cover and metadata lookup
//!
//! Two external sources are consulted in cascade: Google Books first,
//! Open Library as the fallback. Each import run gets a fresh
//! [`CoverResolver`] with its own cache and source state.

mod cache;
mod google_books;
mod open_library;
mod resolver;
mod source;
mod types;

pub use cache::CoverCache;
pub use google_books::GoogleBooks;
pub use open_library::OpenLibrary;
pub use resolver::{CoverResolver, ResolverStats, SourceState};
pub use source::{HttpImageVerifier, ImageVerifier, MetadataSource};
pub use types::*;

#[cfg(test)]
pub use source::mock;

use std::sync::Arc;

use crate::config::MetadataConfig;
use crate::fetch::{FetchClient, RetryPolicy};

/// The configured sources, shared across requests
#[derive(Clone)]
pub struct MetadataSources {
    pub primary: Arc<dyn MetadataSource>,
    pub fallback: Arc<dyn MetadataSource>,
    pub verifier: Arc<dyn ImageVerifier>,
}

impl MetadataSources {
    pub fn new(
        primary: Arc<dyn MetadataSource>,
        fallback: Arc<dyn MetadataSource>,
        verifier: Arc<dyn ImageVerifier>,
    ) -> Self {
        Self {
            primary,
            fallback,
            verifier,
        }
    }

    /// Google Books and Open Library over one HTTP client
    pub fn from_config(config: &MetadataConfig) -> Self {
        let client = FetchClient::new(RetryPolicy::from_config(config));

        Self::new(
            Arc::new(GoogleBooks::new(client.clone(), config)),
            Arc::new(OpenLibrary::new(client.clone(), config)),
            Arc::new(HttpImageVerifier::new(client)),
        )
    }

    /// A resolver for one run, starting on the primary source
    pub fn resolver(&self) -> CoverResolver {
        CoverResolver::new(self.clone())
    }
}
