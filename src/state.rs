//! Application state management

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::Config;
use crate::covers::MetadataSources;
use crate::db::{BookRepository, BookStore};
use crate::transfer::{ExportPipeline, ImportPipeline};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    store: Arc<dyn BookStore>,
    sources: MetadataSources,
}

impl AppState {
    /// Create state backed by the SQLite pool and the configured metadata sources
    pub fn new(config: Config, db: SqlitePool) -> Self {
        let sources = MetadataSources::from_config(&config.metadata);
        Self::with_parts(config, Arc::new(BookRepository::new(db)), sources)
    }

    /// Create state from explicit collaborators
    pub fn with_parts(config: Config, store: Arc<dyn BookStore>, sources: MetadataSources) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                store,
                sources,
            }),
        }
    }

    /// Get the book store
    pub fn store(&self) -> Arc<dyn BookStore> {
        self.inner.store.clone()
    }

    /// Get the metadata sources
    pub fn sources(&self) -> &MetadataSources {
        &self.inner.sources
    }

    /// A new import pipeline; each run gets its own cover cache
    pub fn import_pipeline(&self) -> ImportPipeline {
        ImportPipeline::new(self.store(), self.inner.sources.clone(), &self.inner.config.import)
    }

    pub fn export_pipeline(&self) -> ExportPipeline {
        ExportPipeline::new(self.store())
    }
}
