//! CSV import and export
//!
//! Row mapping is shared by both directions. Import runs rows through the
//! cover resolver on a bounded worker pool and upserts them in file order;
//! export streams the store straight into a CSV writer.

pub mod export;
pub mod import;
pub mod mapping;
pub mod progress;

pub use export::ExportPipeline;
pub use import::{CsvPreview, CsvSource, ImportOptions, ImportPipeline, ImportSummary};
pub use progress::{ExportProgress, ImportPhase, ProgressTracker, ProgressUpdate};

use crate::error::AppError;
use crate::pool::PoolError;

/// Failures that abort a whole import or export
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("CSV input has no header row")]
    MissingHeader,

    #[error("CSV header has none of the expected columns (Title, Author, ...)")]
    UnrecognizedHeader,

    #[error("Invalid CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Storage unavailable: {0}")]
    Storage(Box<AppError>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Export is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Worker pool failed: {0}")]
    Pool(#[from] PoolError),
}

impl TransferError {
    /// Whether the caller sent something unusable, as opposed to a server fault
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            TransferError::MissingHeader | TransferError::UnrecognizedHeader | TransferError::Csv(_)
        )
    }
}

impl From<AppError> for TransferError {
    fn from(error: AppError) -> Self {
        TransferError::Storage(Box::new(error))
    }
}
