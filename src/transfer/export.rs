//! CSV export pipeline

use futures::StreamExt;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::mapping;
use super::progress::{ExportProgress, ExportProgressSender};
use super::TransferError;
use crate::db::BookStore;

/// One piece of an export sent over a channel
pub type ExportChunk = Result<Vec<u8>, TransferError>;

/// Streams the whole library out as CSV
pub struct ExportPipeline {
    store: Arc<dyn BookStore>,
}

impl ExportPipeline {
    pub fn new(store: Arc<dyn BookStore>) -> Self {
        Self { store }
    }

    /// Write the header row and one row per stored book. Any failure aborts
    /// the export; a partially written output is not valid.
    pub async fn export_to_writer<W: io::Write + Send>(
        &self,
        writer: W,
        progress: Option<ExportProgressSender>,
    ) -> Result<usize, TransferError> {
        let total = usize::try_from(self.store.count(None).await?).unwrap_or(0);
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(mapping::headers())?;

        let mut books = self.store.stream_all();
        let mut exported = 0;

        while let Some(book) = books.next().await {
            let book = book?;
            csv.write_record(mapping::book_to_record(&book.data))?;
            exported += 1;

            if let Some(sink) = &progress {
                let _ = sink.send(ExportProgress {
                    exported,
                    // Rows added while streaming still count
                    total: total.max(exported),
                });
            }
        }

        csv.flush()?;
        tracing::info!(exported, "CSV export finished");
        Ok(exported)
    }

    /// Send the export through a bounded channel: the header row first, then
    /// one chunk per book. Sending waits while the channel is full, so a slow
    /// reader holds back the database cursor instead of the export piling up
    /// in memory. Stops quietly once the receiver is gone.
    pub async fn export_chunks(
        &self,
        sink: mpsc::Sender<ExportChunk>,
        progress: Option<ExportProgressSender>,
    ) -> Result<usize, TransferError> {
        let total = usize::try_from(self.store.count(None).await?).unwrap_or(0);
        let mut encoder = ChunkEncoder::new();

        if sink.send(Ok(encoder.encode(mapping::headers())?)).await.is_err() {
            tracing::debug!("Export receiver dropped before the header");
            return Ok(0);
        }

        let mut books = self.store.stream_all();
        let mut exported = 0;

        while let Some(book) = books.next().await {
            let chunk = encoder.encode(mapping::book_to_record(&book?.data))?;
            if sink.send(Ok(chunk)).await.is_err() {
                tracing::debug!(exported, "Export receiver dropped, stopping");
                return Ok(exported);
            }
            exported += 1;

            if let Some(progress) = &progress {
                let _ = progress.send(ExportProgress {
                    exported,
                    total: total.max(exported),
                });
            }
        }

        tracing::info!(exported, "CSV export finished");
        Ok(exported)
    }

    /// Export into a string
    pub async fn export_string(&self, progress: Option<ExportProgressSender>) -> Result<String, TransferError> {
        let mut buffer = Vec::new();
        self.export_to_writer(&mut buffer, progress).await?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Encodes records one at a time into owned byte chunks
struct ChunkEncoder {
    writer: csv::Writer<Vec<u8>>,
}

impl ChunkEncoder {
    fn new() -> Self {
        Self {
            writer: csv::Writer::from_writer(Vec::new()),
        }
    }

    fn encode<I, T>(&mut self, record: I) -> Result<Vec<u8>, TransferError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.writer.write_record(record)?;
        self.writer.flush()?;
        let writer = std::mem::replace(&mut self.writer, csv::Writer::from_writer(Vec::new()));
        Ok(writer.into_inner().map_err(|e| e.into_error())?)
    }
}
