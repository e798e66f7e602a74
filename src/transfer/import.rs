//! CSV import pipeline
//!
//! ```text
//! counting -> streaming rows -> (map -> resolve cover -> dedup -> upsert) -> finalizing
//! ```
//!
//! Cover lookups for up to `cover_concurrency` rows run at once. The
//! dedup-and-upsert step is applied in file order, so rows sharing a dedup
//! key end with the later row's values.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{oneshot, Notify};

use super::mapping::{self, CsvRow, MappingDefaults};
use super::progress::{ProgressSender, ProgressTracker};
use super::TransferError;
use crate::config::ImportConfig;
use crate::covers::{CoverCandidate, CoverResolver, MetadataSources};
use crate::db::BookStore;
use crate::error::Result;
use crate::library::BookData;
use crate::pool::WorkerPool;

/// Per-run switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportOptions {
    /// Delete every stored book before importing
    pub replace_existing: bool,
    /// Run the cover resolver; when off, supplied URLs are stored unchecked
    pub resolve_covers: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            replace_existing: false,
            resolve_covers: true,
        }
    }
}

/// Outcome of a completed run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub success: usize,
    pub errors: usize,
    pub error_details: Vec<String>,
}

/// Rows mapped to books without storing anything
#[derive(Debug, Clone, Default, Serialize)]
pub struct CsvPreview {
    pub books: Vec<BookData>,
    pub errors: Vec<String>,
}

/// Where the CSV comes from. Read twice: once to count, once to import.
#[derive(Debug, Clone)]
pub enum CsvSource {
    Memory(Arc<[u8]>),
    File(PathBuf),
}

impl CsvSource {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        CsvSource::Memory(bytes.into().into())
    }

    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(match self {
            CsvSource::Memory(bytes) => Box::new(io::Cursor::new(bytes.clone())),
            CsvSource::File(path) => Box::new(io::BufReader::new(std::fs::File::open(path)?)),
        })
    }

    fn reader(&self) -> std::result::Result<CsvReader, TransferError> {
        Ok(csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_reader(self.open()?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowOutcome {
    Created,
    Updated,
}

/// Imports CSV files into a book store
pub struct ImportPipeline {
    store: Arc<dyn BookStore>,
    sources: MetadataSources,
    concurrency: usize,
    defaults: MappingDefaults,
}

impl ImportPipeline {
    pub fn new(store: Arc<dyn BookStore>, sources: MetadataSources, config: &ImportConfig) -> Self {
        Self {
            store,
            sources,
            concurrency: config.cover_concurrency.max(1),
            defaults: MappingDefaults {
                language: config.default_language.clone(),
            },
        }
    }

    /// Import a CSV file from disk
    pub async fn import_file(
        &self,
        path: impl AsRef<Path>,
        options: ImportOptions,
        progress: Option<ProgressSender>,
    ) -> std::result::Result<ImportSummary, TransferError> {
        let source = CsvSource::File(path.as_ref().to_path_buf());
        self.import(&source, options, progress).await
    }

    /// Import an in-memory CSV document
    pub async fn import_bytes(
        &self,
        bytes: impl Into<Vec<u8>>,
        options: ImportOptions,
        progress: Option<ProgressSender>,
    ) -> std::result::Result<ImportSummary, TransferError> {
        self.import(&CsvSource::from_bytes(bytes), options, progress).await
    }

    /// Map every row of a CSV document without persisting it or looking up
    /// covers. Blank rows are left out.
    pub fn preview(&self, source: &CsvSource) -> std::result::Result<CsvPreview, TransferError> {
        let (mut reader, headers) = open_checked(source)?;
        let mut preview = CsvPreview::default();

        for (index, record) in reader.records().enumerate() {
            match record {
                Ok(record) => {
                    let row = to_row(&headers, &record);
                    if !mapping::is_blank_row(&row) {
                        preview.books.push(mapping::row_to_book_with(&row, &self.defaults));
                    }
                }
                Err(e) => preview
                    .errors
                    .push(format!("Row {}: invalid CSV record: {}", index + 1, e)),
            }
        }

        Ok(preview)
    }

    /// Run one import. Row failures are counted in the summary; only an
    /// unreadable source or unavailable storage fails the whole run.
    pub async fn import(
        &self,
        source: &CsvSource,
        options: ImportOptions,
        progress: Option<ProgressSender>,
    ) -> std::result::Result<ImportSummary, TransferError> {
        let total = count_rows(source)?;

        // Fail before touching any row if storage is down
        let existing = self.store.count(None).await?;

        // Header problems must surface before replace mode clears anything
        let (mut reader, headers) = open_checked(source)?;

        let tracker = Arc::new(ProgressTracker::new(total, progress));
        let pool = WorkerPool::new(self.concurrency);
        tracing::info!(
            rows = total,
            existing,
            workers = pool.size(),
            replace = options.replace_existing,
            covers = options.resolve_covers,
            "Starting CSV import"
        );

        if options.replace_existing {
            let removed = self.store.delete_many().await?;
            tracing::info!(removed, "Cleared library before import");
        }

        let resolver = options
            .resolve_covers
            .then(|| Arc::new(self.sources.resolver()));
        let sequencer = Arc::new(CommitSequencer::default());
        let tally = Arc::new(Mutex::new(ImportSummary::default()));
        let mut pending: Vec<(usize, oneshot::Receiver<()>)> = Vec::new();
        let mut next_seq = 0;

        tracker.start();

        for (index, record) in reader.records().enumerate() {
            let row_number = index + 1;

            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(row = row_number, "Skipping unreadable CSV record: {}", e);
                    record_error(&tally, format!("Row {}: invalid CSV record: {}", row_number, e));
                    tracker.advance();
                    continue;
                }
            };

            let row = to_row(&headers, &record);

            if mapping::is_blank_row(&row) {
                tracing::debug!(row = row_number, "Skipping blank row");
                tracker.advance();
                continue;
            }

            let data = mapping::row_to_book_with(&row, &self.defaults);
            let ticket = CommitTicket::new(next_seq, sequencer.clone());
            next_seq += 1;

            let job = process_row(
                row_number,
                data,
                ticket,
                self.store.clone(),
                resolver.clone(),
                tally.clone(),
                tracker.clone(),
            );
            pending.push((row_number, pool.submit(job)?));
        }

        for (row_number, done) in pending {
            if done.await.is_err() {
                // The job panicked; its ticket was released on unwind
                record_error(&tally, format!("Row {}: processing aborted", row_number));
                tracker.advance();
            }
        }
        pool.join().await;

        tracker.finish();

        let summary = std::mem::take(&mut *tally.lock());
        if let Some(resolver) = &resolver {
            let stats = resolver.stats();
            tracing::info!(
                resolved = stats.resolved,
                unresolved = stats.unresolved,
                cache_hits = stats.cache_hits,
                state = ?resolver.state(),
                "Cover resolution finished"
            );
        }
        tracing::info!(
            success = summary.success,
            errors = summary.errors,
            "CSV import finished"
        );

        Ok(summary)
    }
}

async fn process_row(
    row_number: usize,
    mut data: BookData,
    ticket: CommitTicket,
    store: Arc<dyn BookStore>,
    resolver: Option<Arc<CoverResolver>>,
    tally: Arc<Mutex<ImportSummary>>,
    tracker: Arc<ProgressTracker>,
) {
    if let Some(resolver) = &resolver {
        data.cover_url = resolver.resolve(&CoverCandidate::from_book(&data)).await;
    }

    ticket.wait_turn().await;
    let result = commit_row(store.as_ref(), data.clone()).await;
    drop(ticket);

    match result {
        Ok(outcome) => {
            tracing::debug!(row = row_number, title = %data.title, ?outcome, "Imported row");
            tally.lock().success += 1;
        }
        Err(e) => {
            tracing::warn!(row = row_number, title = %data.title, "Failed to import row: {}", e);
            record_error(&tally, format!("Row {} (\"{}\"): {}", row_number, data.title, e));
        }
    }

    tracker.advance();
}

/// Update the matching record in place, or create a new one
async fn commit_row(store: &dyn BookStore, mut data: BookData) -> Result<RowOutcome> {
    match store.find_first(&data.dedup_filter()).await? {
        Some(existing) => {
            if data.cover_url.is_none() {
                data.cover_url = existing.data.cover_url;
            }
            store.update(&existing.id, &data).await?;
            Ok(RowOutcome::Updated)
        }
        None => {
            store.create(&data).await?;
            Ok(RowOutcome::Created)
        }
    }
}

fn record_error(tally: &Mutex<ImportSummary>, detail: String) {
    let mut tally = tally.lock();
    tally.errors += 1;
    tally.error_details.push(detail);
}

fn normalize_header(header: &str) -> String {
    header.trim_start_matches('\u{feff}').trim().to_string()
}

type CsvReader = csv::Reader<Box<dyn Read + Send>>;

/// Open the source and validate its header row
fn open_checked(source: &CsvSource) -> std::result::Result<(CsvReader, Vec<String>), TransferError> {
    let mut reader = source.reader()?;
    let headers: Vec<String> = reader.headers()?.iter().map(normalize_header).collect();

    if headers.iter().all(|h| h.is_empty()) {
        return Err(TransferError::MissingHeader);
    }
    if !headers.iter().any(|h| mapping::headers().any(|known| known == h)) {
        return Err(TransferError::UnrecognizedHeader);
    }

    Ok((reader, headers))
}

/// Count data rows
fn count_rows(source: &CsvSource) -> std::result::Result<usize, TransferError> {
    let (mut reader, _) = open_checked(source)?;

    let mut record = csv::ByteRecord::new();
    let mut total = 0;
    loop {
        match reader.read_byte_record(&mut record) {
            Ok(true) => total += 1,
            Ok(false) => break,
            // Counted here, reported as a row error during import
            Err(_) => total += 1,
        }
    }
    Ok(total)
}

fn to_row(headers: &[String], record: &csv::StringRecord) -> CsvRow {
    headers
        .iter()
        .cloned()
        .zip(record.iter().map(str::to_string))
        .collect()
}

/// Hands out commit turns in sequence order
#[derive(Default)]
struct CommitSequencer {
    state: Mutex<SequencerState>,
    notify: Notify,
}

#[derive(Default)]
struct SequencerState {
    next: usize,
    finished_early: BTreeSet<usize>,
}

impl CommitSequencer {
    fn is_turn(&self, seq: usize) -> bool {
        self.state.lock().next == seq
    }

    fn complete(&self, seq: usize) {
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if seq == state.next {
                state.next += 1;
                while state.finished_early.remove(&state.next) {
                    state.next += 1;
                }
            } else if seq > state.next {
                state.finished_early.insert(seq);
            }
        }
        self.notify.notify_waiters();
    }
}

/// A row's place in the commit order. Dropping it releases the turn, so a
/// failed or panicked row never blocks the rows after it.
struct CommitTicket {
    seq: usize,
    sequencer: Arc<CommitSequencer>,
}

impl CommitTicket {
    fn new(seq: usize, sequencer: Arc<CommitSequencer>) -> Self {
        Self { seq, sequencer }
    }

    async fn wait_turn(&self) {
        loop {
            let notified = self.sequencer.notify.notified();
            if self.sequencer.is_turn(self.seq) {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for CommitTicket {
    fn drop(&mut self) {
        self.sequencer.complete(self.seq);
    }
}
