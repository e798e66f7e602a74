//! Import/export progress reporting
//!
//! Pipelines write updates into a channel; the transport (NDJSON response,
//! log, test collector) reads the other end.

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

/// Stage of an import run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImportPhase {
    Importing,
    Finalizing,
}

/// Percentage notification, emitted when the percentage grows or the phase
/// changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    pub progress: u8,
    pub phase: ImportPhase,
}

/// Per-record export notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExportProgress {
    pub exported: usize,
    pub total: usize,
}

pub type ProgressSender = mpsc::UnboundedSender<ProgressUpdate>;
pub type ExportProgressSender = mpsc::UnboundedSender<ExportProgress>;

/// `round(processed / total * 100)`, clamped; an empty run is complete
pub fn percent(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (processed as f64 / total as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

struct TrackerState {
    processed: usize,
    last_emitted: Option<(u8, ImportPhase)>,
    phase: ImportPhase,
}

/// Turns completed-row counts into strictly increasing percentages, then
/// closes the run with a single `finalizing` update at 100.
///
/// Safe to share between concurrently finishing rows; emission happens under
/// the lock so the channel sees updates in increasing order.
pub struct ProgressTracker {
    total: usize,
    state: Mutex<TrackerState>,
    sink: Option<ProgressSender>,
}

impl ProgressTracker {
    pub fn new(total: usize, sink: Option<ProgressSender>) -> Self {
        Self {
            total,
            state: Mutex::new(TrackerState {
                processed: 0,
                last_emitted: None,
                phase: ImportPhase::Importing,
            }),
            sink,
        }
    }

    pub fn processed(&self) -> usize {
        self.state.lock().processed
    }

    /// Report 0% as the run starts
    pub fn start(&self) {
        let mut state = self.state.lock();
        self.emit_if_changed(&mut state, 0);
    }

    /// Record one finished row (successful, failed or skipped)
    pub fn advance(&self) {
        let mut state = self.state.lock();
        state.processed += 1;
        let pct = percent(state.processed, self.total);
        self.emit_if_changed(&mut state, pct);
    }

    /// Switch to the finalizing phase and report it at 100%
    pub fn finish(&self) {
        let mut state = self.state.lock();
        state.phase = ImportPhase::Finalizing;
        self.emit_if_changed(&mut state, 100);
    }

    fn emit_if_changed(&self, state: &mut TrackerState, pct: u8) {
        let changed = state
            .last_emitted
            .map_or(true, |(last, phase)| pct > last || phase != state.phase);
        if changed {
            state.last_emitted = Some((pct, state.phase));
            if let Some(sink) = &self.sink {
                // A closed receiver only means nobody is listening any more
                let _ = sink.send(ProgressUpdate {
                    progress: pct,
                    phase: state.phase,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn drain(rx: &mut mpsc::UnboundedReceiver<ProgressUpdate>) -> Vec<u8> {
        let mut seen = Vec::new();
        while let Ok(update) = rx.try_recv() {
            seen.push(update.progress);
        }
        seen
    }

    fn drain_updates(rx: &mut mpsc::UnboundedReceiver<ProgressUpdate>) -> Vec<ProgressUpdate> {
        let mut seen = Vec::new();
        while let Ok(update) = rx.try_recv() {
            seen.push(update);
        }
        seen
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 3), 0);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 67);
        assert_eq!(percent(3, 3), 100);
        assert_eq!(percent(5, 3), 100);
        assert_eq!(percent(0, 0), 100);
    }

    #[test]
    fn test_emits_only_increases() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tracker = ProgressTracker::new(1000, Some(tx));

        tracker.start();
        for _ in 0..1000 {
            tracker.advance();
        }
        tracker.finish();

        let seen = drain(&mut rx);
        assert_eq!(seen.len(), 102);
        assert_eq!(seen.first(), Some(&0));
        assert_eq!(&seen[100..], &[100, 100]);
        assert!(seen[..101].windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_small_run_skips_percentages() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tracker = ProgressTracker::new(3, Some(tx));

        tracker.start();
        for _ in 0..3 {
            tracker.advance();
        }
        tracker.finish();

        assert_eq!(drain(&mut rx), vec![0, 33, 67, 100, 100]);
    }

    #[test]
    fn test_empty_run_reports_completion_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tracker = ProgressTracker::new(0, Some(tx));

        tracker.start();
        tracker.finish();

        let seen = drain_updates(&mut rx);
        assert_eq!(
            seen,
            vec![
                ProgressUpdate { progress: 0, phase: ImportPhase::Importing },
                ProgressUpdate { progress: 100, phase: ImportPhase::Finalizing },
            ]
        );
    }

    #[test]
    fn test_phase_is_reported() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tracker = ProgressTracker::new(1, Some(tx));

        tracker.start();
        tracker.advance();
        tracker.finish();
        tracker.finish();

        let phases: Vec<_> = drain_updates(&mut rx)
            .into_iter()
            .map(|u| (u.progress, u.phase))
            .collect();
        assert_eq!(
            phases,
            vec![
                (0, ImportPhase::Importing),
                (100, ImportPhase::Importing),
                (100, ImportPhase::Finalizing),
            ]
        );
    }

    #[test]
    fn test_finalizing_serializes_kebab_case() {
        let update = ProgressUpdate { progress: 100, phase: ImportPhase::Finalizing };
        assert_eq!(
            serde_json::to_string(&update).unwrap(),
            r#"{"progress":100,"phase":"finalizing"}"#
        );
    }

    #[tokio::test]
    async fn test_concurrent_advances_stay_monotonic() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tracker = Arc::new(ProgressTracker::new(400, Some(tx)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = tracker.clone();
                tokio::spawn(async move {
                    for _ in 0..50 {
                        tracker.advance();
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        tracker.finish();

        let seen = drain_updates(&mut rx);
        assert_eq!(tracker.processed(), 400);
        assert_eq!(seen.last().map(|u| (u.progress, u.phase)), Some((100, ImportPhase::Finalizing)));
        let importing: Vec<_> = seen
            .iter()
            .filter(|u| u.phase == ImportPhase::Importing)
            .map(|u| u.progress)
            .collect();
        assert_eq!(importing.last(), Some(&100));
        assert!(importing.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_closed_sink_is_ignored() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let tracker = ProgressTracker::new(2, Some(tx));
        tracker.advance();
        tracker.advance();
        tracker.finish();
        assert_eq!(tracker.processed(), 2);
    }
}
