//! Minimum-interval throttle for one external API

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// Spaces consecutive calls to the same API at least `min_interval` apart.
///
/// Waiters are served in arrival order: the tokio mutex is fair, and the
/// slot is claimed while the lock is held.
#[derive(Debug)]
pub struct Throttle {
    name: &'static str,
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(name: &'static str, min_interval: Duration) -> Self {
        Self {
            name,
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait for this caller's turn
    pub async fn wait(&self) {
        let mut next_slot = self.next_slot.lock().await;

        if let Some(at) = *next_slot {
            if at > Instant::now() {
                tracing::trace!(api = self.name, "Throttling outbound request");
                sleep_until(at).await;
            }
        }

        *next_slot = Some(Instant::now() + self.min_interval);
    }
}
