//! Download progress and the throttled reporter.

use provisio_shared::constants::progress as progress_const;
use std::time::{Duration, Instant};

/// Snapshot of a transfer, recomputed per chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub bytes_transferred: u64,
    /// Unknown until the server reports a length.
    pub total_bytes: Option<u64>,
}

impl DownloadProgress {
    pub fn new(bytes_transferred: u64, total_bytes: Option<u64>) -> Self {
        Self {
            bytes_transferred,
            total_bytes,
        }
    }

    /// `floor(transferred * 100 / total)` clamped to 0..=100, `None` while indeterminate.
    pub fn percent(&self) -> Option<u8> {
        match self.total_bytes {
            Some(total) if total > 0 => {
                let pct = (self.bytes_transferred as u128 * 100) / total as u128;
                Some(pct.min(progress_const::MAX_PERCENT as u128) as u8)
            }
            _ => None,
        }
    }
}

/// Progress event delivered to the caller's sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub percent: Option<u8>,
    pub transferred: u64,
    pub total: Option<u64>,
}

/// Decides which per-chunk progress snapshots reach the sink.
///
/// Emits the first snapshot, every percent change, and a heartbeat once the
/// interval elapses. 100% is emitted exactly once, nothing after it.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    interval: Duration,
    last_percent: Option<u8>,
    last_emit: Option<Instant>,
    finished: bool,
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new(Duration::from_millis(progress_const::REPORT_INTERVAL_MS))
    }
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_percent: None,
            last_emit: None,
            finished: false,
        }
    }

    pub fn offer(&mut self, progress: DownloadProgress, now: Instant) -> Option<ProgressUpdate> {
        if self.finished {
            return None;
        }

        let percent = progress.percent();
        let emit = match self.last_emit {
            None => true,
            Some(_) if percent == Some(progress_const::MAX_PERCENT) => true,
            Some(_) if percent.is_some() && percent != self.last_percent => true,
            Some(at) => now.saturating_duration_since(at) >= self.interval,
        };
        if !emit {
            return None;
        }

        self.last_percent = percent;
        self.last_emit = Some(now);
        self.finished = percent == Some(progress_const::MAX_PERCENT);

        Some(ProgressUpdate {
            percent,
            transferred: progress.bytes_transferred,
            total: progress.total_bytes,
        })
    }

    /// Forget prior emissions (used when a step re-enters Pending).
    pub fn reset(&mut self) {
        self.last_percent = None;
        self.last_emit = None;
        self.finished = false;
    }
}
