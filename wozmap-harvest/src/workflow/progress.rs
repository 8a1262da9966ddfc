//! Progress tracking and reporting
//!
//! Items complete out of order. [`PrefixTracker`] holds completions until every
//! lower index has completed too, so the checkpoint only ever covers a contiguous
//! prefix of the address list.

use super::item::ItemOutcome;
use crate::checkpoint::Checkpoint;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Releases completed items in index order
#[derive(Debug)]
pub struct PrefixTracker {
    next: usize,
    completed: BTreeMap<usize, ItemOutcome>,
    halted: bool,
}

impl PrefixTracker {
    pub fn new(start: usize) -> Self {
        Self {
            next: start,
            completed: BTreeMap::new(),
            halted: false,
        }
    }

    pub fn record(&mut self, index: usize, outcome: ItemOutcome) {
        self.completed.insert(index, outcome);
    }

    /// Drain the contiguous run of completions starting at the cursor
    ///
    /// An abandoned item halts the prefix for the rest of the run: it and everything
    /// after it are attempted again on resume.
    pub fn release(&mut self) -> Vec<(usize, ItemOutcome)> {
        let mut released = Vec::new();
        while !self.halted {
            match self.completed.remove(&self.next) {
                Some(ItemOutcome::Abandoned) => {
                    tracing::debug!(index = self.next, "Prefix halted at abandoned item");
                    self.halted = true;
                }
                Some(outcome) => {
                    released.push((self.next, outcome));
                    self.next += 1;
                }
                None => break,
            }
        }
        released
    }

    /// First index not yet released
    pub fn next_index(&self) -> usize {
        self.next
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Completions waiting for a lower index
    pub fn held(&self) -> usize {
        self.completed.len()
    }
}

/// Counters of the current run
#[derive(Debug)]
pub struct HarvestStats {
    pub total: usize,
    /// Index the run started at
    pub start_index: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub in_flight: usize,
    started_at: Instant,
}

impl HarvestStats {
    pub fn new(total: usize, start_index: usize) -> Self {
        Self {
            total,
            start_index,
            processed: 0,
            succeeded: 0,
            failed: 0,
            in_flight: 0,
            started_at: Instant::now(),
        }
    }

    pub fn record(&mut self, outcome: &ItemOutcome) {
        self.processed += 1;
        if outcome.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }

    pub fn remaining(&self) -> usize {
        self.total
            .saturating_sub(self.start_index)
            .saturating_sub(self.processed)
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Addresses per second over this run
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.processed as f64 / secs
        } else {
            0.0
        }
    }

    pub fn eta(&self) -> Option<Duration> {
        let rate = self.throughput();
        if rate > 0.0 {
            Some(Duration::from_secs_f64(self.remaining() as f64 / rate))
        } else {
            None
        }
    }

    pub fn display_string(&self) -> String {
        let eta = match self.eta() {
            Some(eta) => format_duration(eta),
            None => "estimating...".to_string(),
        };
        format!(
            "Processed {} of {} ({} succeeded, {} failed, {} remaining, {} in flight), \
             {:.2} addr/s, ETA {}",
            self.start_index + self.processed,
            self.total,
            self.succeeded,
            self.failed,
            self.remaining(),
            self.in_flight,
            self.throughput(),
            eta
        )
    }
}

/// `1h02m03s`, `4m05s`, `6s`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h{:02}m{:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m{:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every address has been attempted
    Completed,
    /// Stopped by a signal after a clean flush
    Interrupted,
}

/// Final summary of one invocation
#[derive(Debug, Clone, Serialize)]
pub struct HarvestReport {
    pub status: RunStatus,
    pub total_addresses: usize,
    pub processed_this_run: usize,
    pub succeeded_this_run: usize,
    pub failed_this_run: usize,
    pub checkpoint: Checkpoint,
    pub dataset_rows: usize,
    pub elapsed_secs: f64,
}

impl HarvestReport {
    pub fn remaining(&self) -> usize {
        self.total_addresses
            .saturating_sub(self.checkpoint.last_processed_index as usize)
    }
}

impl fmt::Display for HarvestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.status {
            RunStatus::Completed => "completed",
            RunStatus::Interrupted => "interrupted",
        };
        write!(
            f,
            "Harvest {}: {} processed this run ({} succeeded, {} failed) in {}; \
             checkpoint at {} of {} ({} succeeded, {} failed in total, {} remaining); \
             dataset holds {} rows",
            status,
            self.processed_this_run,
            self.succeeded_this_run,
            self.failed_this_run,
            format_duration(Duration::from_secs_f64(self.elapsed_secs.max(0.0))),
            self.checkpoint.last_processed_index,
            self.total_addresses,
            self.checkpoint.total_succeeded,
            self.checkpoint.total_failed,
            self.remaining(),
            self.dataset_rows
        )
    }
}
