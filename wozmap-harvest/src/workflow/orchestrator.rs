//! Harvest coordinator
//!
//! One coordinator task owns the accumulator, the dataset writer and the checkpoint
//! store. Item tasks are spawned up to the worker limit and refilled as they finish.
//! Finished items pass through the [`PrefixTracker`]; once `batch_size` items of the
//! prefix are waiting, the batch is written to the dataset and then the checkpoint is
//! moved past it.
//!
//! On cancellation no new items are dispatched, in-flight items are drained (items
//! waiting in backoff give up) and whatever prefix has formed is flushed. On a fatal
//! error in-flight items are aborted and the error is returned; the last saved
//! checkpoint stays the resume point.

use super::item::{ItemOutcome, ItemRunner};
use super::progress::{HarvestReport, HarvestStats, PrefixTracker, RunStatus};
use super::retry::BackoffPolicy;
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::dataset::{BatchWriter, SchemaAccumulator};
use crate::error::{HarvestError, HarvestResult};
use crate::services::{AddressResolver, ValuationFetcher};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use wozmap_common::Address;

/// Tuning for one harvest run
#[derive(Debug, Clone)]
pub struct HarvestSettings {
    /// Prefix items per dataset flush and checkpoint save
    pub batch_size: usize,
    /// Concurrent item tasks
    pub workers: usize,
    pub backoff: BackoffPolicy,
    pub progress_interval: Duration,
    /// Start from the saved checkpoint (false: start from index 0)
    pub resume: bool,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            batch_size: 500,
            workers: 4,
            backoff: BackoffPolicy::default(),
            progress_interval: Duration::from_secs(30),
            resume: true,
        }
    }
}

/// Items of the prefix released since the last flush
#[derive(Debug, Default)]
struct PendingBatch {
    processed: u64,
    succeeded: u64,
    failed: u64,
}

/// Drives the address list through resolution, retrieval and persistence
pub struct Orchestrator {
    resolver: Arc<dyn AddressResolver>,
    fetcher: Arc<dyn ValuationFetcher>,
    store: CheckpointStore,
    writer: BatchWriter,
    settings: HarvestSettings,
}

impl Orchestrator {
    pub fn new(
        resolver: Arc<dyn AddressResolver>,
        fetcher: Arc<dyn ValuationFetcher>,
        store: CheckpointStore,
        writer: BatchWriter,
        settings: HarvestSettings,
    ) -> Self {
        Self {
            resolver,
            fetcher,
            store,
            writer,
            settings,
        }
    }

    /// Run until every address is attempted or `cancel` fires
    pub async fn run(
        mut self,
        addresses: Vec<Address>,
        cancel: CancellationToken,
    ) -> HarvestResult<HarvestReport> {
        let total = addresses.len();
        let mut checkpoint = if self.settings.resume {
            self.store.load()?
        } else {
            tracing::info!("Resume disabled, starting from the first address");
            Checkpoint::default()
        };

        let start = usize::try_from(checkpoint.last_processed_index).unwrap_or(usize::MAX);
        if start > total {
            return Err(HarvestError::CheckpointRead {
                path: self.store.path().to_path_buf(),
                reason: format!(
                    "checkpoint index {} is beyond the end of the input ({} addresses)",
                    checkpoint.last_processed_index, total
                ),
            });
        }

        let mut stats = HarvestStats::new(total, start);
        if start == total {
            tracing::info!(total, "All addresses already processed, nothing to do");
            return Ok(self.report(RunStatus::Completed, &stats, checkpoint));
        }

        tracing::info!(
            total,
            start_index = start,
            succeeded = checkpoint.total_succeeded,
            failed = checkpoint.total_failed,
            workers = self.settings.workers,
            batch_size = self.settings.batch_size,
            "Starting harvest"
        );

        let addresses = Arc::new(addresses);
        let runner = Arc::new(ItemRunner::new(
            Arc::clone(&self.resolver),
            Arc::clone(&self.fetcher),
            self.settings.backoff,
            cancel.clone(),
        ));

        let spawn_item = |index: usize| -> JoinHandle<(usize, ItemOutcome)> {
            let runner = Arc::clone(&runner);
            let addresses = Arc::clone(&addresses);
            tokio::spawn(
                async move {
                    let outcome = runner.run(index, &addresses[index]).await;
                    (index, outcome)
                }
                .in_current_span(),
            )
        };

        let mut tracker = PrefixTracker::new(start);
        let mut accumulator = SchemaAccumulator::new();
        let mut pending = PendingBatch::default();
        let mut tasks = FuturesUnordered::new();
        let mut next_dispatch = start;
        let mut stopping = false;

        let mut progress_interval = tokio::time::interval(self.settings.progress_interval);
        progress_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        progress_interval.tick().await;

        // Seed initial tasks
        while tasks.len() < self.settings.workers
            && next_dispatch < total
            && !cancel.is_cancelled()
        {
            tasks.push(spawn_item(next_dispatch));
            next_dispatch += 1;
        }

        while !tasks.is_empty() {
            tokio::select! {
                Some(joined) = tasks.next() => {
                    let (index, outcome) = match joined {
                        Ok(result) => result,
                        Err(e) => {
                            abort_all(&tasks);
                            return Err(HarvestError::Internal(format!("Item task failed: {}", e)));
                        }
                    };
                    tracing::trace!(index, outcome = outcome.label(), "Item finished");
                    tracker.record(index, outcome);

                    for (_, outcome) in tracker.release() {
                        stats.record(&outcome);
                        pending.processed += 1;
                        match outcome {
                            ItemOutcome::Fetched(row) => {
                                pending.succeeded += 1;
                                accumulator.push(row);
                            }
                            _ => pending.failed += 1,
                        }
                    }

                    if pending.processed >= self.settings.batch_size as u64 {
                        let flushed = self.flush(&mut accumulator, &mut pending, &mut checkpoint);
                        if let Err(e) = flushed {
                            abort_all(&tasks);
                            return Err(e);
                        }
                    }

                    if !stopping && !cancel.is_cancelled() {
                        while tasks.len() < self.settings.workers && next_dispatch < total {
                            tasks.push(spawn_item(next_dispatch));
                            next_dispatch += 1;
                        }
                    }
                    stats.in_flight = tasks.len();
                }
                _ = cancel.cancelled(), if !stopping => {
                    stopping = true;
                    tracing::info!(
                        in_flight = tasks.len(),
                        "Stop requested, draining in-flight items"
                    );
                }
                _ = progress_interval.tick() => {
                    stats.in_flight = tasks.len();
                    tracing::info!("{}", stats.display_string());
                }
            }
        }

        self.flush(&mut accumulator, &mut pending, &mut checkpoint)?;

        if tracker.is_halted() || tracker.held() > 0 {
            tracing::info!(
                resume_index = tracker.next_index(),
                held = tracker.held(),
                "Completions past the resume point are discarded and will be attempted again"
            );
        }

        let status = if tracker.next_index() == total {
            RunStatus::Completed
        } else {
            RunStatus::Interrupted
        };
        let report = self.report(status, &stats, checkpoint);
        tracing::info!(
            status = ?report.status,
            processed = report.processed_this_run,
            index = report.checkpoint.last_processed_index,
            "Harvest finished"
        );
        Ok(report)
    }

    /// Write buffered rows, then advance the checkpoint past the released prefix
    fn flush(
        &mut self,
        accumulator: &mut SchemaAccumulator,
        pending: &mut PendingBatch,
        checkpoint: &mut Checkpoint,
    ) -> HarvestResult<()> {
        if pending.processed == 0 {
            return Ok(());
        }

        let batch = accumulator.reconcile(self.writer.schema());
        let summary = self.writer.flush(batch)?;

        let next = checkpoint.advanced(pending.processed, pending.succeeded, pending.failed);
        self.store.save(&next)?;

        tracing::info!(
            index = next.last_processed_index,
            batch = pending.processed,
            inserted = summary.inserted,
            replaced = summary.replaced,
            dataset_rows = summary.total_rows,
            "Batch persisted"
        );

        *checkpoint = next;
        *pending = PendingBatch::default();
        Ok(())
    }

    fn report(
        &self,
        status: RunStatus,
        stats: &HarvestStats,
        checkpoint: Checkpoint,
    ) -> HarvestReport {
        HarvestReport {
            status,
            total_addresses: stats.total,
            processed_this_run: stats.processed,
            succeeded_this_run: stats.succeeded,
            failed_this_run: stats.failed,
            checkpoint,
            dataset_rows: self.writer.len(),
            elapsed_secs: stats.elapsed().as_secs_f64(),
        }
    }
}

fn abort_all(tasks: &FuturesUnordered<JoinHandle<(usize, ItemOutcome)>>) {
    for task in tasks.iter() {
        task.abort();
    }
}
