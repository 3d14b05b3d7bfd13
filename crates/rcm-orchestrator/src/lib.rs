//! rcm-orchestrator
//!
//! The Orchestrator (§4.1, §5): owns the bounded queue between the
//! `DocumentFetcher` and the pipeline's worker pool, and applies
//! backpressure by pausing/resuming the fetcher. `try_send`/`recv`
//! model §5's "non-blocking offer, blocking/polling take"; a bounded
//! `tokio::task::JoinSet` caps in-flight files at `worker_count`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rcm_audit::AuditSink;
use rcm_config::QueueConfig;
use rcm_pipeline::PipelineStage;
use rcm_source::{DocumentFetcher, FetchedDocument};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A soft, logged-only budget for one drain loop iteration (spec §5:
/// "sub-10ms soft budget"). Exceeding it never drops work; it's
/// visibility into contention, not a hard deadline.
const DRAIN_TICK_BUDGET: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, Default)]
pub struct OrchestratorStats {
    pub files_claimed: i32,
    pub files_ok: i32,
    pub files_failed: i32,
}

pub struct Orchestrator {
    queue: QueueConfig,
    fetcher: Arc<dyn DocumentFetcher>,
    stage: Arc<PipelineStage>,
    audit: AuditSink,
    processing: Arc<Mutex<HashSet<String>>>,
}

impl Orchestrator {
    pub fn new(queue: QueueConfig, fetcher: Arc<dyn DocumentFetcher>, stage: Arc<PipelineStage>, audit: AuditSink) -> Self {
        Self { queue, fetcher, stage, audit, processing: Arc::new(Mutex::new(HashSet::new())) }
    }

    /// Drains the queue to empty: starts the fetcher, dispatches every
    /// delivered document to a bounded worker pool, and stops once the
    /// fetcher's channel is closed and every in-flight file has
    /// finished. One call is one `IngestionRun` (spec §3).
    pub async fn run(&self, run_id: Uuid, config_hash: &str) -> Result<OrchestratorStats> {
        self.audit.start_run(run_id, config_hash).await?;

        let (tx, mut rx) = mpsc::channel::<FetchedDocument>(self.queue.capacity);
        self.fetcher.start(tx.clone()).context("fetcher failed to start")?;

        let mut join_set: JoinSet<(String, bool)> = JoinSet::new();
        let mut stats = OrchestratorStats::default();
        let mut paused = false;

        loop {
            let tick_started = Instant::now();

            tokio::select! {
                biased;

                Some(joined) = join_set.join_next(), if !join_set.is_empty() => {
                    self.record_joined(joined, &mut stats).await;
                }

                maybe_doc = rx.recv(), if join_set.len() < self.queue.worker_count => {
                    match maybe_doc {
                        Some(doc) => {
                            if !self.processing.lock().await.insert(doc.file_id.clone()) {
                                debug!(file_id = %doc.file_id, "duplicate in-flight delivery, skipping");
                                continue;
                            }
                            stats.files_claimed += 1;
                            self.dispatch(run_id, doc, &mut join_set);
                        }
                        None => {
                            if join_set.is_empty() {
                                break;
                            }
                        }
                    }
                }

                else => {
                    if join_set.is_empty() {
                        break;
                    }
                }
            }

            self.apply_backpressure(&tx, join_set.len(), &mut paused);

            let elapsed = tick_started.elapsed();
            if elapsed > DRAIN_TICK_BUDGET {
                warn!(elapsed_ms = elapsed.as_millis() as u64, "drain tick exceeded soft budget");
            }
        }

        while let Some(joined) = join_set.join_next().await {
            self.record_joined(joined, &mut stats).await;
        }

        self.audit.finish_run(run_id, stats.files_claimed, stats.files_ok, stats.files_failed).await?;
        info!(?stats, "ingestion run drained");
        Ok(stats)
    }

    /// A [`tokio::task::JoinError`] here means a worker task panicked
    /// rather than returned; that file's entry in `processing` is left
    /// behind, which is acceptable since the pipeline stage itself
    /// never panics on ordinary failures (every fallible step uses
    /// `?`, not `unwrap`).
    async fn record_joined(&self, joined: Result<(String, bool), tokio::task::JoinError>, stats: &mut OrchestratorStats) {
        match joined {
            Ok((file_id, succeeded)) => {
                self.processing.lock().await.remove(&file_id);
                if succeeded {
                    stats.files_ok += 1;
                } else {
                    stats.files_failed += 1;
                }
            }
            Err(e) => {
                warn!(error = %e, "worker task panicked");
                stats.files_failed += 1;
            }
        }
    }

    fn dispatch(&self, run_id: Uuid, doc: FetchedDocument, join_set: &mut JoinSet<(String, bool)>) {
        let stage = self.stage.clone();
        join_set.spawn(async move {
            let file_id = doc.file_id.clone();
            match stage.process_document(run_id, &doc).await {
                Ok(outcome) => (file_id, outcome.succeeded()),
                Err(e) => {
                    warn!(file_id = %doc.file_id, error = %e, "pipeline stage failed unexpectedly");
                    (file_id, false)
                }
            }
        });
    }

    /// Pauses the fetcher when the queue has no spare capacity left or
    /// the worker pool is at capacity ("the executor rejects a
    /// submission"); resumes once remaining queue capacity clears
    /// `2 * worker_count` (spec §5).
    fn apply_backpressure(&self, tx: &mpsc::Sender<FetchedDocument>, in_flight: usize, paused: &mut bool) {
        match backpressure_decision(
            tx.capacity(),
            in_flight,
            self.queue.worker_count,
            self.queue.resume_clearance_factor,
            *paused,
        ) {
            Some(true) => {
                self.fetcher.pause();
                *paused = true;
                debug!(in_flight, "fetcher paused");
            }
            Some(false) => {
                self.fetcher.resume();
                *paused = false;
                debug!(in_flight, "fetcher resumed");
            }
            None => {}
        }
    }
}

/// Pure backpressure policy (spec §5), factored out of [`Orchestrator`]
/// so it can be unit tested without a database-backed pipeline stage.
/// Returns `Some(true)` to pause, `Some(false)` to resume, `None` to
/// leave the current state alone.
fn backpressure_decision(
    remaining_capacity: usize,
    in_flight: usize,
    worker_count: usize,
    resume_clearance_factor: usize,
    paused: bool,
) -> Option<bool> {
    let executor_full = in_flight >= worker_count;
    if !paused && (remaining_capacity == 0 || executor_full) {
        Some(true)
    } else if paused && !executor_full && remaining_capacity >= resume_clearance_factor * worker_count {
        Some(false)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pauses_when_queue_is_full() {
        assert_eq!(backpressure_decision(0, 1, 4, 2, false), Some(true));
    }

    #[test]
    fn pauses_when_executor_is_full() {
        assert_eq!(backpressure_decision(10, 4, 4, 2, false), Some(true));
    }

    #[test]
    fn stays_paused_until_clearance_factor_reached() {
        assert_eq!(backpressure_decision(5, 0, 4, 2, true), None);
        assert_eq!(backpressure_decision(8, 0, 4, 2, true), Some(false));
    }

    #[test]
    fn no_change_when_healthy_and_running() {
        assert_eq!(backpressure_decision(4, 1, 4, 2, false), None);
    }
}
