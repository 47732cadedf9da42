//! Checkpointed ingestion loop.
//!
//! Drives repeated fetch → filter/write → checkpoint cycles against a
//! channel feed, walking history backward from the most recent message (or
//! from the saved checkpoint). The loop owns backoff and termination and
//! flushes the last known checkpoint on every exit path.
//!
//! # State machine
//!
//! ```text
//! Fetch ──empty page──────────────▶ Done(Exhausted)
//!   │ ──rate limited──▶ Backoff ──▶ Fetch        (same cursor)
//!   │ ──fatal error───▶ (flush checkpoint, propagate)
//!   ▼
//! Write ──zero new rows──────────▶ Done(NothingNew)
//!   │ ──rows written: save checkpoint, cursor = oldest - 1, pacing delay
//!   ▼
//! Fetch ...
//! ```
//!
//! Interruption is observed at the loop boundary, never mid-write, and
//! funnels into `Done(Interrupted)`. Every exit path runs the same terminal
//! step: flush the checkpoint, report.
//!
//! # Ordering
//!
//! One page is in flight at a time. The cursor only advances after the
//! batch is written, so a crash between write and checkpoint-save merely
//! replays a batch the store already dedups by id.

use crate::source::{FetchOutcome, MessageSource};
use crate::store::{CheckpointStore, MessageStore};
use crate::writer::{WriteOutcome, write_page};
use crate::Result;
use chronicle_core::{Message, MessageId};
use metrics::{counter, gauge};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Configuration for an ingestion run.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Channel to mirror.
    pub channel: String,

    /// Messages requested per page.
    pub batch_size: usize,

    /// Fixed pause after each successful cycle, independent of backoff,
    /// to stay under the source's implicit rate budget.
    pub page_delay: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            channel: String::new(),
            batch_size: 100,
            page_delay: Duration::from_secs(2),
        }
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The source returned an empty page: history is exhausted.
    Exhausted,

    /// A page yielded zero net-new rows (total overlap, all textless, or a
    /// failed bulk write). Treated as end-of-useful-stream by policy.
    NothingNew,

    /// Shutdown was requested.
    Interrupted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StopReason::Exhausted => "channel history exhausted",
            StopReason::NothingNew => "nothing new to save",
            StopReason::Interrupted => "interrupted by operator",
        })
    }
}

/// Statistics and final state of an ingestion run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Pages fetched from the source.
    pub pages: usize,

    /// Messages received before dedup.
    pub messages_fetched: usize,

    /// Net-new messages written to the archive.
    pub messages_written: usize,

    /// Messages skipped as already archived.
    pub duplicates_skipped: usize,

    /// Messages dropped for carrying no text.
    pub without_text: usize,

    /// Rate-limit signals honored.
    pub rate_limit_hits: usize,

    /// Last known-good checkpoint: the loaded value until the first batch
    /// save succeeds, then the latest saved id.
    pub checkpoint: Option<MessageId>,

    /// Why the run stopped. `None` only while the run is in flight.
    pub stop_reason: Option<StopReason>,
}

/// Loop states. Each iteration consumes the current state and produces the
/// next one; `Done` is terminal.
enum LoopState {
    Fetch,
    Backoff { wait: Duration },
    Write { page: Vec<Message> },
    Done(StopReason),
}

/// The ingestion loop.
///
/// Generic over the source and store capabilities so tests can script both;
/// production wires a [`GatewaySource`](crate::GatewaySource) and a
/// [`ClickHouseStore`](crate::ClickHouseStore).
pub struct IngestRunner<S, D> {
    source: S,
    store: D,
    config: IngestConfig,
    /// Cleared by the shutdown handler; checked at the loop boundary.
    running: Arc<AtomicBool>,
}

impl<S, D> IngestRunner<S, D>
where
    S: MessageSource,
    D: CheckpointStore + MessageStore,
{
    pub fn new(source: S, store: D, config: IngestConfig, running: Arc<AtomicBool>) -> Self {
        Self {
            source,
            store,
            config,
            running,
        }
    }

    /// Run the loop to completion.
    ///
    /// Every exit path (graceful stop, interruption, fatal source error)
    /// flushes the last known checkpoint before returning. Fatal errors
    /// propagate after the flush.
    pub async fn run(self) -> Result<RunReport> {
        let mut report = RunReport::default();
        let outcome = self.drive(&mut report).await;

        self.flush_checkpoint(&report).await;

        match outcome {
            Ok(reason) => {
                report.stop_reason = Some(reason);
                tracing::info!(
                    written = report.messages_written,
                    checkpoint = ?report.checkpoint,
                    "ingestion stopped: {reason}"
                );
                Ok(report)
            }
            Err(e) => {
                tracing::error!("ingestion aborted: {e}");
                Err(e)
            }
        }
    }

    async fn drive(&self, report: &mut RunReport) -> Result<StopReason> {
        tracing::info!(
            "connected to {} source, mirroring channel {}",
            self.source.name(),
            self.config.channel
        );

        let mut cursor = match self.store.load().await {
            Ok(Some(id)) => {
                tracing::info!("resuming from checkpoint id {id}");
                Some(id)
            }
            Ok(None) => {
                tracing::info!("no checkpoint found, fetching from the most recent messages");
                None
            }
            Err(e) => {
                // Degraded, not fatal: behaves like a fresh run and re-scans
                // the full history. Logged apart from the genuine-absence
                // case above because it silently changes resume behavior.
                tracing::warn!(
                    "checkpoint load failed, falling back to a full fetch from latest: {e}"
                );
                None
            }
        };
        report.checkpoint = cursor;

        let mut state = LoopState::Fetch;

        loop {
            if !self.running.load(Ordering::SeqCst) && !matches!(state, LoopState::Done(_)) {
                tracing::info!("stop requested, interrupting at the loop boundary");
                state = LoopState::Done(StopReason::Interrupted);
            }

            state = match state {
                LoopState::Fetch => {
                    let outcome = self
                        .source
                        .fetch(&self.config.channel, self.config.batch_size, cursor)
                        .await?;

                    match outcome {
                        FetchOutcome::Page(page) if page.is_empty() => {
                            tracing::info!("no more messages, stopping");
                            LoopState::Done(StopReason::Exhausted)
                        }
                        FetchOutcome::Page(page) => {
                            report.pages += 1;
                            report.messages_fetched += page.len();
                            counter!("ingest_pages_total").increment(1);
                            counter!("ingest_messages_fetched_total")
                                .increment(page.len() as u64);
                            tracing::info!("fetched {} messages, processing", page.len());
                            LoopState::Write { page }
                        }
                        FetchOutcome::RateLimited { wait } => {
                            report.rate_limit_hits += 1;
                            counter!("ingest_rate_limited_total").increment(1);
                            counter!("ingest_backoff_seconds_total").increment(wait.as_secs());
                            tracing::warn!(
                                "rate limited, waiting {}s before retrying",
                                wait.as_secs()
                            );
                            LoopState::Backoff { wait }
                        }
                    }
                }

                LoopState::Backoff { wait } => {
                    // Sleep exactly what the source asked for, then reissue
                    // the identical request: the cursor is untouched.
                    tokio::time::sleep(wait).await;
                    LoopState::Fetch
                }

                LoopState::Write { page } => {
                    let outcome = match write_page(&self.store, &page).await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            // Fail closed: zero rows credited, which routes to
                            // the nothing-new stop instead of retrying the
                            // batch against a failing store.
                            tracing::warn!("page write failed, crediting zero rows: {e}");
                            WriteOutcome::default()
                        }
                    };

                    report.duplicates_skipped += outcome.duplicates;
                    report.without_text += outcome.without_text;
                    counter!("ingest_messages_duplicate_total")
                        .increment(outcome.duplicates as u64);
                    counter!("ingest_messages_textless_total")
                        .increment(outcome.without_text as u64);

                    match outcome.oldest_written {
                        None => {
                            tracing::info!("no new messages to save, stopping");
                            LoopState::Done(StopReason::NothingNew)
                        }
                        Some(oldest) => {
                            report.messages_written += outcome.written;
                            counter!("ingest_messages_written_total")
                                .increment(outcome.written as u64);
                            tracing::info!("saved {} new messages", outcome.written);

                            self.save_checkpoint(oldest, report).await;
                            cursor = Some(oldest - 1);

                            // Fixed pacing between cycles, independent of
                            // backoff.
                            tokio::time::sleep(self.config.page_delay).await;
                            LoopState::Fetch
                        }
                    }
                }

                LoopState::Done(reason) => return Ok(reason),
            };
        }
    }

    async fn save_checkpoint(&self, id: MessageId, report: &mut RunReport) {
        match self.store.save(id).await {
            Ok(()) => {
                report.checkpoint = Some(id);
                gauge!("ingest_checkpoint_id").set(id as f64);
                tracing::debug!("checkpoint saved at id {id}");
            }
            Err(e) => {
                // A rerun re-fetches the unsaved span and dedup makes the
                // replay harmless, so the sweep keeps going.
                tracing::warn!("checkpoint save failed at id {id}, continuing: {e}");
            }
        }
    }

    /// Terminal step shared by all exit paths: persist the most advanced
    /// known-good checkpoint, best-effort.
    async fn flush_checkpoint(&self, report: &RunReport) {
        let Some(id) = report.checkpoint else {
            return;
        };
        if let Err(e) = self.store.save(id).await {
            tracing::error!("final checkpoint flush failed at id {id}: {e}");
        } else {
            tracing::info!("checkpoint flushed at id {id}");
        }
    }
}
