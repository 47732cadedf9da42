//! Durable store adapters.
//!
//! Two capabilities back the pipeline: the singleton ingestion checkpoint
//! and the append-only message archive. Both are served by ClickHouse in
//! production ([`ClickHouseStore`] implements both traits), but the loop
//! only ever sees the traits.

mod clickhouse;

pub use clickhouse::{ClickHouseConfig, ClickHouseStore, MessageRow};

use crate::Result;
use async_trait::async_trait;
use chronicle_core::{Message, MessageId};
use std::collections::HashSet;

/// Reads and writes the singleton ingestion checkpoint.
#[async_trait]
pub trait CheckpointStore {
    /// The last saved id, or `None` when no checkpoint exists yet.
    ///
    /// An unreachable store is a soft failure: callers log it distinctly and
    /// proceed as if no checkpoint existed.
    async fn load(&self) -> Result<Option<MessageId>>;

    /// Overwrite the checkpoint with `id`.
    ///
    /// Safe to call repeatedly with the same or decreasing-per-sweep values;
    /// the guarantee that values only advance in the agreed direction is the
    /// caller's job.
    async fn save(&self, id: MessageId) -> Result<()>;
}

/// Append-only archive of channel messages, keyed by message id.
#[async_trait]
pub trait MessageStore {
    /// Which of `candidates` are already persisted.
    async fn existing_ids(&self, candidates: &[MessageId]) -> Result<HashSet<MessageId>>;

    /// Bulk-insert messages in one operation; returns the rows written.
    async fn insert_batch(&self, messages: &[Message]) -> Result<usize>;
}
