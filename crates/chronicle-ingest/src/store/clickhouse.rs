//! ClickHouse store adapter.
//!
//! Backs both store capabilities with one ClickHouse database:
//!
//! - `messages` holds the archived history, one row per message, keyed by
//!   `(channel, message_id)`. The engine collapses accidental re-inserts,
//!   but dedup responsibility stays with the ingestion loop.
//! - `ingest_checkpoint` holds one logical row per stream. Overwrites are
//!   inserts of a fresher row; reads take the newest (the ClickHouse idiom
//!   for a mutable singleton).
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS messages (
//!     channel    String,
//!     message_id Int64,
//!     sender_id  Int64,
//!     sent_at    DateTime,
//!     content    String
//! ) ENGINE = ReplacingMergeTree
//! ORDER BY (channel, message_id);
//!
//! CREATE TABLE IF NOT EXISTS ingest_checkpoint (
//!     stream        String,
//!     last_saved_id Int64,
//!     updated_at    DateTime
//! ) ENGINE = ReplacingMergeTree(updated_at)
//! ORDER BY stream;
//! ```

use super::{CheckpointStore, MessageStore};
use crate::Result;
use async_trait::async_trait;
use chronicle_core::{Message, MessageId};
use chrono::Utc;
use clickhouse::{Client, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Configuration for the ClickHouse store.
#[derive(Debug, Clone)]
pub struct ClickHouseConfig {
    /// ClickHouse server URL (e.g., "http://localhost:8123")
    pub url: String,

    /// Database name
    pub database: String,

    /// Table name for archived messages
    pub messages_table: String,

    /// Table name for the ingestion checkpoint
    pub checkpoint_table: String,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8123".to_string(),
            database: "chronicle".to_string(),
            messages_table: "messages".to_string(),
            checkpoint_table: "ingest_checkpoint".to_string(),
        }
    }
}

/// Row structure matching the ClickHouse messages table.
#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct MessageRow {
    pub channel: String,
    pub message_id: i64,
    pub sender_id: i64,
    pub sent_at: u32, // DateTime is stored as Unix timestamp
    pub content: String,
}

impl MessageRow {
    fn from_message(channel: &str, message: &Message) -> Self {
        Self {
            channel: channel.to_string(),
            message_id: message.id,
            // Unknown senders are stored as 0; the column is non-nullable.
            sender_id: message.sender_id.unwrap_or(0),
            sent_at: u32::try_from(message.sent_at.timestamp()).unwrap_or(0),
            content: message.text.clone().unwrap_or_default(),
        }
    }
}

/// Row structure matching the ClickHouse checkpoint table.
#[derive(Debug, Clone, Row, Serialize, Deserialize)]
struct CheckpointRow {
    stream: String,
    last_saved_id: i64,
    updated_at: u32,
}

/// ClickHouse-backed store, bound to one channel stream.
pub struct ClickHouseStore {
    client: Client,
    config: ClickHouseConfig,
    channel: String,
}

impl ClickHouseStore {
    /// Create a new store for the given channel.
    pub fn new(config: ClickHouseConfig, channel: impl Into<String>) -> Self {
        let client = Client::default()
            .with_url(&config.url)
            .with_database(&config.database);

        let channel = channel.into();

        tracing::info!(
            "ClickHouse store initialized: url={}, database={}, channel={}",
            config.url, config.database, channel
        );

        Self {
            client,
            config,
            channel,
        }
    }

    /// Create both tables if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        let messages_ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                channel    String,
                message_id Int64,
                sender_id  Int64,
                sent_at    DateTime,
                content    String
            ) ENGINE = ReplacingMergeTree
            ORDER BY (channel, message_id)",
            self.config.messages_table
        );
        self.client.query(&messages_ddl).execute().await?;

        let checkpoint_ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                stream        String,
                last_saved_id Int64,
                updated_at    DateTime
            ) ENGINE = ReplacingMergeTree(updated_at)
            ORDER BY stream",
            self.config.checkpoint_table
        );
        self.client.query(&checkpoint_ddl).execute().await?;

        Ok(())
    }

    /// Check that the server is reachable.
    pub async fn health_check(&self) -> Result<bool> {
        let result: u8 = self.client.query("SELECT 1").fetch_one().await?;
        Ok(result == 1)
    }

    /// Count of archived messages for this channel.
    pub async fn message_count(&self) -> Result<u64> {
        let sql = format!(
            "SELECT count() FROM {} WHERE channel = ?",
            self.config.messages_table
        );
        let count: u64 = self
            .client
            .query(&sql)
            .bind(self.channel.as_str())
            .fetch_one()
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl CheckpointStore for ClickHouseStore {
    async fn load(&self) -> Result<Option<MessageId>> {
        let sql = format!(
            "SELECT last_saved_id FROM {} WHERE stream = ? ORDER BY updated_at DESC LIMIT 1",
            self.config.checkpoint_table
        );
        let id: Option<i64> = self
            .client
            .query(&sql)
            .bind(self.channel.as_str())
            .fetch_optional()
            .await?;
        Ok(id)
    }

    async fn save(&self, id: MessageId) -> Result<()> {
        let row = CheckpointRow {
            stream: self.channel.clone(),
            last_saved_id: id,
            updated_at: u32::try_from(Utc::now().timestamp()).unwrap_or(0),
        };

        let mut insert = self.client.insert(&self.config.checkpoint_table)?;
        insert.write(&row).await?;
        insert.end().await?;

        Ok(())
    }
}

#[async_trait]
impl MessageStore for ClickHouseStore {
    async fn existing_ids(&self, candidates: &[MessageId]) -> Result<HashSet<MessageId>> {
        if candidates.is_empty() {
            return Ok(HashSet::new());
        }

        let sql = format!(
            "SELECT message_id FROM {} WHERE channel = ? AND message_id IN ?",
            self.config.messages_table
        );
        let ids: Vec<i64> = self
            .client
            .query(&sql)
            .bind(self.channel.as_str())
            .bind(candidates)
            .fetch_all()
            .await?;

        Ok(ids.into_iter().collect())
    }

    async fn insert_batch(&self, messages: &[Message]) -> Result<usize> {
        if messages.is_empty() {
            return Ok(0);
        }

        let mut insert = self.client.insert(&self.config.messages_table)?;
        for message in messages {
            insert
                .write(&MessageRow::from_message(&self.channel, message))
                .await?;
        }
        insert.end().await?;

        Ok(messages.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_config_default() {
        let config = ClickHouseConfig::default();
        assert_eq!(config.database, "chronicle");
        assert_eq!(config.messages_table, "messages");
        assert_eq!(config.checkpoint_table, "ingest_checkpoint");
    }

    #[test]
    fn test_row_from_message() {
        let message = Message {
            id: 500,
            text: Some("hello".to_string()),
            sent_at: chrono::Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            sender_id: Some(42),
        };
        let row = MessageRow::from_message("history_channel", &message);
        assert_eq!(row.channel, "history_channel");
        assert_eq!(row.message_id, 500);
        assert_eq!(row.sender_id, 42);
        assert_eq!(row.sent_at, 1_700_000_000);
        assert_eq!(row.content, "hello");
    }

    #[test]
    fn test_row_from_message_defaults() {
        let message = Message {
            id: 7,
            text: None,
            sent_at: chrono::Utc.timestamp_opt(0, 0).unwrap(),
            sender_id: None,
        };
        let row = MessageRow::from_message("c", &message);
        assert_eq!(row.sender_id, 0);
        assert_eq!(row.content, "");
    }

    // Integration tests would require a running ClickHouse instance
}
