//! Dedup filter and batch writer.
//!
//! Takes one page of candidate messages in source order (newest first),
//! filters it against the archive, and persists the net-new remainder in a
//! single bulk insert. Exactly one bulk existence check and at most one bulk
//! insert are issued per page; pages can be large, so row-by-row round trips
//! are off the table.

use crate::store::MessageStore;
use crate::Result;
use chronicle_core::{Message, MessageId};

/// What a page write actually persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Rows written by the bulk insert.
    pub written: usize,

    /// Id of the oldest message persisted from this page, if any.
    /// This is the value the checkpoint advances to.
    pub oldest_written: Option<MessageId>,

    /// Candidates skipped because they were already archived.
    pub duplicates: usize,

    /// Candidates dropped for carrying no text payload.
    pub without_text: usize,
}

/// Filter a page against the archive and bulk-insert the net-new messages.
///
/// The page must be in source order, newest first; the written subset keeps
/// that order, so its tail is the oldest message persisted. Textless
/// messages are dropped regardless of the existence check.
///
/// Errors from either bulk operation propagate; the caller credits the page
/// as zero rows written (fail closed).
pub async fn write_page<S: MessageStore>(store: &S, page: &[Message]) -> Result<WriteOutcome> {
    let candidate_ids: Vec<MessageId> = page.iter().map(|m| m.id).collect();
    let existing = store.existing_ids(&candidate_ids).await?;

    let mut new_messages: Vec<Message> = Vec::new();
    let mut duplicates = 0usize;
    let mut without_text = 0usize;

    for message in page {
        if !message.has_text() {
            without_text += 1;
            continue;
        }
        if existing.contains(&message.id) {
            duplicates += 1;
            continue;
        }
        new_messages.push(message.clone());
    }

    if new_messages.is_empty() {
        return Ok(WriteOutcome {
            duplicates,
            without_text,
            ..WriteOutcome::default()
        });
    }

    let written = store.insert_batch(&new_messages).await?;
    let oldest_written = new_messages.last().map(|m| m.id);

    Ok(WriteOutcome {
        written,
        oldest_written,
        duplicates,
        without_text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MessageStore;
    use crate::{Error, Result};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn msg(id: MessageId) -> Message {
        Message {
            id,
            text: Some(format!("message {id}")),
            sent_at: Utc.timestamp_opt(1_700_000_000 + id, 0).unwrap(),
            sender_id: Some(7),
        }
    }

    fn textless(id: MessageId) -> Message {
        Message {
            text: None,
            ..msg(id)
        }
    }

    /// In-memory archive that records how it is called.
    #[derive(Default)]
    struct RecordingStore {
        archived: Mutex<HashSet<MessageId>>,
        inserted: Mutex<Vec<Vec<MessageId>>>,
        existing_calls: AtomicUsize,
        insert_calls: AtomicUsize,
        fail_insert: bool,
    }

    impl RecordingStore {
        fn with_archived(ids: &[MessageId]) -> Self {
            Self {
                archived: Mutex::new(ids.iter().copied().collect()),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl MessageStore for RecordingStore {
        async fn existing_ids(&self, candidates: &[MessageId]) -> Result<HashSet<MessageId>> {
            self.existing_calls.fetch_add(1, Ordering::SeqCst);
            let archived = self.archived.lock().unwrap();
            Ok(candidates
                .iter()
                .copied()
                .filter(|id| archived.contains(id))
                .collect())
        }

        async fn insert_batch(&self, messages: &[Message]) -> Result<usize> {
            self.insert_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_insert {
                return Err(Error::Source("insert refused".to_string()));
            }
            let ids: Vec<MessageId> = messages.iter().map(|m| m.id).collect();
            self.archived.lock().unwrap().extend(ids.iter().copied());
            self.inserted.lock().unwrap().push(ids);
            Ok(messages.len())
        }
    }

    #[tokio::test]
    async fn test_writes_new_messages_and_reports_oldest() {
        let store = RecordingStore::default();
        let page: Vec<Message> = (401..=500).rev().map(msg).collect();

        let outcome = write_page(&store, &page).await.unwrap();

        assert_eq!(outcome.written, 100);
        assert_eq!(outcome.oldest_written, Some(401));
        assert_eq!(outcome.duplicates, 0);
        assert_eq!(outcome.without_text, 0);
    }

    #[tokio::test]
    async fn test_one_existence_check_and_one_insert_per_page() {
        let store = RecordingStore::default();
        let page: Vec<Message> = (1..=50).rev().map(msg).collect();

        write_page(&store, &page).await.unwrap();

        assert_eq!(store.existing_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.insert_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_duplicates_are_filtered() {
        let store = RecordingStore::with_archived(&[500, 499]);
        let page = vec![msg(500), msg(499), msg(498)];

        let outcome = write_page(&store, &page).await.unwrap();

        assert_eq!(outcome.written, 1);
        assert_eq!(outcome.oldest_written, Some(498));
        assert_eq!(outcome.duplicates, 2);
        assert_eq!(store.inserted.lock().unwrap()[0], vec![498]);
    }

    #[tokio::test]
    async fn test_textless_dropped_even_when_not_archived() {
        let store = RecordingStore::default();
        let page = vec![msg(500), textless(499), msg(498)];

        let outcome = write_page(&store, &page).await.unwrap();

        assert_eq!(outcome.written, 2);
        assert_eq!(outcome.without_text, 1);
        assert_eq!(outcome.oldest_written, Some(498));
        assert_eq!(store.inserted.lock().unwrap()[0], vec![500, 498]);
    }

    #[tokio::test]
    async fn test_fully_duplicate_page_skips_insert() {
        let store = RecordingStore::with_archived(&[500, 499, 498]);
        let page = vec![msg(500), msg(499), msg(498)];

        let outcome = write_page(&store, &page).await.unwrap();

        assert_eq!(outcome.written, 0);
        assert_eq!(outcome.oldest_written, None);
        assert_eq!(outcome.duplicates, 3);
        assert_eq!(store.insert_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_insert_failure_propagates() {
        let store = RecordingStore {
            fail_insert: true,
            ..RecordingStore::default()
        };
        let page = vec![msg(500)];

        let result = write_page(&store, &page).await;

        assert!(result.is_err());
        assert_eq!(store.insert_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_written_order_preserves_page_order() {
        let store = RecordingStore::with_archived(&[499]);
        let page = vec![msg(500), msg(499), textless(498), msg(497), msg(496)];

        let outcome = write_page(&store, &page).await.unwrap();

        assert_eq!(store.inserted.lock().unwrap()[0], vec![500, 497, 496]);
        assert_eq!(outcome.oldest_written, Some(496));
    }
}
