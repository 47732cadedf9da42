//! Channel message types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source-assigned message identifier.
///
/// Within a channel, ids are strictly increasing with recency, so they double
/// as the pagination boundary for backward history sweeps.
pub type MessageId = i64;

/// One message fetched from a channel feed.
///
/// Immutable once fetched; the archive never rewrites history. The gateway
/// wire format is the same JSON shape, so this type derives serde directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Source-assigned id, unique within the channel.
    pub id: MessageId,

    /// Message body. Absent for service messages and media-only posts.
    #[serde(default)]
    pub text: Option<String>,

    /// When the source recorded the message.
    pub sent_at: DateTime<Utc>,

    /// Sender identifier as reported by the source, when known.
    #[serde(default)]
    pub sender_id: Option<i64>,
}

impl Message {
    /// Whether the message carries a text payload worth archiving.
    ///
    /// Media-only and service messages have no text; the pipeline never
    /// archives them.
    pub fn has_text(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}
