//! Message source adapters.
//!
//! This module provides adapters for the channel feeds the ingestion loop
//! can consume. Each source serves bounded, newest-first pages of messages
//! and reports rate limiting as a value rather than an error, so the loop
//! can honor the source's stated wait and reissue the identical request.
//!
//! # Available Sources
//!
//! - [`GatewaySource`] - HTTP channel-history gateway

mod gateway;

pub use gateway::{GatewayConfig, GatewaySource};

use crate::Result;
use async_trait::async_trait;
use chronicle_core::{Message, MessageId};
use std::time::Duration;

/// Outcome of a single page fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// A page of messages, newest first. An empty page means the channel
    /// history is exhausted below the requested bound.
    Page(Vec<Message>),

    /// The source asked for a pause before the same request is retried.
    RateLimited {
        /// How long the source says to wait.
        wait: Duration,
    },
}

/// A paged, channel-oriented message feed.
///
/// Sources return up to `limit` messages with id ≤ `max_id` (or the most
/// recent messages when `max_id` is unset), newest first. Rate limiting is
/// part of the return type; transport and auth failures are returned as
/// errors and treated as fatal by the caller.
#[async_trait]
pub trait MessageSource {
    /// Human-readable name for this source (used in logs).
    fn name(&self) -> &'static str;

    /// Fetch one page of channel history.
    async fn fetch(
        &self,
        channel: &str,
        limit: usize,
        max_id: Option<MessageId>,
    ) -> Result<FetchOutcome>;
}
