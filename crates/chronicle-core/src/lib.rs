//! Core types and shared utilities for the Chronicle archiver.
//!
//! This crate provides:
//! - The [`Message`] record type shared between sources and stores
//! - Prometheus metrics helpers

mod message;
pub mod metrics;

pub use message::{Message, MessageId};
