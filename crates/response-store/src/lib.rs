//! # Response Store - Request/Response Correlation
//!
//! A transport-agnostic table of outstanding requests keyed by message id.
//! A pluggable [`CorrelationStrategy`] extracts ids from requests and answers
//! and narrows generic events to either side, so the store never needs to
//! know the concrete event hierarchy it sits on top of.
//!
//! ## Flow
//!
//! ```text
//! sent(request) ──► pending[id] = {request, now}
//!                          │
//! received(answer) ───────►│ remove if id matches  ──► Some(request)
//!                          │ unknown / reclaimed   ──► None
//!                          │
//! clear() ────────────────►│ evict entries older than the timeout
//! ```

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod store;
pub mod strategy;

pub use store::{cleanup_task, PendingRequest, ResponseStore, StoreStats};
pub use strategy::CorrelationStrategy;

use thiserror::Error;

/// Errors raised while recording requests.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The request carries no message id and none was supplied.
    #[error("request carries no message id")]
    MissingId,

    /// The event passed to `sent_event` is not a request of this store.
    #[error("event is not a request tracked by this store")]
    NotARequest,
}
