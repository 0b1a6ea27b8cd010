//! Error types for the checkout and sync pipeline.
//!
//! Local SQLite helpers keep the `Result<T, String>` convention; the types
//! here cover the boundaries where callers branch on the failure kind.

use std::time::Duration;

use thiserror::Error;

/// Why a connectivity probe could not confirm reachability. Callers only
/// see `false`; the variant is for logs.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("probe request failed: {0}")]
    Request(String),
    #[error("probe endpoint answered HTTP {0}")]
    Status(u16),
}

/// Failure reported by a [`crate::docstore::DocumentStore`] commit.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    /// The request never reached the backend (DNS, TLS, refused, reset).
    #[error("{0}")]
    Transport(String),
    /// The backend answered but refused the batch.
    #[error("{message} (HTTP {status})")]
    Rejected { status: u16, message: String },
    /// The backend accepted the request but the body was not understood.
    #[error("invalid commit response: {0}")]
    InvalidResponse(String),
    /// No authenticated session to sign the request with.
    #[error("not signed in")]
    Unauthenticated,
}

/// Failure of a single [`crate::writer::TransactionWriter::write`] call.
///
/// Every variant means "could not confirm": none of the sale's effects are
/// assumed to have been applied.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum WriteError {
    #[error("transaction write timed out after {0:?}")]
    Timeout(Duration),
    #[error("atomic commit failed: {0}")]
    Commit(#[from] StoreError),
    #[error("sale rejected before commit: {0}")]
    InvalidSale(String),
}

/// Failure to persist the offline queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("offline queue storage: {0}")]
    Storage(String),
    #[error("offline queue serialization: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failure delivering a staff push notification. Always logged, never
/// propagated into checkout.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification endpoint not configured")]
    NotConfigured,
    #[error("notification request failed: {0}")]
    Request(String),
    #[error("notification endpoint returned HTTP {0}")]
    Status(u16),
}
