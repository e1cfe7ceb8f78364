//! Contracts with the external document store.
//!
//! The core never talks to a concrete database; it reads snapshots, writes
//! commands and inspects pending commands through these traits. Every call
//! site bounds the I/O with [`bounded`] so one slow request cannot starve a
//! whole tick.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::control::types::{Command, SystemSnapshot};

/// Failures reported by the document store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The request did not complete in time.
    #[error("store request timed out after {0:?}")]
    Timeout(Duration),
    /// The store rejected the write.
    #[error("write to `{path}` rejected: {message}")]
    Rejected {
        /// Document path.
        path: String,
        /// Store-provided reason.
        message: String,
    },
}

/// A command record as left in the store by a command write.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCommand {
    /// Target zone.
    pub zone: String,
    /// Requested relay state.
    pub command: Command,
    /// When the command was written.
    pub issued_at: DateTime<Utc>,
    /// Store-side attempt counter for this command.
    pub attempt: u32,
    /// Set once the zone hardware confirms the relay change.
    pub acknowledged: bool,
}

/// Source of system snapshots.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Reads the latest metrics for every zone.
    async fn fetch_snapshot(&self) -> Result<SystemSnapshot, StoreError>;
}

/// Sink for relay commands.
#[async_trait]
pub trait CommandSink: Send + Sync {
    /// Writes one command for one zone.
    async fn send_command(&self, zone: &str, command: Command) -> Result<(), StoreError>;
}

/// View of commands written but not yet acknowledged.
#[async_trait]
pub trait PendingCommands: Send + Sync {
    /// Lists unacknowledged command records.
    async fn pending_commands(&self) -> Result<Vec<PendingCommand>, StoreError>;
}

/// Runs a store request with an upper bound on its duration.
///
/// # Errors
///
/// Returns the request's own error, or `StoreError::Timeout` if it did not
/// finish within `limit`.
pub async fn bounded<T, F>(limit: Duration, request: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(limit, request)
        .await
        .map_err(|_| StoreError::Timeout(limit))?
}
