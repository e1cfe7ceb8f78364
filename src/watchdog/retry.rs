use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::control::clock::elapsed;
use crate::control::types::Command;

/// Why a command entered the retry queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Written but never acknowledged.
    Timeout,
    /// The dispatcher exhausted its in-line attempts.
    DispatchFailure,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Timeout => "TIMEOUT",
            Self::DispatchFailure => "DISPATCH_FAILURE",
        })
    }
}

/// A command awaiting another delivery attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedCommandEntry {
    /// Target zone.
    pub zone: String,
    /// Command to re-send.
    pub command: Command,
    /// Why it failed.
    pub reason: FailureReason,
    /// Retries attempted so far.
    pub retry_count: u32,
    /// When the last attempt (or the original failure) happened.
    pub last_attempt_at: DateTime<Utc>,
}

/// Result of recording a failed retry.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryVerdict {
    /// The entry stays queued with this many retries spent.
    Retrying(u32),
    /// The retry budget is spent; the entry has been removed.
    Exhausted(FailedCommandEntry),
}

/// Failed commands keyed by zone; at most one entry per zone.
#[derive(Debug, Default)]
pub struct RetryQueue {
    entries: BTreeMap<String, FailedCommandEntry>,
}

impl RetryQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a fresh failure, replacing any entry for the same zone.
    pub fn insert(
        &mut self,
        zone: &str,
        command: Command,
        reason: FailureReason,
        failed_at: DateTime<Utc>,
    ) -> Option<FailedCommandEntry> {
        self.entries.insert(
            zone.to_string(),
            FailedCommandEntry {
                zone: zone.to_string(),
                command,
                reason,
                retry_count: 0,
                last_attempt_at: failed_at,
            },
        )
    }

    /// Returns `true` if `zone` has a queued entry.
    pub fn contains(&self, zone: &str) -> bool {
        self.entries.contains_key(zone)
    }

    /// Entry for `zone`, if queued.
    pub fn get(&self, zone: &str) -> Option<&FailedCommandEntry> {
        self.entries.get(zone)
    }

    /// Removes the entry for `zone`.
    pub fn remove(&mut self, zone: &str) -> Option<FailedCommandEntry> {
        self.entries.remove(zone)
    }

    /// Entries whose backoff has strictly elapsed at `now`.
    pub fn due(&self, now: DateTime<Utc>, backoff: Duration) -> Vec<FailedCommandEntry> {
        self.entries
            .values()
            .filter(|e| elapsed(now, e.last_attempt_at) > backoff)
            .cloned()
            .collect()
    }

    /// Records a failed retry for `zone` at `now`.
    ///
    /// Once `max_retries` retries have failed the entry is removed and
    /// returned so the caller can escalate exactly once.
    pub fn record_failure(
        &mut self,
        zone: &str,
        now: DateTime<Utc>,
        max_retries: u32,
    ) -> Option<RetryVerdict> {
        let entry = self.entries.get_mut(zone)?;
        entry.retry_count += 1;
        entry.last_attempt_at = now;
        if entry.retry_count >= max_retries {
            return self.entries.remove(zone).map(RetryVerdict::Exhausted);
        }
        Some(RetryVerdict::Retrying(entry.retry_count))
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of every entry, in zone order.
    pub fn entries(&self) -> Vec<FailedCommandEntry> {
        self.entries.values().cloned().collect()
    }
}
