//! In-process document store.
//!
//! Path-keyed documents laid out the way the field controllers expect:
//! `sensors/<zone>` holds the latest readings, `commands/<zone>` the last
//! relay command, `status/<zone>` the confirmed relay state and
//! `notifications/<user>/<key>` pushed alerts. The store can be switched
//! offline or slowed down to exercise the control loops' failure paths.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::control::clock::Clock;
use crate::control::types::{Command, SystemSnapshot};
use crate::notify::Alert;
use crate::ports::{CommandSink, PendingCommand, PendingCommands, SnapshotSource, StoreError};
use crate::zones::ZoneMetrics;

const SENSORS: &str = "sensors";
const COMMANDS: &str = "commands";
const STATUS: &str = "status";

/// Confirmed relay state of a zone.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneStatus {
    /// Relay closed.
    pub relay_state: bool,
    /// Command that produced this state.
    pub last_command: Command,
    /// When the hardware confirmed it.
    pub updated_at: DateTime<Utc>,
}

/// A stored document.
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    /// Sensor readings.
    Metrics(ZoneMetrics),
    /// Relay command record.
    Command(PendingCommand),
    /// Confirmed zone status.
    Status(ZoneStatus),
    /// Pushed alert.
    Alert(Alert),
}

/// Path-keyed document store shared by the control loops.
pub struct DocumentStore {
    docs: RwLock<BTreeMap<String, Document>>,
    clock: Arc<dyn Clock>,
    available: AtomicBool,
    latency: Mutex<Duration>,
    next_key: AtomicU64,
}

impl DocumentStore {
    /// Creates an empty, reachable store.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            docs: RwLock::new(BTreeMap::new()),
            clock,
            available: AtomicBool::new(true),
            latency: Mutex::new(Duration::ZERO),
            next_key: AtomicU64::new(0),
        }
    }

    /// Simulates losing (or regaining) the link to the store.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Adds a fixed delay to every request.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    async fn reach(&self) -> Result<(), StoreError> {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("store offline".to_string()))
        }
    }

    /// Reads one document.
    ///
    /// # Errors
    ///
    /// `StoreError::Unavailable` while the store is offline.
    pub async fn get(&self, path: &str) -> Result<Option<Document>, StoreError> {
        self.reach().await?;
        Ok(self.docs.read().get(path).cloned())
    }

    /// Writes one document, replacing any previous value.
    ///
    /// # Errors
    ///
    /// `StoreError::Rejected` for malformed paths; `Unavailable` while
    /// offline.
    pub async fn set(&self, path: &str, doc: Document) -> Result<(), StoreError> {
        self.reach().await?;
        validate_path(path)?;
        trace!(path, "document written");
        self.docs.write().insert(path.to_string(), doc);
        Ok(())
    }

    /// Deletes one document; returns whether it existed.
    ///
    /// # Errors
    ///
    /// `StoreError::Unavailable` while offline.
    pub async fn delete(&self, path: &str) -> Result<bool, StoreError> {
        self.reach().await?;
        Ok(self.docs.write().remove(path).is_some())
    }

    /// Lists the direct and nested children of `collection` as
    /// `(key, document)` pairs, where `key` is the path below the
    /// collection.
    ///
    /// # Errors
    ///
    /// `StoreError::Unavailable` while offline.
    pub async fn list(&self, collection: &str) -> Result<Vec<(String, Document)>, StoreError> {
        self.reach().await?;
        let prefix = format!("{}/", collection.trim_end_matches('/'));
        Ok(self
            .docs
            .read()
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, d)| (k[prefix.len()..].to_string(), d.clone()))
            .collect())
    }

    /// Appends a document under `collection` with a generated key.
    ///
    /// # Errors
    ///
    /// As for [`set`](Self::set).
    pub async fn push(&self, collection: &str, doc: Document) -> Result<String, StoreError> {
        let seq = self.next_key.fetch_add(1, Ordering::SeqCst);
        let key = format!("{}-{seq:06}", self.clock.now().timestamp_millis());
        self.set(&format!("{}/{key}", collection.trim_end_matches('/')), doc)
            .await?;
        Ok(key)
    }

    /// Stores a zone's latest readings under `sensors/<zone>`.
    ///
    /// # Errors
    ///
    /// As for [`set`](Self::set).
    pub async fn put_metrics(&self, zone: &str, metrics: ZoneMetrics) -> Result<(), StoreError> {
        self.set(&format!("{SENSORS}/{zone}"), Document::Metrics(metrics))
            .await
    }

    /// Marks a zone's pending command as executed and records the new
    /// relay state. Returns `false` if there was nothing to acknowledge.
    ///
    /// # Errors
    ///
    /// `StoreError::Unavailable` while offline.
    pub async fn acknowledge(&self, zone: &str) -> Result<bool, StoreError> {
        self.reach().await?;
        let now = self.clock.now();
        let mut docs = self.docs.write();
        let command = match docs.get_mut(&format!("{COMMANDS}/{zone}")) {
            Some(Document::Command(pending)) if !pending.acknowledged => {
                pending.acknowledged = true;
                pending.command
            }
            _ => return Ok(false),
        };
        docs.insert(
            format!("{STATUS}/{zone}"),
            Document::Status(ZoneStatus {
                relay_state: command == Command::On,
                last_command: command,
                updated_at: now,
            }),
        );
        debug!(zone, %command, "command acknowledged");
        Ok(true)
    }

    /// Confirmed status of a zone, if any.
    ///
    /// # Errors
    ///
    /// `StoreError::Unavailable` while offline.
    pub async fn zone_status(&self, zone: &str) -> Result<Option<ZoneStatus>, StoreError> {
        match self.get(&format!("{STATUS}/{zone}")).await? {
            Some(Document::Status(s)) => Ok(Some(s)),
            _ => Ok(None),
        }
    }
}

fn validate_path(path: &str) -> Result<(), StoreError> {
    if path.is_empty() || path.starts_with('/') || path.ends_with('/') || path.contains("//") {
        return Err(StoreError::Rejected {
            path: path.to_string(),
            message: "malformed document path".to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl SnapshotSource for DocumentStore {
    async fn fetch_snapshot(&self) -> Result<SystemSnapshot, StoreError> {
        let sensors = self.list(SENSORS).await?;
        let mut snapshot = SystemSnapshot::new(self.clock.now());
        for (zone, doc) in sensors {
            if let Document::Metrics(m) = doc {
                snapshot.zones.insert(zone, m);
            }
        }
        Ok(snapshot)
    }
}

#[async_trait]
impl CommandSink for DocumentStore {
    async fn send_command(&self, zone: &str, command: Command) -> Result<(), StoreError> {
        self.reach().await?;
        let path = format!("{COMMANDS}/{zone}");
        validate_path(&path)?;
        let now = self.clock.now();

        let mut docs = self.docs.write();
        let attempt = match docs.get(&path) {
            Some(Document::Command(prev)) if prev.command == command && !prev.acknowledged => {
                prev.attempt + 1
            }
            _ => 1,
        };
        docs.insert(
            path,
            Document::Command(PendingCommand {
                zone: zone.to_string(),
                command,
                issued_at: now,
                attempt,
                acknowledged: false,
            }),
        );
        Ok(())
    }
}

#[async_trait]
impl PendingCommands for DocumentStore {
    async fn pending_commands(&self) -> Result<Vec<PendingCommand>, StoreError> {
        Ok(self
            .list(COMMANDS)
            .await?
            .into_iter()
            .filter_map(|(_, doc)| match doc {
                Document::Command(p) if !p.acknowledged => Some(p),
                _ => None,
            })
            .collect())
    }
}
