//! Operator alerts.
//!
//! The control loops raise alerts through the [`Notifier`] trait and never
//! see transport details. [`AlertLog`] is the bundled notifier: every alert
//! is written to the log and kept in a bounded history, and push alerts are
//! stored under `notifications/admin` when a store is attached.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::control::clock::Clock;
use crate::store::{Document, DocumentStore};

/// Delivery channel for an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    /// Text message to the admin phone.
    Sms,
    /// Mail to the admin address.
    Email,
    /// Push notification written to the store.
    Push,
    /// Structured log line.
    Log,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sms => "sms",
            Self::Email => "email",
            Self::Push => "push",
            Self::Log => "log",
        })
    }
}

/// Category of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AlertKind {
    /// Repeated snapshot fetch failures.
    ConnectivityLoss,
    /// A command was never acknowledged.
    CommandTimeout,
    /// A critical zone stopped reporting.
    StaleDataCritical,
    /// The watchdog gave up on a command.
    RetryExhausted,
    /// A critical zone's battery is at emergency level.
    CriticalBattery,
    /// System battery below the low threshold.
    LowBattery,
    /// High-severity anomaly in a zone's readings.
    EnergyAnomaly,
    /// A critical zone went offline.
    CriticalZoneFailure,
    /// Non-critical zones were shut down.
    EmergencyShutdown,
    /// Manual escalation after an automatic recovery failed.
    Escalation,
}

impl AlertKind {
    /// Upper-case alert type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectivityLoss => "CONNECTIVITY_LOSS",
            Self::CommandTimeout => "COMMAND_TIMEOUT",
            Self::StaleDataCritical => "STALE_DATA_CRITICAL",
            Self::RetryExhausted => "COMMAND_RETRY_FAILURE",
            Self::CriticalBattery => "CRITICAL_BATTERY_FAILURE",
            Self::LowBattery => "LOW_BATTERY",
            Self::EnergyAnomaly => "ENERGY_ANOMALY",
            Self::CriticalZoneFailure => "CRITICAL_ZONE_FAILURE",
            Self::EmergencyShutdown => "EMERGENCY_SHUTDOWN",
            Self::Escalation => "ESCALATION",
        }
    }

    /// Whether the alert warrants the emergency fan-out (SMS and email).
    pub fn is_emergency(&self) -> bool {
        !matches!(self, Self::LowBattery | Self::EnergyAnomaly)
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One raised alert.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    /// Category.
    pub kind: AlertKind,
    /// Operator-facing details.
    pub message: String,
    /// Zones involved.
    pub affected_zones: Vec<String>,
    /// When the alert was raised.
    pub raised_at: DateTime<Utc>,
}

/// Alert fan-out.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends an alert on every configured channel.
    ///
    /// # Returns
    ///
    /// Per-channel delivery result.
    async fn alert(
        &self,
        kind: AlertKind,
        message: &str,
        affected_zones: &[String],
    ) -> BTreeMap<Channel, bool>;
}

/// Raises an alert, giving up after `limit`.
///
/// A notifier that hangs is logged and treated as having delivered nothing.
pub async fn raise(
    notifier: &dyn Notifier,
    limit: Duration,
    kind: AlertKind,
    message: &str,
    affected_zones: &[String],
) -> BTreeMap<Channel, bool> {
    match tokio::time::timeout(limit, notifier.alert(kind, message, affected_zones)).await {
        Ok(results) => results,
        Err(_) => {
            warn!(%kind, ?limit, "alert delivery timed out");
            BTreeMap::new()
        }
    }
}

/// Recipients for the emergency channels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotifyConfig {
    /// Phone number for SMS alerts.
    pub admin_phone: Option<String>,
    /// Address for email alerts.
    pub admin_email: Option<String>,
    /// Alerts retained in memory.
    pub history_limit: Option<usize>,
}

const DEFAULT_HISTORY_LIMIT: usize = 512;

/// Notifier that logs every alert and keeps recent ones in memory.
///
/// No SMS or email transport is linked; configured recipients are reported
/// as failed deliveries so the caller can see the gap.
pub struct AlertLog {
    config: NotifyConfig,
    clock: Arc<dyn Clock>,
    push_store: Option<Arc<DocumentStore>>,
    history: Mutex<VecDeque<Alert>>,
}

impl AlertLog {
    /// Creates a notifier.
    pub fn new(config: NotifyConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            push_store: None,
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Writes push alerts to `notifications/admin` in `store`.
    pub fn with_push_store(mut self, store: Arc<DocumentStore>) -> Self {
        self.push_store = Some(store);
        self
    }

    /// Alerts raised so far, oldest first.
    pub fn alerts(&self) -> Vec<Alert> {
        self.history.lock().iter().cloned().collect()
    }

    /// Number of retained alerts of one kind.
    pub fn count(&self, kind: AlertKind) -> usize {
        self.history.lock().iter().filter(|a| a.kind == kind).count()
    }

    fn remember(&self, alert: Alert) {
        let limit = self.config.history_limit.unwrap_or(DEFAULT_HISTORY_LIMIT).max(1);
        let mut history = self.history.lock();
        while history.len() >= limit {
            history.pop_front();
        }
        history.push_back(alert);
    }
}

#[async_trait]
impl Notifier for AlertLog {
    async fn alert(
        &self,
        kind: AlertKind,
        message: &str,
        affected_zones: &[String],
    ) -> BTreeMap<Channel, bool> {
        let alert = Alert {
            kind,
            message: message.to_string(),
            affected_zones: affected_zones.to_vec(),
            raised_at: self.clock.now(),
        };
        let zones = affected_zones.join(",");
        if kind.is_emergency() {
            error!(alert = %kind, zones = %zones, "{message}");
        } else {
            warn!(alert = %kind, zones = %zones, "{message}");
        }

        let mut results = BTreeMap::new();
        results.insert(Channel::Log, true);

        if kind.is_emergency() {
            if let Some(phone) = &self.config.admin_phone {
                warn!(to = %phone, "sms transport not configured");
                results.insert(Channel::Sms, false);
            }
            if let Some(email) = &self.config.admin_email {
                warn!(to = %email, "email transport not configured");
                results.insert(Channel::Email, false);
            }
        } else if let Some(phone) = &self.config.admin_phone {
            warn!(to = %phone, "sms transport not configured");
            results.insert(Channel::Sms, false);
        }

        if let Some(store) = &self.push_store {
            let pushed = store
                .push("notifications/admin", Document::Alert(alert.clone()))
                .await;
            match pushed {
                Ok(key) => {
                    info!(%key, "push notification stored");
                    results.insert(Channel::Push, true);
                }
                Err(e) => {
                    warn!(error = %e, "push notification failed");
                    results.insert(Channel::Push, false);
                }
            }
        }

        self.remember(alert);
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::clock::SystemClock;

    fn log(config: NotifyConfig) -> AlertLog {
        AlertLog::new(config, Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn log_channel_always_delivers() {
        let notifier = log(NotifyConfig::default());
        let res = notifier
            .alert(AlertKind::LowBattery, "battery at 12%", &["Zone3".into()])
            .await;
        assert_eq!(res.get(&Channel::Log), Some(&true));
        assert_eq!(res.len(), 1);
        assert_eq!(notifier.count(AlertKind::LowBattery), 1);
    }

    #[tokio::test]
    async fn unlinked_transports_report_failure() {
        let notifier = log(NotifyConfig {
            admin_phone: Some("+10000000000".into()),
            admin_email: Some("ops@example.org".into()),
            history_limit: None,
        });
        let res = notifier.alert(AlertKind::Escalation, "manual action", &[]).await;
        assert_eq!(res.get(&Channel::Sms), Some(&false));
        assert_eq!(res.get(&Channel::Email), Some(&false));

        // non-emergency alerts skip email
        let res = notifier.alert(AlertKind::EnergyAnomaly, "odd readings", &[]).await;
        assert!(!res.contains_key(&Channel::Email));
    }

    #[tokio::test]
    async fn push_alerts_land_in_the_store() {
        let store = Arc::new(DocumentStore::new(Arc::new(SystemClock)));
        let notifier = log(NotifyConfig::default()).with_push_store(store.clone());
        let res = notifier
            .alert(AlertKind::ConnectivityLoss, "store unreachable", &[])
            .await;
        assert_eq!(res.get(&Channel::Push), Some(&true));
        let stored = store.list("notifications/admin").await.unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let notifier = log(NotifyConfig {
            history_limit: Some(2),
            ..Default::default()
        });
        for kind in [AlertKind::LowBattery, AlertKind::CommandTimeout, AlertKind::Escalation] {
            notifier.alert(kind, "x", &[]).await;
        }
        let kinds: Vec<AlertKind> = notifier.alerts().iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![AlertKind::CommandTimeout, AlertKind::Escalation]);
    }
}
