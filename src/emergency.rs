//! Emergency records and protocols.
//!
//! Emergency shutdowns, the battery emergency protocol and critical-zone
//! failure handling each leave an [`EmergencyRecord`] that stays active
//! until resolved.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::control::clock::Clock;
use crate::control::dispatcher::Dispatcher;
use crate::control::engine::PolicyThresholds;
use crate::control::types::{Command, ControlError};
use crate::notify::{AlertKind, Notifier, raise};
use crate::zones::{Tier, ZoneRegistry};

/// Tiers shut down by the battery protocol at emergency level.
const BATTERY_CRITICAL_SHED: &[Tier] = &[Tier::NonCritical, Tier::Deferrable];
/// Tiers shut down by the battery protocol below the critical threshold.
const BATTERY_LOW_SHED: &[Tier] = &[Tier::Deferrable];

/// Category of an emergency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmergencyType {
    /// Manual or automatic shutdown of non-critical zones.
    Shutdown,
    /// A critical zone went offline.
    CriticalZoneFailure,
    /// Battery at emergency level: every non-critical zone shut down.
    BatteryCritical,
    /// Battery below the critical threshold: deferrable zones shut down.
    BatteryLow,
}

impl EmergencyType {
    fn id_prefix(&self) -> &'static str {
        match self {
            Self::Shutdown => "emergency",
            Self::CriticalZoneFailure => "critical_failure",
            Self::BatteryCritical | Self::BatteryLow => "battery_emergency",
        }
    }

    /// Returns `true` for the battery protocol types.
    pub fn is_battery(&self) -> bool {
        matches!(self, Self::BatteryCritical | Self::BatteryLow)
    }
}

impl fmt::Display for EmergencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Shutdown => "EMERGENCY_SHUTDOWN",
            Self::CriticalZoneFailure => "CRITICAL_ZONE_FAILURE",
            Self::BatteryCritical => "BATTERY_CRITICAL",
            Self::BatteryLow => "BATTERY_LOW",
        })
    }
}

/// One emergency, active until resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct EmergencyRecord {
    /// Unique id, e.g. `battery_emergency_1717329600_3`.
    pub id: String,
    /// Category.
    pub kind: EmergencyType,
    /// Why it was raised.
    pub reason: String,
    /// Zones involved.
    pub affected_zones: Vec<String>,
    /// When it was raised.
    pub created_at: DateTime<Utc>,
    /// Whether an operator or the monitor closed it.
    pub resolved: bool,
    /// When it was closed.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Closing notes.
    pub resolution_notes: Option<String>,
    /// Whether automatic recovery failed and operators were paged.
    pub escalated: bool,
    /// Zone → whether its OFF (or restart ON) command went through.
    pub command_results: BTreeMap<String, bool>,
}

/// Creates, resolves and lists emergencies.
pub struct EmergencyRegistry {
    registry: Arc<ZoneRegistry>,
    dispatcher: Dispatcher,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    thresholds: PolicyThresholds,
    io_timeout: Duration,
    records: Mutex<BTreeMap<String, EmergencyRecord>>,
    seq: AtomicU64,
}

impl EmergencyRegistry {
    /// Creates an empty registry.
    pub fn new(
        registry: Arc<ZoneRegistry>,
        dispatcher: Dispatcher,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        thresholds: PolicyThresholds,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            notifier,
            clock,
            thresholds,
            io_timeout: Duration::from_secs(10),
            records: Mutex::new(BTreeMap::new()),
            seq: AtomicU64::new(0),
        }
    }

    /// Switches zones OFF and records an emergency shutdown.
    ///
    /// With no explicit zones, every non-critical and deferrable zone is
    /// shut down. Critical zones are never switched off here.
    ///
    /// # Errors
    ///
    /// `ControlError::UnknownZone` if an explicit zone is not registered;
    /// nothing is sent in that case.
    pub async fn trigger_shutdown(
        &self,
        reason: &str,
        zones: Option<&[String]>,
    ) -> Result<EmergencyRecord, ControlError> {
        let targets = match zones {
            Some(list) => self.shutdown_targets(list)?,
            None => self
                .registry
                .ids_with_tier(&[Tier::NonCritical, Tier::Deferrable]),
        };
        let results = self.shut_down(&targets).await;
        raise(
            self.notifier.as_ref(),
            self.io_timeout,
            AlertKind::EmergencyShutdown,
            &format!("Emergency shutdown triggered: {reason}"),
            &targets,
        )
        .await;
        Ok(self.store(EmergencyType::Shutdown, reason, targets, results, false))
    }

    /// Runs the battery emergency protocol for a system battery level.
    ///
    /// At emergency level every non-critical and deferrable zone is shut
    /// down; below the critical threshold only deferrable zones are.
    /// Returns `None` when the level needs no action.
    pub async fn handle_battery_emergency(
        &self,
        battery_percentage: f32,
        affected_zones: &[String],
    ) -> Option<EmergencyRecord> {
        let (kind, tiers, label) = if self.thresholds.is_emergency(battery_percentage) {
            (
                EmergencyType::BatteryCritical,
                BATTERY_CRITICAL_SHED,
                "Battery critical",
            )
        } else if battery_percentage < self.thresholds.critical_battery {
            (EmergencyType::BatteryLow, BATTERY_LOW_SHED, "Battery low")
        } else {
            return None;
        };

        let reason = format!("{label}: {battery_percentage:.1}%");
        let targets = self.registry.ids_with_tier(tiers);
        let results = self.shut_down(&targets).await;
        raise(
            self.notifier.as_ref(),
            self.io_timeout,
            AlertKind::EmergencyShutdown,
            &format!("Emergency shutdown triggered: {reason}"),
            &targets,
        )
        .await;

        let mut affected = affected_zones.to_vec();
        for z in &targets {
            if !affected.contains(z) {
                affected.push(z.clone());
            }
        }
        Some(self.store(kind, &reason, affected, results, false))
    }

    /// Alerts on a failed critical zone and tries to switch it back ON.
    ///
    /// If the restart command cannot be delivered the emergency is
    /// escalated for manual intervention.
    ///
    /// # Errors
    ///
    /// `ControlError::UnknownZone` if `zone` is not registered.
    pub async fn handle_critical_zone_failure(
        &self,
        zone: &str,
        failure_reason: &str,
    ) -> Result<EmergencyRecord, ControlError> {
        let name = self
            .registry
            .get(zone)
            .map(|z| z.display_name.clone())
            .ok_or_else(|| ControlError::UnknownZone(zone.to_string()))?;
        let zones = vec![zone.to_string()];

        raise(
            self.notifier.as_ref(),
            self.io_timeout,
            AlertKind::CriticalZoneFailure,
            &format!("CRITICAL: {name} has failed - {failure_reason}"),
            &zones,
        )
        .await;

        let restarted = self.dispatcher.dispatch(zone, Command::On).await.is_ok();
        let mut results = BTreeMap::new();
        results.insert(zone.to_string(), restarted);

        if !restarted {
            error!(zone, "critical zone restart failed; escalating");
            raise(
                self.notifier.as_ref(),
                self.io_timeout,
                AlertKind::Escalation,
                &format!(
                    "ESCALATION: Critical zone {zone} ({name}) restart failed. \
                     Manual intervention required immediately."
                ),
                &zones,
            )
            .await;
        }

        Ok(self.store(
            EmergencyType::CriticalZoneFailure,
            failure_reason,
            zones,
            results,
            !restarted,
        ))
    }

    /// Marks an emergency resolved.
    ///
    /// # Errors
    ///
    /// `ControlError::UnknownEmergency` if no record has this id.
    pub fn resolve(&self, id: &str, notes: &str) -> Result<(), ControlError> {
        let mut records = self.records.lock();
        let record = records
            .get_mut(id)
            .ok_or_else(|| ControlError::UnknownEmergency(id.to_string()))?;
        record.resolved = true;
        record.resolved_at = Some(self.clock.now());
        record.resolution_notes = Some(notes.to_string());
        info!(id, notes, "emergency resolved");
        Ok(())
    }

    /// Unresolved emergencies, oldest first.
    pub fn active(&self) -> Vec<EmergencyRecord> {
        let mut active: Vec<EmergencyRecord> = self
            .records
            .lock()
            .values()
            .filter(|r| !r.resolved)
            .cloned()
            .collect();
        active.sort_by_key(|r| r.created_at);
        active
    }

    /// Emergencies raised within `window` of now, oldest first.
    pub fn history(&self, window: chrono::Duration) -> Vec<EmergencyRecord> {
        let cutoff = self.clock.now() - window;
        let mut recent: Vec<EmergencyRecord> = self
            .records
            .lock()
            .values()
            .filter(|r| r.created_at >= cutoff)
            .cloned()
            .collect();
        recent.sort_by_key(|r| r.created_at);
        recent
    }

    fn shutdown_targets(&self, zones: &[String]) -> Result<Vec<String>, ControlError> {
        let mut targets = Vec::with_capacity(zones.len());
        for z in zones {
            match self.registry.tier_of(z) {
                None => return Err(ControlError::UnknownZone(z.clone())),
                Some(Tier::Critical) => {
                    warn!(zone = %z, "refusing to shut down critical zone");
                }
                Some(_) => targets.push(z.clone()),
            }
        }
        Ok(targets)
    }

    async fn shut_down(&self, zones: &[String]) -> BTreeMap<String, bool> {
        let mut results = BTreeMap::new();
        for zone in zones {
            let ok = self.dispatcher.dispatch(zone, Command::Off).await.is_ok();
            if ok {
                info!(zone = %zone, "emergency shutdown: zone turned OFF");
            } else {
                error!(zone = %zone, "emergency shutdown failed");
            }
            results.insert(zone.clone(), ok);
        }
        results
    }

    fn store(
        &self,
        kind: EmergencyType,
        reason: &str,
        affected_zones: Vec<String>,
        command_results: BTreeMap<String, bool>,
        escalated: bool,
    ) -> EmergencyRecord {
        let now = self.clock.now();
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let record = EmergencyRecord {
            id: format!("{}_{}_{seq}", kind.id_prefix(), now.timestamp()),
            kind,
            reason: reason.to_string(),
            affected_zones,
            created_at: now,
            resolved: false,
            resolved_at: None,
            resolution_notes: None,
            escalated,
            command_results,
        };
        warn!(id = %record.id, %kind, reason, "emergency recorded");
        self.records.lock().insert(record.id.clone(), record.clone());
        record
    }
}
