//! Periodic system health checks.
//!
//! Each monitor tick reads one snapshot and checks battery levels, anomaly
//! reports and critical-zone relay state. It raises alerts and starts the
//! matching emergency protocols. Readings are also kept as retraining
//! samples for the predictor.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::control::clock::{Clock, elapsed};
use crate::control::engine::PolicyThresholds;
use crate::control::types::SystemSnapshot;
use crate::emergency::{EmergencyRegistry, EmergencyType};
use crate::forecast::{Predictor, RetrainOutcome, Severity};
use crate::notify::{AlertKind, Notifier, raise};
use crate::ports::{SnapshotSource, bounded};
use crate::zones::{Tier, ZoneMetrics, ZoneRegistry};

/// Minimum spacing of low-battery alerts.
const LOW_BATTERY_ALERT_INTERVAL: Duration = Duration::from_secs(3600);
/// Readings kept for retraining.
const SAMPLE_CAPACITY: usize = 10_000;

/// What one monitor tick found.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorSummary {
    /// Zones checked; 0 when no snapshot was available.
    pub checked: usize,
    /// Alerts raised directly by the monitor.
    pub alerts: Vec<AlertKind>,
    /// Emergency records opened.
    pub emergencies: Vec<String>,
}

#[derive(Default)]
struct MonitorState {
    last_low_battery_alert: Option<DateTime<Utc>>,
    samples: VecDeque<ZoneMetrics>,
}

/// Battery, anomaly and critical-zone checks.
pub struct SystemMonitor<P> {
    registry: Arc<ZoneRegistry>,
    source: Arc<dyn SnapshotSource>,
    predictor: Arc<P>,
    notifier: Arc<dyn Notifier>,
    emergencies: Arc<EmergencyRegistry>,
    clock: Arc<dyn Clock>,
    thresholds: PolicyThresholds,
    io_timeout: Duration,
    state: Mutex<MonitorState>,
}

impl<P: Predictor> SystemMonitor<P> {
    /// Creates a monitor.
    #[expect(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ZoneRegistry>,
        source: Arc<dyn SnapshotSource>,
        predictor: Arc<P>,
        notifier: Arc<dyn Notifier>,
        emergencies: Arc<EmergencyRegistry>,
        clock: Arc<dyn Clock>,
        thresholds: PolicyThresholds,
        io_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            source,
            predictor,
            notifier,
            emergencies,
            clock,
            thresholds,
            io_timeout,
            state: Mutex::new(MonitorState::default()),
        }
    }

    /// Runs every check against a fresh snapshot.
    pub async fn tick(&self) -> MonitorSummary {
        let mut summary = MonitorSummary::default();
        let snapshot = match bounded(self.io_timeout, self.source.fetch_snapshot()).await {
            Ok(s) if !s.is_empty() => s,
            Ok(_) => {
                debug!("monitor: no sensor data");
                return summary;
            }
            Err(e) => {
                debug!(error = %e, "monitor: snapshot unavailable");
                return summary;
            }
        };
        summary.checked = snapshot.len();
        self.remember(&snapshot);

        self.check_battery_levels(&snapshot, &mut summary).await;
        self.check_anomalies(&snapshot, &mut summary).await;
        self.check_critical_zones(&snapshot, &mut summary).await;
        self.check_battery_protocol(&snapshot, &mut summary).await;
        summary
    }

    /// Retrains the predictor on the readings gathered so far.
    pub fn retrain(&self) -> RetrainOutcome {
        let samples = self.samples();
        let outcome = self.predictor.retrain(&samples);
        match outcome {
            RetrainOutcome::Trained { samples } => info!(samples, "models retrained"),
            RetrainOutcome::InsufficientData { samples, required } => {
                info!(samples, required, "insufficient data for model retraining")
            }
        }
        outcome
    }

    /// Readings gathered for retraining, oldest first.
    pub fn samples(&self) -> Vec<ZoneMetrics> {
        self.state.lock().samples.iter().cloned().collect()
    }

    fn remember(&self, snapshot: &SystemSnapshot) {
        let mut state = self.state.lock();
        for (zone, m) in &snapshot.zones {
            if !self.registry.contains(zone) {
                continue;
            }
            if state.samples.len() == SAMPLE_CAPACITY {
                state.samples.pop_front();
            }
            state.samples.push_back(m.clone());
        }
    }

    async fn alert(&self, summary: &mut MonitorSummary, kind: AlertKind, msg: &str, zone: &str) {
        raise(
            self.notifier.as_ref(),
            self.io_timeout,
            kind,
            msg,
            &[zone.to_string()],
        )
        .await;
        summary.alerts.push(kind);
    }

    async fn check_battery_levels(&self, snapshot: &SystemSnapshot, summary: &mut MonitorSummary) {
        for (zone, m) in &snapshot.zones {
            let pct = m.battery_percentage;
            if self.thresholds.is_emergency(pct) {
                if self.registry.tier_of(zone) == Some(Tier::Critical) {
                    let msg = format!("Critical zone {zone} battery at {pct:.1}%");
                    self.alert(summary, AlertKind::CriticalBattery, &msg, zone).await;
                }
            } else if pct < self.thresholds.low_battery {
                let now = self.clock.now();
                let due = {
                    let mut state = self.state.lock();
                    let due = state
                        .last_low_battery_alert
                        .is_none_or(|t| elapsed(now, t) > LOW_BATTERY_ALERT_INTERVAL);
                    if due {
                        state.last_low_battery_alert = Some(now);
                    }
                    due
                };
                if due {
                    let msg = format!("Low Battery Alert: battery level {pct:.1}% in {zone}");
                    self.alert(summary, AlertKind::LowBattery, &msg, zone).await;
                }
            }
        }
    }

    async fn check_anomalies(&self, snapshot: &SystemSnapshot, summary: &mut MonitorSummary) {
        for (zone, m) in &snapshot.zones {
            let report = self.predictor.anomaly(m);
            if report.has_anomaly && report.severity == Severity::High {
                let msg = format!(
                    "Anomaly detected in {zone}: {}",
                    report.anomalies.join(", ")
                );
                self.alert(summary, AlertKind::EnergyAnomaly, &msg, zone).await;
            } else if report.has_anomaly {
                debug!(zone = %zone, anomalies = ?report.anomalies, "minor anomaly");
            }
        }
    }

    async fn check_critical_zones(&self, snapshot: &SystemSnapshot, summary: &mut MonitorSummary) {
        let open: Vec<(String, Vec<String>)> = self
            .emergencies
            .active()
            .into_iter()
            .filter(|r| r.kind == EmergencyType::CriticalZoneFailure)
            .map(|r| (r.id, r.affected_zones))
            .collect();

        for zone in self.registry.ids_with_tier(&[Tier::Critical]) {
            let Some(m) = snapshot.get(&zone) else {
                continue;
            };
            let open_for_zone: Vec<&str> = open
                .iter()
                .filter(|(_, zones)| zones.contains(&zone))
                .map(|(id, _)| id.as_str())
                .collect();

            if m.relay_state {
                for id in open_for_zone {
                    if let Err(e) = self.emergencies.resolve(id, "zone back online") {
                        warn!(error = %e, "could not resolve critical zone emergency");
                    }
                }
                continue;
            }
            if m.battery_percentage <= self.thresholds.critical_battery || !open_for_zone.is_empty() {
                continue;
            }

            warn!(zone = %zone, battery = m.battery_percentage, "critical zone offline");
            match self
                .emergencies
                .handle_critical_zone_failure(&zone, "offline with sufficient battery")
                .await
            {
                Ok(record) => summary.emergencies.push(record.id),
                Err(e) => warn!(zone = %zone, error = %e, "critical zone handling failed"),
            }
        }
    }

    async fn check_battery_protocol(&self, snapshot: &SystemSnapshot, summary: &mut MonitorSummary) {
        let registered = snapshot
            .zones
            .iter()
            .filter(|(z, _)| self.registry.contains(z))
            .map(|(_, m)| m);
        let Some(system) = ZoneMetrics::aggregate(registered) else {
            return;
        };
        let avg = system.battery_percentage;
        let open: Vec<String> = self
            .emergencies
            .active()
            .into_iter()
            .filter(|r| r.kind.is_battery())
            .map(|r| r.id)
            .collect();

        if avg >= self.thresholds.low_battery {
            for id in open {
                if let Err(e) = self.emergencies.resolve(&id, "battery recovered") {
                    warn!(error = %e, "could not resolve battery emergency");
                }
            }
            return;
        }
        if !open.is_empty() {
            return;
        }

        let low: Vec<String> = snapshot
            .zones
            .iter()
            .filter(|(z, m)| {
                self.registry.contains(z) && m.battery_percentage < self.thresholds.critical_battery
            })
            .map(|(z, _)| z.clone())
            .collect();
        if let Some(record) = self.emergencies.handle_battery_emergency(avg, &low).await {
            summary.emergencies.push(record.id);
        }
    }
}
