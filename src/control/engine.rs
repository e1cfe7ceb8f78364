//! Multi-mode decision policy.
//!
//! Maps one [`SystemSnapshot`] to a per-zone ON/OFF [`Decision`]. The mode is
//! chosen from the mean battery state of charge; each mode then gates zones
//! by tier, generation and efficiency. The engine performs no I/O.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::efficiency::efficiency;
use super::types::{Command, Decision, DecisionReport, Mode, SystemSnapshot, SystemState};
use crate::forecast::Predictor;
use crate::zones::{Tier, ZoneConfig, ZoneMetrics, ZoneRegistry};

/// Battery thresholds (percent) and the generation floor used by the ladder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyThresholds {
    /// At or below this level only critical zones run.
    pub emergency_battery: f32,
    /// Below this level critical mode applies.
    pub critical_battery: f32,
    /// Below this level conservation mode applies.
    pub low_battery: f32,
    /// Minimum zone input (W) for a zone to run in critical mode.
    pub min_generation: f32,
}

impl Default for PolicyThresholds {
    fn default() -> Self {
        Self {
            emergency_battery: 5.0,
            critical_battery: 10.0,
            low_battery: 20.0,
            min_generation: 10.0,
        }
    }
}

impl PolicyThresholds {
    /// Returns `true` if `battery_percentage` is at emergency level.
    pub fn is_emergency(&self, battery_percentage: f32) -> bool {
        battery_percentage.is_nan() || battery_percentage <= self.emergency_battery
    }
}

/// Efficiency cutoffs per mode and tier.
const CONSERVE_SEMI_EFF: f32 = 0.7;
const CONSERVE_NON_EFF: f32 = 0.8;
const NORMAL_SEMI_EFF: f32 = 0.6;
const NORMAL_NON_EFF: f32 = 0.7;
const NORMAL_DEFER_EFF: f32 = 0.8;
/// Sustain-hour floors in normal mode.
const NORMAL_NON_SUSTAIN: f32 = 4.0;
const NORMAL_DEFER_SUSTAIN: f32 = 8.0;

/// Snapshot → decision policy.
///
/// `decide` is a pure function of the snapshot and the predictor's outputs:
/// the same inputs always yield the same decision and reasoning trace.
pub struct DecisionEngine<P> {
    registry: Arc<ZoneRegistry>,
    predictor: Arc<P>,
    thresholds: PolicyThresholds,
}

impl<P: Predictor> DecisionEngine<P> {
    /// Creates an engine over a zone registry.
    pub fn new(
        registry: Arc<ZoneRegistry>,
        predictor: Arc<P>,
        thresholds: PolicyThresholds,
    ) -> Self {
        Self {
            registry,
            predictor,
            thresholds,
        }
    }

    /// The zone registry the engine decides over.
    pub fn registry(&self) -> &Arc<ZoneRegistry> {
        &self.registry
    }

    /// Thresholds in effect.
    pub fn thresholds(&self) -> &PolicyThresholds {
        &self.thresholds
    }

    /// Picks the severity mode for a mean battery level (first match wins).
    pub fn select_mode(&self, avg_battery_percentage: f32) -> Mode {
        let t = &self.thresholds;
        if t.is_emergency(avg_battery_percentage) {
            Mode::Emergency
        } else if avg_battery_percentage < t.critical_battery {
            Mode::Critical
        } else if avg_battery_percentage < t.low_battery {
            Mode::Conservation
        } else {
            Mode::Normal
        }
    }

    /// Aggregate system view over the registered zones that reported.
    ///
    /// Falls back to default readings when no registered zone is present,
    /// so the result is always defined.
    pub fn system_state(&self, snapshot: &SystemSnapshot) -> SystemState {
        let reported: Vec<&ZoneMetrics> = snapshot
            .zones
            .iter()
            .filter(|(id, _)| self.registry.contains(id))
            .map(|(_, m)| m)
            .collect();
        let fallback = ZoneMetrics::at(snapshot.captured_at);
        let aggregate = ZoneMetrics::aggregate(reported.iter().copied())
            .unwrap_or_else(|| fallback.clone());

        SystemState {
            total_input: aggregate.input_power,
            total_output: aggregate.output_power,
            avg_battery_percentage: aggregate.battery_percentage,
            sustain_hours: self.predictor.sustain_hours(&aggregate),
        }
    }

    /// Computes the full decision for one snapshot.
    pub fn decide(&self, snapshot: &SystemSnapshot) -> DecisionReport {
        let mut reasoning = Vec::new();

        for id in snapshot.zones.keys() {
            if !self.registry.contains(id) {
                trace!(zone = %id, "ignoring readings for unregistered zone");
                reasoning.push(format!("Ignored readings for unknown zone {id}"));
            }
        }

        let state = self.system_state(snapshot);
        let mode = self.select_mode(state.avg_battery_percentage);
        reasoning.push(mode_reason(mode, state.avg_battery_percentage));

        let mut decision = Decision::new();
        for zone in self.registry.by_priority() {
            let metrics = match snapshot.get(&zone.id) {
                Some(m) => m.clone(),
                None => {
                    reasoning.push(format!(
                        "No readings for {}; assuming zero generation",
                        zone.id
                    ));
                    ZoneMetrics::at(snapshot.captured_at)
                }
            };

            let command = self.command_for(mode, zone, &metrics, state.sustain_hours);
            if mode == Mode::Critical && zone.tier == Tier::Critical && command == Command::Off {
                reasoning.push(format!(
                    "{} held OFF: input {:.1} W not above {:.1} W",
                    zone.id, metrics.input_power, self.thresholds.min_generation
                ));
            }
            decision.set(&zone.id, command);
        }

        debug!(
            %mode,
            avg_battery = state.avg_battery_percentage,
            sustain_hours = state.sustain_hours,
            decision = %decision,
            "decision computed"
        );

        DecisionReport {
            mode,
            decision,
            reasoning,
            state,
        }
    }

    fn command_for(
        &self,
        mode: Mode,
        zone: &ZoneConfig,
        metrics: &ZoneMetrics,
        sustain_hours: f32,
    ) -> Command {
        let eff = efficiency(metrics);
        let on = match mode {
            Mode::Emergency => zone.tier == Tier::Critical,
            Mode::Critical => {
                matches!(zone.tier, Tier::Critical | Tier::SemiCritical)
                    && metrics.input_power > self.thresholds.min_generation
            }
            Mode::Conservation => match zone.tier {
                Tier::Critical => true,
                Tier::SemiCritical => eff > CONSERVE_SEMI_EFF,
                Tier::NonCritical => eff > CONSERVE_NON_EFF,
                Tier::Deferrable => false,
            },
            Mode::Normal => match zone.tier {
                Tier::Critical => true,
                Tier::SemiCritical => eff > NORMAL_SEMI_EFF,
                Tier::NonCritical => eff > NORMAL_NON_EFF && sustain_hours > NORMAL_NON_SUSTAIN,
                Tier::Deferrable => {
                    eff > NORMAL_DEFER_EFF && sustain_hours > NORMAL_DEFER_SUSTAIN
                }
            },
        };
        if on { Command::On } else { Command::Off }
    }
}

fn mode_reason(mode: Mode, avg: f32) -> String {
    let why = match mode {
        Mode::Emergency => "Emergency mode: Critical battery level",
        Mode::Critical => "Critical mode: Low battery",
        Mode::Conservation => "Conservation mode: Battery below threshold",
        Mode::Normal => "Normal mode: Sufficient battery",
    };
    format!("{why} (avg {avg:.1}%)")
}
