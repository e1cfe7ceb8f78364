//! Prediction service: battery endurance, demand and anomaly heuristics.
//!
//! The control core only depends on the [`Predictor`] trait. The bundled
//! [`HeuristicPredictor`] implements it with the physics fallback the field
//! deployment uses until enough history has been collected, plus an hourly
//! demand profile learned on retrain.

use std::fmt;

use chrono::{DateTime, Datelike, Timelike, Utc};
use parking_lot::RwLock;

use crate::zones::ZoneMetrics;
use crate::zones::types::NOMINAL_BATTERY_VOLTAGE;

/// Voltage at which a 12 V lead-acid bank is considered empty.
const CUTOFF_VOLTAGE: f32 = 10.5;
/// Fraction of nominal capacity that may be drawn.
const USABLE_FRACTION: f32 = 0.8;

/// Severity assigned to an anomaly report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    /// No rule fired.
    Low,
    /// Exactly one rule fired.
    Medium,
    /// Several rules fired.
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        })
    }
}

/// Result of anomaly detection on one zone's readings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnomalyReport {
    /// Whether any rule fired.
    pub has_anomaly: bool,
    /// Overall severity.
    pub severity: Severity,
    /// Description of each rule that fired.
    pub anomalies: Vec<String>,
}

/// Outcome of a retrain request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrainOutcome {
    /// Models were refit on `samples` readings.
    Trained {
        /// Readings used.
        samples: usize,
    },
    /// Not enough history; models unchanged.
    InsufficientData {
        /// Readings offered.
        samples: usize,
        /// Readings needed.
        required: usize,
    },
}

/// Prediction contract consumed by the control core.
///
/// `sustain_hours`, `demand` and `anomaly` must be deterministic for a given
/// model state and free of side effects.
pub trait Predictor: Send + Sync + 'static {
    /// Hours the metrics' battery can sustain the current net draw.
    fn sustain_hours(&self, metrics: &ZoneMetrics) -> f32;

    /// Expected demand (W) at `hour` on `day_of_week` (0 = Monday).
    fn demand(&self, hour: u32, day_of_week: u32, solar_forecast: f32) -> f32;

    /// Rule-based anomaly check on one zone's readings.
    fn anomaly(&self, metrics: &ZoneMetrics) -> AnomalyReport;

    /// Refits models from historical readings.
    fn retrain(&self, samples: &[ZoneMetrics]) -> RetrainOutcome;
}

/// Heuristic predictor with an optional learned hourly demand profile.
#[derive(Debug)]
pub struct HeuristicPredictor {
    min_samples: usize,
    demand_profile: RwLock<Option<[Option<f32>; 24]>>,
}

impl Default for HeuristicPredictor {
    fn default() -> Self {
        Self::new(100)
    }
}

impl HeuristicPredictor {
    /// Creates a predictor that retrains once more than `min_samples`
    /// readings are available.
    pub fn new(min_samples: usize) -> Self {
        Self {
            min_samples,
            demand_profile: RwLock::new(None),
        }
    }

    /// Returns `true` once a demand profile has been learned.
    pub fn is_trained(&self) -> bool {
        self.demand_profile.read().is_some()
    }
}

impl Predictor for HeuristicPredictor {
    fn sustain_hours(&self, metrics: &ZoneMetrics) -> f32 {
        if metrics.output_power <= 0.0 {
            return f32::INFINITY;
        }

        let capacity = (metrics.battery_voltage - CUTOFF_VOLTAGE)
            / (NOMINAL_BATTERY_VOLTAGE - CUTOFF_VOLTAGE)
            * 100.0;
        let net_draw = metrics.output_power - metrics.input_power - metrics.solar_generation;
        if net_draw <= 0.0 {
            // charging or balanced
            return f32::INFINITY;
        }

        let hours = (capacity * USABLE_FRACTION / net_draw).max(0.0);
        (hours * 100.0).round() / 100.0
    }

    fn demand(&self, hour: u32, _day_of_week: u32, solar_forecast: f32) -> f32 {
        let learned = self
            .demand_profile
            .read()
            .and_then(|profile| profile.get(hour as usize).copied().flatten());
        if let Some(watts) = learned {
            return watts.max(0.0);
        }

        if (6..=18).contains(&hour) {
            50.0 + solar_forecast * 0.3
        } else {
            30.0
        }
    }

    fn anomaly(&self, metrics: &ZoneMetrics) -> AnomalyReport {
        let mut anomalies = Vec::new();

        if !(9.0..=15.0).contains(&metrics.battery_voltage) {
            anomalies.push("Battery voltage out of range".to_string());
        }
        if metrics.output_power > metrics.input_power * 2.0 {
            anomalies.push("Output power significantly exceeds input".to_string());
        }
        if metrics.input_power < 0.0 || metrics.output_power < 0.0 {
            anomalies.push("Negative power values detected".to_string());
        }

        let severity = match anomalies.len() {
            0 => Severity::Low,
            1 => Severity::Medium,
            _ => Severity::High,
        };
        AnomalyReport {
            has_anomaly: !anomalies.is_empty(),
            severity,
            anomalies,
        }
    }

    fn retrain(&self, samples: &[ZoneMetrics]) -> RetrainOutcome {
        if samples.len() <= self.min_samples {
            return RetrainOutcome::InsufficientData {
                samples: samples.len(),
                required: self.min_samples + 1,
            };
        }

        let mut sums = [0.0_f32; 24];
        let mut counts = [0_u32; 24];
        for s in samples {
            let h = s.observed_at.hour() as usize;
            sums[h] += s.output_power.max(0.0);
            counts[h] += 1;
        }

        let mut profile = [None; 24];
        for h in 0..24 {
            if counts[h] > 0 {
                profile[h] = Some(sums[h] / counts[h] as f32);
            }
        }
        *self.demand_profile.write() = Some(profile);

        RetrainOutcome::Trained {
            samples: samples.len(),
        }
    }
}

/// Suggested operating posture for one schedule slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecommendedAction {
    /// Surplus solar: top up batteries.
    ChargeBattery,
    /// Solar covers less than half the demand.
    ConserveEnergy,
    /// Neither surplus nor deficit.
    NormalOperation,
}

impl fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ChargeBattery => "CHARGE_BATTERY",
            Self::ConserveEnergy => "CONSERVE_ENERGY",
            Self::NormalOperation => "NORMAL_OPERATION",
        })
    }
}

/// One hour of the look-ahead optimization schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleSlot {
    /// Slot start.
    pub at: DateTime<Utc>,
    /// Hour of day (0–23).
    pub hour: u32,
    /// Forecast solar generation (W).
    pub predicted_solar: f32,
    /// Forecast demand (W).
    pub predicted_demand: f32,
    /// Suggested posture.
    pub action: RecommendedAction,
}

impl fmt::Display for ScheduleSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (h={:>2}) solar={:>6.1} W  demand={:>6.1} W  -> {}",
            self.at.format("%Y-%m-%d %H:%M"),
            self.hour,
            self.predicted_solar,
            self.predicted_demand,
            self.action,
        )
    }
}

/// Clear-sky solar estimate for an hour of day (W), peaking at noon.
pub fn solar_forecast(hour: u32) -> f32 {
    if !(6..=18).contains(&hour) {
        return 0.0;
    }
    let peak_factor = 1.0 - (hour as f32 - 12.0).abs() / 6.0;
    (peak_factor * 100.0).max(0.0)
}

/// Maps a demand/solar forecast pair to a recommended posture.
pub fn recommend(demand: f32, solar: f32) -> RecommendedAction {
    if solar > demand * 1.2 {
        RecommendedAction::ChargeBattery
    } else if solar < demand * 0.5 {
        RecommendedAction::ConserveEnergy
    } else {
        RecommendedAction::NormalOperation
    }
}

/// Builds an hourly schedule for the next `hours` hours from `start`.
pub fn optimization_schedule<P: Predictor + ?Sized>(
    predictor: &P,
    start: DateTime<Utc>,
    hours: usize,
) -> Vec<ScheduleSlot> {
    (0..hours)
        .map(|h| {
            let at = start + chrono::Duration::hours(h as i64);
            let hour = at.hour();
            let dow = at.weekday().num_days_from_monday();
            let predicted_solar = solar_forecast(hour);
            let predicted_demand = predictor.demand(hour, dow, predicted_solar);
            ScheduleSlot {
                at,
                hour,
                predicted_solar,
                predicted_demand,
                action: recommend(predicted_demand, predicted_solar),
            }
        })
        .collect()
}
