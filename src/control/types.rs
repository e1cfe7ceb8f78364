//! Core control types: snapshots, decisions, operating modes and errors.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ports::StoreError;
use crate::zones::ZoneMetrics;

/// Relay command for a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Command {
    /// Close the relay (energise the zone).
    On,
    /// Open the relay.
    Off,
}

impl Command {
    /// Wire name of the command (`"ON"` / `"OFF"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ON" => Ok(Self::On),
            "OFF" => Ok(Self::Off),
            other => Err(format!("unknown command \"{other}\"")),
        }
    }
}

/// A single consistent read of all zones' metrics.
///
/// The sole input to one decision cycle; created fresh every cycle and
/// discarded afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemSnapshot {
    /// Zone id → readings.
    pub zones: BTreeMap<String, ZoneMetrics>,
    /// When the snapshot was read.
    pub captured_at: DateTime<Utc>,
}

impl SystemSnapshot {
    /// Creates an empty snapshot.
    pub fn new(captured_at: DateTime<Utc>) -> Self {
        Self {
            zones: BTreeMap::new(),
            captured_at,
        }
    }

    /// Adds (or replaces) one zone's readings.
    pub fn with_zone(mut self, id: &str, metrics: ZoneMetrics) -> Self {
        self.zones.insert(id.to_string(), metrics);
        self
    }

    /// Readings for `id`, if present.
    pub fn get(&self, id: &str) -> Option<&ZoneMetrics> {
        self.zones.get(id)
    }

    /// Number of zones in the snapshot.
    pub fn len(&self) -> usize {
        self.zones.len()
    }

    /// Returns `true` when no zone reported.
    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// Sum of `input_power` over every zone (W).
    pub fn total_input(&self) -> f32 {
        self.zones.values().map(|m| m.input_power).sum()
    }

    /// Sum of `output_power` over every zone (W).
    pub fn total_output(&self) -> f32 {
        self.zones.values().map(|m| m.output_power).sum()
    }
}

/// Zone id → relay command for one cycle.
///
/// Backed by an ordered map so two decisions over the same snapshot compare
/// and print identically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decision(BTreeMap<String, Command>);

impl Decision {
    /// Creates an empty decision.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the command for a zone.
    pub fn set(&mut self, zone: &str, command: Command) {
        self.0.insert(zone.to_string(), command);
    }

    /// Command decided for `zone`.
    pub fn get(&self, zone: &str) -> Option<Command> {
        self.0.get(zone).copied()
    }

    /// Returns `true` if `zone` is decided ON.
    pub fn is_on(&self, zone: &str) -> bool {
        self.get(zone) == Some(Command::On)
    }

    /// Ids of zones decided ON, in id order.
    pub fn on_zones(&self) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(_, c)| **c == Command::On)
            .map(|(z, _)| z.as_str())
            .collect()
    }

    /// Number of zones decided ON.
    pub fn count_on(&self) -> usize {
        self.0.values().filter(|c| **c == Command::On).count()
    }

    /// Iterates `(zone, command)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Command)> {
        self.0.iter().map(|(z, c)| (z.as_str(), *c))
    }

    /// Number of zones in the decision.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if no zone has been decided.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.iter().map(|(z, c)| format!("{z}={c}")).collect();
        f.write_str(&parts.join(" "))
    }
}

/// Severity mode chosen from the average battery level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Only critical zones stay energised.
    Emergency,
    /// Critical and semi-critical zones, gated on local generation.
    Critical,
    /// Efficiency-gated operation.
    Conservation,
    /// Efficiency- and endurance-gated operation.
    Normal,
}

impl Mode {
    /// Lower-case mode name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Emergency => "emergency",
            Self::Critical => "critical",
            Self::Conservation => "conservation",
            Self::Normal => "normal",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate view of the system computed alongside each decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SystemState {
    /// Σ input power over all zones (W).
    pub total_input: f32,
    /// Σ output power over all zones (W).
    pub total_output: f32,
    /// Mean battery state of charge across reporting zones (0–100).
    pub avg_battery_percentage: f32,
    /// Predicted hours the system can sustain the current draw.
    pub sustain_hours: f32,
}

/// Output of the decision engine for one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionReport {
    /// Mode selected by the threshold ladder.
    pub mode: Mode,
    /// Per-zone commands.
    pub decision: Decision,
    /// Ordered, human-readable trace of the policy steps applied.
    pub reasoning: Vec<String>,
    /// Aggregate system view.
    pub state: SystemState,
}

/// Failure taxonomy of the control core.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ControlError {
    /// No snapshot this cycle; nothing is decided or sent.
    #[error("no sensor data available: {0}")]
    DataUnavailable(String),
    /// A zone's command could not be confirmed after in-line retries.
    #[error("command {command} for {zone} failed after {attempts} attempt(s): {reason}")]
    DispatchFailure {
        /// Target zone.
        zone: String,
        /// Command that failed.
        command: Command,
        /// Attempts made.
        attempts: u32,
        /// Last error reported by the sink.
        reason: String,
    },
    /// A command was never acknowledged by hardware.
    #[error("command {command} for {zone} not acknowledged within {timeout_secs}s")]
    CommandTimeout {
        /// Target zone.
        zone: String,
        /// Pending command.
        command: Command,
        /// Acknowledgement window.
        timeout_secs: u64,
    },
    /// Repeated snapshot fetch failures.
    #[error("store connectivity lost after {0} consecutive failures")]
    ConnectivityLoss(u32),
    /// A zone's readings are older than the freshness window.
    #[error("data for {zone} is {age_minutes:.1} minutes old")]
    StaleData {
        /// Zone with stale readings.
        zone: String,
        /// Age of the readings.
        age_minutes: f32,
    },
    /// The watchdog gave up on a failed command.
    #[error("command {command} for {zone} abandoned after {retries} retries")]
    RetryExhausted {
        /// Target zone.
        zone: String,
        /// Abandoned command.
        command: Command,
        /// Retries attempted.
        retries: u32,
    },
    /// Zone id not present in the registry.
    #[error("unknown zone \"{0}\"")]
    UnknownZone(String),
    /// Emergency id not present in the registry.
    #[error("unknown emergency \"{0}\"")]
    UnknownEmergency(String),
    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One row of cycle telemetry: the outcome of an optimize-and-dispatch run.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleRecord {
    /// Sequence number of the cycle (0-based).
    pub cycle: usize,
    /// When the cycle started.
    pub started_at: DateTime<Utc>,
    /// Whether a decision set was produced and dispatched.
    pub success: bool,
    /// Mode selected, if a decision was made.
    pub mode: Option<Mode>,
    /// Mean battery level seen by the engine.
    pub avg_battery_percentage: f32,
    /// Predicted sustain hours.
    pub sustain_hours: f32,
    /// Zones decided ON after balancing.
    pub zones_on: usize,
    /// Zones decided OFF after balancing.
    pub zones_off: usize,
    /// Zones forced OFF by the load balancer.
    pub shed: Vec<String>,
    /// Zones whose command could not be delivered.
    pub dispatch_failures: usize,
    /// Error message for unsuccessful cycles.
    pub error: Option<String>,
}

impl fmt::Display for CycleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.mode, &self.error) {
            (Some(mode), _) => write!(
                f,
                "cycle={:>3} {} | mode={:<12} battery={:>5.1}%  sustain={:>7.2}h | \
                 on={} off={} shed=[{}] failed={}",
                self.cycle,
                self.started_at.format("%Y-%m-%dT%H:%M:%SZ"),
                mode,
                self.avg_battery_percentage,
                self.sustain_hours,
                self.zones_on,
                self.zones_off,
                self.shed.join(","),
                self.dispatch_failures,
            ),
            (None, err) => write!(
                f,
                "cycle={:>3} {} | skipped: {}",
                self.cycle,
                self.started_at.format("%Y-%m-%dT%H:%M:%SZ"),
                err.as_deref().unwrap_or("unknown error"),
            ),
        }
    }
}
