//! Zone configuration and per-tick metric types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Nominal full-charge voltage of a zone's 12 V battery bank.
pub const NOMINAL_BATTERY_VOLTAGE: f32 = 12.6;

/// Criticality class of a zone, fixed at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tier {
    /// Life-safety loads (clinics, emergency lighting).
    Critical,
    /// Shared infrastructure such as street lighting.
    SemiCritical,
    /// Comfort loads.
    NonCritical,
    /// Loads that can be shifted in time, e.g. water pumping.
    Deferrable,
}

impl Tier {
    /// Returns the kebab-case name used in configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::SemiCritical => "semi-critical",
            Self::NonCritical => "non-critical",
            Self::Deferrable => "deferrable",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(Self::Critical),
            "semi-critical" => Ok(Self::SemiCritical),
            "non-critical" => Ok(Self::NonCritical),
            "deferrable" => Ok(Self::Deferrable),
            other => Err(format!("unknown tier \"{other}\"")),
        }
    }
}

/// Static description of one relay-controlled zone.
///
/// Loaded once at startup and never mutated. `priority` is a strict total
/// order across the registry: 1 is the highest priority and sheds last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ZoneConfig {
    /// Zone identifier used as the key in snapshots and commands.
    pub id: String,
    /// Criticality class.
    pub tier: Tier,
    /// Shedding priority (1 = highest).
    pub priority: u32,
    /// Human-readable name used in alerts.
    pub display_name: String,
}

impl ZoneConfig {
    /// Creates a zone description.
    pub fn new(id: &str, tier: Tier, priority: u32, display_name: &str) -> Self {
        Self {
            id: id.to_string(),
            tier,
            priority,
            display_name: display_name.to_string(),
        }
    }
}

/// One zone's sensor readings, as captured for a single tick.
///
/// Power values are in watts. Missing readings fall back to the same
/// defaults the field controllers report on boot: 12.0 V, 50 % charge,
/// relay open.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneMetrics {
    /// Power flowing into the zone's battery from its sources (W).
    pub input_power: f32,
    /// Power drawn by the zone's loads (W).
    pub output_power: f32,
    /// Solar panel generation (W).
    pub solar_generation: f32,
    /// Battery terminal voltage (V).
    pub battery_voltage: f32,
    /// Battery state of charge (0–100).
    pub battery_percentage: f32,
    /// Whether the zone relay is currently closed.
    pub relay_state: bool,
    /// When the controller observed these readings.
    pub observed_at: DateTime<Utc>,
}

impl ZoneMetrics {
    /// Creates a reading with default values observed at `observed_at`.
    pub fn at(observed_at: DateTime<Utc>) -> Self {
        Self {
            input_power: 0.0,
            output_power: 0.0,
            solar_generation: 0.0,
            battery_voltage: 12.0,
            battery_percentage: 50.0,
            relay_state: false,
            observed_at,
        }
    }

    /// Sets input and output power (W).
    pub fn with_power(mut self, input_power: f32, output_power: f32) -> Self {
        self.input_power = input_power;
        self.output_power = output_power;
        self
    }

    /// Sets battery voltage and state of charge.
    pub fn with_battery(mut self, battery_voltage: f32, battery_percentage: f32) -> Self {
        self.battery_voltage = battery_voltage;
        self.battery_percentage = battery_percentage;
        self
    }

    /// Sets solar generation (W).
    pub fn with_solar(mut self, solar_generation: f32) -> Self {
        self.solar_generation = solar_generation;
        self
    }

    /// Sets the observed relay state.
    pub fn with_relay(mut self, relay_state: bool) -> Self {
        self.relay_state = relay_state;
        self
    }

    /// Combines several zone readings into one system-wide record.
    ///
    /// Powers are summed, voltage and charge are averaged, the relay is
    /// reported closed if any relay is closed, and the record is stamped
    /// with the oldest observation. Returns `None` for an empty input.
    pub fn aggregate<'a>(readings: impl IntoIterator<Item = &'a ZoneMetrics>) -> Option<Self> {
        let mut count = 0_usize;
        let mut total: Option<ZoneMetrics> = None;
        for m in readings {
            count += 1;
            total = Some(match total {
                None => m.clone(),
                Some(mut acc) => {
                    acc.input_power += m.input_power;
                    acc.output_power += m.output_power;
                    acc.solar_generation += m.solar_generation;
                    acc.battery_voltage += m.battery_voltage;
                    acc.battery_percentage += m.battery_percentage;
                    acc.relay_state |= m.relay_state;
                    acc.observed_at = acc.observed_at.min(m.observed_at);
                    acc
                }
            });
        }
        total.map(|mut acc| {
            let n = count as f32;
            acc.battery_voltage /= n;
            acc.battery_percentage /= n;
            acc
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).single().unwrap_or_default()
    }

    #[test]
    fn tier_round_trips_through_str() {
        for tier in [
            Tier::Critical,
            Tier::SemiCritical,
            Tier::NonCritical,
            Tier::Deferrable,
        ] {
            assert_eq!(tier.as_str().parse::<Tier>(), Ok(tier));
        }
        assert!("essential".parse::<Tier>().is_err());
    }

    #[test]
    fn defaults_match_field_controller_boot_values() {
        let m = ZoneMetrics::at(t0());
        assert_eq!(m.battery_voltage, 12.0);
        assert_eq!(m.battery_percentage, 50.0);
        assert!(!m.relay_state);
    }

    #[test]
    fn aggregate_sums_powers_and_averages_battery() {
        let a = ZoneMetrics::at(t0())
            .with_power(20.0, 10.0)
            .with_battery(12.0, 40.0);
        let b = ZoneMetrics::at(t0() - chrono::Duration::minutes(5))
            .with_power(10.0, 30.0)
            .with_battery(12.4, 60.0)
            .with_relay(true);
        let agg = ZoneMetrics::aggregate([&a, &b]);
        let agg = agg.as_ref();
        assert_eq!(agg.map(|m| m.input_power), Some(30.0));
        assert_eq!(agg.map(|m| m.output_power), Some(40.0));
        assert_eq!(agg.map(|m| m.battery_percentage), Some(50.0));
        assert!(agg.is_some_and(|m| (m.battery_voltage - 12.2).abs() < 1e-5));
        assert_eq!(agg.map(|m| m.relay_state), Some(true));
        assert_eq!(agg.map(|m| m.observed_at), Some(t0() - chrono::Duration::minutes(5)));
    }

    #[test]
    fn aggregate_of_nothing_is_none() {
        assert!(ZoneMetrics::aggregate(std::iter::empty()).is_none());
    }
}
