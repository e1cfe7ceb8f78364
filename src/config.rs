//! TOML-based controller configuration and preset definitions.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::control::balancer::DEFAULT_SAFETY_MARGIN;
use crate::control::dispatcher::DispatchPolicy;
use crate::control::engine::PolicyThresholds;
use crate::feed::FeedConfig;
use crate::notify::NotifyConfig;
use crate::scheduler::SchedulePolicy;
use crate::watchdog::WatchdogPolicy;
use crate::zones::{RegistryError, Tier, ZoneConfig, ZoneRegistry};

/// Top-level controller configuration parsed from TOML.
///
/// All sections have defaults matching the baseline installation. Load from
/// TOML with [`ControllerConfig::from_toml_file`] or use
/// [`ControllerConfig::baseline`] for the built-in default.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerConfig {
    /// Battery thresholds driving mode selection.
    #[serde(default)]
    pub thresholds: PolicyThresholds,
    /// Share of available generation the balancer may commit (0–1].
    #[serde(default = "default_safety_margin")]
    pub safety_margin: f32,
    /// Reliability watchdog settings.
    #[serde(default)]
    pub watchdog: WatchdogPolicy,
    /// Periodic task intervals.
    #[serde(default)]
    pub scheduler: SchedulePolicy,
    /// Command dispatch retries and timeouts.
    #[serde(default)]
    pub dispatch: DispatchPolicy,
    /// Alert recipients.
    #[serde(default)]
    pub notify: NotifyConfig,
    /// Synthetic hardware used when no field store is attached.
    #[serde(default)]
    pub feed: FeedConfig,
    /// Zone table.
    #[serde(default = "baseline_zones")]
    pub zones: Vec<ZoneConfig>,
}

fn default_safety_margin() -> f32 {
    DEFAULT_SAFETY_MARGIN
}

fn baseline_zones() -> Vec<ZoneConfig> {
    vec![
        ZoneConfig::new("Zone1", Tier::Critical, 1, "Hospital/Emergency"),
        ZoneConfig::new("Zone2", Tier::SemiCritical, 2, "Street Lights"),
        ZoneConfig::new("Zone3", Tier::NonCritical, 3, "Entertainment"),
        ZoneConfig::new("Zone4", Tier::Deferrable, 4, "Water Pumps"),
    ]
}

/// Configuration error with field path and constraint description.
#[derive(Debug)]
pub struct ConfigError {
    /// Dotted field path (e.g., `"watchdog.tick_secs"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl ConfigError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {}: {}", self.field, self.message)
    }
}

impl From<RegistryError> for ConfigError {
    fn from(e: RegistryError) -> Self {
        Self::new("zones", e.to_string())
    }
}

impl ControllerConfig {
    /// Returns the baseline installation: four zones, one per tier.
    pub fn baseline() -> Self {
        Self {
            thresholds: PolicyThresholds::default(),
            safety_margin: DEFAULT_SAFETY_MARGIN,
            watchdog: WatchdogPolicy::default(),
            scheduler: SchedulePolicy::default(),
            dispatch: DispatchPolicy::default(),
            notify: NotifyConfig::default(),
            feed: FeedConfig::default(),
            zones: baseline_zones(),
        }
    }

    /// Returns the extended preset: six zones, a dimmer array and a lossy
    /// command link.
    pub fn extended() -> Self {
        let mut zones = baseline_zones();
        zones.push(ZoneConfig::new("Zone5", Tier::NonCritical, 5, "Community Hall"));
        zones.push(ZoneConfig::new("Zone6", Tier::Deferrable, 6, "Irrigation"));
        Self {
            safety_margin: 0.85,
            feed: FeedConfig {
                solar_peak_w: 40.0,
                initial_battery: 35.0,
                ack_probability: 0.8,
                failure_rate: 0.1,
                ..FeedConfig::default()
            },
            zones,
            ..Self::baseline()
        }
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["baseline", "extended"];

    /// Loads a configuration from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "baseline" => Ok(Self::baseline()),
            "extended" => Ok(Self::extended()),
            _ => Err(ConfigError::new(
                "preset",
                format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            )),
        }
    }

    /// Parses a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigError::new("config", format!("cannot read \"{}\": {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::new("toml", e.to_string()))
    }

    /// Builds the zone registry.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the zone table is empty or has duplicates.
    pub fn registry(&self) -> Result<ZoneRegistry, ConfigError> {
        Ok(ZoneRegistry::new(self.zones.clone())?)
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.zones.is_empty() {
            errors.push(ConfigError::new("zones", "at least one zone is required"));
        }
        let mut ids = HashSet::new();
        let mut priorities = HashSet::new();
        for (i, z) in self.zones.iter().enumerate() {
            if z.id.is_empty() || z.id.contains('/') {
                errors.push(ConfigError::new(
                    format!("zones[{i}].id"),
                    "must be non-empty and contain no '/'",
                ));
            }
            if !ids.insert(z.id.as_str()) {
                errors.push(ConfigError::new(
                    format!("zones[{i}].id"),
                    format!("duplicate zone id \"{}\"", z.id),
                ));
            }
            if !priorities.insert(z.priority) {
                errors.push(ConfigError::new(
                    format!("zones[{i}].priority"),
                    format!("priority {} is already taken", z.priority),
                ));
            }
        }

        let t = &self.thresholds;
        if !(t.emergency_battery < t.critical_battery && t.critical_battery < t.low_battery) {
            errors.push(ConfigError::new(
                "thresholds",
                "must satisfy emergency_battery < critical_battery < low_battery",
            ));
        }
        if !(0.0..=100.0).contains(&t.low_battery) || t.emergency_battery < 0.0 {
            errors.push(ConfigError::new(
                "thresholds",
                "battery thresholds must lie in [0, 100]",
            ));
        }
        if t.min_generation < 0.0 {
            errors.push(ConfigError::new("thresholds.min_generation", "must be >= 0"));
        }

        if !(self.safety_margin > 0.0 && self.safety_margin <= 1.0) {
            errors.push(ConfigError::new("safety_margin", "must be in (0.0, 1.0]"));
        }

        let intervals = [
            ("watchdog.tick_secs", self.watchdog.tick_secs),
            ("watchdog.command_timeout_secs", self.watchdog.command_timeout_secs),
            ("watchdog.stale_after_secs", self.watchdog.stale_after_secs),
            ("watchdog.io_timeout_secs", self.watchdog.io_timeout_secs),
            ("scheduler.monitor_secs", self.scheduler.monitor_secs),
            ("scheduler.optimize_secs", self.scheduler.optimize_secs),
            ("scheduler.retrain_secs", self.scheduler.retrain_secs),
            ("dispatch.io_timeout_secs", self.dispatch.io_timeout_secs),
            ("feed.period_secs", self.feed.period_secs),
        ];
        for (field, secs) in intervals {
            if secs == 0 {
                errors.push(ConfigError::new(field, "must be > 0"));
            }
        }
        if self.watchdog.failure_threshold == 0 {
            errors.push(ConfigError::new("watchdog.failure_threshold", "must be > 0"));
        }
        if self.watchdog.max_retries == 0 {
            errors.push(ConfigError::new("watchdog.max_retries", "must be > 0"));
        }
        if self.dispatch.max_attempts == 0 {
            errors.push(ConfigError::new("dispatch.max_attempts", "must be > 0"));
        }

        let f = &self.feed;
        if !(0.0..=1.0).contains(&f.failure_rate) {
            errors.push(ConfigError::new("feed.failure_rate", "must be in [0.0, 1.0]"));
        }
        if !(0.0..=1.0).contains(&f.ack_probability) {
            errors.push(ConfigError::new("feed.ack_probability", "must be in [0.0, 1.0]"));
        }
        if !(0.0..=100.0).contains(&f.initial_battery) {
            errors.push(ConfigError::new("feed.initial_battery", "must be in [0, 100]"));
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid() {
        for name in ControllerConfig::PRESETS {
            let cfg = ControllerConfig::from_preset(name).unwrap();
            let errors = cfg.validate();
            assert!(errors.is_empty(), "{name} should be valid: {errors:?}");
            assert!(cfg.registry().is_ok());
        }
    }

    #[test]
    fn from_preset_unknown() {
        let e = ControllerConfig::from_preset("nonexistent").unwrap_err();
        assert!(e.message.contains("unknown preset"));
    }

    #[test]
    fn baseline_zone_table() {
        let registry = ControllerConfig::baseline().registry().unwrap();
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.tier_of("Zone1"), Some(Tier::Critical));
        assert_eq!(
            registry.get("Zone4").map(|z| z.display_name.as_str()),
            Some("Water Pumps")
        );
    }

    #[test]
    fn valid_toml_parses() {
        let toml = r#"
safety_margin = 0.8

[thresholds]
low_battery = 25.0

[watchdog]
tick_secs = 15

[scheduler]
optimize_secs = 600

[notify]
admin_email = "ops@example.org"

[[zones]]
id = "Clinic"
tier = "critical"
priority = 1
display_name = "Clinic"

[[zones]]
id = "Pumps"
tier = "deferrable"
priority = 2
display_name = "Pumps"
"#;
        let cfg = ControllerConfig::from_toml_str(toml).unwrap();
        assert!(cfg.validate().is_empty());
        assert_eq!(cfg.safety_margin, 0.8);
        assert_eq!(cfg.thresholds.low_battery, 25.0);
        assert_eq!(cfg.thresholds.critical_battery, 10.0);
        assert_eq!(cfg.watchdog.tick_secs, 15);
        assert_eq!(cfg.watchdog.max_retries, 3);
        assert_eq!(cfg.scheduler.optimize_secs, 600);
        assert_eq!(cfg.notify.admin_email.as_deref(), Some("ops@example.org"));
        assert_eq!(cfg.zones.len(), 2);
        assert_eq!(cfg.zones[1].tier, Tier::Deferrable);
    }

    #[test]
    fn empty_toml_is_baseline() {
        let cfg = ControllerConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.zones, ControllerConfig::baseline().zones);
        assert_eq!(cfg.safety_margin, DEFAULT_SAFETY_MARGIN);
    }

    #[test]
    fn unknown_field_rejected() {
        let err = ControllerConfig::from_toml_str("[watchdog]\nbogus = 1\n");
        assert!(err.is_err());
    }

    #[test]
    fn duplicate_zones_reported() {
        let mut cfg = ControllerConfig::baseline();
        cfg.zones
            .push(ZoneConfig::new("Zone1", Tier::Deferrable, 2, "Copy"));
        let fields: Vec<String> = cfg.validate().into_iter().map(|e| e.field).collect();
        assert!(fields.contains(&"zones[4].id".to_string()));
        assert!(fields.contains(&"zones[4].priority".to_string()));
        assert!(cfg.registry().is_err());
    }

    #[test]
    fn threshold_order_and_intervals_checked() {
        let mut cfg = ControllerConfig::baseline();
        cfg.thresholds.critical_battery = 30.0;
        cfg.scheduler.monitor_secs = 0;
        cfg.safety_margin = 1.5;
        let fields: Vec<String> = cfg.validate().into_iter().map(|e| e.field).collect();
        assert!(fields.contains(&"thresholds".to_string()));
        assert!(fields.contains(&"scheduler.monitor_secs".to_string()));
        assert!(fields.contains(&"safety_margin".to_string()));
    }

    #[test]
    fn display_includes_field_path() {
        let e = ConfigError::new("watchdog.tick_secs", "must be > 0");
        assert_eq!(e.to_string(), "config error: watchdog.tick_secs: must be > 0");
    }
}
