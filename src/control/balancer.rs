use std::sync::Arc;

use tracing::{debug, info};

use super::types::{Command, Decision, SystemSnapshot};
use crate::zones::ZoneRegistry;

/// Fraction of available supply the ON zones may consume.
pub const DEFAULT_SAFETY_MARGIN: f32 = 0.9;

/// Result of one balancing pass.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceOutcome {
    /// Decision after shedding.
    pub decision: Decision,
    /// Σ output of zones ON before balancing (W).
    pub projected_load: f32,
    /// Σ input of all zones (W).
    pub available: f32,
    /// Zones forced OFF, in shedding (priority) order.
    pub shed: Vec<String>,
}

impl BalanceOutcome {
    /// Returns `true` if any zone was shed.
    pub fn triggered(&self) -> bool {
        !self.shed.is_empty()
    }
}

/// Sheds ON zones by priority when projected load exceeds supply.
///
/// The only component allowed to override engine decisions.
#[derive(Debug, Clone)]
pub struct LoadBalancer {
    registry: Arc<ZoneRegistry>,
    safety_margin: f32,
}

impl LoadBalancer {
    /// Creates a balancer with the given safety margin (e.g. `0.9`).
    pub fn new(registry: Arc<ZoneRegistry>, safety_margin: f32) -> Self {
        Self {
            registry,
            safety_margin,
        }
    }

    /// Applies the capacity ceiling to a decision.
    ///
    /// ON zones are visited by ascending priority and kept while their
    /// cumulative output fits under `safety_margin * available`. Once one
    /// zone does not fit, it and every later ON zone are switched OFF, so
    /// a lower-priority zone is never kept at the expense of a higher one.
    /// Zones already OFF are left alone.
    pub fn balance(&self, mut decision: Decision, snapshot: &SystemSnapshot) -> BalanceOutcome {
        let output_of = |zone: &str| snapshot.get(zone).map_or(0.0, |m| m.output_power.max(0.0));

        let available: f32 = self
            .registry
            .by_priority()
            .filter_map(|z| snapshot.get(&z.id))
            .map(|m| m.input_power.max(0.0))
            .sum();
        let projected_load: f32 = decision.on_zones().into_iter().map(output_of).sum();
        let ceiling = available * self.safety_margin;

        let mut shed = Vec::new();
        if projected_load > ceiling {
            let mut running = 0.0_f32;
            let mut shedding = false;
            for zone in self.registry.by_priority() {
                if !decision.is_on(&zone.id) {
                    continue;
                }
                let load = output_of(&zone.id);
                if !shedding && running + load <= ceiling {
                    running += load;
                    continue;
                }
                shedding = true;
                decision.set(&zone.id, Command::Off);
                shed.push(zone.id.clone());
            }
            info!(
                projected_load,
                available,
                ceiling,
                kept_load = running,
                shed = ?shed,
                "load balancing shed zones"
            );
        } else {
            debug!(projected_load, available, ceiling, "load within ceiling");
        }

        BalanceOutcome {
            decision,
            projected_load,
            available,
            shed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zones::{Tier, ZoneConfig, ZoneMetrics};
    use chrono::Utc;

    fn registry() -> Arc<ZoneRegistry> {
        Arc::new(
            ZoneRegistry::new(vec![
                ZoneConfig::new("Zone1", Tier::Critical, 1, "Hospital/Emergency"),
                ZoneConfig::new("Zone2", Tier::SemiCritical, 2, "Street Lights"),
                ZoneConfig::new("Zone3", Tier::NonCritical, 3, "Entertainment"),
                ZoneConfig::new("Zone4", Tier::Deferrable, 4, "Water Pumps"),
            ])
            .unwrap(),
        )
    }

    fn snapshot(readings: &[(&str, f32, f32)]) -> SystemSnapshot {
        let now = Utc::now();
        readings.iter().fold(SystemSnapshot::new(now), |s, (z, i, o)| {
            s.with_zone(z, ZoneMetrics::at(now).with_power(*i, *o))
        })
    }

    fn all_on() -> Decision {
        let mut d = Decision::new();
        for z in ["Zone1", "Zone2", "Zone3", "Zone4"] {
            d.set(z, Command::On);
        }
        d
    }

    #[test]
    fn sheds_lowest_priority_first() {
        let snap = snapshot(&[
            ("Zone1", 20.0, 25.0),
            ("Zone2", 15.0, 20.0),
            ("Zone3", 10.0, 15.0),
            ("Zone4", 5.0, 10.0),
        ]);
        let out = LoadBalancer::new(registry(), 0.9).balance(all_on(), &snap);
        // ceiling = 0.9 * 50 = 45; 25 + 20 fits exactly
        assert_eq!(out.projected_load, 70.0);
        assert_eq!(out.available, 50.0);
        assert_eq!(out.decision.on_zones(), vec!["Zone1", "Zone2"]);
        assert_eq!(out.shed, vec!["Zone3".to_string(), "Zone4".to_string()]);
        assert!(out.triggered());
    }

    #[test]
    fn untouched_when_under_ceiling() {
        let snap = snapshot(&[("Zone1", 50.0, 10.0), ("Zone2", 50.0, 10.0)]);
        let out = LoadBalancer::new(registry(), 0.9).balance(all_on(), &snap);
        assert_eq!(out.decision, all_on());
        assert!(!out.triggered());
    }

    #[test]
    fn off_zones_are_not_counted_or_touched() {
        let snap = snapshot(&[
            ("Zone1", 10.0, 5.0),
            ("Zone2", 10.0, 50.0),
            ("Zone3", 10.0, 5.0),
        ]);
        let mut d = all_on();
        d.set("Zone2", Command::Off);
        let out = LoadBalancer::new(registry(), 0.9).balance(d, &snap);
        // projected 5 + 5 + 0 (Zone4 missing) = 10 <= 27
        assert!(!out.triggered());
        assert_eq!(out.decision.get("Zone2"), Some(Command::Off));
    }

    #[test]
    fn shedding_is_priority_monotonic() {
        // Zone2 does not fit; Zone3 would, but must go too
        let snap = snapshot(&[
            ("Zone1", 30.0, 20.0),
            ("Zone2", 10.0, 30.0),
            ("Zone3", 10.0, 1.0),
            ("Zone4", 0.0, 1.0),
        ]);
        let out = LoadBalancer::new(registry(), 0.9).balance(all_on(), &snap);
        assert_eq!(out.decision.on_zones(), vec!["Zone1"]);
        assert_eq!(out.shed.len(), 3);
    }

    #[test]
    fn no_supply_sheds_every_loaded_zone() {
        let snap = snapshot(&[("Zone1", 0.0, 5.0), ("Zone2", 0.0, 5.0)]);
        let out = LoadBalancer::new(registry(), 0.9).balance(all_on(), &snap);
        assert_eq!(out.decision.count_on(), 0);
    }
}
