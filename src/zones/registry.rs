use std::collections::{HashMap, HashSet};

use super::types::{Tier, ZoneConfig};

/// Errors raised while building a [`ZoneRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No zones were configured.
    #[error("zone registry is empty")]
    Empty,
    /// Two zones share an id.
    #[error("duplicate zone id \"{0}\"")]
    DuplicateId(String),
    /// Two zones share a priority.
    #[error("zones \"{first}\" and \"{second}\" share priority {priority}")]
    DuplicatePriority {
        /// The shared priority value.
        priority: u32,
        /// Zone that claimed the priority first.
        first: String,
        /// Zone that collided with it.
        second: String,
    },
}

/// Immutable, process-wide table of zones ordered by priority.
///
/// Every other component resolves zone ids through the registry, so the
/// key space of snapshots, decisions and commands is fixed here.
#[derive(Debug, Clone)]
pub struct ZoneRegistry {
    /// Zones sorted by ascending priority (highest priority first).
    zones: Vec<ZoneConfig>,
    index: HashMap<String, usize>,
}

impl ZoneRegistry {
    /// Builds a registry, enforcing unique ids and a strict priority order.
    ///
    /// # Errors
    ///
    /// Returns a `RegistryError` if the list is empty, or an id or priority
    /// appears twice.
    pub fn new(mut zones: Vec<ZoneConfig>) -> Result<Self, RegistryError> {
        if zones.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut ids = HashSet::new();
        for z in &zones {
            if !ids.insert(z.id.as_str()) {
                return Err(RegistryError::DuplicateId(z.id.clone()));
            }
        }

        zones.sort_by_key(|z| z.priority);
        for pair in zones.windows(2) {
            if pair[0].priority == pair[1].priority {
                return Err(RegistryError::DuplicatePriority {
                    priority: pair[0].priority,
                    first: pair[0].id.clone(),
                    second: pair[1].id.clone(),
                });
            }
        }

        let index = zones
            .iter()
            .enumerate()
            .map(|(i, z)| (z.id.clone(), i))
            .collect();
        Ok(Self { zones, index })
    }

    /// Looks up a zone by id.
    pub fn get(&self, id: &str) -> Option<&ZoneConfig> {
        self.index.get(id).map(|&i| &self.zones[i])
    }

    /// Returns `true` if `id` names a configured zone.
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Returns the tier of a zone, if configured.
    pub fn tier_of(&self, id: &str) -> Option<Tier> {
        self.get(id).map(|z| z.tier)
    }

    /// Iterates zones in ascending priority order (highest priority first).
    pub fn by_priority(&self) -> impl Iterator<Item = &ZoneConfig> {
        self.zones.iter()
    }

    /// Ids of every zone whose tier is in `tiers`, in priority order.
    pub fn ids_with_tier(&self, tiers: &[Tier]) -> Vec<String> {
        self.zones
            .iter()
            .filter(|z| tiers.contains(&z.tier))
            .map(|z| z.id.clone())
            .collect()
    }

    /// Number of configured zones.
    pub fn len(&self) -> usize {
        self.zones.len()
    }

    /// Always `false` for a constructed registry; provided for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zones() -> Vec<ZoneConfig> {
        vec![
            ZoneConfig::new("Zone3", Tier::NonCritical, 3, "Entertainment"),
            ZoneConfig::new("Zone1", Tier::Critical, 1, "Hospital/Emergency"),
            ZoneConfig::new("Zone4", Tier::Deferrable, 4, "Water Pumps"),
            ZoneConfig::new("Zone2", Tier::SemiCritical, 2, "Street Lights"),
        ]
    }

    #[test]
    fn orders_by_priority() {
        let reg = ZoneRegistry::new(zones()).ok();
        let ids: Vec<&str> = reg
            .as_ref()
            .map(|r| r.by_priority().map(|z| z.id.as_str()).collect())
            .unwrap_or_default();
        assert_eq!(ids, vec!["Zone1", "Zone2", "Zone3", "Zone4"]);
    }

    #[test]
    fn lookup_by_id() {
        let reg = ZoneRegistry::new(zones()).ok();
        let reg = reg.as_ref();
        assert_eq!(reg.and_then(|r| r.tier_of("Zone4")), Some(Tier::Deferrable));
        assert_eq!(
            reg.and_then(|r| r.get("Zone1")).map(|z| z.display_name.as_str()),
            Some("Hospital/Emergency")
        );
        assert!(reg.is_some_and(|r| !r.contains("Zone9")));
    }

    #[test]
    fn rejects_duplicate_priority() {
        let mut z = zones();
        z[2].priority = 1;
        let err = ZoneRegistry::new(z).err();
        assert!(matches!(
            err,
            Some(RegistryError::DuplicatePriority { priority: 1, .. })
        ));
    }

    #[test]
    fn rejects_duplicate_id() {
        let mut z = zones();
        z[0].id = "Zone1".to_string();
        assert_eq!(
            ZoneRegistry::new(z).err(),
            Some(RegistryError::DuplicateId("Zone1".to_string()))
        );
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(ZoneRegistry::new(Vec::new()).err(), Some(RegistryError::Empty));
    }

    #[test]
    fn filters_by_tier() {
        let reg = ZoneRegistry::new(zones()).ok();
        let ids = reg
            .map(|r| r.ids_with_tier(&[Tier::NonCritical, Tier::Deferrable]))
            .unwrap_or_default();
        assert_eq!(ids, vec!["Zone3".to_string(), "Zone4".to_string()]);
    }
}
