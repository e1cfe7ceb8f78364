//! Zone definitions: static configuration, registry and sensor readings.

/// Priority-ordered zone table.
pub mod registry;
pub mod types;

pub use registry::{RegistryError, ZoneRegistry};
pub use types::{Tier, ZoneConfig, ZoneMetrics};
