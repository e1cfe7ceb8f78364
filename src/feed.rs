//! Synthetic field hardware for running the controller without relays.
//!
//! [`SyntheticFeed`] plays the zone controllers: it acknowledges commands,
//! tracks relay state and battery charge, and publishes noisy readings
//! with a half-sine solar profile. [`FlakySink`] wraps a command sink and
//! drops a configurable share of writes.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Timelike;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::control::clock::Clock;
use crate::control::types::Command;
use crate::ports::{CommandSink, PendingCommands, StoreError};
use crate::store::DocumentStore;
use crate::zones::{Tier, ZoneConfig, ZoneMetrics, ZoneRegistry};

/// Synthetic hardware settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeedConfig {
    /// Random seed.
    pub seed: u64,
    /// Seconds between published readings.
    pub period_secs: u64,
    /// Peak panel output per zone (W).
    pub solar_peak_w: f32,
    /// Relative standard deviation of reading noise.
    pub noise_std: f32,
    /// Probability that a pending command is executed on a given step.
    pub ack_probability: f64,
    /// Probability that a command write is dropped.
    pub failure_rate: f64,
    /// Starting state of charge (0–100).
    pub initial_battery: f32,
    /// Percent of charge gained or lost per watt of net flow per step.
    pub charge_rate: f32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            period_secs: 30,
            solar_peak_w: 60.0,
            noise_std: 0.05,
            ack_probability: 0.9,
            failure_rate: 0.0,
            initial_battery: 60.0,
            charge_rate: 0.02,
        }
    }
}

/// Utility function to generate Gaussian noise using Box-Muller transform.
///
/// # Arguments
///
/// * `rng` - Random number generator
/// * `std_dev` - Standard deviation of the noise
///
/// # Returns
///
/// A sample from `N(0, std_dev²)`; 0 when `std_dev <= 0`.
pub fn gaussian_noise(rng: &mut StdRng, std_dev: f32) -> f32 {
    if std_dev <= 0.0 {
        return 0.0;
    }
    let u1: f32 = rng.random::<f32>().clamp(1e-6, 1.0);
    let u2: f32 = rng.random::<f32>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos() * std_dev
}

/// Fraction of peak solar output at a fractional hour of day.
///
/// Half-sine between 06:00 and 18:00, zero at night.
pub fn daylight_frac(hour: f32) -> f32 {
    if !(6.0..18.0).contains(&hour) {
        return 0.0;
    }
    (std::f32::consts::PI * (hour - 6.0) / 12.0).sin().max(0.0)
}

/// Nominal draw of a zone's loads (W) when energised.
fn nominal_load(tier: Tier) -> f32 {
    match tier {
        Tier::Critical => 25.0,
        Tier::SemiCritical => 20.0,
        Tier::NonCritical => 15.0,
        Tier::Deferrable => 10.0,
    }
}

/// Standby draw with the relay open (W).
const STANDBY_LOAD: f32 = 0.5;

struct ZoneSim {
    relay: bool,
    battery: f32,
}

struct FeedState {
    rng: StdRng,
    zones: BTreeMap<String, ZoneSim>,
}

/// Simulated zone controllers publishing into a [`DocumentStore`].
pub struct SyntheticFeed {
    registry: Arc<ZoneRegistry>,
    store: Arc<DocumentStore>,
    clock: Arc<dyn Clock>,
    config: FeedConfig,
    state: Mutex<FeedState>,
}

impl SyntheticFeed {
    /// Creates a feed with every relay closed.
    pub fn new(
        registry: Arc<ZoneRegistry>,
        store: Arc<DocumentStore>,
        clock: Arc<dyn Clock>,
        config: FeedConfig,
    ) -> Self {
        let zones = registry
            .by_priority()
            .map(|z| {
                (
                    z.id.clone(),
                    ZoneSim {
                        relay: true,
                        battery: config.initial_battery.clamp(0.0, 100.0),
                    },
                )
            })
            .collect();
        Self {
            state: Mutex::new(FeedState {
                rng: StdRng::seed_from_u64(config.seed),
                zones,
            }),
            registry,
            store,
            clock,
            config,
        }
    }

    /// Executes pending commands and publishes one reading per zone.
    ///
    /// # Errors
    ///
    /// Returns the first store error; zones after it are skipped.
    pub async fn step(&self) -> Result<(), StoreError> {
        let pending = self.store.pending_commands().await?;
        for cmd in pending {
            let execute = {
                let mut state = self.state.lock();
                let roll = state.rng.random::<f64>();
                let execute = roll < self.config.ack_probability;
                if execute {
                    if let Some(sim) = state.zones.get_mut(&cmd.zone) {
                        sim.relay = cmd.command == Command::On;
                    }
                }
                execute
            };
            if execute {
                self.store.acknowledge(&cmd.zone).await?;
            } else {
                trace!(zone = %cmd.zone, "command left pending");
            }
        }

        let now = self.clock.now();
        let hour = now.hour() as f32 + now.minute() as f32 / 60.0;
        for zone in self.registry.by_priority() {
            let metrics = {
                let mut state = self.state.lock();
                self.sample(&mut state, zone, hour, now)
            };
            self.store.put_metrics(&zone.id, metrics).await?;
        }
        debug!(zones = self.registry.len(), "synthetic readings published");
        Ok(())
    }

    fn sample(
        &self,
        state: &mut FeedState,
        zone: &ZoneConfig,
        hour: f32,
        now: chrono::DateTime<chrono::Utc>,
    ) -> ZoneMetrics {
        let FeedState { rng, zones } = state;
        let noise = self.config.noise_std;

        let solar =
            (self.config.solar_peak_w * daylight_frac(hour) * (1.0 + gaussian_noise(rng, noise)))
                .max(0.0);
        let Some(sim) = zones.get_mut(&zone.id) else {
            return ZoneMetrics::at(now);
        };
        let load = if sim.relay {
            nominal_load(zone.tier) * (1.0 + gaussian_noise(rng, noise))
        } else {
            STANDBY_LOAD
        }
        .max(0.0);

        sim.battery = (sim.battery + (solar - load) * self.config.charge_rate).clamp(0.0, 100.0);
        let voltage = 10.5 + sim.battery / 100.0 * 2.1 + gaussian_noise(rng, 0.02);

        ZoneMetrics::at(now)
            .with_power(solar, load)
            .with_solar(solar)
            .with_battery(voltage, sim.battery)
            .with_relay(sim.relay)
    }
}

/// Command sink that drops a share of writes.
pub struct FlakySink {
    inner: Arc<dyn CommandSink>,
    failure_rate: f64,
    rng: Mutex<StdRng>,
}

impl FlakySink {
    /// Wraps `inner`, failing each write with probability `failure_rate`.
    pub fn new(inner: Arc<dyn CommandSink>, failure_rate: f64, seed: u64) -> Self {
        Self {
            inner,
            failure_rate: failure_rate.clamp(0.0, 1.0),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

#[async_trait]
impl CommandSink for FlakySink {
    async fn send_command(&self, zone: &str, command: Command) -> Result<(), StoreError> {
        let drop_it = self.rng.lock().random::<f64>() < self.failure_rate;
        if drop_it {
            return Err(StoreError::Unavailable(format!(
                "injected failure writing {command} to {zone}"
            )));
        }
        self.inner.send_command(zone, command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::clock::ManualClock;
    use crate::ports::SnapshotSource;
    use chrono::{TimeZone, Utc};

    fn setup(config: FeedConfig) -> (Arc<DocumentStore>, SyntheticFeed) {
        let noon = Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(noon));
        let store = Arc::new(DocumentStore::new(clock.clone()));
        let registry = Arc::new(
            ZoneRegistry::new(vec![
                ZoneConfig::new("Zone1", Tier::Critical, 1, "Hospital/Emergency"),
                ZoneConfig::new("Zone4", Tier::Deferrable, 4, "Water Pumps"),
            ])
            .unwrap(),
        );
        let feed = SyntheticFeed::new(registry, store.clone(), clock, config);
        (store, feed)
    }

    #[test]
    fn daylight_profile() {
        assert_eq!(daylight_frac(3.0), 0.0);
        assert_eq!(daylight_frac(18.0), 0.0);
        assert!((daylight_frac(12.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn noise_is_seeded() {
        let mut a = StdRng::seed_from_u64(7);
        let mut b = StdRng::seed_from_u64(7);
        assert_eq!(gaussian_noise(&mut a, 0.1), gaussian_noise(&mut b, 0.1));
        assert_eq!(gaussian_noise(&mut a, 0.0), 0.0);
    }

    #[tokio::test]
    async fn publishes_readings_for_every_zone() {
        let (store, feed) = setup(FeedConfig::default());
        feed.step().await.unwrap();
        let snap = store.fetch_snapshot().await.unwrap();
        assert_eq!(snap.len(), 2);
        let z1 = snap.get("Zone1").unwrap();
        assert!(z1.relay_state);
        assert!(z1.solar_generation > 0.0);
        assert!((0.0..=100.0).contains(&z1.battery_percentage));
    }

    #[tokio::test]
    async fn executes_commands_when_always_acknowledging() {
        let (store, feed) = setup(FeedConfig {
            ack_probability: 1.0,
            ..Default::default()
        });
        store.send_command("Zone4", Command::Off).await.unwrap();
        feed.step().await.unwrap();
        assert!(store.pending_commands().await.unwrap().is_empty());
        let snap = store.fetch_snapshot().await.unwrap();
        assert_eq!(snap.get("Zone4").map(|m| m.relay_state), Some(false));
        assert_eq!(snap.get("Zone4").map(|m| m.output_power), Some(STANDBY_LOAD));
    }

    #[tokio::test]
    async fn never_acknowledging_leaves_commands_pending() {
        let (store, feed) = setup(FeedConfig {
            ack_probability: 0.0,
            ..Default::default()
        });
        store.send_command("Zone4", Command::Off).await.unwrap();
        feed.step().await.unwrap();
        assert_eq!(store.pending_commands().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn flaky_sink_extremes() {
        let store = Arc::new(DocumentStore::new(Arc::new(ManualClock::new(Utc::now()))));
        let always = FlakySink::new(store.clone(), 1.0, 1);
        assert!(always.send_command("Zone1", Command::On).await.is_err());
        let never = FlakySink::new(store.clone(), 0.0, 1);
        assert!(never.send_command("Zone1", Command::On).await.is_ok());
        assert_eq!(store.pending_commands().await.unwrap().len(), 1);
    }
}
