//! Shared test fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::mpsc;

use microgrid_ctl::config::ControllerConfig;
use microgrid_ctl::control::{
    Clock, Command, DecisionEngine, DispatchEvent, DispatchPolicy, Dispatcher, LoadBalancer,
    ManualClock, Optimizer, SystemSnapshot,
};
use microgrid_ctl::forecast::HeuristicPredictor;
use microgrid_ctl::notify::AlertLog;
use microgrid_ctl::ports::{CommandSink, StoreError};
use microgrid_ctl::store::DocumentStore;
use microgrid_ctl::watchdog::{Watchdog, WatchdogPolicy};
use microgrid_ctl::zones::{ZoneMetrics, ZoneRegistry};

/// Monday 2 June 2025, 12:00 UTC.
pub fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap()
}

/// Baseline four-zone registry (Zone1 critical .. Zone4 deferrable).
pub fn baseline_registry() -> Arc<ZoneRegistry> {
    Arc::new(ControllerConfig::baseline().registry().unwrap())
}

/// Readings with the given powers (W) and state of charge (%).
pub fn reading(at: DateTime<Utc>, input: f32, output: f32, battery_pct: f32) -> ZoneMetrics {
    ZoneMetrics::at(at)
        .with_power(input, output)
        .with_solar(input)
        .with_battery(10.5 + battery_pct / 100.0 * 2.1, battery_pct)
        .with_relay(true)
}

/// Snapshot from `(zone, input, output, battery_pct)` tuples.
pub fn snapshot(at: DateTime<Utc>, zones: &[(&str, f32, f32, f32)]) -> SystemSnapshot {
    zones
        .iter()
        .fold(SystemSnapshot::new(at), |s, (id, i, o, b)| {
            s.with_zone(id, reading(at, *i, *o, *b))
        })
}

/// Command link in front of the store that can be cut.
pub struct Link {
    store: Arc<DocumentStore>,
    down: AtomicBool,
}

impl Link {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self {
            store,
            down: AtomicBool::new(false),
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl CommandSink for Link {
    async fn send_command(&self, zone: &str, command: Command) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("command link down".into()));
        }
        self.store.send_command(zone, command).await
    }
}

/// Controller wired against an in-memory store and a manual clock.
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub store: Arc<DocumentStore>,
    pub link: Arc<Link>,
    pub alerts: Arc<AlertLog>,
    pub registry: Arc<ZoneRegistry>,
    pub optimizer: Arc<Optimizer<HeuristicPredictor>>,
    pub watchdog: Arc<Watchdog>,
    pub events: mpsc::UnboundedSender<DispatchEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(WatchdogPolicy::default())
    }

    pub fn with_policy(policy: WatchdogPolicy) -> Self {
        let config = ControllerConfig::baseline();
        let clock = Arc::new(ManualClock::new(noon()));
        let store = Arc::new(DocumentStore::new(clock.clone()));
        let link = Arc::new(Link::new(store.clone()));
        let alerts = Arc::new(AlertLog::new(config.notify.clone(), clock.clone()));
        let registry = baseline_registry();

        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(link.clone(), clock.clone(), DispatchPolicy::default())
            .with_event_channel(tx.clone());
        let retrier = Dispatcher::new(
            link.clone(),
            clock.clone(),
            DispatchPolicy::default().single_attempt(),
        );

        let predictor = Arc::new(HeuristicPredictor::default());
        let optimizer = Arc::new(Optimizer::new(
            DecisionEngine::new(registry.clone(), predictor, config.thresholds),
            LoadBalancer::new(registry.clone(), config.safety_margin),
            dispatcher,
            store.clone(),
            clock.clone(),
        ));
        let watchdog = Arc::new(Watchdog::new(
            registry.clone(),
            store.clone(),
            store.clone(),
            retrier,
            alerts.clone(),
            clock.clone(),
            policy,
            rx,
        ));

        Self {
            clock,
            store,
            link,
            alerts,
            registry,
            optimizer,
            watchdog,
            events: tx,
        }
    }

    /// Publishes one fresh reading per baseline zone.
    pub async fn report(&self, input: f32, output: f32, battery_pct: f32) {
        let now = self.clock.now();
        for z in self.registry.by_priority() {
            self.store
                .put_metrics(&z.id, reading(now, input, output, battery_pct))
                .await
                .unwrap();
        }
    }
}
