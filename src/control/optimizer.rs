//! The optimize-and-dispatch cycle.
//!
//! One cycle reads a snapshot, computes the full decision against it, runs
//! the load balancer and only then dispatches. Nothing is sent when no
//! snapshot is available.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::balancer::LoadBalancer;
use super::clock::Clock;
use super::dispatcher::Dispatcher;
use super::engine::DecisionEngine;
use super::types::{
    Command, ControlError, CycleRecord, Decision, Mode, SystemSnapshot, SystemState,
};
use crate::forecast::Predictor;
use crate::ports::{SnapshotSource, bounded};

/// Cycle records kept in memory.
const HISTORY_CAPACITY: usize = 2048;

/// A balanced decision ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    /// Mode the engine selected.
    pub mode: Mode,
    /// Decision after load balancing.
    pub decision: Decision,
    /// Engine trace followed by the balancing step.
    pub reasoning: Vec<String>,
    /// Aggregate system view.
    pub state: SystemState,
    /// Zones the balancer switched OFF.
    pub shed: Vec<String>,
}

/// Per-zone execution result of one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    /// Command dispatched.
    pub command: Command,
    /// Whether the store accepted it.
    pub success: bool,
    /// Attempts made.
    pub attempts: u32,
    /// When the result was recorded.
    pub timestamp: DateTime<Utc>,
    /// Dispatch error, if any.
    pub error: Option<String>,
}

/// Outcome of [`Optimizer::optimize`].
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationOutcome {
    /// `false` when no snapshot could be used.
    pub success: bool,
    /// Why the cycle was skipped.
    pub error: Option<String>,
    /// Cycle start.
    pub started_at: DateTime<Utc>,
    /// Plan that was dispatched, if any.
    pub plan: Option<Plan>,
    /// Zone → execution result.
    pub execution: BTreeMap<String, ExecutionResult>,
}

impl OptimizationOutcome {
    /// Zones whose command could not be delivered.
    pub fn failed_zones(&self) -> Vec<&str> {
        self.execution
            .iter()
            .filter(|(_, r)| !r.success)
            .map(|(z, _)| z.as_str())
            .collect()
    }
}

/// Runs decision cycles and keeps their telemetry.
pub struct Optimizer<P> {
    engine: DecisionEngine<P>,
    balancer: LoadBalancer,
    dispatcher: Dispatcher,
    source: Arc<dyn SnapshotSource>,
    clock: Arc<dyn Clock>,
    io_timeout: Duration,
    min_gap: Duration,
    last_run: tokio::sync::Mutex<Option<Instant>>,
    history: Mutex<History>,
}

#[derive(Default)]
struct History {
    next_cycle: usize,
    records: VecDeque<CycleRecord>,
}

impl<P: Predictor> Optimizer<P> {
    /// Creates an optimizer with a 10 s I/O bound and a 300 s minimum gap
    /// between automatic runs.
    pub fn new(
        engine: DecisionEngine<P>,
        balancer: LoadBalancer,
        dispatcher: Dispatcher,
        source: Arc<dyn SnapshotSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            engine,
            balancer,
            dispatcher,
            source,
            clock,
            io_timeout: Duration::from_secs(10),
            min_gap: Duration::from_secs(300),
            last_run: tokio::sync::Mutex::new(None),
            history: Mutex::new(History::default()),
        }
    }

    /// Sets the bound on the snapshot fetch.
    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    /// Sets the minimum gap between automatic runs.
    pub fn with_min_gap(mut self, min_gap: Duration) -> Self {
        self.min_gap = min_gap;
        self
    }

    /// The decision engine.
    pub fn engine(&self) -> &DecisionEngine<P> {
        &self.engine
    }

    /// Decides and balances without dispatching anything.
    pub fn plan(&self, snapshot: &SystemSnapshot) -> Plan {
        let report = self.engine.decide(snapshot);
        let balanced = self.balancer.balance(report.decision, snapshot);

        let mut reasoning = report.reasoning;
        if balanced.triggered() {
            reasoning.push(format!(
                "Applied load balancing: shed {} (load {:.1} W > {:.1} W available)",
                balanced.shed.join(", "),
                balanced.projected_load,
                balanced.available
            ));
        } else {
            reasoning.push("Applied load balancing: within capacity".to_string());
        }

        Plan {
            mode: report.mode,
            decision: balanced.decision,
            reasoning,
            state: report.state,
            shed: balanced.shed,
        }
    }

    /// Runs one full cycle: fetch, decide, balance, dispatch.
    ///
    /// Never fails; a cycle without data reports `success == false` and
    /// sends nothing.
    pub async fn optimize(&self) -> OptimizationOutcome {
        let started_at = self.clock.now();

        let snapshot = match bounded(self.io_timeout, self.source.fetch_snapshot()).await {
            Ok(s) if s.is_empty() => {
                return self.skipped(
                    started_at,
                    ControlError::DataUnavailable("snapshot contains no zones".into()),
                );
            }
            Ok(s) => s,
            Err(e) => {
                return self.skipped(started_at, ControlError::DataUnavailable(e.to_string()));
            }
        };

        let plan = self.plan(&snapshot);
        for line in &plan.reasoning {
            debug!(reason = %line, "decision trace");
        }

        let mut execution = BTreeMap::new();
        for (zone, result) in self.dispatcher.dispatch_all(&plan.decision).await {
            let command = plan.decision.get(&zone).unwrap_or(Command::Off);
            let entry = match result {
                Ok(attempt) => ExecutionResult {
                    command,
                    success: true,
                    attempts: attempt.attempt_number,
                    timestamp: attempt.issued_at,
                    error: None,
                },
                Err(e) => ExecutionResult {
                    command,
                    success: false,
                    attempts: match &e {
                        ControlError::DispatchFailure { attempts, .. } => *attempts,
                        _ => self.dispatcher.policy().max_attempts,
                    },
                    timestamp: self.clock.now(),
                    error: Some(e.to_string()),
                },
            };
            execution.insert(zone, entry);
        }

        let outcome = OptimizationOutcome {
            success: true,
            error: None,
            started_at,
            plan: Some(plan),
            execution,
        };
        self.record(&outcome);
        outcome
    }

    /// Runs a cycle unless the previous automatic run started less than
    /// the minimum gap ago.
    ///
    /// Concurrent callers are serialised; a caller arriving while a cycle
    /// is in progress waits for it and is then rate limited.
    ///
    /// # Returns
    ///
    /// `None` when the run was skipped by the rate limit.
    pub async fn run_scheduled(&self) -> Option<OptimizationOutcome> {
        let mut last_run = self.last_run.lock().await;
        let now = Instant::now();
        if let Some(prev) = *last_run {
            let since = now.saturating_duration_since(prev);
            if since < self.min_gap {
                debug!(?since, min_gap = ?self.min_gap, "optimization rate limited");
                return None;
            }
        }

        let outcome = self.optimize().await;
        if outcome.success {
            *last_run = Some(now);
        }
        Some(outcome)
    }

    /// Telemetry of every recorded cycle, oldest first.
    pub fn history(&self) -> Vec<CycleRecord> {
        self.history.lock().records.iter().cloned().collect()
    }

    fn skipped(&self, started_at: DateTime<Utc>, error: ControlError) -> OptimizationOutcome {
        warn!(error = %error, "optimization skipped");
        let outcome = OptimizationOutcome {
            success: false,
            error: Some(error.to_string()),
            started_at,
            plan: None,
            execution: BTreeMap::new(),
        };
        self.record(&outcome);
        outcome
    }

    fn record(&self, outcome: &OptimizationOutcome) {
        let mut history = self.history.lock();
        let cycle = history.next_cycle;
        history.next_cycle += 1;

        let record = match &outcome.plan {
            Some(plan) => CycleRecord {
                cycle,
                started_at: outcome.started_at,
                success: outcome.success,
                mode: Some(plan.mode),
                avg_battery_percentage: plan.state.avg_battery_percentage,
                sustain_hours: plan.state.sustain_hours,
                zones_on: plan.decision.count_on(),
                zones_off: plan.decision.len() - plan.decision.count_on(),
                shed: plan.shed.clone(),
                dispatch_failures: outcome.failed_zones().len(),
                error: None,
            },
            None => CycleRecord {
                cycle,
                started_at: outcome.started_at,
                success: false,
                mode: None,
                avg_battery_percentage: 0.0,
                sustain_hours: 0.0,
                zones_on: 0,
                zones_off: 0,
                shed: Vec::new(),
                dispatch_failures: 0,
                error: outcome.error.clone(),
            },
        };
        info!("{record}");

        if history.records.len() == HISTORY_CAPACITY {
            history.records.pop_front();
        }
        history.records.push_back(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::clock::SystemClock;
    use crate::control::dispatcher::DispatchPolicy;
    use crate::control::engine::PolicyThresholds;
    use crate::forecast::HeuristicPredictor;
    use crate::ports::{CommandSink, StoreError};
    use crate::zones::{Tier, ZoneConfig, ZoneMetrics, ZoneRegistry};
    use async_trait::async_trait;

    struct FixedSource(Option<SystemSnapshot>);

    #[async_trait]
    impl SnapshotSource for FixedSource {
        async fn fetch_snapshot(&self) -> Result<SystemSnapshot, StoreError> {
            self.0
                .clone()
                .ok_or_else(|| StoreError::Unavailable("offline".into()))
        }
    }

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<(String, Command)>>);

    #[async_trait]
    impl CommandSink for RecordingSink {
        async fn send_command(&self, zone: &str, command: Command) -> Result<(), StoreError> {
            self.0.lock().push((zone.to_string(), command));
            Ok(())
        }
    }

    fn optimizer(
        snapshot: Option<SystemSnapshot>,
        sink: Arc<RecordingSink>,
    ) -> Optimizer<HeuristicPredictor> {
        let registry = Arc::new(
            ZoneRegistry::new(vec![
                ZoneConfig::new("Zone1", Tier::Critical, 1, "Hospital/Emergency"),
                ZoneConfig::new("Zone2", Tier::SemiCritical, 2, "Street Lights"),
                ZoneConfig::new("Zone3", Tier::NonCritical, 3, "Entertainment"),
                ZoneConfig::new("Zone4", Tier::Deferrable, 4, "Water Pumps"),
            ])
            .unwrap(),
        );
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Optimizer::new(
            DecisionEngine::new(
                registry.clone(),
                Arc::new(HeuristicPredictor::default()),
                PolicyThresholds::default(),
            ),
            LoadBalancer::new(registry, 0.9),
            Dispatcher::new(sink, clock.clone(), DispatchPolicy::default()),
            Arc::new(FixedSource(snapshot)),
            clock,
        )
    }

    fn healthy() -> SystemSnapshot {
        let now = Utc::now();
        let m = ZoneMetrics::at(now).with_power(50.0, 20.0).with_battery(12.6, 80.0);
        ["Zone1", "Zone2", "Zone3", "Zone4"]
            .iter()
            .fold(SystemSnapshot::new(now), |s, z| s.with_zone(z, m.clone()))
    }

    #[tokio::test]
    async fn no_snapshot_sends_nothing() {
        let sink = Arc::new(RecordingSink::default());
        let opt = optimizer(None, sink.clone());
        let outcome = opt.optimize().await;
        assert!(!outcome.success);
        assert!(outcome.error.as_deref().is_some_and(|e| e.contains("offline")));
        assert!(sink.0.lock().is_empty());
        assert_eq!(opt.history().len(), 1);
        assert!(!opt.history()[0].success);
    }

    #[tokio::test]
    async fn empty_snapshot_is_data_unavailable() {
        let sink = Arc::new(RecordingSink::default());
        let opt = optimizer(Some(SystemSnapshot::new(Utc::now())), sink.clone());
        let outcome = opt.optimize().await;
        assert!(!outcome.success);
        assert!(sink.0.lock().is_empty());
    }

    #[tokio::test]
    async fn dispatches_every_zone_after_deciding() {
        let sink = Arc::new(RecordingSink::default());
        let opt = optimizer(Some(healthy()), sink.clone());
        let outcome = opt.optimize().await;
        assert!(outcome.success);
        assert_eq!(outcome.execution.len(), 4);
        assert!(outcome.failed_zones().is_empty());

        let plan = outcome.plan.unwrap();
        assert_eq!(plan.mode, Mode::Normal);
        assert!(plan.reasoning.last().is_some_and(|r| r.starts_with("Applied load balancing")));
        assert_eq!(sink.0.lock().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_runs_are_rate_limited() {
        let sink = Arc::new(RecordingSink::default());
        let opt = optimizer(Some(healthy()), sink);
        assert!(opt.run_scheduled().await.is_some());
        tokio::time::advance(Duration::from_secs(120)).await;
        assert!(opt.run_scheduled().await.is_none());
        tokio::time::advance(Duration::from_secs(180)).await;
        assert!(opt.run_scheduled().await.is_some());
        assert_eq!(opt.history().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_runs_do_not_arm_the_rate_limit() {
        let opt = optimizer(None, Arc::new(RecordingSink::default()));
        assert!(opt.run_scheduled().await.is_some_and(|o| !o.success));
        assert!(opt.run_scheduled().await.is_some());
    }
}
