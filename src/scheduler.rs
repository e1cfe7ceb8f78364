//! Periodic task runner.
//!
//! Starts the monitor, optimize-and-dispatch and retrain tasks (and the
//! watchdog, when attached) as independent tokio tasks sharing one stop
//! signal. Tasks may run concurrently with each other but never overlap
//! themselves.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::control::optimizer::Optimizer;
use crate::forecast::Predictor;
use crate::monitor::SystemMonitor;
use crate::ticker::run_every;
use crate::watchdog::Watchdog;

/// Task periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulePolicy {
    /// Seconds between monitor ticks.
    pub monitor_secs: u64,
    /// Seconds between optimize-and-dispatch cycles.
    pub optimize_secs: u64,
    /// Seconds between retrain requests.
    pub retrain_secs: u64,
    /// Minimum seconds between two automatic optimize runs.
    pub min_optimize_gap_secs: u64,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self {
            monitor_secs: 30,
            optimize_secs: 300,
            retrain_secs: 3600,
            min_optimize_gap_secs: 300,
        }
    }
}

/// Owns the periodic tasks' inputs until started.
pub struct Scheduler<P> {
    optimizer: Arc<Optimizer<P>>,
    monitor: Arc<SystemMonitor<P>>,
    watchdog: Option<Arc<Watchdog>>,
    policy: SchedulePolicy,
}

impl<P: Predictor> Scheduler<P> {
    /// Creates a scheduler.
    pub fn new(
        optimizer: Arc<Optimizer<P>>,
        monitor: Arc<SystemMonitor<P>>,
        policy: SchedulePolicy,
    ) -> Self {
        Self {
            optimizer,
            monitor,
            watchdog: None,
            policy,
        }
    }

    /// Runs the watchdog loop alongside the scheduled tasks.
    pub fn with_watchdog(mut self, watchdog: Arc<Watchdog>) -> Self {
        self.watchdog = Some(watchdog);
        self
    }

    /// Spawns every task and returns the handle that stops them.
    pub fn start(&self) -> SchedulerHandle {
        let (stop, stop_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        let monitor = Arc::clone(&self.monitor);
        tasks.push((
            "monitor",
            tokio::spawn(run_every(
                "monitor",
                Duration::from_secs(self.policy.monitor_secs),
                stop_rx.clone(),
                move || {
                    let monitor = Arc::clone(&monitor);
                    async move {
                        monitor.tick().await;
                    }
                },
            )),
        ));

        let optimizer = Arc::clone(&self.optimizer);
        tasks.push((
            "optimize",
            tokio::spawn(run_every(
                "optimize",
                Duration::from_secs(self.policy.optimize_secs),
                stop_rx.clone(),
                move || {
                    let optimizer = Arc::clone(&optimizer);
                    async move {
                        optimizer.run_scheduled().await;
                    }
                },
            )),
        ));

        let trainer = Arc::clone(&self.monitor);
        tasks.push((
            "retrain",
            tokio::spawn(run_every(
                "retrain",
                Duration::from_secs(self.policy.retrain_secs),
                stop_rx.clone(),
                move || {
                    let trainer = Arc::clone(&trainer);
                    async move {
                        trainer.retrain();
                    }
                },
            )),
        ));

        if let Some(watchdog) = &self.watchdog {
            tasks.push(("watchdog", tokio::spawn(Arc::clone(watchdog).run(stop_rx))));
        }

        info!(
            tasks = tasks.len(),
            monitor_secs = self.policy.monitor_secs,
            optimize_secs = self.policy.optimize_secs,
            retrain_secs = self.policy.retrain_secs,
            "scheduler started"
        );
        SchedulerHandle { stop, tasks }
    }
}

/// Stop signal and join handles for the running tasks.
pub struct SchedulerHandle {
    stop: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl SchedulerHandle {
    /// Signals every task to stop after its current iteration.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// Number of spawned tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Signals stop and waits for every task to finish.
    pub async fn shutdown(self) {
        self.stop();
        for (name, task) in self.tasks {
            if let Err(e) = task.await {
                error!(task = name, error = %e, "task ended abnormally");
            }
        }
        info!("scheduler stopped");
    }
}
