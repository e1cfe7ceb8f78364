//! Reliability watchdog.
//!
//! An independent loop that runs four checks every tick: store
//! connectivity, unacknowledged commands, sensor freshness and the retry
//! queue. The checks do not depend on each other; a failing check is
//! logged and reported and the remaining checks still run.
//!
//! Dispatch outcomes arrive over an `mpsc` channel and are folded into the
//! retry queue at the start of each tick: failures are queued, deliveries
//! drop whatever was queued for the zone. The queue itself is owned by the
//! watchdog alone.

pub mod retry;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::control::clock::{Clock, elapsed};
use crate::control::dispatcher::{DispatchEvent, Dispatcher};
use crate::control::types::{Command, ControlError, SystemSnapshot};
use crate::notify::{AlertKind, Notifier, raise};
use crate::ports::{PendingCommand, PendingCommands, SnapshotSource, bounded};
use crate::ticker::run_every;
use crate::zones::{Tier, ZoneRegistry};

pub use retry::{FailedCommandEntry, FailureReason, RetryQueue, RetryVerdict};

/// Watchdog timings and limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchdogPolicy {
    /// Seconds between ticks.
    pub tick_secs: u64,
    /// Consecutive fetch failures that raise a connectivity alert.
    pub failure_threshold: u32,
    /// Seconds a command may stay unacknowledged.
    pub command_timeout_secs: u64,
    /// Seconds after which sensor data is stale. A critical zone is alerted
    /// once per stale episode, not on every tick; fresh data ends the episode.
    pub stale_after_secs: u64,
    /// Seconds between retries of a failed command.
    pub retry_backoff_secs: u64,
    /// Retries before a command is abandoned.
    pub max_retries: u32,
    /// Upper bound on each store or notifier call (seconds).
    pub io_timeout_secs: u64,
}

impl Default for WatchdogPolicy {
    fn default() -> Self {
        Self {
            tick_secs: 30,
            failure_threshold: 3,
            command_timeout_secs: 120,
            stale_after_secs: 600,
            retry_backoff_secs: 300,
            max_retries: 3,
            io_timeout_secs: 10,
        }
    }
}

impl WatchdogPolicy {
    /// Tick period.
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }
}

/// Point-in-time view of the watchdog.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchdogStatus {
    /// Whether the loop is running.
    pub running: bool,
    /// Current consecutive connectivity failures.
    pub connection_failures: u32,
    /// Queued failed commands.
    pub failed_commands: usize,
    /// Queue contents.
    pub entries: Vec<FailedCommandEntry>,
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickSummary {
    /// Snapshot fetch succeeded with data.
    pub connected: bool,
    /// Failures received from the dispatcher.
    pub received: usize,
    /// Zones whose queued retry was replaced by a newer delivery.
    pub superseded: Vec<String>,
    /// Commands newly queued as timed out.
    pub timed_out: Vec<String>,
    /// Zones whose data is stale.
    pub stale: Vec<String>,
    /// Zones whose retry succeeded.
    pub resolved: Vec<String>,
    /// Zones abandoned after exhausting retries.
    pub escalated: Vec<String>,
}

#[derive(Default)]
struct WatchdogState {
    connection_failures: u32,
    queue: RetryQueue,
    /// Zone → when its last command was abandoned; pending records issued
    /// before this are not re-queued.
    abandoned: HashMap<String, DateTime<Utc>>,
    /// Zone → observation time already alerted as stale.
    stale_alerted: HashMap<String, DateTime<Utc>>,
}

/// Detects connectivity loss, command timeouts and stale data, and retries
/// failed commands with backoff.
pub struct Watchdog {
    registry: Arc<ZoneRegistry>,
    source: Arc<dyn SnapshotSource>,
    pending: Arc<dyn PendingCommands>,
    retrier: Dispatcher,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    policy: WatchdogPolicy,
    events: Mutex<mpsc::UnboundedReceiver<DispatchEvent>>,
    state: Mutex<WatchdogState>,
    running: AtomicBool,
}

impl Watchdog {
    /// Creates a watchdog.
    ///
    /// `retrier` is used for queue retries; give it a single-attempt policy
    /// and no failure channel so a failed retry is not fed back to itself.
    #[expect(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ZoneRegistry>,
        source: Arc<dyn SnapshotSource>,
        pending: Arc<dyn PendingCommands>,
        retrier: Dispatcher,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        policy: WatchdogPolicy,
        events: mpsc::UnboundedReceiver<DispatchEvent>,
    ) -> Self {
        Self {
            registry,
            source,
            pending,
            retrier,
            notifier,
            clock,
            policy,
            events: Mutex::new(events),
            state: Mutex::new(WatchdogState::default()),
            running: AtomicBool::new(false),
        }
    }

    /// Runs ticks until `stop` flips to `true`.
    pub async fn run(self: Arc<Self>, stop: watch::Receiver<bool>) {
        self.running.store(true, Ordering::SeqCst);
        info!(period = ?self.policy.tick(), "watchdog started");
        let this = Arc::clone(&self);
        run_every("watchdog", self.policy.tick(), stop, move || {
            let this = Arc::clone(&this);
            async move {
                this.tick().await;
            }
        })
        .await;
        self.running.store(false, Ordering::SeqCst);
        info!("watchdog stopped");
    }

    /// Queues a failed command directly, replacing any entry for the zone.
    pub async fn enqueue(&self, zone: &str, command: Command, reason: FailureReason) {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.abandoned.remove(zone);
        state.queue.insert(zone, command, reason, now);
        warn!(zone, %command, %reason, "command queued for retry");
    }

    /// Current status.
    pub async fn status(&self) -> WatchdogStatus {
        let state = self.state.lock().await;
        WatchdogStatus {
            running: self.running.load(Ordering::SeqCst),
            connection_failures: state.connection_failures,
            failed_commands: state.queue.len(),
            entries: state.queue.entries(),
        }
    }

    /// Runs one round of checks.
    pub async fn tick(&self) -> TickSummary {
        let mut summary = TickSummary::default();
        let mut state = self.state.lock().await;

        self.ingest_events(&mut state, &mut summary).await;
        let snapshot = self.check_connectivity(&mut state, &mut summary).await;
        let pending = self.monitor_commands(&mut state, &mut summary).await;
        if let Some(snapshot) = &snapshot {
            self.check_freshness(&mut state, snapshot, &mut summary).await;
        }
        self.drain_retries(&mut state, pending.as_deref(), &mut summary)
            .await;

        debug!(
            connected = summary.connected,
            queued = state.queue.len(),
            escalated = summary.escalated.len(),
            "watchdog tick complete"
        );
        summary
    }

    async fn ingest_events(&self, state: &mut WatchdogState, summary: &mut TickSummary) {
        let mut rx = self.events.lock().await;
        while let Ok(event) = rx.try_recv() {
            match event {
                DispatchEvent::Delivered(sent) => {
                    if state.queue.remove(&sent.zone).is_some() {
                        info!(zone = %sent.zone, command = %sent.command, "queued retry superseded by delivery");
                        summary.superseded.push(sent.zone);
                    }
                }
                DispatchEvent::Failed(failure) => {
                    warn!(
                        zone = %failure.zone,
                        command = %failure.command,
                        reason = %failure.reason,
                        "dispatch failure queued for retry"
                    );
                    state.abandoned.remove(&failure.zone);
                    state.queue.insert(
                        &failure.zone,
                        failure.command,
                        FailureReason::DispatchFailure,
                        failure.failed_at,
                    );
                    summary.received += 1;
                }
            }
        }
    }

    async fn check_connectivity(
        &self,
        state: &mut WatchdogState,
        summary: &mut TickSummary,
    ) -> Option<SystemSnapshot> {
        let fetched = bounded(self.policy.io_timeout(), self.source.fetch_snapshot()).await;
        let snapshot = match fetched {
            Ok(s) if !s.is_empty() => {
                if state.connection_failures > 0 {
                    info!(after = state.connection_failures, "store connectivity restored");
                }
                state.connection_failures = 0;
                summary.connected = true;
                return Some(s);
            }
            Ok(s) => {
                warn!("snapshot fetch returned no zones");
                Some(s)
            }
            Err(e) => {
                warn!(error = %e, "snapshot fetch failed");
                None
            }
        };

        state.connection_failures += 1;
        if state.connection_failures >= self.policy.failure_threshold {
            let err = ControlError::ConnectivityLoss(state.connection_failures);
            error!(error = %err, "store connectivity lost");
            raise(
                self.notifier.as_ref(),
                self.policy.io_timeout(),
                AlertKind::ConnectivityLoss,
                &err.to_string(),
                &[],
            )
            .await;
            state.connection_failures = 0;
        }
        snapshot
    }

    async fn monitor_commands(
        &self,
        state: &mut WatchdogState,
        summary: &mut TickSummary,
    ) -> Option<Vec<PendingCommand>> {
        let pending =
            match bounded(self.policy.io_timeout(), self.pending.pending_commands()).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "pending command check failed");
                    return None;
                }
            };

        let now = self.clock.now();
        let timeout = Duration::from_secs(self.policy.command_timeout_secs);
        for cmd in pending.iter().filter(|p| !p.acknowledged) {
            if elapsed(now, cmd.issued_at) <= timeout || state.queue.contains(&cmd.zone) {
                continue;
            }
            match state.abandoned.get(&cmd.zone) {
                Some(at) if cmd.issued_at <= *at => continue,
                Some(_) => {
                    state.abandoned.remove(&cmd.zone);
                }
                None => {}
            }

            let err = ControlError::CommandTimeout {
                zone: cmd.zone.clone(),
                command: cmd.command,
                timeout_secs: self.policy.command_timeout_secs,
            };
            warn!(zone = %cmd.zone, command = %cmd.command, attempt = cmd.attempt, "command timeout");
            state
                .queue
                .insert(&cmd.zone, cmd.command, FailureReason::Timeout, now);
            raise(
                self.notifier.as_ref(),
                self.policy.io_timeout(),
                AlertKind::CommandTimeout,
                &err.to_string(),
                std::slice::from_ref(&cmd.zone),
            )
            .await;
            summary.timed_out.push(cmd.zone.clone());
        }
        Some(pending)
    }

    /// Flags zones whose newest reading is older than the stale limit.
    ///
    /// Critical zones raise one alert per stale episode, keyed by the
    /// reading's observation time, rather than one per tick.
    async fn check_freshness(
        &self,
        state: &mut WatchdogState,
        snapshot: &SystemSnapshot,
        summary: &mut TickSummary,
    ) {
        let now = self.clock.now();
        let stale_after = Duration::from_secs(self.policy.stale_after_secs);

        for (zone, metrics) in &snapshot.zones {
            let age = elapsed(now, metrics.observed_at);
            if age <= stale_after {
                state.stale_alerted.remove(zone);
                continue;
            }

            let err = ControlError::StaleData {
                zone: zone.clone(),
                age_minutes: age.as_secs_f32() / 60.0,
            };
            warn!(zone = %zone, error = %err, "stale sensor data");
            summary.stale.push(zone.clone());

            if self.registry.tier_of(zone) != Some(Tier::Critical) {
                continue;
            }
            if state.stale_alerted.get(zone) == Some(&metrics.observed_at) {
                continue;
            }
            let name = self
                .registry
                .get(zone)
                .map_or(zone.as_str(), |z| z.display_name.as_str());
            raise(
                self.notifier.as_ref(),
                self.policy.io_timeout(),
                AlertKind::StaleDataCritical,
                &format!("critical zone {name}: {err}"),
                std::slice::from_ref(zone),
            )
            .await;
            state.stale_alerted.insert(zone.clone(), metrics.observed_at);
        }
    }

    /// Re-sends due entries.
    ///
    /// An entry is dropped instead when the store holds a command for the
    /// zone written after the entry's last attempt; `pending` is `None` when
    /// that listing could not be read this tick.
    async fn drain_retries(
        &self,
        state: &mut WatchdogState,
        pending: Option<&[PendingCommand]>,
        summary: &mut TickSummary,
    ) {
        let backoff = Duration::from_secs(self.policy.retry_backoff_secs);
        for entry in state.queue.due(self.clock.now(), backoff) {
            let newer = pending.into_iter().flatten().any(|p| {
                p.zone == entry.zone && p.issued_at > entry.last_attempt_at
            });
            if newer {
                info!(zone = %entry.zone, command = %entry.command, "queued retry superseded by newer command");
                state.queue.remove(&entry.zone);
                summary.superseded.push(entry.zone);
                continue;
            }

            info!(
                zone = %entry.zone,
                command = %entry.command,
                retry = entry.retry_count + 1,
                "retrying failed command"
            );
            if self.retrier.dispatch(&entry.zone, entry.command).await.is_ok() {
                info!(zone = %entry.zone, "retry successful");
                state.queue.remove(&entry.zone);
                summary.resolved.push(entry.zone);
                continue;
            }

            let now = self.clock.now();
            let verdict = state
                .queue
                .record_failure(&entry.zone, now, self.policy.max_retries);
            if let Some(RetryVerdict::Exhausted(gone)) = verdict {
                let err = ControlError::RetryExhausted {
                    zone: gone.zone.clone(),
                    command: gone.command,
                    retries: gone.retry_count,
                };
                error!(error = %err, "giving up on command");
                raise(
                    self.notifier.as_ref(),
                    self.policy.io_timeout(),
                    AlertKind::RetryExhausted,
                    &err.to_string(),
                    std::slice::from_ref(&gone.zone),
                )
                .await;
                state.abandoned.insert(gone.zone.clone(), now);
                summary.escalated.push(gone.zone);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::clock::ManualClock;
    use crate::control::dispatcher::{CommandAttempt, DispatchFailure, DispatchPolicy};
    use crate::ports::{CommandSink, StoreError};
    use async_trait::async_trait;
    use crate::notify::{AlertLog, NotifyConfig};
    use crate::store::DocumentStore;
    use crate::zones::{ZoneConfig, ZoneMetrics};

    struct Rig {
        clock: Arc<ManualClock>,
        store: Arc<DocumentStore>,
        alerts: Arc<AlertLog>,
        watchdog: Watchdog,
        tx: mpsc::UnboundedSender<DispatchEvent>,
    }

    /// Store half that never answers.
    struct Unreachable;

    #[async_trait]
    impl SnapshotSource for Unreachable {
        async fn fetch_snapshot(&self) -> Result<SystemSnapshot, StoreError> {
            Err(StoreError::Unavailable("sensor collection offline".into()))
        }
    }

    #[async_trait]
    impl PendingCommands for Unreachable {
        async fn pending_commands(&self) -> Result<Vec<PendingCommand>, StoreError> {
            Err(StoreError::Unavailable("command collection offline".into()))
        }
    }

    fn rig() -> Rig {
        rig_with(false, false)
    }

    /// Rig whose snapshot source and/or pending listing always fail, while
    /// command writes still reach the store.
    fn rig_with(broken_source: bool, broken_pending: bool) -> Rig {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(DocumentStore::new(clock.clone()));
        let alerts = Arc::new(AlertLog::new(NotifyConfig::default(), clock.clone()));
        let registry = Arc::new(
            ZoneRegistry::new(vec![
                ZoneConfig::new("Zone1", Tier::Critical, 1, "Hospital/Emergency"),
                ZoneConfig::new("Zone3", Tier::NonCritical, 3, "Entertainment"),
            ])
            .unwrap(),
        );
        let retrier = Dispatcher::new(
            store.clone(),
            clock.clone(),
            DispatchPolicy::default().single_attempt(),
        );
        let source: Arc<dyn SnapshotSource> = if broken_source {
            Arc::new(Unreachable)
        } else {
            store.clone()
        };
        let pending: Arc<dyn PendingCommands> = if broken_pending {
            Arc::new(Unreachable)
        } else {
            store.clone()
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let watchdog = Watchdog::new(
            registry,
            source,
            pending,
            retrier,
            alerts.clone(),
            clock.clone(),
            WatchdogPolicy::default(),
            rx,
        );
        Rig {
            clock,
            store,
            alerts,
            watchdog,
            tx,
        }
    }

    fn failed(rig: &Rig, zone: &str, command: Command) -> DispatchEvent {
        DispatchEvent::Failed(DispatchFailure {
            zone: zone.into(),
            command,
            reason: "link down".into(),
            failed_at: rig.clock.now(),
        })
    }

    fn delivered(rig: &Rig, zone: &str, command: Command) -> DispatchEvent {
        DispatchEvent::Delivered(CommandAttempt {
            zone: zone.into(),
            command,
            issued_at: rig.clock.now(),
            attempt_number: 1,
        })
    }

    async fn report_fresh(rig: &Rig) {
        for z in ["Zone1", "Zone3"] {
            rig.store
                .put_metrics(z, ZoneMetrics::at(rig.clock.now()))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn connectivity_alert_after_three_failures() {
        let rig = rig();
        rig.store.set_available(false);
        for _ in 0..2 {
            rig.watchdog.tick().await;
        }
        assert_eq!(rig.watchdog.status().await.connection_failures, 2);
        assert_eq!(rig.alerts.count(AlertKind::ConnectivityLoss), 0);

        rig.watchdog.tick().await;
        assert_eq!(rig.alerts.count(AlertKind::ConnectivityLoss), 1);
        assert_eq!(rig.watchdog.status().await.connection_failures, 0);
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let rig = rig();
        rig.store.set_available(false);
        rig.watchdog.tick().await;
        rig.store.set_available(true);
        report_fresh(&rig).await;
        let summary = rig.watchdog.tick().await;
        assert!(summary.connected);
        assert_eq!(rig.watchdog.status().await.connection_failures, 0);
    }

    #[tokio::test]
    async fn empty_snapshot_counts_as_failure() {
        let rig = rig();
        let summary = rig.watchdog.tick().await;
        assert!(!summary.connected);
        assert_eq!(rig.watchdog.status().await.connection_failures, 1);
    }

    #[tokio::test]
    async fn unacknowledged_command_times_out_once() {
        let rig = rig();
        report_fresh(&rig).await;
        rig.store.send_command("Zone3", Command::Off).await.unwrap();

        rig.clock.advance(Duration::from_secs(120));
        assert!(rig.watchdog.tick().await.timed_out.is_empty());

        rig.clock.advance(Duration::from_secs(1));
        report_fresh(&rig).await;
        assert_eq!(rig.watchdog.tick().await.timed_out, vec!["Zone3".to_string()]);
        // already queued: not queued again
        assert!(rig.watchdog.tick().await.timed_out.is_empty());
        assert_eq!(rig.watchdog.status().await.failed_commands, 1);
        assert_eq!(rig.alerts.count(AlertKind::CommandTimeout), 1);
    }

    #[tokio::test]
    async fn dispatcher_failures_arrive_over_channel() {
        let rig = rig();
        rig.tx.send(failed(&rig, "Zone1", Command::On)).unwrap();
        let summary = rig.watchdog.tick().await;
        assert_eq!(summary.received, 1);
        let status = rig.watchdog.status().await;
        assert_eq!(status.entries[0].reason, FailureReason::DispatchFailure);
    }

    #[tokio::test]
    async fn retry_success_removes_entry() {
        let rig = rig();
        rig.watchdog
            .enqueue("Zone3", Command::On, FailureReason::DispatchFailure)
            .await;
        rig.clock.advance(Duration::from_secs(301));
        let summary = rig.watchdog.tick().await;
        assert_eq!(summary.resolved, vec!["Zone3".to_string()]);
        assert_eq!(rig.watchdog.status().await.failed_commands, 0);
    }

    #[tokio::test]
    async fn stale_critical_zone_escalates_once_per_episode() {
        let rig = rig();
        report_fresh(&rig).await;
        rig.clock.advance(Duration::from_secs(11 * 60));

        let summary = rig.watchdog.tick().await;
        assert_eq!(summary.stale.len(), 2);
        assert_eq!(rig.alerts.count(AlertKind::StaleDataCritical), 1);
        let alert = rig.alerts.alerts().pop().unwrap();
        assert_eq!(alert.affected_zones, vec!["Zone1".to_string()]);

        rig.watchdog.tick().await;
        assert_eq!(rig.alerts.count(AlertKind::StaleDataCritical), 1);
    }

    #[tokio::test]
    async fn later_delivery_drops_queued_failure() {
        let rig = rig();
        rig.tx.send(failed(&rig, "Zone3", Command::On)).unwrap();
        rig.tx.send(delivered(&rig, "Zone3", Command::Off)).unwrap();
        rig.tx.send(delivered(&rig, "Zone1", Command::On)).unwrap();

        let summary = rig.watchdog.tick().await;
        assert_eq!(summary.received, 1);
        assert_eq!(summary.superseded, vec!["Zone3".to_string()]);
        assert_eq!(rig.watchdog.status().await.failed_commands, 0);

        rig.clock.advance(Duration::from_secs(301));
        assert!(rig.watchdog.tick().await.resolved.is_empty());
    }

    #[tokio::test]
    async fn failure_after_delivery_stays_queued() {
        let rig = rig();
        rig.tx.send(delivered(&rig, "Zone3", Command::On)).unwrap();
        rig.tx.send(failed(&rig, "Zone3", Command::Off)).unwrap();

        let summary = rig.watchdog.tick().await;
        assert!(summary.superseded.is_empty());
        let status = rig.watchdog.status().await;
        assert_eq!(status.entries[0].command, Command::Off);
    }

    #[tokio::test]
    async fn newer_command_in_store_is_not_overwritten() {
        let rig = rig();
        rig.watchdog
            .enqueue("Zone3", Command::On, FailureReason::DispatchFailure)
            .await;
        rig.clock.advance(Duration::from_secs(10));
        rig.store.send_command("Zone3", Command::Off).await.unwrap();

        rig.clock.advance(Duration::from_secs(301));
        report_fresh(&rig).await;
        let summary = rig.watchdog.tick().await;
        assert_eq!(summary.superseded, vec!["Zone3".to_string()]);
        assert!(summary.resolved.is_empty());

        let pending = rig.store.pending_commands().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].command, Command::Off);
    }

    #[tokio::test]
    async fn pending_listing_failure_leaves_other_checks_running() {
        let rig = rig_with(false, true);
        report_fresh(&rig).await;
        rig.watchdog
            .enqueue("Zone3", Command::On, FailureReason::DispatchFailure)
            .await;
        rig.clock.advance(Duration::from_secs(11 * 60));

        let summary = rig.watchdog.tick().await;
        assert!(summary.connected);
        assert_eq!(summary.stale.len(), 2);
        assert_eq!(rig.alerts.count(AlertKind::StaleDataCritical), 1);
        assert_eq!(summary.resolved, vec!["Zone3".to_string()]);
    }

    #[tokio::test]
    async fn snapshot_failure_leaves_retries_running() {
        let rig = rig_with(true, false);
        rig.watchdog
            .enqueue("Zone3", Command::Off, FailureReason::DispatchFailure)
            .await;
        rig.watchdog
            .enqueue("Zone1", Command::On, FailureReason::Timeout)
            .await;
        rig.clock.advance(Duration::from_secs(301));

        let summary = rig.watchdog.tick().await;
        assert!(!summary.connected);
        assert_eq!(rig.watchdog.status().await.connection_failures, 1);
        assert_eq!(
            summary.resolved,
            vec!["Zone1".to_string(), "Zone3".to_string()]
        );
        assert_eq!(rig.store.pending_commands().await.unwrap().len(), 2);
    }
}
