//! Command dispatch with bounded in-line retry.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::types::{Command, ControlError, Decision};
use crate::ports::{CommandSink, bounded};

/// Retry policy for one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatchPolicy {
    /// Attempts per command, including the first.
    pub max_attempts: u32,
    /// Pause between attempts (seconds).
    pub retry_delay_secs: u64,
    /// Upper bound on each sink call (seconds).
    pub io_timeout_secs: u64,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_secs: 1,
            io_timeout_secs: 10,
        }
    }
}

impl DispatchPolicy {
    /// Same policy with a single attempt, used for watchdog retries.
    pub fn single_attempt(self) -> Self {
        Self {
            max_attempts: 1,
            ..self
        }
    }

    fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }
}

/// Record of one successful send.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandAttempt {
    /// Target zone.
    pub zone: String,
    /// Command sent.
    pub command: Command,
    /// When the successful attempt was issued.
    pub issued_at: DateTime<Utc>,
    /// 1-based number of the attempt that succeeded.
    pub attempt_number: u32,
}

/// A command the dispatcher gave up on, handed to the watchdog.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchFailure {
    /// Target zone.
    pub zone: String,
    /// Command that failed.
    pub command: Command,
    /// Last sink error.
    pub reason: String,
    /// When the final attempt was made.
    pub failed_at: DateTime<Utc>,
}

/// Outcome of one dispatch, as seen by the watchdog.
///
/// Events arrive in dispatch order, so a `Delivered` for a zone supersedes
/// every failure reported for that zone before it.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    /// The store accepted the command.
    Delivered(CommandAttempt),
    /// Every attempt failed.
    Failed(DispatchFailure),
}

impl DispatchEvent {
    /// Target zone.
    pub fn zone(&self) -> &str {
        match self {
            Self::Delivered(a) => &a.zone,
            Self::Failed(f) => &f.zone,
        }
    }
}

/// Per-zone result of [`Dispatcher::dispatch_all`].
pub type DispatchReport = Vec<(String, Result<CommandAttempt, ControlError>)>;

/// Sends relay commands to the store with up to `max_attempts` tries.
///
/// Every outcome is reported on the event channel, if one is attached; the
/// dispatcher keeps no retry state of its own.
#[derive(Clone)]
pub struct Dispatcher {
    sink: Arc<dyn CommandSink>,
    clock: Arc<dyn Clock>,
    policy: DispatchPolicy,
    events: Option<UnboundedSender<DispatchEvent>>,
}

impl Dispatcher {
    /// Creates a dispatcher.
    pub fn new(sink: Arc<dyn CommandSink>, clock: Arc<dyn Clock>, policy: DispatchPolicy) -> Self {
        Self {
            sink,
            clock,
            policy,
            events: None,
        }
    }

    /// Attaches the channel deliveries and exhausted commands are reported on.
    pub fn with_event_channel(mut self, events: UnboundedSender<DispatchEvent>) -> Self {
        self.events = Some(events);
        self
    }

    fn report(&self, event: DispatchEvent) {
        if let Some(tx) = &self.events {
            if tx.send(event).is_err() {
                warn!("watchdog channel closed; dispatch event dropped");
            }
        }
    }

    /// Policy in effect.
    pub fn policy(&self) -> DispatchPolicy {
        self.policy
    }

    /// Sends one command, retrying in-line.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::DispatchFailure` once every attempt has failed.
    pub async fn dispatch(
        &self,
        zone: &str,
        command: Command,
    ) -> Result<CommandAttempt, ControlError> {
        let attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt_number in 1..=attempts {
            let issued_at = self.clock.now();
            debug!(zone, %command, attempt = attempt_number, "sending command");

            match bounded(
                self.policy.io_timeout(),
                self.sink.send_command(zone, command),
            )
            .await
            {
                Ok(()) => {
                    info!(zone, %command, attempt = attempt_number, "command sent");
                    let sent = CommandAttempt {
                        zone: zone.to_string(),
                        command,
                        issued_at,
                        attempt_number,
                    };
                    self.report(DispatchEvent::Delivered(sent.clone()));
                    return Ok(sent);
                }
                Err(e) => {
                    warn!(zone, %command, attempt = attempt_number, error = %e, "command send failed");
                    last_error = e.to_string();
                }
            }

            if attempt_number < attempts {
                tokio::time::sleep(self.policy.retry_delay()).await;
            }
        }

        self.report(DispatchEvent::Failed(DispatchFailure {
            zone: zone.to_string(),
            command,
            reason: last_error.clone(),
            failed_at: self.clock.now(),
        }));

        Err(ControlError::DispatchFailure {
            zone: zone.to_string(),
            command,
            attempts,
            reason: last_error,
        })
    }

    /// Dispatches every entry of a decision, one zone at a time.
    ///
    /// A failure on one zone never prevents the others from being sent and
    /// nothing already sent is rolled back.
    pub async fn dispatch_all(&self, decision: &Decision) -> DispatchReport {
        let mut report = Vec::with_capacity(decision.len());
        for (zone, command) in decision.iter() {
            let result = self.dispatch(zone, command).await;
            report.push((zone.to_string(), result));
        }
        report
    }
}
