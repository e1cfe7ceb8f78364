use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, trace};

/// Runs `job` every `period` until `stop` is set.
///
/// The first run happens immediately. A run is awaited before the next tick
/// is taken, so a job never overlaps itself; ticks missed while it ran are
/// delayed rather than bunched. The stop flag is checked before every run,
/// and an in-flight run always completes.
pub async fn run_every<F, Fut>(
    name: &'static str,
    period: Duration,
    mut stop: watch::Receiver<bool>,
    mut job: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticks = interval(period.max(Duration::from_millis(1)));
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *stop.borrow() {
            break;
        }
        tokio::select! {
            _ = ticks.tick() => {}
            changed = stop.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        }
        if *stop.borrow() {
            break;
        }
        trace!(task = name, "tick");
        job().await;
    }
    debug!(task = name, "periodic task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn runs_on_period_until_stopped() {
        let (tx, rx) = watch::channel(false);
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let task = tokio::spawn(run_every("test", Duration::from_secs(30), rx, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        // runs at t = 0, 30, 60, 90
        tokio::time::sleep(Duration::from_secs(95)).await;
        tx.send(true).unwrap();
        task.await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_job_never_overlaps() {
        let (tx, rx) = watch::channel(false);
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let (a, m) = (active.clone(), max_seen.clone());
        let task = tokio::spawn(run_every("slow", Duration::from_secs(1), rx, move || {
            let (a, m) = (a.clone(), m.clone());
            async move {
                let now = a.fetch_add(1, Ordering::SeqCst) + 1;
                m.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(5)).await;
                a.fetch_sub(1, Ordering::SeqCst);
            }
        }));

        tokio::time::sleep(Duration::from_secs(30)).await;
        tx.send(true).unwrap();
        task.await.unwrap();
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_sender_stops_the_loop() {
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(run_every("orphan", Duration::from_secs(3600), rx, || async {}));
        drop(tx);
        task.await.unwrap();
    }
}
