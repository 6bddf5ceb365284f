//! Cancellable background work: periodic rescans, the status log, the alert
//! repeat and the snooze resume all run as a `ScheduledTask`.

use std::future::Future;

use tokio::{
    task::JoinHandle,
    time::{self, Duration, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

const ENABLE_LOGS: bool = false;

use crate::log_debug;

pub struct ScheduledTask {
    name: &'static str,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Run `tick` every `period`, first after one full period.
    pub fn spawn_interval<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let cancel = token.clone();
        let first = Instant::now() + period;

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(first, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        log_debug!("{name} stopped");
                        break;
                    }
                    _ = ticker.tick() => tick().await,
                }
            }
        });

        Self {
            name,
            token,
            handle,
        }
    }

    /// Run `work` once after `delay`.
    pub fn spawn_once<Fut>(name: &'static str, delay: Duration, work: Fut) -> Self
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let cancel = token.clone();
        let deadline = Instant::now() + delay;

        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => log_debug!("{name} cancelled before firing"),
                _ = time::sleep_until(deadline) => work.await,
            }
        });

        Self {
            name,
            token,
            handle,
        }
    }

    /// Stop the task now. Work already running is aborted at its next await.
    pub fn cancel(&self) {
        self.token.cancel();
        self.handle.abort();
        log_debug!("{} cancelled", self.name);
    }
}

impl Drop for ScheduledTask {
    // Only signals the token: a task may drop its own handle while running.
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Let spawned tasks run until they block again.
#[cfg(test)]
pub(crate) async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// Await `work` with the paused test clock pinned. The store replies from its
/// own thread, and a paused runtime would otherwise jump to the next timer
/// while waiting for it. A running blocking task inhibits that jump.
#[cfg(test)]
pub(crate) async fn hold_clock<F: Future>(work: F) -> F::Output {
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let pin = tokio::task::spawn_blocking(move || {
        let _ = release_rx.recv();
    });
    let output = work.await;
    let _ = release_tx.send(());
    let _ = pin.await;
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[tokio::test(start_paused = true)]
    async fn interval_waits_one_period_before_first_tick() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let task = ScheduledTask::spawn_interval("test-interval", Duration::from_secs(5), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        settle().await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);

        for _ in 0..2 {
            time::advance(Duration::from_secs(5)).await;
            settle().await;
        }
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        task.cancel();
        time::advance(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_once_never_fires() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let task = ScheduledTask::spawn_once("test-once", Duration::from_secs(60), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        time::advance(Duration::from_secs(30)).await;
        task.cancel();
        time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn once_fires_after_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let task = ScheduledTask::spawn_once("test-once", Duration::from_millis(1_500), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        settle().await;

        time::advance(Duration::from_millis(1_499)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(task.handle.is_finished());
    }
}
