//! Cancellable periodic task

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// A closure run on a fixed period in its own tokio task.
///
/// [`PeriodicTask::cancel`] aborts the task and waits for it, so no tick
/// runs once it returns. Dropping the handle aborts without waiting.
#[derive(Debug)]
pub struct PeriodicTask {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// First tick after one full period
    pub fn spawn<F>(name: &'static str, period: Duration, tick: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        Self::spawn_at(name, Instant::now() + period, period, tick)
    }

    /// First tick right away
    pub fn spawn_immediate<F>(name: &'static str, period: Duration, tick: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        Self::spawn_at(name, Instant::now(), period, tick)
    }

    fn spawn_at<F>(name: &'static str, start: Instant, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let period = period.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(task = name, period_ms = period.as_millis() as u64, "periodic task started");
            loop {
                interval.tick().await;
                tick();
            }
        });

        Self {
            name,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop the task and wait until it is gone
    pub async fn cancel(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            match handle.await {
                Err(err) if err.is_panic() => {
                    warn!(task = self.name, "periodic task panicked")
                }
                _ => debug!(task = self.name, "periodic task cancelled"),
            }
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_on_period() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();
        let task = PeriodicTask::spawn("test", Duration::from_millis(100), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        time::sleep(Duration::from_millis(300)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        task.cancel().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_tick_after_cancel() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();
        let task = PeriodicTask::spawn_immediate("test", Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        time::sleep(Duration::from_millis(35)).await;
        task.cancel().await;
        let seen = count.load(Ordering::SeqCst);
        assert!(seen >= 1);

        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), seen);
    }
}
