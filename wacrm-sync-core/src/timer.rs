//! Cancellable recurring timers
//!
//! Each timer is a tokio task driven by [`tokio::time::interval_at`]; the
//! first tick fires one full period after the timer starts. Cancelling (or
//! dropping) the handle closes the timer's cancel channel: the task exits at
//! its next wait and never starts another tick. A tick already running is
//! allowed to finish, which keeps a tick that cancels its own timer (a status
//! probe that observes `connected`) from being torn down halfway.
//!
//! Under a paused tokio clock the timers follow virtual time.

use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

/// Whether a timer should keep running after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickFlow {
    Continue,
    Stop,
}

/// Handle to a running recurring timer, cancelled on drop
#[derive(Debug)]
pub struct RecurringTimer {
    name: &'static str,
    _cancel_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl RecurringTimer {
    /// Spawn a timer calling `tick` every `period`
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = TickFlow> + Send + 'static,
    {
        debug!("Starting {} timer (every {:?})", name, period);

        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut cancel_rx => {
                        debug!("{} timer cancelled", name);
                        break;
                    }
                    _ = interval.tick() => {}
                }

                if tick().await == TickFlow::Stop {
                    debug!("{} timer stopped itself", name);
                    break;
                }
            }
        });

        Self {
            name,
            _cancel_tx: cancel_tx,
            task,
        }
    }

    /// Timer name (for logging)
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the timer task is still running
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the timer; no tick starts after this returns
    pub fn cancel(self) {
        debug!("Cancelling {} timer", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_timer(period: Duration) -> (RecurringTimer, Arc<AtomicUsize>) {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();

        let timer = RecurringTimer::spawn("test", period, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                TickFlow::Continue
            }
        });

        (timer, ticks)
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_every_period() {
        let (_timer, ticks) = counting_timer(Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let (timer, ticks) = counting_timer(Duration::from_secs(10));
        timer.cancel();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_timer_stops_after_firing() {
        let (timer, ticks) = counting_timer(Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);

        drop(timer);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_can_stop_itself() {
        let timer = RecurringTimer::spawn("once", Duration::from_secs(1), || async {
            TickFlow::Stop
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert!(!timer.is_active());
    }
}
