//! Shared timeout timer.
//!
//! One timer serves every session. It is armed to the soonest pending
//! deadline; the owning thread's timer callback ends due sessions and
//! re-arms for whatever is left.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Default minimum timer period.
pub const DEFAULT_GRANULARITY: Duration = Duration::from_millis(10);

/// External single-shot timer. Re-arming replaces any pending shot.
pub trait TimerService: Send {
    fn arm(&mut self, after: Duration);
    fn cancel(&mut self);
}

/// Keeps the shared timer pointed at the soonest deadline.
pub struct TimeoutScheduler {
    timer: Box<dyn TimerService>,
    armed_at: Option<Instant>,
    granularity: Duration,
}

impl std::fmt::Debug for TimeoutScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutScheduler")
            .field("armed_at", &self.armed_at)
            .field("granularity", &self.granularity)
            .finish()
    }
}

impl TimeoutScheduler {
    pub fn new(timer: Box<dyn TimerService>) -> Self {
        Self {
            timer,
            armed_at: None,
            granularity: DEFAULT_GRANULARITY,
        }
    }

    pub fn set_granularity(&mut self, granularity: Duration) {
        self.granularity = granularity;
    }

    pub fn granularity(&self) -> Duration {
        self.granularity
    }

    /// Deadline the timer is currently armed for.
    pub fn armed_at(&self) -> Option<Instant> {
        self.armed_at
    }

    /// Make sure the timer fires no later than `deadline`.
    pub fn schedule(&mut self, deadline: Instant, now: Instant) {
        if self.armed_at.is_some_and(|armed| armed <= deadline) {
            return;
        }
        self.arm(deadline, now);
    }

    /// The timer fired; nothing is armed until the next `rearm`.
    pub fn fired(&mut self) {
        self.armed_at = None;
    }

    /// Point the timer at `next`, or stop it when nothing is pending.
    pub fn rearm(&mut self, next: Option<Instant>, now: Instant) {
        match next {
            Some(deadline) if self.armed_at != Some(deadline) => self.arm(deadline, now),
            Some(_) => {}
            None => {
                if self.armed_at.take().is_some() {
                    tracing::debug!("timeout timer cancelled");
                    self.timer.cancel();
                }
            }
        }
    }

    fn arm(&mut self, deadline: Instant, now: Instant) {
        let after = deadline.saturating_duration_since(now).max(self.granularity);
        tracing::debug!(after_ms = after.as_millis() as u64, "timeout timer armed");
        self.timer.arm(after);
        self.armed_at = Some(deadline);
    }
}

// =============================================================================
// Tokio timer
// =============================================================================

/// Receives one tick per expired shot of a [`TokioTimer`].
#[derive(Debug)]
pub struct TimerTicks {
    rx: mpsc::UnboundedReceiver<()>,
}

impl TimerTicks {
    pub async fn recv(&mut self) -> Option<()> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<()> {
        self.rx.try_recv().ok()
    }
}

/// Timer backed by a tokio sleep task.
#[derive(Debug)]
pub struct TokioTimer {
    handle: Handle,
    tx: mpsc::UnboundedSender<()>,
    task: Option<JoinHandle<()>>,
}

impl TokioTimer {
    pub fn new(handle: Handle) -> (Self, TimerTicks) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                handle,
                tx,
                task: None,
            },
            TimerTicks { rx },
        )
    }
}

impl TimerService for TokioTimer {
    fn arm(&mut self, after: Duration) {
        self.cancel();
        let tx = self.tx.clone();
        self.task = Some(self.handle.spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(());
        }));
    }

    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for TokioTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

// =============================================================================
// Manual timer
// =============================================================================

/// Timer that only records what it was asked to do. The host fires it by
/// calling the runtime's timer callback itself.
#[derive(Debug, Clone, Default)]
pub struct ManualTimer {
    armed: Arc<Mutex<Option<Duration>>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Period of the pending shot, if any.
    pub fn armed(&self) -> Option<Duration> {
        *self.armed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TimerService for ManualTimer {
    fn arm(&mut self, after: Duration) {
        *self.armed.lock().unwrap_or_else(PoisonError::into_inner) = Some(after);
    }

    fn cancel(&mut self) {
        *self.armed.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> (TimeoutScheduler, ManualTimer) {
        let timer = ManualTimer::new();
        (TimeoutScheduler::new(Box::new(timer.clone())), timer)
    }

    #[test]
    fn test_schedule_keeps_soonest() {
        let (mut scheduler, timer) = scheduler();
        let now = Instant::now();
        scheduler.schedule(now + Duration::from_millis(500), now);
        assert_eq!(timer.armed(), Some(Duration::from_millis(500)));

        scheduler.schedule(now + Duration::from_millis(900), now);
        assert_eq!(timer.armed(), Some(Duration::from_millis(500)));

        scheduler.schedule(now + Duration::from_millis(100), now);
        assert_eq!(timer.armed(), Some(Duration::from_millis(100)));
        assert_eq!(scheduler.armed_at(), Some(now + Duration::from_millis(100)));
    }

    #[test]
    fn test_granularity_floor() {
        let (mut scheduler, timer) = scheduler();
        scheduler.set_granularity(Duration::from_millis(20));
        let now = Instant::now();
        scheduler.schedule(now + Duration::from_millis(3), now);
        assert_eq!(timer.armed(), Some(Duration::from_millis(20)));
        scheduler.fired();
        scheduler.rearm(Some(now), now + Duration::from_millis(5));
        assert_eq!(timer.armed(), Some(Duration::from_millis(20)));
    }

    #[test]
    fn test_rearm_and_cancel() {
        let (mut scheduler, timer) = scheduler();
        let now = Instant::now();
        scheduler.schedule(now + Duration::from_millis(100), now);
        scheduler.fired();
        assert_eq!(scheduler.armed_at(), None);

        scheduler.rearm(Some(now + Duration::from_millis(300)), now + Duration::from_millis(100));
        assert_eq!(timer.armed(), Some(Duration::from_millis(200)));

        scheduler.rearm(None, now);
        assert_eq!(timer.armed(), None);
        assert_eq!(scheduler.armed_at(), None);
    }

    #[tokio::test]
    async fn test_tokio_timer_ticks() {
        let (mut timer, mut ticks) = TokioTimer::new(Handle::current());
        let start = Instant::now();
        timer.arm(Duration::from_millis(30));
        ticks.recv().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_tokio_timer_cancel() {
        let (mut timer, mut ticks) = TokioTimer::new(Handle::current());
        timer.arm(Duration::from_millis(10));
        timer.cancel();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(ticks.try_recv().is_none());
    }
}
