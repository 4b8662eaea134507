//! Exam countdown.
//!
//! [`Countdown`] is the pure tick arithmetic. [`CountdownController`] drives it
//! from a tokio interval, publishes the remaining seconds on a `watch`
//! channel, and runs the timeout handler once when zero is reached.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Seconds left in the answering window.
///
/// Uses `end_at` when the session has one, otherwise `start_at + duration`.
/// A session with neither has not started and gets the full duration.
pub fn initial_remaining(
    now: DateTime<Utc>,
    start_at: Option<DateTime<Utc>>,
    end_at: Option<DateTime<Utc>>,
    duration_secs: u64,
) -> u64 {
    let duration =
        chrono::Duration::seconds(i64::try_from(duration_secs).unwrap_or(i64::MAX / 1000));
    let deadline = end_at.or_else(|| start_at.and_then(|start| start.checked_add_signed(duration)));
    match deadline {
        Some(deadline) => u64::try_from((deadline - now).num_seconds()).unwrap_or(0),
        None => duration_secs,
    }
}

/// Result of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Running(u64),
    /// Zero was reached on this tick. Reported once.
    Expired,
    /// Already at zero.
    Idle,
}

/// Remaining-seconds counter, clamped at zero.
#[derive(Debug, Clone)]
pub struct Countdown {
    remaining: u64,
    expired: bool,
}

impl Countdown {
    pub fn new(remaining: u64) -> Self {
        Self {
            remaining,
            expired: false,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn tick(&mut self) -> Tick {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining > 0 {
            return Tick::Running(self.remaining);
        }
        if self.expired {
            Tick::Idle
        } else {
            self.expired = true;
            Tick::Expired
        }
    }
}

/// Busy flag shared by every path that finishes a session.
///
/// Only one finish round trip may be outstanding at a time; the flag is
/// released when the returned guard drops, whether the call succeeded or not.
#[derive(Debug, Clone, Default)]
pub struct FinishGate {
    busy: Arc<AtomicBool>,
    released: Arc<Notify>,
}

impl FinishGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<FinishGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FinishGuard {
                busy: Arc::clone(&self.busy),
                released: Arc::clone(&self.released),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Resolves once no finish call is in flight.
    pub async fn idle(&self) {
        loop {
            let released = self.released.notified();
            if !self.is_busy() {
                return;
            }
            released.await;
        }
    }
}

/// Held while a finish call is in flight.
#[derive(Debug)]
pub struct FinishGuard {
    busy: Arc<AtomicBool>,
    released: Arc<Notify>,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
        self.released.notify_waiters();
    }
}

/// A running countdown task.
///
/// The first tick happens one interval after [`CountdownController::start`].
/// A countdown started at zero expires without waiting for a tick. Dropping
/// the controller stops the task.
pub struct CountdownController {
    remaining: watch::Receiver<u64>,
    expired: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CountdownController {
    /// Spawn the tick task. Must be called inside a tokio runtime.
    ///
    /// `on_timeout` is consumed by the first tick that reaches zero, so it can
    /// run at most once however many ticks follow.
    pub fn start<F, Fut>(initial: u64, tick_interval: Duration, on_timeout: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, _) = watch::channel(initial);
        Self::start_with(Arc::new(tx), initial, tick_interval, on_timeout)
    }

    /// Like [`CountdownController::start`], publishing on an existing channel
    /// so subscribers outlive restarts.
    pub fn start_with<F, Fut>(
        tx: Arc<watch::Sender<u64>>,
        initial: u64,
        tick_interval: Duration,
        on_timeout: F,
    ) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tx.send_replace(initial);
        let rx = tx.subscribe();
        let expired = Arc::new(AtomicBool::new(false));
        let period = tick_interval.max(Duration::from_millis(1));

        let task_expired = Arc::clone(&expired);
        let task = tokio::spawn(async move {
            let mut countdown = Countdown::new(initial);
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                if countdown.remaining() > 0 {
                    interval.tick().await;
                }
                match countdown.tick() {
                    Tick::Running(remaining) => {
                        tx.send_replace(remaining);
                    }
                    Tick::Expired => {
                        tx.send_replace(0);
                        task_expired.store(true, Ordering::Release);
                        info!("countdown reached zero");
                        on_timeout().await;
                        break;
                    }
                    Tick::Idle => break,
                }
            }
            debug!("countdown task finished");
        });

        Self {
            remaining: rx,
            expired,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn remaining(&self) -> u64 {
        *self.remaining.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.remaining.clone()
    }

    pub fn has_expired(&self) -> bool {
        self.expired.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Stop ticking immediately. An in-flight timeout handler is cancelled.
    pub fn stop(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
            debug!("countdown stopped");
        }
    }
}

impl Drop for CountdownController {
    fn drop(&mut self) {
        self.stop();
    }
}
