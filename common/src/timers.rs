//! Cooperative timer service
//!
//! Timers are driven by the owning execution context calling
//! [`TimerManager::tick`] once per millisecond. A tick returns the ids of the
//! timers that expired during it; the context routes each id to the entity
//! that owns the timer. Nothing fires on its own thread.
//!
//! Once [`UniqueTimer::stop`] (or a new [`UniqueTimer::run`]) returns, no later
//! tick reports that timer until it is started again. An expiry that was
//! already returned by a tick but not yet dispatched can be detected with
//! [`UniqueTimer::has_expired`], which is cleared by `stop` and `run`.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Identifier of a timer within its manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

#[derive(Debug, Default)]
struct TimerEntry {
    duration_ms: Option<u64>,
    deadline: Option<u64>,
    expired: bool,
}

#[derive(Debug, Default)]
struct TimerWheel {
    /// Current time in ticks (milliseconds)
    now: u64,
    next_id: u64,
    timers: HashMap<TimerId, TimerEntry>,
}

/// Timer service of one execution context. Cloning yields another handle to the same service.
#[derive(Debug, Clone, Default)]
pub struct TimerManager {
    inner: Arc<Mutex<TimerWheel>>,
}

fn lock(inner: &Mutex<TimerWheel>) -> MutexGuard<'_, TimerWheel> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TimerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a stopped timer with no duration
    pub fn create_timer(&self) -> UniqueTimer {
        let mut wheel = lock(&self.inner);
        let id = TimerId(wheel.next_id);
        wheel.next_id += 1;
        wheel.timers.insert(id, TimerEntry::default());
        UniqueTimer {
            id,
            inner: self.inner.clone(),
        }
    }

    /// Advance time by one millisecond and return the timers that expired, in deadline order
    pub fn tick(&self) -> Vec<TimerId> {
        let mut wheel = lock(&self.inner);
        wheel.now += 1;
        let now = wheel.now;
        let mut expired: Vec<(u64, TimerId)> = wheel
            .timers
            .iter()
            .filter_map(|(id, t)| t.deadline.filter(|d| *d <= now).map(|d| (d, *id)))
            .collect();
        expired.sort_unstable();
        for (_, id) in &expired {
            if let Some(t) = wheel.timers.get_mut(id) {
                t.deadline = None;
                t.expired = true;
            }
        }
        expired.into_iter().map(|(_, id)| id).collect()
    }

    /// Current time in milliseconds since the manager was created
    pub fn now(&self) -> u64 {
        lock(&self.inner).now
    }

    pub fn nof_timers(&self) -> usize {
        lock(&self.inner).timers.len()
    }

    pub fn nof_running_timers(&self) -> usize {
        lock(&self.inner)
            .timers
            .values()
            .filter(|t| t.deadline.is_some())
            .count()
    }
}

/// A timer owned by exactly one entity. Dropping it unregisters it.
#[derive(Debug)]
pub struct UniqueTimer {
    id: TimerId,
    inner: Arc<Mutex<TimerWheel>>,
}

impl UniqueTimer {
    pub fn id(&self) -> TimerId {
        self.id
    }

    /// Configure the duration used by the next [`run`](Self::run). Does not start the timer.
    pub fn set(&self, duration: Duration) {
        let mut wheel = lock(&self.inner);
        if let Some(t) = wheel.timers.get_mut(&self.id) {
            t.duration_ms = Some(duration.as_millis() as u64);
        }
    }

    /// Start (or restart) the timer with its configured duration
    pub fn run(&self) {
        let mut wheel = lock(&self.inner);
        let now = wheel.now;
        if let Some(t) = wheel.timers.get_mut(&self.id) {
            if let Some(d) = t.duration_ms {
                t.deadline = Some(now + d);
                t.expired = false;
            }
        }
    }

    pub fn stop(&self) {
        let mut wheel = lock(&self.inner);
        if let Some(t) = wheel.timers.get_mut(&self.id) {
            t.deadline = None;
            t.expired = false;
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner)
            .timers
            .get(&self.id)
            .is_some_and(|t| t.deadline.is_some())
    }

    /// True if the last run ended by expiring (and was not stopped or restarted since)
    pub fn has_expired(&self) -> bool {
        lock(&self.inner)
            .timers
            .get(&self.id)
            .is_some_and(|t| t.expired)
    }

    /// True once a duration was configured
    pub fn is_set(&self) -> bool {
        lock(&self.inner)
            .timers
            .get(&self.id)
            .is_some_and(|t| t.duration_ms.is_some())
    }

    pub fn duration(&self) -> Option<Duration> {
        lock(&self.inner)
            .timers
            .get(&self.id)
            .and_then(|t| t.duration_ms)
            .map(Duration::from_millis)
    }
}

impl Drop for UniqueTimer {
    fn drop(&mut self) {
        lock(&self.inner).timers.remove(&self.id);
    }
}
