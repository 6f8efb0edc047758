// src/timer.rs - Cancelable one-shot timers feeding the coordinator channel
//
// A timer never runs its action itself. When it elapses it enqueues an event
// carrying an `Expiry` ticket; the owner hands the ticket back through
// `OneShot::expire`, which only accepts the ticket of the currently armed
// instance. A cancelled timer whose event is already queued is thereby
// rejected when that event is drained.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace};

/// Longest delay a timer is actually scheduled for. Settings arrive over the
/// bus unchecked; anything longer is treated as "not within this lifetime".
pub const MAX_DELAY: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Deadline `after` from now, clamped to [`MAX_DELAY`] so it cannot overflow.
pub fn deadline_after(after: Duration) -> Instant {
    Instant::now() + after.min(MAX_DELAY)
}

/// Which of the two alarm timers an expiry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Active-alarm timeout: how long the buzzer stays asserted.
    Timeout,
    /// Post-alarm cooldown: how long before a new trigger is accepted.
    Cooldown,
}

/// Ticket produced when an armed timer elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiry {
    pub kind: TimerKind,
    generation: u64,
}

/// A single cancelable, one-shot delayed action.
#[derive(Debug)]
pub struct OneShot {
    kind: TimerKind,
    generation: u64,
    pending: Option<JoinHandle<()>>,
}

impl OneShot {
    pub fn new(kind: TimerKind) -> Self {
        Self {
            kind,
            generation: 0,
            pending: None,
        }
    }

    pub fn kind(&self) -> TimerKind {
        self.kind
    }

    /// Armed from `arm` until it is cancelled or its expiry is accepted.
    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    /// Schedule `on_fire(expiry)` to be sent on `tx` once `after` has elapsed.
    ///
    /// No-op returning `false` while already armed: the pending deadline is
    /// left untouched and no second fire is scheduled.
    pub fn arm<E, F>(&mut self, after: Duration, tx: &mpsc::Sender<E>, on_fire: F) -> bool
    where
        E: Send + 'static,
        F: FnOnce(Expiry) -> E + Send + 'static,
    {
        if self.is_armed() {
            trace!(timer = ?self.kind, "already armed, ignoring arm");
            return false;
        }

        self.generation = self.generation.wrapping_add(1);
        let expiry = Expiry {
            kind: self.kind,
            generation: self.generation,
        };
        let deadline = deadline_after(after);
        let tx = tx.clone();

        self.pending = Some(tokio::spawn(async move {
            sleep_until(deadline).await;
            // A closed channel means the coordinator is shutting down.
            let _ = tx.send(on_fire(expiry)).await;
        }));

        debug!(timer = ?self.kind, after_ms = after.as_millis() as u64, "timer armed");
        true
    }

    /// Cancel the pending instance, if any. Safe to call when not armed.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(handle) => {
                handle.abort();
                debug!(timer = ?self.kind, "timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Accept an elapsed ticket. Returns `true` exactly once per `arm`, and
    /// never for a ticket whose instance was cancelled.
    pub fn expire(&mut self, expiry: Expiry) -> bool {
        if expiry.kind != self.kind || expiry.generation != self.generation || !self.is_armed() {
            trace!(timer = ?self.kind, "stale expiry dropped");
            return false;
        }
        self.pending = None;
        true
    }
}

impl Drop for OneShot {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// The alarm timeout and cooldown timers, owned together by the coordinator.
#[derive(Debug)]
pub struct TimerPair {
    pub timeout: OneShot,
    pub cooldown: OneShot,
}

impl TimerPair {
    pub fn new() -> Self {
        Self {
            timeout: OneShot::new(TimerKind::Timeout),
            cooldown: OneShot::new(TimerKind::Cooldown),
        }
    }

    pub fn get_mut(&mut self, kind: TimerKind) -> &mut OneShot {
        match kind {
            TimerKind::Timeout => &mut self.timeout,
            TimerKind::Cooldown => &mut self.cooldown,
        }
    }

    pub fn cancel_all(&mut self) {
        self.timeout.cancel();
        self.cooldown.cancel();
    }
}

impl Default for TimerPair {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time;

    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_duration() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timer = OneShot::new(TimerKind::Timeout);

        assert!(timer.arm(Duration::from_secs(5), &tx, |e| e));
        assert!(timer.is_armed());

        time::advance(Duration::from_millis(4_900)).await;
        settle().await;
        assert!(rx.try_recv().is_err());

        time::advance(Duration::from_millis(200)).await;
        let expiry = rx.recv().await.unwrap();
        assert!(timer.expire(expiry));
        assert!(!timer.is_armed());
        assert!(!timer.expire(expiry));
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_does_not_reset_deadline() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timer = OneShot::new(TimerKind::Cooldown);

        assert!(timer.arm(Duration::from_secs(10), &tx, |e| e));
        time::advance(Duration::from_secs(5)).await;
        assert!(!timer.arm(Duration::from_secs(10), &tx, |e| e));

        time::advance(Duration::from_millis(5_100)).await;
        let expiry = rx.recv().await.unwrap();
        assert!(timer.expire(expiry));

        settle().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_fire() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timer = OneShot::new(TimerKind::Timeout);

        timer.arm(Duration::from_secs(1), &tx, |e| e);
        assert!(timer.cancel());
        assert!(!timer.cancel());

        time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn queued_expiry_is_rejected_after_cancel() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timer = OneShot::new(TimerKind::Timeout);

        timer.arm(Duration::from_secs(1), &tx, |e| e);
        time::advance(Duration::from_millis(1_100)).await;
        settle().await;

        // The event is already queued when the owner cancels.
        timer.cancel();
        let stale = rx.recv().await.unwrap();
        assert!(!timer.expire(stale));

        // A fresh instance does not accept the old ticket either.
        timer.arm(Duration::from_secs(1), &tx, |e| e);
        assert!(!timer.expire(stale));
        time::advance(Duration::from_millis(1_100)).await;
        let fresh = rx.recv().await.unwrap();
        assert!(timer.expire(fresh));
    }

    #[tokio::test(start_paused = true)]
    async fn huge_durations_are_clamped() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timers = TimerPair::new();

        assert!(timers.timeout.arm(Duration::from_secs(i64::MAX as u64), &tx, |e| e));
        assert!(timers.cooldown.arm(Duration::MAX, &tx, |e| e));

        time::advance(Duration::from_secs(86_400 * 365)).await;
        settle().await;
        assert!(rx.try_recv().is_err());
        assert!(timers.timeout.is_armed());
        assert!(timers.cooldown.is_armed());

        timers.cancel_all();
        assert!(!timers.timeout.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_never_exceeds_max_delay() {
        let now = Instant::now();
        assert_eq!(deadline_after(Duration::MAX) - now, MAX_DELAY);
        assert_eq!(deadline_after(Duration::from_secs(5)) - now, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn pair_routes_by_kind() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timers = TimerPair::new();

        timers.timeout.arm(Duration::from_secs(1), &tx, |e| e);
        timers.cooldown.arm(Duration::from_secs(2), &tx, |e| e);

        time::advance(Duration::from_millis(1_100)).await;
        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, TimerKind::Timeout);
        assert!(!timers.cooldown.expire(first));
        assert!(timers.get_mut(first.kind).expire(first));

        timers.cancel_all();
        assert!(!timers.timeout.is_armed());
        assert!(!timers.cooldown.is_armed());
    }
}
