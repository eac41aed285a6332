//! Handler - per-execution context passed to callbacks
//!
//! Exposes the timeline of the running task (completion fraction, a
//! tick-synchronized delta, elapsed time) and the only ways a callback can
//! steer its queue: ending a loop early and appending trailing waits.

use crate::error::QueueError;
use crate::queue::{Queue, QueueCell};
use log::warn;
use std::fmt;
use std::rc::Weak;

/// Completion within this distance of the end counts as complete.
pub(crate) const EPSILON: f64 = 1e-9;

/// A trailing suspension appended by a callback.
pub(crate) enum Wait {
    /// Seconds left to wait.
    Delay(f64),
    /// Block until the queue is completed.
    Queue(Queue),
}

impl fmt::Debug for Wait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Wait::Delay(secs) => write!(f, "Delay({})", secs),
            Wait::Queue(q) => write!(f, "Queue({})", q.id()),
        }
    }
}

/// Context for one execution of a task.
///
/// One-shots get a fresh handler per call. A loop keeps the same handler for
/// every frame of one execution.
pub struct Handler {
    owner: Weak<QueueCell>,
    owner_id: u64,

    t: f64,
    delta_time: f64,
    time_since_start: f64,
    is_looping: bool,
    is_reversed: bool,

    duration: f64,
    rate: f64,
    infinite: bool,

    pub(crate) pending: Vec<Wait>,
    pub(crate) fault: Option<QueueError>,
}

impl Handler {
    /// Handler for a one-shot callback: the task is complete by the time it runs.
    pub(crate) fn one_shot(
        owner: Weak<QueueCell>,
        owner_id: u64,
        tick_delta: f64,
        duration: f64,
        reversed: bool,
    ) -> Self {
        Self {
            owner,
            owner_id,
            t: 1.0,
            delta_time: tick_delta,
            time_since_start: duration,
            is_looping: false,
            is_reversed: reversed,
            duration,
            rate: 0.0,
            infinite: false,
            pending: Vec::new(),
            fault: None,
        }
    }

    /// Handler for a loop of `duration` seconds; negative means forever.
    pub(crate) fn looped(owner: Weak<QueueCell>, owner_id: u64, duration: f64, reversed: bool) -> Self {
        let infinite = duration < 0.0 || duration.is_infinite();
        Self {
            owner,
            owner_id,
            t: if reversed { 1.0 } else { 0.0 },
            delta_time: 0.0,
            time_since_start: 0.0,
            is_looping: true,
            is_reversed: reversed,
            duration,
            rate: if infinite { 0.0 } else { 1.0 / duration },
            infinite,
            pending: Vec::new(),
            fault: None,
        }
    }

    /// Advance the timeline by one tick, following the queue's current direction.
    pub(crate) fn advance(&mut self, tick_delta: f64, reversed: bool) {
        // A live Reverse/Backward/Forward turns the loop around mid-flight.
        self.is_reversed = reversed;
        let direction = if reversed { -1.0 } else { 1.0 };

        if !self.infinite {
            let t = self.t + direction * self.rate * tick_delta;
            self.t = if t >= 1.0 - EPSILON {
                1.0
            } else if t <= EPSILON {
                0.0
            } else {
                t
            };
        }

        let magnitude = if self.infinite {
            tick_delta
        } else {
            let remaining = self.duration - self.time_since_start;
            if remaining <= tick_delta || remaining <= EPSILON {
                1.0
            } else {
                tick_delta / remaining
            }
        };
        self.delta_time = direction * magnitude;

        self.time_since_start += tick_delta;
    }

    /// Whether a finite loop has run its full course in the current direction.
    pub(crate) fn reached_end(&self) -> bool {
        if self.infinite {
            return false;
        }
        if self.is_reversed {
            self.t <= 0.0
        } else {
            self.t >= 1.0
        }
    }

    /// Completion fraction: 0 to 1 forward, 1 to 0 backward. Always 1 for one-shots.
    pub fn t(&self) -> f64 {
        self.t
    }

    /// Tick delta rescaled so that stepping a lerp by it lands exactly on the
    /// target when the loop's duration runs out. Negative when reversed.
    pub fn delta_time(&self) -> f64 {
        self.delta_time
    }

    /// Seconds since this execution began, whatever the direction.
    pub fn time_since_start(&self) -> f64 {
        self.time_since_start
    }

    pub fn is_looping(&self) -> bool {
        self.is_looping
    }

    pub fn is_reversed(&self) -> bool {
        self.is_reversed
    }

    /// The queue running this callback.
    pub fn queue(&self) -> Option<Queue> {
        self.owner.upgrade().map(Queue::from_cell)
    }

    /// Exit the enclosing loop after this frame.
    pub fn end_loop(&mut self) {
        self.is_looping = false;
    }

    /// Alias of [`Handler::end_loop`].
    pub fn break_loop(&mut self) {
        self.end_loop();
    }

    /// Wait `secs` before the next frame or task. Ignored unless positive.
    pub fn wait(&mut self, secs: f64) {
        if secs > 0.0 {
            self.pending.push(Wait::Delay(secs));
        }
    }

    /// Block until `child` is completed. Refuses waits that would close a cycle
    /// in the wait graph; the refusal surfaces as the error of this tick.
    pub fn wait_for(&mut self, child: &Queue) {
        let Some(owner) = self.queue() else {
            return;
        };
        if owner.ptr_eq(child) || child.reaches(&owner) {
            warn!(
                "queue {} refused to wait on queue {}: cycle",
                self.owner_id,
                child.id()
            );
            self.record(QueueError::WaitCycle {
                parent: self.owner_id,
                child: child.id(),
            });
            return;
        }
        owner.register_wait(child);
        self.pending.push(Wait::Queue(child.clone()));
    }

    /// Poll `predicate` every `poll_interval` seconds on a helper queue and
    /// block until it returns true.
    pub fn wait_until(&mut self, predicate: impl FnMut() -> bool + 'static, poll_interval: f64) {
        let Some(ticker) = self.queue().and_then(|q| q.ticker()) else {
            self.record(QueueError::Detached(self.owner_id));
            return;
        };
        let helper = Queue::new(&ticker);
        helper.wait_until(predicate, poll_interval);
        self.wait_for(&helper);
    }

    fn record(&mut self, err: QueueError) {
        if self.fault.is_none() {
            self.fault = Some(err);
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("queue", &self.owner_id)
            .field("t", &self.t)
            .field("delta_time", &self.delta_time)
            .field("time_since_start", &self.time_since_start)
            .field("is_looping", &self.is_looping)
            .field("is_reversed", &self.is_reversed)
            .field("pending", &self.pending)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached_loop(duration: f64, reversed: bool) -> Handler {
        Handler::looped(Weak::new(), 0, duration, reversed)
    }

    #[test]
    fn test_forward_timeline_reaches_one() {
        let mut h = detached_loop(2.0, false);
        h.advance(0.5, false);
        assert!((h.t() - 0.25).abs() < 1e-12);
        assert!((h.delta_time() - 0.25).abs() < 1e-12);
        h.advance(0.5, false);
        h.advance(0.5, false);
        assert!(!h.reached_end());
        h.advance(0.5, false);
        assert_eq!(h.t(), 1.0);
        assert!(h.reached_end());
        assert!((h.time_since_start() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_synced_delta_lands_on_target() {
        // Stepping v += (target - v) * delta_time reaches the target exactly,
        // even with uneven ticks.
        let mut h = detached_loop(1.0, false);
        let target = 10.0;
        let mut v = 0.0;
        for dt in [0.1, 0.3, 0.25, 0.35] {
            h.advance(dt, false);
            v += (target - v) * h.delta_time();
        }
        assert!(h.reached_end());
        assert!((v - target).abs() < 1e-9);
    }

    #[test]
    fn test_backward_timeline() {
        let mut h = detached_loop(1.0, true);
        assert_eq!(h.t(), 1.0);
        h.advance(0.25, true);
        assert!((h.t() - 0.75).abs() < 1e-12);
        assert!(h.delta_time() < 0.0);
        for _ in 0..3 {
            h.advance(0.25, true);
        }
        assert_eq!(h.t(), 0.0);
        assert!(h.reached_end());
        assert!((h.time_since_start() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_live_direction_flip() {
        let mut h = detached_loop(1.0, false);
        h.advance(0.5, false);
        h.advance(0.25, true);
        assert!(h.is_reversed());
        assert!((h.t() - 0.25).abs() < 1e-12);
        assert!(!h.reached_end());
    }

    #[test]
    fn test_infinite_loop_never_ends() {
        let mut h = detached_loop(-1.0, false);
        for _ in 0..100 {
            h.advance(0.1, false);
        }
        assert_eq!(h.t(), 0.0);
        assert!(!h.reached_end());
        assert!((h.delta_time() - 0.1).abs() < 1e-12);
        h.end_loop();
        assert!(!h.is_looping());
    }

    #[test]
    fn test_wait_ignores_non_positive() {
        let mut h = detached_loop(1.0, false);
        h.wait(0.0);
        h.wait(-1.0);
        h.wait(f64::NAN);
        assert!(h.pending.is_empty());
        h.wait(0.5);
        assert_eq!(h.pending.len(), 1);
    }

    #[test]
    fn test_one_shot_handler() {
        let h = Handler::one_shot(Weak::new(), 0, 0.016, 2.0, false);
        assert_eq!(h.t(), 1.0);
        assert_eq!(h.delta_time(), 0.016);
        assert_eq!(h.time_since_start(), 2.0);
        assert!(h.queue().is_none());
    }
}
