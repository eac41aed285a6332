//! Ticker - the tick source that drives queues
//!
//! Every queue is built against a ticker and registered with it. The ticker
//! advances its clock and ticks each live queue once per frame.
//! - Offline: `step_sec` / `step_frame` for faster-than-realtime stepping
//! - Realtime: `run_until` paces frames with spin_sleep
//!
//! Async scripts spawned on the ticker run on a single-threaded pool between
//! ticks and can await queue completion.

use crate::error::QueueError;
use crate::queue::Queue;
use futures::executor::{LocalPool, LocalSpawner};
use futures::task::LocalSpawnExt;
use log::{trace, warn};
use spin_sleep::SpinSleeper;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

/// Configuration for a ticker.
#[derive(Clone, Debug)]
pub struct TickerConfig {
    /// Frame rate for `step_frame` and `run_until`.
    pub fps: f64,
    /// Scale applied to wall-clock time in realtime mode.
    pub rate: f64,
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self { fps: 60.0, rate: 1.0 }
    }
}

impl TickerConfig {
    /// Replace non-finite or non-positive values with the defaults.
    fn sanitized(self) -> Self {
        let defaults = Self::default();
        let valid = |v: f64| v.is_finite() && v > 0.0;
        Self {
            fps: if valid(self.fps) { self.fps } else { defaults.fps },
            rate: if valid(self.rate) { self.rate } else { defaults.rate },
        }
    }
}

pub(crate) struct TickerShared {
    config: TickerConfig,
    queues: RefCell<Vec<Queue>>,
    now: Cell<f64>,
    frame: Cell<u64>,
    ticking: Cell<bool>,
    pool: RefCell<LocalPool>,
    spawner: LocalSpawner,
    sleeper: SpinSleeper,
}

/// Clears the ticking flag on drop.
struct Ticking<'a>(&'a Cell<bool>);

impl Drop for Ticking<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Handle to a tick source. Cloning yields another handle to the same ticker.
#[derive(Clone)]
pub struct Ticker {
    shared: Rc<TickerShared>,
}

impl Default for Ticker {
    fn default() -> Self {
        Self::new()
    }
}

impl Ticker {
    pub fn new() -> Self {
        Self::with_config(TickerConfig::default())
    }

    pub fn with_config(config: TickerConfig) -> Self {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        Self {
            shared: Rc::new(TickerShared {
                config: config.sanitized(),
                queues: RefCell::new(Vec::new()),
                now: Cell::new(0.0),
                frame: Cell::new(0),
                ticking: Cell::new(false),
                pool: RefCell::new(pool),
                spawner,
                sleeper: SpinSleeper::default(),
            }),
        }
    }

    pub(crate) fn from_shared(shared: Rc<TickerShared>) -> Self {
        Self { shared }
    }

    pub(crate) fn downgrade(&self) -> Weak<TickerShared> {
        Rc::downgrade(&self.shared)
    }

    pub(crate) fn register(&self, queue: Queue) {
        self.shared.queues.borrow_mut().push(queue);
    }

    /// Create a queue driven by this ticker.
    pub fn queue(&self) -> Queue {
        Queue::new(self)
    }

    pub fn config(&self) -> &TickerConfig {
        &self.shared.config
    }

    /// Seconds of tick time elapsed.
    pub fn now(&self) -> f64 {
        self.shared.now.get()
    }

    /// Number of ticks so far.
    pub fn frame(&self) -> u64 {
        self.shared.frame.get()
    }

    /// Number of registered queues.
    pub fn queue_count(&self) -> usize {
        self.shared.queues.borrow().len()
    }

    /// Spawn an async script. It runs between ticks.
    pub fn spawn(&self, script: impl Future<Output = ()> + 'static) -> Result<(), QueueError> {
        self.shared.spawner.spawn_local(script)?;
        Ok(())
    }

    /// Advance the clock by `delta` seconds and tick every registered queue.
    ///
    /// Queues tick in registration order. Every queue is ticked even if an
    /// earlier one fails; the first error is returned.
    pub fn tick(&self, delta: f64) -> Result<(), QueueError> {
        if !delta.is_finite() || delta < 0.0 {
            return Err(QueueError::InvalidDelta(delta));
        }
        if self.shared.ticking.replace(true) {
            return Err(QueueError::TickerReentrant);
        }
        let _ticking = Ticking(&self.shared.ticking);

        // Let scripts spawned since the last tick append their work first
        self.run_scripts();

        self.shared.now.set(self.shared.now.get() + delta);
        self.shared.frame.set(self.shared.frame.get() + 1);

        let queues = self.shared.queues.borrow().clone();
        let mut first_err = None;
        for queue in &queues {
            if let Err(err) = queue.tick(delta) {
                warn!("queue {} failed to tick: {}", queue.id(), err);
                first_err.get_or_insert(err);
            }
        }
        drop(queues);

        self.prune();
        self.run_scripts();

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Step by a number of seconds (offline mode). Invalid steps count as zero.
    pub fn step_sec(&self, dt: f64) -> Result<(), QueueError> {
        let s = if dt.is_finite() && dt > 0.0 { dt } else { 0.0 };
        self.tick(s)
    }

    /// Step by one frame (offline mode).
    pub fn step_frame(&self) -> Result<(), QueueError> {
        self.step_sec(1.0 / self.shared.config.fps)
    }

    /// Step by N frames (offline mode).
    pub fn step_frames(&self, n: usize) -> Result<(), QueueError> {
        for _ in 0..n {
            self.step_frame()?;
        }
        Ok(())
    }

    /// Tick in realtime until `is_done` returns true.
    ///
    /// Frames are paced at the configured fps; each tick is fed the measured
    /// wall time scaled by the configured rate.
    pub fn run_until<F>(&self, mut is_done: F) -> Result<(), QueueError>
    where
        F: FnMut() -> bool,
    {
        let frame = Duration::from_secs_f64(1.0 / self.shared.config.fps);
        let rate = self.shared.config.rate;
        let mut last = Instant::now();

        self.run_scripts();
        while !is_done() {
            let elapsed = last.elapsed();
            if elapsed < frame {
                self.shared.sleeper.sleep(frame - elapsed);
            }
            let now = Instant::now();
            let wall = now.duration_since(last).as_secs_f64();
            last = now;
            self.tick(wall * rate)?;
        }
        Ok(())
    }

    /// Drop queues nobody else holds once they are idle or paused.
    fn prune(&self) {
        let mut queues = self.shared.queues.borrow_mut();
        let before = queues.len();
        queues.retain(|q| q.handle_count() > 1 || (q.is_playing() && !q.is_paused()));
        if queues.len() < before {
            trace!("pruned {} queue(s)", before - queues.len());
        }
    }

    fn run_scripts(&self) {
        // Skipped while the pool is already borrowed further up the stack
        if let Ok(mut pool) = self.shared.pool.try_borrow_mut() {
            pool.run_until_stalled();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_sanitized() {
        let ticker = Ticker::with_config(TickerConfig {
            fps: 0.0,
            rate: f64::NAN,
        });
        assert_eq!(ticker.config().fps, 60.0);
        assert_eq!(ticker.config().rate, 1.0);
    }

    #[test]
    fn test_step_frame_advances_clock() {
        let ticker = Ticker::with_config(TickerConfig { fps: 10.0, rate: 1.0 });
        ticker.step_frames(5).unwrap();
        assert_eq!(ticker.frame(), 5);
        assert!((ticker.now() - 0.5).abs() < 1e-9);

        ticker.step_sec(-1.0).unwrap();
        assert_eq!(ticker.frame(), 6);
        assert!((ticker.now() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_tick_rejects_invalid_delta() {
        let ticker = Ticker::new();
        assert!(matches!(ticker.tick(-0.1), Err(QueueError::InvalidDelta(_))));
        assert_eq!(ticker.frame(), 0);
    }

    #[test]
    fn test_unheld_queue_pruned_after_completion() {
        let ticker = Ticker::new();
        let hits = Rc::new(Cell::new(0));
        {
            let h = hits.clone();
            ticker.queue().then(move || h.set(h.get() + 1));
        }
        assert_eq!(ticker.queue_count(), 1);
        ticker.step_frames(5).unwrap();
        assert_eq!(hits.get(), 1);
        assert_eq!(ticker.queue_count(), 0);
    }

    #[test]
    fn test_held_queue_kept() {
        let ticker = Ticker::new();
        let q = ticker.queue();
        ticker.step_frames(3).unwrap();
        assert_eq!(ticker.queue_count(), 1);
        drop(q);
        ticker.step_frame().unwrap();
        assert_eq!(ticker.queue_count(), 0);
    }

    #[test]
    fn test_script_awaits_completion() {
        let ticker = Ticker::new();
        let q = ticker.queue();
        q.add(0.5, || {});
        let done = Rc::new(Cell::new(false));
        let d = done.clone();
        let completion = q.wait_for_completion();
        ticker
            .spawn(async move {
                completion.await;
                d.set(true);
            })
            .unwrap();

        ticker.step_sec(0.5).unwrap();
        assert!(!done.get());
        ticker.step_sec(0.5).unwrap();
        assert!(q.is_completed());
        assert!(done.get());
    }

    #[test]
    fn test_reentrant_tick_refused() {
        let ticker = Ticker::new();
        let q = ticker.queue();
        let refused = Rc::new(Cell::new(false));
        let r = refused.clone();
        q.then_with(move |h| {
            if let Some(t) = h.queue().and_then(|q| q.ticker()) {
                r.set(matches!(t.tick(0.1), Err(QueueError::TickerReentrant)));
            }
        });
        ticker.step_frame().unwrap();
        assert!(refused.get());
    }
}
