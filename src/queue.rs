//! Queue
//!
//! The user-facing handle: an ordered list of tasks, a cursor, and the
//! playback flags that steer the execution state machine.

use crate::execution::Run;
use crate::handler::Handler;
use crate::task::{Callback, Span, Task};
use crate::ticker::{Ticker, TickerShared};
use log::{debug, trace};
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll, Waker};

static QUEUE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_queue_id() -> u64 {
    QUEUE_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Shared storage behind every [`Queue`] handle.
pub struct QueueCell {
    pub(crate) id: u64,
    /// Set for the duration of a tick.
    pub(crate) ticking: Cell<bool>,
    pub(crate) state: RefCell<QueueInner>,
}

pub(crate) struct QueueInner {
    pub(crate) id: u64,
    pub(crate) me: Weak<QueueCell>,
    pub(crate) ticker: Weak<TickerShared>,

    pub(crate) tasks: Vec<Rc<Task>>,
    pub(crate) cursor: usize,
    pub(crate) executed: usize,
    pub(crate) executed_since_play: usize,

    pub(crate) immutable: bool,
    pub(crate) repeating: bool,
    pub(crate) consuming: bool,
    pub(crate) reversed: bool,
    pub(crate) yoyo: bool,

    pub(crate) playing: bool,
    pub(crate) paused: bool,

    pub(crate) waiting_on: Vec<Queue>,

    pub(crate) run: Option<Run>,
    /// Bumped by every Play/Stop/Reset; a callback that changes it ends the tick.
    pub(crate) generation: u64,
    /// Last resolved task index, so a mid-pass direction flip never replays it.
    pub(crate) last_index: Option<usize>,

    completion_wakers: Vec<Waker>,
}

impl QueueInner {
    pub(crate) fn is_completed(&self) -> bool {
        self.cursor >= self.tasks.len() && !self.playing
    }

    /// Toggle direction, mapping forward progress onto equivalent backward progress.
    pub(crate) fn flip(&mut self) {
        self.reversed = !self.reversed;
        if self.playing && self.cursor != 0 {
            self.cursor = self.tasks.len().saturating_sub(self.cursor);
        }
    }

    /// Cancel the active run and rewind.
    fn halt(&mut self) {
        self.playing = false;
        self.run = None;
        self.cursor = 0;
        self.last_index = None;
        self.generation += 1;
    }

    /// End of a non-repeating pass.
    pub(crate) fn complete(&mut self) {
        self.playing = false;
        self.run = None;
        self.last_index = None;
        self.waiting_on.clear();
        debug!("queue {} completed ({} executed)", self.id, self.executed);
        for waker in self.completion_wakers.drain(..) {
            waker.wake();
        }
    }
}

/// A tick-driven queue of one-shot and per-tick callbacks.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct Queue(pub(crate) Rc<QueueCell>);

impl Queue {
    /// Create an empty queue driven by `ticker`.
    pub fn new(ticker: &Ticker) -> Self {
        let shared = ticker.downgrade();
        let id = next_queue_id();
        let cell = Rc::new_cyclic(|me| QueueCell {
            id,
            ticking: Cell::new(false),
            state: RefCell::new(QueueInner {
                id,
                me: me.clone(),
                ticker: shared,
                tasks: Vec::new(),
                cursor: 0,
                executed: 0,
                executed_since_play: 0,
                immutable: false,
                repeating: false,
                consuming: false,
                reversed: false,
                yoyo: false,
                playing: false,
                paused: false,
                waiting_on: Vec::new(),
                run: None,
                generation: 0,
                last_index: None,
                completion_wakers: Vec::new(),
            }),
        });
        let queue = Queue(cell);
        ticker.register(queue.clone());
        trace!("queue {} created", queue.id());
        queue
    }

    pub(crate) fn from_cell(cell: Rc<QueueCell>) -> Self {
        Queue(cell)
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// The ticker driving this queue, if it is still alive.
    pub fn ticker(&self) -> Option<Ticker> {
        self.0.state.borrow().ticker.upgrade().map(Ticker::from_shared)
    }

    pub fn ptr_eq(&self, other: &Queue) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    // ------------------------------------------------------------------
    // Append API
    // ------------------------------------------------------------------

    /// Append a task. Ignored once the queue is immutable; starts playback
    /// unless the queue is paused or already playing.
    pub fn push(&self, task: Task) -> &Self {
        let autoplay = {
            let mut inner = self.0.state.borrow_mut();
            if inner.immutable {
                trace!("queue {} is immutable, append ignored", self.0.id);
                false
            } else {
                inner.tasks.push(Rc::new(task));
                !inner.paused && !inner.playing
            }
        };
        if autoplay {
            self.play();
        }
        self
    }

    /// Wait `span`, then call `f`.
    pub fn add(&self, span: impl Into<Span>, f: impl FnMut() + 'static) -> &Self {
        self.push(Task::one_shot(span.into(), Callback::Plain(Box::new(f))))
    }

    /// Wait `span`, then call `f` with a handler.
    pub fn add_with(&self, span: impl Into<Span>, f: impl FnMut(&mut Handler) + 'static) -> &Self {
        self.push(Task::one_shot(span.into(), Callback::WithHandler(Box::new(f))))
    }

    /// Call `f` right after the previous task, with no delay.
    pub fn then(&self, f: impl FnMut() + 'static) -> &Self {
        self.add(0.0, f)
    }

    /// Like [`Queue::then`], with a handler.
    pub fn then_with(&self, f: impl FnMut(&mut Handler) + 'static) -> &Self {
        self.add_with(0.0, f)
    }

    /// A pure delay.
    pub fn delay(&self, span: impl Into<Span>) -> &Self {
        self.push(Task::one_shot(span.into(), Callback::None))
    }

    /// Call `f` once per tick for `span` seconds. A negative span loops until
    /// the callback ends the loop; a zero span is skipped.
    pub fn loop_for(&self, span: impl Into<Span>, f: impl FnMut(&mut Handler) + 'static) -> &Self {
        self.push(Task::looped(span.into(), f))
    }

    /// Call `f` every tick until it ends the loop.
    pub fn loop_forever(&self, f: impl FnMut(&mut Handler) + 'static) -> &Self {
        self.loop_for(Span::forever(), f)
    }

    /// Check `predicate` when reached: on failure restart if repeating,
    /// otherwise stop.
    pub fn guard(&self, mut predicate: impl FnMut() -> bool + 'static) -> &Self {
        self.then_with(move |h| {
            if predicate() {
                return;
            }
            if let Some(queue) = h.queue() {
                if queue.is_repeating() {
                    queue.restart();
                } else {
                    queue.stop();
                }
            }
        })
    }

    /// Block until `predicate` holds, checking it every `poll_interval` seconds.
    pub fn wait_until(&self, mut predicate: impl FnMut() -> bool + 'static, poll_interval: f64) -> &Self {
        self.loop_forever(move |h| {
            if predicate() {
                h.end_loop();
            } else {
                h.wait(poll_interval);
            }
        })
    }

    // ------------------------------------------------------------------
    // Modes
    // ------------------------------------------------------------------

    /// Ignore further appends (and keep consumed tasks).
    pub fn immutable(&self) -> &Self {
        self.0.state.borrow_mut().immutable = true;
        self
    }

    /// Start over from the first task at the end of every pass.
    pub fn repeat(&self) -> &Self {
        self.0.state.borrow_mut().repeating = true;
        self
    }

    /// Remove each task once it has executed.
    pub fn consume(&self) -> &Self {
        self.0.state.borrow_mut().consuming = true;
        self
    }

    /// Bounce direction at the end of a pass.
    pub fn yoyo(&self) -> &Self {
        self.0.state.borrow_mut().yoyo = true;
        self
    }

    /// Clear every mode and play forward.
    pub fn release(&self) -> &Self {
        {
            let mut inner = self.0.state.borrow_mut();
            inner.immutable = false;
            inner.repeating = false;
            inner.consuming = false;
            inner.yoyo = false;
        }
        self.forward()
    }

    /// Toggle the playback direction.
    pub fn reverse(&self) -> &Self {
        self.0.state.borrow_mut().flip();
        trace!("queue {} reversed", self.0.id);
        self
    }

    /// Play last task to first.
    pub fn backward(&self) -> &Self {
        if !self.is_reversed() {
            self.reverse();
        }
        self
    }

    /// Play first task to last.
    pub fn forward(&self) -> &Self {
        if self.is_reversed() {
            self.reverse();
        }
        self
    }

    // ------------------------------------------------------------------
    // Playback
    // ------------------------------------------------------------------

    /// Hold callbacks until the next Play. Delays keep counting.
    pub fn pause(&self) -> &Self {
        self.0.state.borrow_mut().paused = true;
        self
    }

    /// Unpause and arm the execution state machine. Nothing runs until the
    /// next tick.
    pub fn play(&self) -> &Self {
        let mut inner = self.0.state.borrow_mut();
        inner.paused = false;
        if inner.playing || inner.tasks.is_empty() {
            return self;
        }
        if inner.cursor >= inner.tasks.len() {
            inner.cursor = 0;
        }
        inner.executed_since_play = 0;
        inner.last_index = None;
        inner.playing = true;
        inner.generation += 1;
        inner.run = Some(Run::new(inner.generation));
        debug!(
            "queue {} play from {} ({} tasks{})",
            self.0.id,
            inner.cursor,
            inner.tasks.len(),
            if inner.reversed { ", reversed" } else { "" }
        );
        self
    }

    /// Cancel the active run, rewind, and stop every queue this one waits on.
    pub fn stop(&self) -> &Self {
        let children = {
            let mut inner = self.0.state.borrow_mut();
            inner.halt();
            std::mem::take(&mut inner.waiting_on)
        };
        debug!("queue {} stopped", self.0.id);
        self.notify_completion();
        for child in children {
            child.stop();
        }
        self
    }

    /// Stop, then play again from the start.
    pub fn restart(&self) -> &Self {
        self.stop();
        self.play()
    }

    /// Stop, drop every task, clear counters and modes, and reset every
    /// queue this one waits on.
    pub fn reset(&self) -> &Self {
        let children = {
            let mut inner = self.0.state.borrow_mut();
            inner.halt();
            inner.tasks.clear();
            inner.executed = 0;
            inner.executed_since_play = 0;
            inner.immutable = false;
            inner.repeating = false;
            inner.consuming = false;
            inner.reversed = false;
            inner.yoyo = false;
            inner.paused = false;
            std::mem::take(&mut inner.waiting_on)
        };
        debug!("queue {} reset", self.0.id);
        self.notify_completion();
        for child in children {
            child.reset();
        }
        self
    }

    // ------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------

    pub fn is_playing(&self) -> bool {
        self.0.state.borrow().playing
    }

    pub fn is_paused(&self) -> bool {
        self.0.state.borrow().paused
    }

    /// The last pass finished and nothing restarted it.
    pub fn is_completed(&self) -> bool {
        self.0.state.borrow().is_completed()
    }

    /// Number of tasks.
    pub fn count(&self) -> usize {
        self.0.state.borrow().tasks.len()
    }

    /// Position of the next task, counted in the current direction.
    pub fn cursor(&self) -> usize {
        self.0.state.borrow().cursor
    }

    pub fn executed_count(&self) -> usize {
        self.0.state.borrow().executed
    }

    pub fn is_reversed(&self) -> bool {
        self.0.state.borrow().reversed
    }

    pub fn is_repeating(&self) -> bool {
        self.0.state.borrow().repeating
    }

    pub fn is_consuming(&self) -> bool {
        self.0.state.borrow().consuming
    }

    pub fn is_immutable(&self) -> bool {
        self.0.state.borrow().immutable
    }

    pub fn is_yoyo(&self) -> bool {
        self.0.state.borrow().yoyo
    }

    /// Queues this one is currently blocked on.
    pub fn waiting_on(&self) -> Vec<Queue> {
        self.0.state.borrow().waiting_on.clone()
    }

    /// Resolves once the queue is completed.
    pub fn wait_for_completion(&self) -> Completion {
        Completion {
            queue: self.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Wait graph
    // ------------------------------------------------------------------

    pub(crate) fn register_wait(&self, child: &Queue) {
        let mut inner = self.0.state.borrow_mut();
        if !inner.waiting_on.iter().any(|q| q.ptr_eq(child)) {
            trace!("queue {} waits on queue {}", self.0.id, child.id());
            inner.waiting_on.push(child.clone());
        }
    }

    /// Whether `target` is reachable from this queue through the wait graph.
    pub(crate) fn reaches(&self, target: &Queue) -> bool {
        let mut stack = vec![self.clone()];
        let mut seen = HashSet::new();
        while let Some(queue) = stack.pop() {
            if !seen.insert(queue.id()) {
                continue;
            }
            let Ok(inner) = queue.0.state.try_borrow() else {
                continue;
            };
            for child in &inner.waiting_on {
                if child.ptr_eq(target) {
                    return true;
                }
                stack.push(child.clone());
            }
        }
        false
    }

    /// Handles alive outside the queue itself.
    pub(crate) fn handle_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    fn register_waker(&self, waker: &Waker) {
        let mut inner = self.0.state.borrow_mut();
        if !inner.completion_wakers.iter().any(|w| w.will_wake(waker)) {
            inner.completion_wakers.push(waker.clone());
        }
    }

    fn notify_completion(&self) {
        let wakers = std::mem::take(&mut self.0.state.borrow_mut().completion_wakers);
        for waker in wakers {
            waker.wake();
        }
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.state.try_borrow() {
            Ok(inner) => f
                .debug_struct("Queue")
                .field("id", &self.0.id)
                .field("count", &inner.tasks.len())
                .field("cursor", &inner.cursor)
                .field("playing", &inner.playing)
                .field("paused", &inner.paused)
                .field("reversed", &inner.reversed)
                .finish(),
            Err(_) => f.debug_struct("Queue").field("id", &self.0.id).finish_non_exhaustive(),
        }
    }
}

/// Future returned by [`Queue::wait_for_completion`].
pub struct Completion {
    queue: Queue,
}

impl Completion {
    pub fn is_ready(&self) -> bool {
        self.queue.is_completed()
    }
}

impl Future for Completion {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.queue.is_completed() {
            Poll::Ready(())
        } else {
            self.queue.register_waker(cx.waker());
            Poll::Pending
        }
    }
}
