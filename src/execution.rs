//! Execution state machine
//!
//! A playing queue owns one resumable [`Run`]. Each `tick` hands it a budget
//! of time and resumes it at its suspension point until it suspends again.
//! Callbacks and dynamic spans are invoked by `tick` with no borrow held, so
//! they are free to append to, reverse, stop or reset their own queue.

use crate::error::QueueError;
use crate::handler::{Handler, Wait, EPSILON};
use crate::queue::{Queue, QueueCell, QueueInner};
use crate::task::{Task, TaskKind};
use log::{debug, trace};
use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Suspension points of a run.
#[derive(Clone, Copy, Debug, PartialEq)]
enum Phase {
    /// Resolve the task under the cursor.
    Next,
    /// Waiting for a dynamic span to be evaluated.
    Measure,
    /// One-shot delay counting down.
    Delay { remaining: f64 },
    /// One-shot callback due (behind the pause gate).
    Fire,
    /// Next loop frame: advance the timeline.
    Frame,
    /// Loop callback due (behind the pause gate).
    FrameDue,
    /// A callback is running.
    Calling,
    /// Trailing waits left by a callback.
    Drain,
    /// One-tick boundary before the next task.
    Settle,
    /// Pass over; completes on the next tick.
    Finish,
}

/// The task currently being executed.
struct Active {
    task: Rc<Task>,
    duration: f64,
    delayed: bool,
    handler: Option<Handler>,
    waits: VecDeque<Wait>,
}

impl Active {
    fn new(task: Rc<Task>) -> Self {
        Self {
            task,
            duration: 0.0,
            delayed: false,
            handler: None,
            waits: VecDeque::new(),
        }
    }
}

/// One armed execution of a queue, from Play until completion or Stop.
pub(crate) struct Run {
    pub(crate) generation: u64,
    phase: Phase,
    active: Option<Active>,
}

impl Run {
    pub(crate) fn new(generation: u64) -> Self {
        Self {
            generation,
            phase: Phase::Next,
            active: None,
        }
    }
}

/// The time a single tick makes available.
///
/// The first suspension point that needs time claims it; anything reached
/// afterwards in the same tick waits for the next one.
pub(crate) struct Budget {
    delta: f64,
    fresh: bool,
    /// Pass ends seen in this tick.
    passes: u32,
}

impl Budget {
    pub(crate) fn new(delta: f64) -> Self {
        Self {
            delta,
            fresh: true,
            passes: 0,
        }
    }

    fn take(&mut self) -> Option<f64> {
        if self.fresh {
            self.fresh = false;
            Some(self.delta)
        } else {
            None
        }
    }

    fn spend(&mut self) {
        self.fresh = false;
    }

    fn refund(&mut self) {
        self.fresh = true;
    }
}

/// What `tick` must do next on behalf of the state machine.
pub(crate) enum Step {
    Yield,
    Measure {
        task: Rc<Task>,
        generation: u64,
    },
    Call {
        task: Rc<Task>,
        generation: u64,
        handler: Option<Handler>,
    },
}

enum Flow {
    Continue,
    Yield,
}

impl QueueInner {
    fn set_phase(&mut self, phase: Phase) {
        if let Some(run) = self.run.as_mut() {
            run.phase = phase;
        }
    }

    fn active_mut(&mut self) -> Option<&mut Active> {
        self.run.as_mut().and_then(|run| run.active.as_mut())
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.run.as_ref().is_some_and(|run| run.generation == generation)
    }

    /// Advance the run until it suspends or needs something invoked.
    pub(crate) fn step(&mut self, budget: &mut Budget) -> Step {
        loop {
            let Some((phase, generation)) = self.run.as_ref().map(|run| (run.phase, run.generation))
            else {
                return Step::Yield;
            };

            match phase {
                Phase::Next => {
                    if self.cursor >= self.tasks.len() {
                        if let Flow::Yield = self.end_pass(budget) {
                            return Step::Yield;
                        }
                        continue;
                    }
                    self.resolve_next();
                }

                Phase::Measure => {
                    let Some(active) = self.active_mut() else {
                        self.set_phase(Phase::Next);
                        continue;
                    };
                    return Step::Measure {
                        task: Rc::clone(&active.task),
                        generation,
                    };
                }

                Phase::Delay { remaining } => {
                    let Some(delta) = budget.take() else {
                        return Step::Yield;
                    };
                    let remaining = remaining - delta;
                    if remaining <= EPSILON {
                        self.set_phase(Phase::Fire);
                    } else {
                        self.set_phase(Phase::Delay { remaining });
                        return Step::Yield;
                    }
                }

                Phase::Fire => {
                    if self.paused {
                        return Step::Yield;
                    }
                    budget.spend();
                    let Some(active) = self.active_mut() else {
                        self.set_phase(Phase::Next);
                        continue;
                    };
                    let task = Rc::clone(&active.task);
                    let duration = active.duration;
                    let handler = task.wants_handler().then(|| {
                        Handler::one_shot(self.me.clone(), self.id, budget.delta, duration, self.reversed)
                    });
                    self.set_phase(Phase::Calling);
                    return Step::Call {
                        task,
                        generation,
                        handler,
                    };
                }

                Phase::Frame => {
                    let Some(delta) = budget.take() else {
                        return Step::Yield;
                    };
                    let reversed = self.reversed;
                    match self.active_mut().and_then(|active| active.handler.as_mut()) {
                        Some(handler) => {
                            handler.advance(delta, reversed);
                            self.set_phase(Phase::FrameDue);
                        }
                        None => self.set_phase(Phase::Next),
                    }
                }

                Phase::FrameDue => {
                    if self.paused {
                        return Step::Yield;
                    }
                    budget.spend();
                    let Some(active) = self.active_mut() else {
                        self.set_phase(Phase::Next);
                        continue;
                    };
                    let task = Rc::clone(&active.task);
                    let handler = active.handler.take();
                    self.set_phase(Phase::Calling);
                    return Step::Call {
                        task,
                        generation,
                        handler,
                    };
                }

                // Only reachable after a callback unwound out of the last tick.
                Phase::Calling => {
                    if let Flow::Yield = self.after_call(None) {
                        return Step::Yield;
                    }
                }

                Phase::Drain => {
                    if let Flow::Yield = self.drain(budget) {
                        return Step::Yield;
                    }
                }

                Phase::Settle => {
                    if budget.take().is_none() {
                        return Step::Yield;
                    }
                    self.set_phase(Phase::Next);
                }

                Phase::Finish => {
                    if budget.take().is_none() {
                        return Step::Yield;
                    }
                    if self.cursor < self.tasks.len() {
                        self.set_phase(Phase::Next);
                        continue;
                    }
                    self.complete();
                    return Step::Yield;
                }
            }
        }
    }

    /// Map the cursor onto a task index and start executing it.
    fn resolve_next(&mut self) {
        let len = self.tasks.len();
        let index = if self.reversed {
            len - 1 - self.cursor
        } else {
            self.cursor
        };
        self.cursor += 1;

        if self.last_index == Some(index) {
            trace!("queue {} skips task {}: just executed", self.id, index);
            return;
        }
        self.last_index = Some(index);
        self.executed_since_play += 1;

        let task = Rc::clone(&self.tasks[index]);
        trace!("queue {} resolved task {} ({:?})", self.id, index, task.kind);

        let dynamic = task.span.is_dynamic();
        let secs = if dynamic { 0.0 } else { task.span.measure() };
        if let Some(run) = self.run.as_mut() {
            run.active = Some(Active::new(task));
        }
        if dynamic {
            self.set_phase(Phase::Measure);
        } else {
            self.begin(secs);
        }
    }

    /// Enter the first suspension point of the active task, now that its span is known.
    pub(crate) fn begin(&mut self, secs: f64) {
        let (me, id, reversed) = (self.me.clone(), self.id, self.reversed);
        let Some(run) = self.run.as_mut() else {
            return;
        };
        let Some(active) = run.active.as_mut() else {
            run.phase = Phase::Next;
            return;
        };
        active.duration = secs;
        let kind = active.task.kind;

        match kind {
            TaskKind::OneShot if secs > 0.0 => {
                active.delayed = true;
                run.phase = Phase::Delay { remaining: secs };
            }
            TaskKind::OneShot => run.phase = Phase::Fire,
            TaskKind::Loop if secs == 0.0 => {
                trace!("queue {} skips zero-length loop", id);
                run.active = None;
                run.phase = Phase::Next;
            }
            TaskKind::Loop => {
                active.handler = Some(Handler::looped(me, id, secs, reversed));
                run.phase = Phase::Frame;
            }
        }
    }

    /// Book-keeping once a callback has returned.
    fn after_call(&mut self, handler: Option<Handler>) -> Flow {
        let Some(active) = self.active_mut() else {
            self.set_phase(Phase::Next);
            return Flow::Continue;
        };
        let kind = active.task.kind;
        let delayed = active.delayed;

        let mut handler = handler;
        if let Some(h) = handler.as_mut() {
            active.waits.extend(h.pending.drain(..));
        }
        let waiting = !active.waits.is_empty();

        match kind {
            TaskKind::OneShot => {
                if waiting {
                    self.set_phase(Phase::Drain);
                    return Flow::Yield;
                }
                self.finish_task();
                if delayed {
                    self.set_phase(Phase::Next);
                    Flow::Continue
                } else {
                    self.set_phase(Phase::Settle);
                    Flow::Yield
                }
            }
            TaskKind::Loop => {
                active.handler = handler;
                if waiting {
                    self.set_phase(Phase::Drain);
                    return Flow::Yield;
                }
                self.loop_continue(false, None)
            }
        }
    }

    /// Resolve trailing waits front to back.
    fn drain(&mut self, budget: &mut Budget) -> Flow {
        loop {
            let Some(active) = self.active_mut() else {
                self.set_phase(Phase::Next);
                return Flow::Continue;
            };
            match active.waits.front_mut() {
                None => break,
                Some(Wait::Delay(remaining)) => {
                    let Some(delta) = budget.take() else {
                        return Flow::Yield;
                    };
                    *remaining -= delta;
                    if *remaining > EPSILON {
                        return Flow::Yield;
                    }
                    active.waits.pop_front();
                }
                Some(Wait::Queue(child)) => {
                    if !child.is_completed() {
                        return Flow::Yield;
                    }
                    let child = child.clone();
                    active.waits.pop_front();
                    let still_waiting = active
                        .waits
                        .iter()
                        .any(|wait| matches!(wait, Wait::Queue(q) if q.ptr_eq(&child)));
                    if !still_waiting {
                        self.waiting_on.retain(|q| !q.ptr_eq(&child));
                    }
                    trace!("queue {} done waiting on queue {}", self.id, child.id());
                }
            }
        }

        let kind = self.active_mut().map(|active| active.task.kind);
        match kind {
            Some(TaskKind::Loop) => self.loop_continue(true, Some(budget)),
            _ => {
                self.finish_task();
                self.set_phase(Phase::Next);
                Flow::Continue
            }
        }
    }

    /// Decide whether the active loop runs another frame.
    ///
    /// After trailing waits the next frame runs in the same tick.
    fn loop_continue(&mut self, after_wait: bool, budget: Option<&mut Budget>) -> Flow {
        let done = self
            .active_mut()
            .and_then(|active| active.handler.as_ref())
            .map_or(true, |h| !h.is_looping() || h.reached_end());

        if done {
            self.finish_task();
            self.set_phase(Phase::Settle);
            return Flow::Yield;
        }

        self.set_phase(Phase::Frame);
        match budget {
            Some(budget) if after_wait => {
                budget.refund();
                Flow::Continue
            }
            _ => Flow::Yield,
        }
    }

    /// Count the active task and apply Consume.
    fn finish_task(&mut self) {
        let Some(active) = self.run.as_mut().and_then(|run| run.active.take()) else {
            return;
        };
        self.executed += 1;

        if self.consuming && !self.immutable {
            if let Some(pos) = self.tasks.iter().position(|t| Rc::ptr_eq(t, &active.task)) {
                // The cursor only moves back if the removed task sits in the
                // stretch it has already passed in the current direction.
                let len = self.tasks.len();
                let passed = if self.reversed {
                    pos >= len - self.cursor.min(len)
                } else {
                    pos < self.cursor
                };
                self.tasks.remove(pos);
                if passed {
                    self.cursor = self.cursor.saturating_sub(1);
                }
                self.last_index = None;
                trace!("queue {} consumed task {} ({} left)", self.id, pos, self.tasks.len());
            }
        }
    }

    /// The cursor ran off the end: bounce, repeat, or wind down.
    fn end_pass(&mut self, budget: &mut Budget) -> Flow {
        budget.passes += 1;
        let len = self.tasks.len();

        let bounce = self.yoyo && len > 0 && (self.executed_since_play <= len || self.repeating);
        if bounce {
            self.flip();
            debug!(
                "queue {} yoyo bounce, now {}",
                self.id,
                if self.reversed { "backward" } else { "forward" }
            );
        }

        if len > 0 && (bounce || self.repeating) {
            self.cursor = 0;
            self.last_index = None;
            if !bounce {
                debug!("queue {} repeats", self.id);
            }
            // A pass that never suspended gets a one-tick boundary.
            let phase = if budget.passes > 1 { Phase::Settle } else { Phase::Next };
            self.set_phase(phase);
            return Flow::Continue;
        }

        self.set_phase(Phase::Finish);
        Flow::Yield
    }
}

/// Marks a queue as ticking; cleared on drop, including during unwinding.
struct TickGuard<'a> {
    flag: &'a Cell<bool>,
}

impl<'a> TickGuard<'a> {
    fn enter(cell: &'a QueueCell) -> Result<Self, QueueError> {
        if cell.ticking.replace(true) {
            return Err(QueueError::Reentrant { id: cell.id });
        }
        Ok(Self {
            flag: &cell.ticking,
        })
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}

impl Queue {
    /// Advance the queue by `delta` seconds.
    ///
    /// Resumes the run until it suspends again. A fault raised by a callback
    /// through its handler does not stop the run; the first one is returned
    /// once the run suspends.
    pub fn tick(&self, delta: f64) -> Result<(), QueueError> {
        if !delta.is_finite() || delta < 0.0 {
            return Err(QueueError::InvalidDelta(delta));
        }
        let _guard = TickGuard::enter(&self.0)?;
        let mut budget = Budget::new(delta);
        let mut fault = None;

        loop {
            let step = self.0.state.borrow_mut().step(&mut budget);
            match step {
                Step::Yield => break,

                Step::Measure { task, generation } => {
                    let secs = task.span.measure();
                    let mut inner = self.0.state.borrow_mut();
                    if !inner.is_current(generation) {
                        break;
                    }
                    inner.begin(secs);
                }

                Step::Call {
                    task,
                    generation,
                    mut handler,
                } => {
                    task.invoke(handler.as_mut());
                    if let Some(err) = handler.as_mut().and_then(|h| h.fault.take()) {
                        fault.get_or_insert(err);
                    }

                    let flow = {
                        let mut inner = self.0.state.borrow_mut();
                        if inner.is_current(generation) {
                            inner.after_call(handler)
                        } else {
                            trace!("queue {} run replaced during callback", self.0.id);
                            Flow::Yield
                        }
                    };

                    if let Flow::Yield = flow {
                        break;
                    }
                }
            }
        }

        match fault {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
