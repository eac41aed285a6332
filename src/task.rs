//! Tasks - the units of work held by a queue
//!
//! A task is either a one-shot (wait, then call once) or a loop (call once per
//! tick for a duration). Its content never changes after it is appended.

use crate::handler::Handler;
use std::cell::RefCell;
use std::fmt;

/// Whether a task fires once or every tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskKind {
    OneShot,
    Loop,
}

/// How long a task waits (one-shot) or runs (loop), in seconds.
///
/// Negative loop spans run until the callback ends the loop.
pub enum Span {
    Fixed(f64),
    /// Re-evaluated every time the task executes.
    Dynamic(RefCell<Box<dyn FnMut() -> f64>>),
}

impl Span {
    /// A span computed when the task starts executing.
    pub fn dynamic(f: impl FnMut() -> f64 + 'static) -> Self {
        Span::Dynamic(RefCell::new(Box::new(f)))
    }

    /// An infinite loop span.
    pub fn forever() -> Self {
        Span::Fixed(-1.0)
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Span::Dynamic(_))
    }

    /// Resolve the span to seconds. NaN counts as zero.
    pub fn measure(&self) -> f64 {
        let secs = match self {
            Span::Fixed(secs) => *secs,
            Span::Dynamic(f) => (f.borrow_mut())(),
        };
        if secs.is_nan() {
            0.0
        } else {
            secs
        }
    }
}

impl From<f64> for Span {
    fn from(secs: f64) -> Self {
        Span::Fixed(secs)
    }
}

impl From<std::time::Duration> for Span {
    fn from(d: std::time::Duration) -> Self {
        Span::Fixed(d.as_secs_f64())
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Span::Fixed(secs) => write!(f, "Fixed({})", secs),
            Span::Dynamic(_) => write!(f, "Dynamic"),
        }
    }
}

/// The callback of a task, chosen once when the task is built.
pub enum Callback {
    /// A pure delay.
    None,
    Plain(Box<dyn FnMut()>),
    WithHandler(Box<dyn FnMut(&mut Handler)>),
}

/// A scheduled unit of work.
pub struct Task {
    pub kind: TaskKind,
    pub span: Span,
    callback: RefCell<Callback>,
}

impl Task {
    pub fn one_shot(span: Span, callback: Callback) -> Self {
        Self {
            kind: TaskKind::OneShot,
            span,
            callback: RefCell::new(callback),
        }
    }

    /// Loops always receive a handler.
    pub fn looped(span: Span, f: impl FnMut(&mut Handler) + 'static) -> Self {
        Self {
            kind: TaskKind::Loop,
            span,
            callback: RefCell::new(Callback::WithHandler(Box::new(f))),
        }
    }

    pub fn wants_handler(&self) -> bool {
        matches!(*self.callback.borrow(), Callback::WithHandler(_))
    }

    /// Run the callback. Must be called without any queue borrowed, since the
    /// callback is free to drive its own queue.
    pub(crate) fn invoke(&self, handler: Option<&mut Handler>) {
        let mut callback = self.callback.borrow_mut();
        match (&mut *callback, handler) {
            (Callback::Plain(f), _) => f(),
            (Callback::WithHandler(f), Some(h)) => f(h),
            (Callback::WithHandler(_), None) | (Callback::None, _) => {}
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("kind", &self.kind)
            .field("span", &self.span)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_fixed_span() {
        assert_eq!(Span::from(1.5).measure(), 1.5);
        assert_eq!(Span::from(f64::NAN).measure(), 0.0);
        assert!(Span::forever().measure() < 0.0);
    }

    #[test]
    fn test_dynamic_span_reevaluates() {
        let n = Rc::new(Cell::new(0.0));
        let n2 = n.clone();
        let span = Span::dynamic(move || {
            n2.set(n2.get() + 1.0);
            n2.get()
        });
        assert!(span.is_dynamic());
        assert_eq!(span.measure(), 1.0);
        assert_eq!(span.measure(), 2.0);
        assert_eq!(n.get(), 2.0);
    }

    #[test]
    fn test_plain_callback_ignores_handler() {
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        let task = Task::one_shot(0.0.into(), Callback::Plain(Box::new(move || h.set(h.get() + 1))));
        assert!(!task.wants_handler());
        task.invoke(None);
        task.invoke(None);
        assert_eq!(hits.get(), 2);
    }
}
