//! Rust Timing Queue
//!
//! A tick-driven scheduler for sequences of timed work:
//! - One-shot callbacks after a delay, and per-tick loop callbacks over a duration
//! - Loop timelines with a completion fraction and a tick-synchronized delta
//! - Playback control: pause, stop, reverse, repeat, consume, yoyo
//! - Queues that wait on other queues, with stop/reset propagating down
//! - A ticker for offline stepping or realtime pacing (spin_sleep)

pub mod task;
pub mod handler;
pub mod queue;
mod execution;
pub mod ticker;
pub mod registry;
pub mod ease;
pub mod error;


pub use error::QueueError;
pub use handler::Handler;
pub use queue::{Completion, Queue};
pub use registry::QueueRegistry;
pub use task::{Callback, Span, Task, TaskKind};
pub use ticker::{Ticker, TickerConfig};
