//! Queue errors

use futures::task::SpawnError;
use thiserror::Error;

/// Errors surfaced by ticking queues or driving the ticker.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("tick delta must be finite and non-negative, got {0}")]
    InvalidDelta(f64),

    #[error("queue {id} was ticked from inside its own tick")]
    Reentrant { id: u64 },

    #[error("ticker was ticked from inside its own tick")]
    TickerReentrant,

    #[error("queue {parent} cannot wait on queue {child}: the wait would close a cycle")]
    WaitCycle { parent: u64, child: u64 },

    #[error("queue {0} is no longer attached to a ticker")]
    Detached(u64),

    #[error("failed to spawn script: {0}")]
    Spawn(#[from] SpawnError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_cycle_message() {
        let err = QueueError::WaitCycle { parent: 3, child: 7 };
        let msg = err.to_string();
        assert!(msg.contains("queue 3"));
        assert!(msg.contains("queue 7"));
    }

    #[test]
    fn test_invalid_delta_message() {
        let msg = QueueError::InvalidDelta(-0.5).to_string();
        assert!(msg.contains("-0.5"));
    }
}
