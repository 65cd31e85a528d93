//! Driver state types.

use crate::segment::Segment;
use std::fmt;

/// Lifecycle state of the continuous restore driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Constructed, not yet started.
    Created,
    /// Prefetcher and applier running.
    Running,
    /// Shutdown signaled, draining.
    ShuttingDown,
    /// Both tasks joined.
    Stopped,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DriverState::Created => "Created",
            DriverState::Running => "Running",
            DriverState::ShuttingDown => "ShuttingDown",
            DriverState::Stopped => "Stopped",
        };
        write!(f, "{}", s)
    }
}

/// What the prefetcher pushes onto the pipeline channel.
#[derive(Debug)]
pub enum Fetched {
    /// A loaded segment ready to apply.
    Segment(Box<Segment>),
    /// The store holds nothing past the cursor right now.
    CaughtUp,
    /// Listing or loading failed; the applier owns the backoff.
    Error,
}

/// Why the applier task exited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverExit {
    /// The shared cancellation flag was raised.
    Cancelled,
    /// The pipeline channel closed (prefetcher gone).
    ChannelClosed,
    /// A non-retryable error (invariant violation) terminated the pipeline.
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(DriverState::Created.to_string(), "Created");
        assert_eq!(DriverState::Running.to_string(), "Running");
        assert_eq!(DriverState::ShuttingDown.to_string(), "ShuttingDown");
        assert_eq!(DriverState::Stopped.to_string(), "Stopped");
    }

    #[test]
    fn test_exit_equality() {
        assert_eq!(DriverExit::Cancelled, DriverExit::Cancelled);
        assert_ne!(DriverExit::Cancelled, DriverExit::ChannelClosed);
        assert_eq!(
            DriverExit::Failed("x".into()),
            DriverExit::Failed("x".into())
        );
    }
}
