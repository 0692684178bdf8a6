//! Reconciler state machine
//!
//! ```text
//!            Tick (orders > 0)
//!   Idle ─────────────────────────► PollingCycle{0}
//!    ▲                                  │    ▲
//!    │ OrderHandled (last)  RateLimited │    │ BackoffElapsed
//!    └──────────────────────────────────┤    │
//!                                       ▼    │
//!                                  Backoff{index, wait}
//! ```
//!
//! A rate limit pauses the whole cycle and resumes at the same order.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilerState {
    /// Waiting for the next tick
    Idle,
    /// Polling the order at `index` of the cycle's working set
    PollingCycle { index: usize },
    /// Upstream asked us to wait before polling `index` again
    Backoff { index: usize, wait: Duration },
}

impl ReconcilerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcilerState::Idle => "IDLE",
            ReconcilerState::PollingCycle { .. } => "POLLING_CYCLE",
            ReconcilerState::Backoff { .. } => "BACKOFF",
        }
    }
}

impl std::fmt::Display for ReconcilerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvent {
    /// Interval elapsed
    Tick,
    /// Current order finished: applied, skipped or failed
    OrderHandled,
    /// Upstream rate limit on the current order
    RateLimited(Duration),
    /// Backoff wait is over
    BackoffElapsed,
}

/// Next state for `event`, given a working set of `cycle_len` orders
///
/// Events that do not apply to `state` leave it unchanged.
pub fn next_state(state: ReconcilerState, event: PollEvent, cycle_len: usize) -> ReconcilerState {
    match (state, event) {
        (ReconcilerState::Idle, PollEvent::Tick) if cycle_len > 0 => {
            ReconcilerState::PollingCycle { index: 0 }
        }
        (ReconcilerState::PollingCycle { index }, PollEvent::OrderHandled) => {
            if index + 1 < cycle_len {
                ReconcilerState::PollingCycle { index: index + 1 }
            } else {
                ReconcilerState::Idle
            }
        }
        (ReconcilerState::PollingCycle { index }, PollEvent::RateLimited(wait)) => {
            ReconcilerState::Backoff { index, wait }
        }
        (ReconcilerState::Backoff { index, .. }, PollEvent::BackoffElapsed) => {
            ReconcilerState::PollingCycle { index }
        }
        (state, _) => state,
    }
}
