//! Order status state machine
//!
//! Status IDs are stored in PostgreSQL as SMALLINT.
//!
//! ```text
//! NEW ──▶ PROCESSING ──▶ PROCESSED
//!  │           │
//!  └───────────┴──────▶ INVALID
//! ```
//!
//! PROCESSED and INVALID are terminal. NEW may jump straight to a terminal
//! status when the accrual service reports a final outcome before this system
//! ever observed PROCESSING.

use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

/// Order statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum OrderStatus {
    /// Submitted, not yet picked up by the accrual service
    New = 0,

    /// Accrual service is computing the reward
    Processing = 10,

    /// Terminal: accrual computed and credited
    Processed = 20,

    /// Terminal: accrual service rejected the order
    Invalid = -10,
}

impl OrderStatus {
    /// Status of a freshly submitted order
    #[inline]
    pub fn initial() -> Self {
        OrderStatus::New
    }

    /// Check if this is a terminal status (never re-queried)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Processed | OrderStatus::Invalid)
    }

    /// Whether `self -> next` is a legal forward move
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (New, Processing)
                | (New, Processed)
                | (New, Invalid)
                | (Processing, Processed)
                | (Processing, Invalid)
        )
    }

    /// Numeric status ID for PostgreSQL storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from PostgreSQL status ID
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(OrderStatus::New),
            10 => Some(OrderStatus::Processing),
            20 => Some(OrderStatus::Processed),
            -10 => Some(OrderStatus::Invalid),
            _ => None,
        }
    }

    /// IDs of the statuses the reconciler still polls
    pub fn non_terminal_ids() -> [i16; 2] {
        [OrderStatus::New.id(), OrderStatus::Processing.id()]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Processed => "PROCESSED",
            OrderStatus::Invalid => "INVALID",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for OrderStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        OrderStatus::from_id(value).ok_or(())
    }
}

/// What the accrual service knows about an order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccrualOutcome {
    /// Not final yet; `processing` is true once the service reported PROCESSING
    StillPending { processing: bool },
    /// Final: credit `amount` points
    Processed(Decimal),
    /// Final: no points
    Invalid,
}

impl AccrualOutcome {
    #[inline]
    pub fn is_final(&self) -> bool {
        !matches!(self, AccrualOutcome::StillPending { .. })
    }
}

/// Result of applying an accrual outcome to an order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Nothing to persist; poll again later
    Unchanged,
    /// Persist `status` and credit `credit` to the owner
    Advance { status: OrderStatus, credit: Decimal },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("Order is already in terminal status {0}")]
    Terminal(OrderStatus),

    #[error("Illegal status transition {from} -> {to}")]
    Illegal { from: OrderStatus, to: OrderStatus },

    #[error("Accrual amount must not be negative: {0}")]
    NegativeAccrual(Decimal),
}

/// Apply an accrual outcome to an order in status `current`
///
/// A terminal `current` is a logic error: the reconciler only polls
/// non-terminal orders, so seeing one here means the working set is stale or
/// the store is corrupt.
pub fn apply_accrual_outcome(
    current: OrderStatus,
    outcome: &AccrualOutcome,
) -> Result<Transition, TransitionError> {
    if current.is_terminal() {
        return Err(TransitionError::Terminal(current));
    }

    match outcome {
        AccrualOutcome::StillPending { .. } => Ok(Transition::Unchanged),
        AccrualOutcome::Processed(amount) => {
            if *amount < Decimal::ZERO {
                return Err(TransitionError::NegativeAccrual(*amount));
            }
            Ok(Transition::Advance {
                status: OrderStatus::Processed,
                credit: *amount,
            })
        }
        AccrualOutcome::Invalid => Ok(Transition::Advance {
            status: OrderStatus::Invalid,
            credit: Decimal::ZERO,
        }),
    }
}

/// Validate a status change the store is about to persist
pub fn check_transition(from: OrderStatus, to: OrderStatus) -> Result<(), TransitionError> {
    if from.is_terminal() {
        return Err(TransitionError::Terminal(from));
    }
    if !from.can_transition_to(to) {
        return Err(TransitionError::Illegal { from, to });
    }
    Ok(())
}
