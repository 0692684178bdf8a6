//! Order state machine
//!
//! Pure logic, no I/O:
//! - [`OrderNumber`] - Luhn-validated order number
//! - [`OrderStatus`] - status enum with storage IDs and legal transitions
//! - [`apply_accrual_outcome`] - maps an accrual outcome to a transition

pub mod number;
pub mod state;

pub use number::{OrderNumber, OrderNumberError, is_valid_luhn};
pub use state::{
    AccrualOutcome, OrderStatus, Transition, TransitionError, apply_accrual_outcome,
    check_transition,
};
