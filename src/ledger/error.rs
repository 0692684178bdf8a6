//! Ledger Error Types

use rust_decimal::Decimal;
use thiserror::Error;

use super::UserId;
use crate::order::TransitionError;

/// Ledger store errors
///
/// Every variant is returned after the surrounding transaction has been rolled
/// back, so no partial credit or debit is ever observable.
#[derive(Debug, Error)]
pub enum LedgerError {
    // === Business Errors ===
    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("Withdrawal for order {0} already exists")]
    DuplicateWithdrawal(String),

    #[error("Login already taken: {0}")]
    LoginTaken(String),

    #[error("User not found: {0}")]
    UnknownUser(UserId),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    // === Invariant Violations ===
    #[error("Invalid order transition: {0}")]
    InvalidTransition(#[from] TransitionError),

    #[error("Order {number} belongs to user {actual}, not {expected}")]
    OwnerMismatch {
        number: String,
        expected: UserId,
        actual: UserId,
    },

    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    // === System Errors ===
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    /// Invariant violations point at a defect rather than bad input
    pub fn is_defect(&self) -> bool {
        matches!(
            self,
            LedgerError::InvalidTransition(_)
                | LedgerError::OwnerMismatch { .. }
                | LedgerError::CorruptRow(_)
        )
    }
}

pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

pub(crate) fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

pub(crate) fn is_check_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_check_violation())
}
