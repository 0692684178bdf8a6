//! Withdrawal Processor
//!
//! Validates a spend request and hands it to the ledger, which enforces the
//! non-negative balance inside the debit transaction.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::ledger::{LedgerError, LedgerStore, UserId};
use crate::order::{OrderNumber, OrderNumberError};

#[derive(Debug, Error)]
pub enum WithdrawError {
    #[error("Invalid order number: {0}")]
    InvalidOrderNumber(#[from] OrderNumberError),

    #[error("Withdrawal amount must be positive: {0}")]
    InvalidAmount(Decimal),

    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("Withdrawal for order {0} already exists")]
    DuplicateOrder(String),

    #[error("User not found: {0}")]
    UnknownUser(UserId),

    #[error("Ledger error: {0}")]
    Ledger(LedgerError),
}

impl From<LedgerError> for WithdrawError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientFunds => WithdrawError::InsufficientFunds,
            LedgerError::DuplicateWithdrawal(number) => WithdrawError::DuplicateOrder(number),
            LedgerError::InvalidAmount(sum) => WithdrawError::InvalidAmount(sum),
            LedgerError::UnknownUser(user) => WithdrawError::UnknownUser(user),
            other => WithdrawError::Ledger(other),
        }
    }
}

pub struct WithdrawalProcessor {
    ledger: Arc<dyn LedgerStore>,
}

impl WithdrawalProcessor {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }

    /// Debit `sum` points from `user` against the spend order `raw_number`
    pub async fn withdraw(
        &self,
        user: UserId,
        raw_number: &str,
        sum: Decimal,
    ) -> Result<(), WithdrawError> {
        let number = OrderNumber::parse(raw_number)?;
        if sum <= Decimal::ZERO {
            return Err(WithdrawError::InvalidAmount(sum));
        }

        match self
            .ledger
            .apply_withdrawal(user, &number, sum, Utc::now())
            .await
        {
            Ok(()) => {
                debug!(user, order = %number, sum = %sum, "Withdrawal committed");
                Ok(())
            }
            Err(LedgerError::InsufficientFunds) => {
                debug!(user, order = %number, sum = %sum, "Withdrawal refused: insufficient funds");
                Err(WithdrawError::InsufficientFunds)
            }
            Err(e) => {
                warn!(user, order = %number, error = %e, "Withdrawal failed");
                Err(e.into())
            }
        }
    }
}
