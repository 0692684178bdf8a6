//! Ledger Store
//!
//! Durable record of users, orders, balances and withdrawals.
//!
//! # Invariants
//!
//! 1. **Single credit**: an order reaches PROCESSED in the same transaction
//!    that credits its owner, so neither is ever visible without the other
//! 2. **Non-negative balance**: a debit that would leave `current < 0` rolls
//!    back and fails with [`LedgerError::InsufficientFunds`]
//! 3. **Forward-only status**: every status write is checked against
//!    [`check_transition`](crate::order::check_transition) under a row lock
//!
//! Two backends implement [`LedgerStore`]:
//! - [`PgLedger`] - PostgreSQL, used by the daemon
//! - [`MemoryLedger`] - in-process, same transactional semantics

pub mod error;
pub mod memory;
pub mod pg;

pub use error::LedgerError;
pub use memory::MemoryLedger;
pub use pg::PgLedger;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::order::{OrderNumber, OrderStatus};

pub type UserId = i64;

/// Persisted order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Order {
    pub number: OrderNumber,
    #[serde(skip)]
    pub owner_user_id: UserId,
    pub status: OrderStatus,
    /// Present only once PROCESSED
    #[serde(
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub accrual: Option<Decimal>,
    pub uploaded_at: DateTime<Utc>,
}

/// Balance view: `withdrawn` is aggregated from withdrawal rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BalanceSnapshot {
    #[serde(with = "rust_decimal::serde::float")]
    pub current: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub withdrawn: Decimal,
}

/// Persisted withdrawal (immutable)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Withdrawal {
    #[serde(rename = "order")]
    pub order_number: OrderNumber,
    #[serde(skip)]
    pub user_id: UserId,
    #[serde(with = "rust_decimal::serde::float")]
    pub sum: Decimal,
    pub processed_at: DateTime<Utc>,
}

/// Outcome of [`LedgerStore::create_order`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOrderResult {
    /// New row in status NEW
    Created,
    /// Same owner submitted it before; nothing written
    AlreadyOwnedByCaller,
    /// Another user owns this number; nothing written
    OwnedByAnotherUser,
}

/// Transactional ledger operations
///
/// Every method is atomic: it either fully applies or has no effect.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Create a user together with its zero balance row
    async fn create_user(&self, login: &str, password_hash: &str) -> Result<UserId, LedgerError>;

    /// Insert an order in status NEW, or report who already owns the number
    async fn create_order(
        &self,
        number: &OrderNumber,
        owner: UserId,
        uploaded_at: DateTime<Utc>,
    ) -> Result<CreateOrderResult, LedgerError>;

    /// All NEW/PROCESSING orders, oldest first
    async fn orders_in_non_terminal_status(&self) -> Result<Vec<Order>, LedgerError>;

    /// CAS NEW -> PROCESSING; false if the order was not NEW
    async fn mark_processing(&self, number: &OrderNumber) -> Result<bool, LedgerError>;

    /// Persist a status change and credit the owner in one transaction
    async fn apply_order_outcome(
        &self,
        number: &OrderNumber,
        new_status: OrderStatus,
        credit: Decimal,
        owner: UserId,
    ) -> Result<(), LedgerError>;

    async fn get_balance(&self, user: UserId) -> Result<BalanceSnapshot, LedgerError>;

    /// Record a withdrawal and debit the balance in one transaction
    async fn apply_withdrawal(
        &self,
        user: UserId,
        order_number: &OrderNumber,
        sum: Decimal,
        processed_at: DateTime<Utc>,
    ) -> Result<(), LedgerError>;

    /// A user's orders, oldest first
    async fn orders_for_user(&self, user: UserId) -> Result<Vec<Order>, LedgerError>;

    /// A user's withdrawals, oldest first
    async fn withdrawals_for_user(&self, user: UserId) -> Result<Vec<Withdrawal>, LedgerError>;
}

/// Argument checks shared by both backends for `apply_order_outcome`
///
/// Only PROCESSED may carry a credit, and never a negative one.
pub(crate) fn check_credit(new_status: OrderStatus, credit: Decimal) -> Result<(), LedgerError> {
    if credit < Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(credit));
    }
    if credit > Decimal::ZERO && new_status != OrderStatus::Processed {
        return Err(LedgerError::InvalidAmount(credit));
    }
    Ok(())
}

/// Accrual exposed on [`Order`]: only PROCESSED orders report one
pub(crate) fn visible_accrual(status: OrderStatus, stored: Decimal) -> Option<Decimal> {
    (status == OrderStatus::Processed).then_some(stored)
}
