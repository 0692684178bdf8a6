//! Loyalty Service
//!
//! Typed entry points for the request layer. Each error carries a stable
//! string code and a suggested HTTP status so a router can map it without
//! matching on internals.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::ledger::{
    BalanceSnapshot, CreateOrderResult, LedgerError, LedgerStore, Order, UserId, Withdrawal,
};
use crate::order::{OrderNumber, OrderNumberError};
use crate::withdrawal::{WithdrawError, WithdrawalProcessor};

/// Successful order submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// New order, queued for accrual
    Accepted,
    /// The caller already submitted this number
    AlreadySubmitted,
}

impl SubmitOutcome {
    pub fn http_status(&self) -> u16 {
        match self {
            SubmitOutcome::Accepted => 202,
            SubmitOutcome::AlreadySubmitted => 200,
        }
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid order number: {0}")]
    InvalidOrderNumber(#[from] OrderNumberError),

    #[error("Order {0} was submitted by another user")]
    OrderOwnedByAnotherUser(String),

    #[error("Login must not be empty")]
    InvalidLogin,

    #[error("Login already taken: {0}")]
    LoginTaken(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("Withdrawal for order {0} already exists")]
    DuplicateWithdrawal(String),

    #[error("User not found: {0}")]
    UnknownUser(UserId),

    #[error("Storage error: {0}")]
    Storage(LedgerError),
}

impl ServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::InvalidOrderNumber(_) => "INVALID_ORDER_NUMBER",
            ServiceError::OrderOwnedByAnotherUser(_) => "ORDER_OWNED_BY_ANOTHER_USER",
            ServiceError::InvalidLogin => "INVALID_LOGIN",
            ServiceError::LoginTaken(_) => "LOGIN_TAKEN",
            ServiceError::InvalidAmount(_) => "INVALID_AMOUNT",
            ServiceError::InsufficientFunds => "INSUFFICIENT_FUNDS",
            ServiceError::DuplicateWithdrawal(_) => "DUPLICATE_WITHDRAWAL",
            ServiceError::UnknownUser(_) => "UNKNOWN_USER",
            ServiceError::Storage(_) => "STORAGE_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            ServiceError::InvalidLogin | ServiceError::InvalidAmount(_) => 400,
            ServiceError::InsufficientFunds => 402,
            ServiceError::UnknownUser(_) => 404,
            ServiceError::OrderOwnedByAnotherUser(_)
            | ServiceError::LoginTaken(_)
            | ServiceError::DuplicateWithdrawal(_) => 409,
            ServiceError::InvalidOrderNumber(_) => 422,
            ServiceError::Storage(_) => 500,
        }
    }
}

impl From<LedgerError> for ServiceError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientFunds => ServiceError::InsufficientFunds,
            LedgerError::DuplicateWithdrawal(number) => ServiceError::DuplicateWithdrawal(number),
            LedgerError::LoginTaken(login) => ServiceError::LoginTaken(login),
            LedgerError::UnknownUser(user) => ServiceError::UnknownUser(user),
            LedgerError::InvalidAmount(sum) => ServiceError::InvalidAmount(sum),
            other => ServiceError::Storage(other),
        }
    }
}

impl From<WithdrawError> for ServiceError {
    fn from(e: WithdrawError) -> Self {
        match e {
            WithdrawError::InvalidOrderNumber(e) => ServiceError::InvalidOrderNumber(e),
            WithdrawError::InvalidAmount(sum) => ServiceError::InvalidAmount(sum),
            WithdrawError::InsufficientFunds => ServiceError::InsufficientFunds,
            WithdrawError::DuplicateOrder(number) => ServiceError::DuplicateWithdrawal(number),
            WithdrawError::UnknownUser(user) => ServiceError::UnknownUser(user),
            WithdrawError::Ledger(e) => ServiceError::Storage(e),
        }
    }
}

pub struct LoyaltyService {
    ledger: Arc<dyn LedgerStore>,
    withdrawals: WithdrawalProcessor,
}

impl LoyaltyService {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self {
            withdrawals: WithdrawalProcessor::new(ledger.clone()),
            ledger,
        }
    }

    /// Create a user with a zero balance
    ///
    /// `password_hash` is stored as given; hashing belongs to the auth layer.
    pub async fn register_user(
        &self,
        login: &str,
        password_hash: &str,
    ) -> Result<UserId, ServiceError> {
        let login = login.trim();
        if login.is_empty() {
            return Err(ServiceError::InvalidLogin);
        }
        Ok(self.ledger.create_user(login, password_hash).await?)
    }

    pub async fn submit_order(
        &self,
        user: UserId,
        raw_number: &str,
    ) -> Result<SubmitOutcome, ServiceError> {
        let number = OrderNumber::parse(raw_number)?;

        match self.ledger.create_order(&number, user, Utc::now()).await? {
            CreateOrderResult::Created => {
                info!(user, number = %number, "Order accepted");
                Ok(SubmitOutcome::Accepted)
            }
            CreateOrderResult::AlreadyOwnedByCaller => Ok(SubmitOutcome::AlreadySubmitted),
            CreateOrderResult::OwnedByAnotherUser => {
                warn!(user, number = %number, "Order already submitted by another user");
                Err(ServiceError::OrderOwnedByAnotherUser(number.into_string()))
            }
        }
    }

    pub async fn list_orders(&self, user: UserId) -> Result<Vec<Order>, ServiceError> {
        Ok(self.ledger.orders_for_user(user).await?)
    }

    pub async fn get_balance(&self, user: UserId) -> Result<BalanceSnapshot, ServiceError> {
        Ok(self.ledger.get_balance(user).await?)
    }

    pub async fn withdraw(
        &self,
        user: UserId,
        raw_number: &str,
        sum: Decimal,
    ) -> Result<(), ServiceError> {
        Ok(self.withdrawals.withdraw(user, raw_number, sum).await?)
    }

    pub async fn list_withdrawals(&self, user: UserId) -> Result<Vec<Withdrawal>, ServiceError> {
        Ok(self.ledger.withdrawals_for_user(user).await?)
    }
}
