//! Loyalty Ledger - order accrual reconciliation and points ledger
//!
//! Users submit order numbers; a background reconciler asks the external
//! accrual service for each order's outcome and credits the owner's points;
//! users spend points through withdrawals.
//!
//! # Modules
//!
//! - [`order`] - Luhn-validated order numbers and the status state machine
//! - [`ledger`] - Transactional store for users, orders, balances, withdrawals
//! - [`accrual`] - Client for the external accrual service
//! - [`reconciler`] - Background poller driving orders to a final status
//! - [`withdrawal`] - Validated point debits
//! - [`service`] - Typed entry points for the request layer
//! - [`db`] - PostgreSQL pool and schema bootstrap
//! - [`config`] - Layered configuration
//! - [`logging`] - tracing subscriber setup

// Pure logic - must be first!
pub mod order;

// Storage
pub mod db;
pub mod ledger;

// Background reconciliation
pub mod accrual;
pub mod reconciler;

// Request-side operations
pub mod service;
pub mod withdrawal;

// Ambient
pub mod config;
pub mod logging;

// Convenient re-exports at crate root
pub use accrual::{AccrualError, AccrualReply, AccrualSource, HttpAccrualClient};
pub use ledger::{
    BalanceSnapshot, CreateOrderResult, LedgerError, LedgerStore, MemoryLedger, Order, PgLedger,
    UserId, Withdrawal,
};
pub use order::{AccrualOutcome, OrderNumber, OrderStatus};
pub use reconciler::{CycleReport, Reconciler, ReconcilerConfig, ReconcilerError};
pub use service::{LoyaltyService, ServiceError, SubmitOutcome};
pub use withdrawal::{WithdrawError, WithdrawalProcessor};
