use thiserror::Error;

use crate::ledger::LedgerError;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("Poll interval must be greater than zero")]
    ZeroInterval,

    #[error("Accrual request timeout must be greater than zero")]
    ZeroTimeout,

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}
