//! Accrual Client
//!
//! Translates the external accrual service into [`AccrualOutcome`]s.
//!
//! | Upstream response            | Reply                                   |
//! |------------------------------|-----------------------------------------|
//! | 200 `REGISTERED`             | `StillPending { processing: false }`    |
//! | 200 `PROCESSING`             | `StillPending { processing: true }`     |
//! | 200 `PROCESSED` + accrual    | `Processed(accrual)`                    |
//! | 200 `INVALID`                | `Invalid` (any accrual ignored)         |
//! | 204 / 404                    | `StillPending { processing: false }`    |
//! | 429                          | `RetryAfter(Retry-After or 60s)`        |
//! | 5xx, transport failure       | [`AccrualError::Unavailable`]           |

pub mod client;
pub mod error;

pub use client::{DEFAULT_RETRY_AFTER, HttpAccrualClient, MIN_RETRY_AFTER};
pub use error::AccrualError;

use async_trait::async_trait;
use std::time::Duration;

use crate::order::{AccrualOutcome, OrderNumber};

/// Reply from one accrual lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccrualReply {
    Outcome(AccrualOutcome),
    /// Upstream rate limit: wait this long before the next call
    RetryAfter(Duration),
}

/// Source of accrual outcomes
///
/// Implementations must not retry internally; rate limits are reported as
/// [`AccrualReply::RetryAfter`] so the reconciler can pause the whole cycle.
#[async_trait]
pub trait AccrualSource: Send + Sync {
    async fn fetch_outcome(&self, number: &OrderNumber) -> Result<AccrualReply, AccrualError>;
}
