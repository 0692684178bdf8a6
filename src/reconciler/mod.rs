//! Reconciler
//!
//! Background task that drives non-terminal orders to a final status:
//! 1. On each tick, load `orders_in_non_terminal_status()` once
//! 2. Ask the accrual service about each order, in that order
//! 3. Apply final outcomes immediately, each in its own ledger transaction
//! 4. On a rate limit, pause the whole cycle and retry the same order
//!
//! Every suspension point (tick wait, backoff sleep, accrual call) also
//! waits on the shared [`CancellationToken`].

pub mod error;
pub mod state;

pub use error::ReconcilerError;
pub use state::{PollEvent, ReconcilerState, next_state};

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::accrual::{AccrualReply, AccrualSource};
use crate::ledger::{LedgerStore, Order};
use crate::order::{AccrualOutcome, OrderStatus, Transition, apply_accrual_outcome};

/// Reconciler timing
#[derive(Debug, Clone, Copy)]
pub struct ReconcilerConfig {
    poll_interval: Duration,
    request_timeout: Duration,
}

impl ReconcilerConfig {
    /// Both durations must be non-zero
    pub fn new(
        poll_interval: Duration,
        request_timeout: Duration,
    ) -> Result<Self, ReconcilerError> {
        if poll_interval.is_zero() {
            return Err(ReconcilerError::ZeroInterval);
        }
        if request_timeout.is_zero() {
            return Err(ReconcilerError::ZeroTimeout);
        }
        Ok(Self {
            poll_interval,
            request_timeout,
        })
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

/// What one polling cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Accrual calls made (a rate-limited order counts once per call)
    pub polled: usize,
    /// Final outcomes committed to the ledger
    pub applied: usize,
    /// Orders moved NEW -> PROCESSING
    pub marked_processing: usize,
    /// Orders left unchanged this cycle
    pub skipped: usize,
    pub backoffs: usize,
    /// The cycle stopped early on shutdown
    pub cancelled: bool,
}

enum PollResult {
    Handled,
    RateLimited(Duration),
    Cancelled,
}

pub struct Reconciler {
    ledger: Arc<dyn LedgerStore>,
    accrual: Arc<dyn AccrualSource>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        accrual: Arc<dyn AccrualSource>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            ledger,
            accrual,
            config,
        }
    }

    /// Run until `shutdown` is cancelled
    ///
    /// A failed cycle is logged and retried on the next tick.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            request_timeout_ms = self.config.request_timeout.as_millis() as u64,
            "Reconciler started"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.run_cycle(&shutdown).await {
                Ok(report) => {
                    if report.polled > 0 {
                        info!(
                            polled = report.polled,
                            applied = report.applied,
                            marked_processing = report.marked_processing,
                            skipped = report.skipped,
                            backoffs = report.backoffs,
                            "Reconciliation cycle finished"
                        );
                    }
                    if report.cancelled {
                        break;
                    }
                }
                Err(e) => error!(error = %e, "Reconciliation cycle failed"),
            }
        }

        info!("Reconciler stopped");
    }

    /// Run one polling cycle over the current non-terminal orders
    pub async fn run_cycle(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<CycleReport, ReconcilerError> {
        let orders = self.ledger.orders_in_non_terminal_status().await?;
        let mut report = CycleReport::default();

        let mut state = next_state(ReconcilerState::Idle, PollEvent::Tick, orders.len());
        if state != ReconcilerState::Idle {
            debug!(orders = orders.len(), "Polling cycle started");
        }

        loop {
            let event = match state {
                ReconcilerState::Idle => break,
                ReconcilerState::PollingCycle { index } => {
                    let Some(order) = orders.get(index) else {
                        break;
                    };
                    match self.poll_order(order, shutdown, &mut report).await {
                        PollResult::Handled => PollEvent::OrderHandled,
                        PollResult::RateLimited(wait) => PollEvent::RateLimited(wait),
                        PollResult::Cancelled => {
                            report.cancelled = true;
                            break;
                        }
                    }
                }
                ReconcilerState::Backoff { index, wait } => {
                    report.backoffs += 1;
                    info!(index, wait_secs = wait.as_secs(), "Backing off after rate limit");
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => {
                            report.cancelled = true;
                            break;
                        }
                        _ = tokio::time::sleep(wait) => PollEvent::BackoffElapsed,
                    }
                }
            };
            state = next_state(state, event, orders.len());
        }

        Ok(report)
    }

    async fn poll_order(
        &self,
        order: &Order,
        shutdown: &CancellationToken,
        report: &mut CycleReport,
    ) -> PollResult {
        report.polled += 1;

        let reply = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return PollResult::Cancelled,
            reply = tokio::time::timeout(
                self.config.request_timeout,
                self.accrual.fetch_outcome(&order.number),
            ) => reply,
        };

        let reply = match reply {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                warn!(number = %order.number, code = e.code(), error = %e, "Accrual lookup failed, skipping");
                report.skipped += 1;
                return PollResult::Handled;
            }
            Err(_) => {
                warn!(number = %order.number, "Accrual lookup timed out, skipping");
                report.skipped += 1;
                return PollResult::Handled;
            }
        };

        match reply {
            AccrualReply::RetryAfter(wait) => PollResult::RateLimited(wait),
            AccrualReply::Outcome(outcome) => {
                self.apply_outcome(order, &outcome, report).await;
                PollResult::Handled
            }
        }
    }

    async fn apply_outcome(
        &self,
        order: &Order,
        outcome: &AccrualOutcome,
        report: &mut CycleReport,
    ) {
        let transition = match apply_accrual_outcome(order.status, outcome) {
            Ok(t) => t,
            Err(e) => {
                error!(number = %order.number, status = %order.status, error = %e, "Rejected accrual outcome");
                report.skipped += 1;
                return;
            }
        };

        match transition {
            Transition::Unchanged => {
                if matches!(outcome, AccrualOutcome::StillPending { processing: true })
                    && order.status == OrderStatus::New
                {
                    match self.ledger.mark_processing(&order.number).await {
                        Ok(true) => {
                            debug!(number = %order.number, "Order marked PROCESSING");
                            report.marked_processing += 1;
                        }
                        Ok(false) => {}
                        Err(e) => warn!(number = %order.number, error = %e, "Failed to mark order PROCESSING"),
                    }
                }
                report.skipped += 1;
            }
            Transition::Advance { status, credit } => {
                match self
                    .ledger
                    .apply_order_outcome(&order.number, status, credit, order.owner_user_id)
                    .await
                {
                    Ok(()) => report.applied += 1,
                    Err(e) if e.is_defect() => {
                        error!(number = %order.number, error = %e, "Ledger rejected order outcome");
                        report.skipped += 1;
                    }
                    Err(e) => {
                        warn!(number = %order.number, error = %e, "Failed to apply order outcome, will retry");
                        report.skipped += 1;
                    }
                }
            }
        }
    }
}
