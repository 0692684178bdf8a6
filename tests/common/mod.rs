//! Shared test doubles for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use loyalty_ledger::accrual::{AccrualError, AccrualReply, AccrualSource};
use loyalty_ledger::order::{AccrualOutcome, OrderNumber};

pub type Scripted = Result<AccrualReply, AccrualError>;

/// Accrual source that plays back a script per order
///
/// Once an order's script is exhausted it keeps answering REGISTERED.
#[derive(Default)]
pub struct ScriptedAccrual {
    scripts: Mutex<HashMap<OrderNumber, VecDeque<Scripted>>>,
    calls: Mutex<Vec<(OrderNumber, Instant)>>,
}

impl ScriptedAccrual {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, number: &OrderNumber, replies: Vec<Scripted>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(number.clone(), replies.into());
    }

    pub fn calls(&self) -> Vec<(OrderNumber, Instant)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl AccrualSource for ScriptedAccrual {
    async fn fetch_outcome(&self, number: &OrderNumber) -> Result<AccrualReply, AccrualError> {
        self.calls
            .lock()
            .unwrap()
            .push((number.clone(), Instant::now()));
        self.scripts
            .lock()
            .unwrap()
            .get_mut(number)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(AccrualReply::Outcome(AccrualOutcome::StillPending {
                processing: false,
            })))
    }
}

pub fn number(raw: &str) -> OrderNumber {
    OrderNumber::parse(raw).unwrap()
}

pub fn processed(points: i64) -> Scripted {
    Ok(AccrualReply::Outcome(AccrualOutcome::Processed(
        Decimal::new(points, 0),
    )))
}

pub fn processing() -> Scripted {
    Ok(AccrualReply::Outcome(AccrualOutcome::StillPending {
        processing: true,
    }))
}

pub fn rejected() -> Scripted {
    Ok(AccrualReply::Outcome(AccrualOutcome::Invalid))
}

pub fn retry_after(secs: u64) -> Scripted {
    Ok(AccrualReply::RetryAfter(Duration::from_secs(secs)))
}

pub fn points(value: i64) -> Decimal {
    Decimal::new(value, 0)
}
