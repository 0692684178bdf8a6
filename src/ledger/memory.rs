//! In-process Ledger Store
//!
//! Same contract as [`PgLedger`](super::PgLedger) without a database. Writes
//! run against a cloned draft of the state, and the draft replaces the
//! committed state only when the closure returns `Ok`. A failed or panicking
//! write therefore leaves the committed state untouched.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

use super::{
    BalanceSnapshot, CreateOrderResult, LedgerError, LedgerStore, Order, UserId, Withdrawal,
    check_credit, visible_accrual,
};
use crate::order::{OrderNumber, OrderStatus, check_transition};

#[derive(Debug, Clone)]
struct StoredOrder {
    number: OrderNumber,
    owner: UserId,
    status: OrderStatus,
    accrual: Decimal,
    uploaded_at: DateTime<Utc>,
}

impl StoredOrder {
    fn to_order(&self) -> Order {
        Order {
            number: self.number.clone(),
            owner_user_id: self.owner,
            status: self.status,
            accrual: visible_accrual(self.status, self.accrual),
            uploaded_at: self.uploaded_at,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    next_user_id: UserId,
    logins: HashMap<String, UserId>,
    balances: HashMap<UserId, Decimal>,
    orders: HashMap<OrderNumber, StoredOrder>,
    withdrawals: Vec<Withdrawal>,
    withdrawal_numbers: HashSet<OrderNumber>,
}

impl MemoryState {
    fn require_user(&self, user: UserId) -> Result<(), LedgerError> {
        if self.balances.contains_key(&user) {
            Ok(())
        } else {
            Err(LedgerError::UnknownUser(user))
        }
    }

    fn sorted_orders<F>(&self, filter: F) -> Vec<Order>
    where
        F: Fn(&StoredOrder) -> bool,
    {
        let mut orders: Vec<Order> = self
            .orders
            .values()
            .filter(|o| filter(*o))
            .map(StoredOrder::to_order)
            .collect();
        orders.sort_by(|a, b| {
            a.uploaded_at
                .cmp(&b.uploaded_at)
                .then_with(|| a.number.cmp(&b.number))
        });
        orders
    }
}

/// In-process ledger
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<MemoryState>,
    fail_next_credit: AtomicBool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a one-shot fault: the next credit inside `apply_order_outcome`
    /// fails after the order row has been updated in the draft
    pub fn fail_next_credit(&self) {
        self.fail_next_credit.store(true, Ordering::SeqCst);
    }

    /// Committed state only ever changes by whole-draft replacement, so a
    /// poisoned lock still guards a consistent state
    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read<T>(&self, f: impl FnOnce(&MemoryState) -> T) -> T {
        f(&self.lock())
    }

    /// Scoped transaction: commit on `Ok`, discard the draft otherwise
    fn transaction<T>(
        &self,
        f: impl FnOnce(&mut MemoryState) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let mut committed = self.lock();
        let mut draft = committed.clone();
        let value = f(&mut draft)?;
        *committed = draft;
        Ok(value)
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn create_user(&self, login: &str, _password_hash: &str) -> Result<UserId, LedgerError> {
        let user_id = self.transaction(|state| {
            if state.logins.contains_key(login) {
                return Err(LedgerError::LoginTaken(login.to_string()));
            }
            state.next_user_id += 1;
            let user_id = state.next_user_id;
            state.logins.insert(login.to_string(), user_id);
            state.balances.insert(user_id, Decimal::ZERO);
            Ok(user_id)
        })?;

        info!(user_id, login, "User registered with zero balance");
        Ok(user_id)
    }

    async fn create_order(
        &self,
        number: &OrderNumber,
        owner: UserId,
        uploaded_at: DateTime<Utc>,
    ) -> Result<CreateOrderResult, LedgerError> {
        self.transaction(|state| {
            state.require_user(owner)?;

            if let Some(existing) = state.orders.get(number) {
                return Ok(if existing.owner == owner {
                    CreateOrderResult::AlreadyOwnedByCaller
                } else {
                    CreateOrderResult::OwnedByAnotherUser
                });
            }

            state.orders.insert(
                number.clone(),
                StoredOrder {
                    number: number.clone(),
                    owner,
                    status: OrderStatus::initial(),
                    accrual: Decimal::ZERO,
                    uploaded_at,
                },
            );
            debug!(number = %number, owner, "Order created");
            Ok(CreateOrderResult::Created)
        })
    }

    async fn orders_in_non_terminal_status(&self) -> Result<Vec<Order>, LedgerError> {
        Ok(self.read(|state| state.sorted_orders(|o| !o.status.is_terminal())))
    }

    async fn mark_processing(&self, number: &OrderNumber) -> Result<bool, LedgerError> {
        self.transaction(|state| match state.orders.get_mut(number) {
            Some(order) if order.status == OrderStatus::New => {
                order.status = OrderStatus::Processing;
                Ok(true)
            }
            _ => Ok(false),
        })
    }

    async fn apply_order_outcome(
        &self,
        number: &OrderNumber,
        new_status: OrderStatus,
        credit: Decimal,
        owner: UserId,
    ) -> Result<(), LedgerError> {
        check_credit(new_status, credit)?;

        let from = self.transaction(|state| {
            let order = state
                .orders
                .get_mut(number)
                .ok_or_else(|| LedgerError::OrderNotFound(number.to_string()))?;

            if order.owner != owner {
                return Err(LedgerError::OwnerMismatch {
                    number: number.to_string(),
                    expected: owner,
                    actual: order.owner,
                });
            }

            let from = order.status;
            check_transition(from, new_status)?;
            order.status = new_status;
            order.accrual = credit;

            if credit > Decimal::ZERO {
                if self.fail_next_credit.swap(false, Ordering::SeqCst) {
                    return Err(LedgerError::Storage("injected credit failure".to_string()));
                }
                let balance = state
                    .balances
                    .get_mut(&owner)
                    .ok_or(LedgerError::UnknownUser(owner))?;
                *balance = balance
                    .checked_add(credit)
                    .ok_or(LedgerError::InvalidAmount(credit))?;
            }

            Ok(from)
        })?;

        info!(
            number = %number,
            owner,
            from = %from,
            to = %new_status,
            credit = %credit,
            "Order outcome applied"
        );
        Ok(())
    }

    async fn get_balance(&self, user: UserId) -> Result<BalanceSnapshot, LedgerError> {
        self.read(|state| -> Result<BalanceSnapshot, LedgerError> {
            let current = *state
                .balances
                .get(&user)
                .ok_or(LedgerError::UnknownUser(user))?;
            let withdrawn = state
                .withdrawals
                .iter()
                .filter(|w| w.user_id == user)
                .try_fold(Decimal::ZERO, |total, w| total.checked_add(w.sum))
                .ok_or_else(|| {
                    LedgerError::Storage(format!("withdrawn total overflows for user {}", user))
                })?;
            Ok(BalanceSnapshot { current, withdrawn })
        })
    }

    async fn apply_withdrawal(
        &self,
        user: UserId,
        order_number: &OrderNumber,
        sum: Decimal,
        processed_at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        if sum <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(sum));
        }

        let remaining = self.transaction(|state| {
            if !state.withdrawal_numbers.insert(order_number.clone()) {
                return Err(LedgerError::DuplicateWithdrawal(order_number.to_string()));
            }
            state.withdrawals.push(Withdrawal {
                order_number: order_number.clone(),
                user_id: user,
                sum,
                processed_at,
            });

            let balance = state
                .balances
                .get_mut(&user)
                .ok_or(LedgerError::UnknownUser(user))?;
            *balance -= sum;
            if *balance < Decimal::ZERO {
                return Err(LedgerError::InsufficientFunds);
            }
            Ok(*balance)
        })?;

        info!(user, order = %order_number, sum = %sum, remaining = %remaining, "Withdrawal applied");
        Ok(())
    }

    async fn orders_for_user(&self, user: UserId) -> Result<Vec<Order>, LedgerError> {
        Ok(self.read(|state| state.sorted_orders(|o| o.owner == user)))
    }

    async fn withdrawals_for_user(&self, user: UserId) -> Result<Vec<Withdrawal>, LedgerError> {
        Ok(self.read(|state| {
            let mut withdrawals: Vec<Withdrawal> = state
                .withdrawals
                .iter()
                .filter(|w| w.user_id == user)
                .cloned()
                .collect();
            // Stable sort keeps insertion order for equal timestamps
            withdrawals.sort_by_key(|w| w.processed_at);
            withdrawals
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn number(raw: &str) -> OrderNumber {
        OrderNumber::parse(raw).unwrap()
    }

    async fn ledger_with_user() -> (MemoryLedger, UserId) {
        let ledger = MemoryLedger::new();
        let user = ledger.create_user("alice", "hash").await.unwrap();
        (ledger, user)
    }

    #[tokio::test]
    async fn test_create_user_starts_at_zero() {
        let (ledger, user) = ledger_with_user().await;
        let balance = ledger.get_balance(user).await.unwrap();
        assert_eq!(balance.current, Decimal::ZERO);
        assert_eq!(balance.withdrawn, Decimal::ZERO);

        let err = ledger.create_user("alice", "other").await.unwrap_err();
        assert!(matches!(err, LedgerError::LoginTaken(login) if login == "alice"));
    }

    #[tokio::test]
    async fn test_create_order_idempotent_and_conflict() {
        let (ledger, alice) = ledger_with_user().await;
        let bob = ledger.create_user("bob", "hash").await.unwrap();
        let n = number("12345678903");

        assert_eq!(
            ledger.create_order(&n, alice, Utc::now()).await.unwrap(),
            CreateOrderResult::Created
        );
        assert_eq!(
            ledger.create_order(&n, alice, Utc::now()).await.unwrap(),
            CreateOrderResult::AlreadyOwnedByCaller
        );
        assert_eq!(
            ledger.create_order(&n, bob, Utc::now()).await.unwrap(),
            CreateOrderResult::OwnedByAnotherUser
        );

        assert_eq!(ledger.orders_for_user(alice).await.unwrap().len(), 1);
        assert!(ledger.orders_for_user(bob).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_order_unknown_user() {
        let ledger = MemoryLedger::new();
        let err = ledger
            .create_order(&number("12345678903"), 42, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::UnknownUser(42)));
    }

    #[tokio::test]
    async fn test_apply_outcome_credits_once() {
        let (ledger, user) = ledger_with_user().await;
        let n = number("12345678903");
        ledger.create_order(&n, user, Utc::now()).await.unwrap();

        ledger
            .apply_order_outcome(&n, OrderStatus::Processed, Decimal::new(500, 0), user)
            .await
            .unwrap();

        // Second application is rejected and credits nothing
        let err = ledger
            .apply_order_outcome(&n, OrderStatus::Processed, Decimal::new(500, 0), user)
            .await
            .unwrap_err();
        assert!(err.is_defect());

        assert_eq!(
            ledger.get_balance(user).await.unwrap().current,
            Decimal::new(500, 0)
        );
        let orders = ledger.orders_for_user(user).await.unwrap();
        assert_eq!(orders[0].status, OrderStatus::Processed);
        assert_eq!(orders[0].accrual, Some(Decimal::new(500, 0)));
        assert!(ledger.orders_in_non_terminal_status().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_injected_credit_failure_rolls_back_status() {
        let (ledger, user) = ledger_with_user().await;
        let n = number("12345678903");
        ledger.create_order(&n, user, Utc::now()).await.unwrap();

        ledger.fail_next_credit();
        let err = ledger
            .apply_order_outcome(&n, OrderStatus::Processed, Decimal::new(500, 0), user)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Storage(_)));

        let orders = ledger.orders_for_user(user).await.unwrap();
        assert_eq!(orders[0].status, OrderStatus::New);
        assert_eq!(orders[0].accrual, None);
        assert_eq!(ledger.get_balance(user).await.unwrap().current, Decimal::ZERO);

        // Fault was one-shot; the retry goes through
        ledger
            .apply_order_outcome(&n, OrderStatus::Processed, Decimal::new(500, 0), user)
            .await
            .unwrap();
        assert_eq!(
            ledger.get_balance(user).await.unwrap().current,
            Decimal::new(500, 0)
        );
    }

    #[tokio::test]
    async fn test_credit_overflow_is_rejected_and_rolled_back() {
        let (ledger, user) = ledger_with_user().await;
        let first = number("12345678903");
        let second = number("79927398713");
        ledger.create_order(&first, user, Utc::now()).await.unwrap();
        ledger.create_order(&second, user, Utc::now()).await.unwrap();

        ledger
            .apply_order_outcome(&first, OrderStatus::Processed, Decimal::MAX, user)
            .await
            .unwrap();
        let err = ledger
            .apply_order_outcome(&second, OrderStatus::Processed, Decimal::ONE, user)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(_)));

        assert_eq!(ledger.get_balance(user).await.unwrap().current, Decimal::MAX);
        let pending = ledger.orders_in_non_terminal_status().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].number, second);
        assert_eq!(pending[0].status, OrderStatus::New);
    }

    #[tokio::test]
    async fn test_apply_outcome_owner_mismatch() {
        let (ledger, alice) = ledger_with_user().await;
        let n = number("12345678903");
        ledger.create_order(&n, alice, Utc::now()).await.unwrap();

        let err = ledger
            .apply_order_outcome(&n, OrderStatus::Processed, Decimal::ONE, alice + 1)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::OwnerMismatch { .. }));
        assert_eq!(ledger.get_balance(alice).await.unwrap().current, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_mark_processing_is_cas() {
        let (ledger, user) = ledger_with_user().await;
        let n = number("12345678903");
        ledger.create_order(&n, user, Utc::now()).await.unwrap();

        assert!(ledger.mark_processing(&n).await.unwrap());
        assert!(!ledger.mark_processing(&n).await.unwrap());
        assert!(!ledger.mark_processing(&number("79927398713")).await.unwrap());

        let pending = ledger.orders_in_non_terminal_status().await.unwrap();
        assert_eq!(pending[0].status, OrderStatus::Processing);
    }

    #[tokio::test]
    async fn test_withdrawal_rules() {
        let (ledger, user) = ledger_with_user().await;
        let n = number("12345678903");
        ledger.create_order(&n, user, Utc::now()).await.unwrap();
        ledger
            .apply_order_outcome(&n, OrderStatus::Processed, Decimal::new(500, 0), user)
            .await
            .unwrap();

        let spend = number("2377225624");
        ledger
            .apply_withdrawal(user, &spend, Decimal::new(300, 0), Utc::now())
            .await
            .unwrap();

        let dup = ledger
            .apply_withdrawal(user, &spend, Decimal::new(1, 0), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(dup, LedgerError::DuplicateWithdrawal(_)));

        let short = ledger
            .apply_withdrawal(user, &number("79927398713"), Decimal::new(300, 0), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(short, LedgerError::InsufficientFunds));

        let zero = ledger
            .apply_withdrawal(user, &number("79927398713"), Decimal::ZERO, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(zero, LedgerError::InvalidAmount(_)));

        let balance = ledger.get_balance(user).await.unwrap();
        assert_eq!(balance.current, Decimal::new(200, 0));
        assert_eq!(balance.withdrawn, Decimal::new(300, 0));
        assert_eq!(ledger.withdrawals_for_user(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_withdrawals_never_go_negative() {
        let ledger = Arc::new(MemoryLedger::new());
        let user = ledger.create_user("alice", "hash").await.unwrap();
        let n = number("12345678903");
        ledger.create_order(&n, user, Utc::now()).await.unwrap();
        ledger
            .apply_order_outcome(&n, OrderStatus::Processed, Decimal::new(1000, 0), user)
            .await
            .unwrap();

        // 20 spends of 75 against 1000: at most 13 can succeed
        let spends: Vec<OrderNumber> = (0..20u32)
            .map(|i| {
                let payload = format!("{:09}", 100_000_000 + i);
                let check = (0..10)
                    .find(|d| crate::order::is_valid_luhn(&format!("{}{}", payload, d)))
                    .unwrap();
                number(&format!("{}{}", payload, check))
            })
            .collect();

        let handles: Vec<_> = spends
            .into_iter()
            .map(|spend| {
                let ledger = ledger.clone();
                tokio::spawn(async move {
                    ledger
                        .apply_withdrawal(user, &spend, Decimal::new(75, 0), Utc::now())
                        .await
                })
            })
            .collect();

        let mut committed = 0i64;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => committed += 1,
                Err(LedgerError::InsufficientFunds) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(committed, 13);
        let balance = ledger.get_balance(user).await.unwrap();
        assert_eq!(
            balance.current,
            Decimal::new(1000, 0) - Decimal::new(75 * committed, 0)
        );
        assert!(balance.current >= Decimal::ZERO);
        assert_eq!(balance.withdrawn, Decimal::new(75 * committed, 0));
    }
}
