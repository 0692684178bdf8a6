//! Reconciliation flow against the in-process ledger
//!
//! Register, submit, reconcile, spend: the full path a user's points take.

mod common;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use common::{
    ScriptedAccrual, number, points, processed, processing, rejected, retry_after,
};
use loyalty_ledger::ledger::{LedgerStore, MemoryLedger};
use loyalty_ledger::order::OrderStatus;
use loyalty_ledger::reconciler::{Reconciler, ReconcilerConfig};
use loyalty_ledger::service::{LoyaltyService, SubmitOutcome};

struct TestHarness {
    ledger: Arc<MemoryLedger>,
    accrual: Arc<ScriptedAccrual>,
    service: LoyaltyService,
    reconciler: Reconciler,
}

impl TestHarness {
    fn new() -> Self {
        let ledger = Arc::new(MemoryLedger::new());
        let accrual = Arc::new(ScriptedAccrual::new());
        let config = ReconcilerConfig::new(Duration::from_secs(1), Duration::from_secs(5)).unwrap();

        Self {
            service: LoyaltyService::new(ledger.clone()),
            reconciler: Reconciler::new(ledger.clone(), accrual.clone(), config),
            ledger,
            accrual,
        }
    }
}

#[tokio::test]
async fn test_register_accrue_and_spend() {
    let h = TestHarness::new();
    let user = h.service.register_user("alice", "argon2-hash").await.unwrap();

    let outcome = h.service.submit_order(user, "12345678903").await.unwrap();
    assert_eq!(outcome, SubmitOutcome::Accepted);

    h.accrual.script(&number("12345678903"), vec![processed(500)]);
    let report = h
        .reconciler
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.applied, 1);

    let balance = h.service.get_balance(user).await.unwrap();
    assert_eq!(balance.current, points(500));
    assert_eq!(balance.withdrawn, points(0));

    let orders = h.service.list_orders(user).await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].status, OrderStatus::Processed);
    assert_eq!(orders[0].accrual, Some(points(500)));

    h.service
        .withdraw(user, "2377225624", points(300))
        .await
        .unwrap();
    let balance = h.service.get_balance(user).await.unwrap();
    assert_eq!(balance.current, points(200));
    assert_eq!(balance.withdrawn, points(300));

    let withdrawals = h.service.list_withdrawals(user).await.unwrap();
    assert_eq!(withdrawals.len(), 1);
    assert_eq!(withdrawals[0].sum, points(300));
    assert_eq!(withdrawals[0].order_number, number("2377225624"));

    let err = h
        .service
        .withdraw(user, "79927398713", points(300))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INSUFFICIENT_FUNDS");
    assert_eq!(h.service.get_balance(user).await.unwrap().current, points(200));
    assert_eq!(h.service.list_withdrawals(user).await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_waits_before_crediting() {
    let h = TestHarness::new();
    let user = h.service.register_user("alice", "hash").await.unwrap();
    h.service.submit_order(user, "12345678903").await.unwrap();
    h.accrual
        .script(&number("12345678903"), vec![retry_after(5), processed(500)]);

    let reconciler = Arc::new(h.reconciler);
    let started = tokio::time::Instant::now();
    let cycle = {
        let reconciler = reconciler.clone();
        tokio::spawn(async move { reconciler.run_cycle(&CancellationToken::new()).await })
    };

    // Part way through the backoff nothing is credited yet
    tokio::time::sleep(Duration::from_millis(4900)).await;
    assert_eq!(h.accrual.call_count(), 1);
    assert_eq!(h.ledger.get_balance(user).await.unwrap().current, points(0));

    let report = cycle.await.unwrap().unwrap();
    assert_eq!(report.backoffs, 1);
    assert_eq!(report.applied, 1);

    let calls = h.accrual.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].1 - calls[0].1 >= Duration::from_secs(5));
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert_eq!(h.ledger.get_balance(user).await.unwrap().current, points(500));
}

#[tokio::test(start_paused = true)]
async fn test_background_task_credits_and_stops() {
    let h = TestHarness::new();
    let user = h.service.register_user("alice", "hash").await.unwrap();
    h.service.submit_order(user, "12345678903").await.unwrap();
    h.service.submit_order(user, "79927398713").await.unwrap();
    h.accrual.script(&number("12345678903"), vec![processed(120)]);
    // Second order stays pending for two polls, then is rejected upstream
    h.accrual.script(
        &number("79927398713"),
        vec![processing(), processing(), rejected()],
    );

    let reconciler = Arc::new(h.reconciler);
    let shutdown = CancellationToken::new();
    let task = {
        let reconciler = reconciler.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { reconciler.run(shutdown).await })
    };

    tokio::time::sleep(Duration::from_millis(5500)).await;
    shutdown.cancel();
    task.await.unwrap();

    let orders = h.ledger.orders_for_user(user).await.unwrap();
    let status_of = |raw: &str| {
        orders
            .iter()
            .find(|o| o.number == number(raw))
            .map(|o| o.status)
    };
    assert_eq!(status_of("12345678903"), Some(OrderStatus::Processed));
    assert_eq!(status_of("79927398713"), Some(OrderStatus::Invalid));
    assert_eq!(h.ledger.get_balance(user).await.unwrap().current, points(120));
    assert!(h.ledger.orders_in_non_terminal_status().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cross_owner_submission_never_overwrites() {
    let h = TestHarness::new();
    let alice = h.service.register_user("alice", "hash").await.unwrap();
    let bob = h.service.register_user("bob", "hash").await.unwrap();

    h.service.submit_order(alice, "12345678903").await.unwrap();
    let err = h.service.submit_order(bob, "12345678903").await.unwrap_err();
    assert_eq!(err.http_status(), 409);

    h.accrual.script(&number("12345678903"), vec![processed(75)]);
    h.reconciler
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(h.service.get_balance(alice).await.unwrap().current, points(75));
    assert_eq!(h.service.get_balance(bob).await.unwrap().current, points(0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_credit_and_debits_settle_exactly_once() {
    let h = TestHarness::new();
    let user = h.service.register_user("alice", "hash").await.unwrap();
    h.service.submit_order(user, "12345678903").await.unwrap();
    h.service.submit_order(user, "79927398713").await.unwrap();

    // Seed 100 points, then race a 400-point credit against ten 50-point spends
    h.accrual.script(&number("12345678903"), vec![processed(100)]);
    h.reconciler
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap();
    h.accrual.script(&number("79927398713"), vec![processed(400)]);

    let service = Arc::new(h.service);
    let spends = [
        "2377225624",
        "4561261212345467",
        "49927398716",
        "1234567812345670",
        "4111111111111111",
        "5500000000000004",
        "340000000000009",
        "30000000000004",
        "6011000000000004",
        "3530111333300000",
    ];
    let debits: Vec<_> = spends
        .iter()
        .map(|&raw| {
            let service = service.clone();
            tokio::spawn(async move { service.withdraw(user, raw, points(50)).await.is_ok() })
        })
        .collect();

    let report = h
        .reconciler
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.applied, 1);

    let committed = futures::future::join_all(debits)
        .await
        .into_iter()
        .filter(|r| *r.as_ref().unwrap())
        .count() as i64;

    let balance = service.get_balance(user).await.unwrap();
    assert!(balance.current >= points(0));
    assert_eq!(balance.current, points(500 - 50 * committed));
    assert_eq!(balance.withdrawn, points(50 * committed));
    assert!(committed >= 2);
}
