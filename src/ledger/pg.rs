//! PostgreSQL Ledger Store
//!
//! Each mutating operation runs in one `sqlx::Transaction`. A transaction that
//! is dropped without `commit()` rolls back, which covers every early return
//! and unwind path.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error, info, warn};

use super::error::{is_check_violation, is_foreign_key_violation, is_unique_violation};
use super::{
    BalanceSnapshot, CreateOrderResult, LedgerError, LedgerStore, Order, UserId, Withdrawal,
    check_credit, visible_accrual,
};
use crate::order::{OrderNumber, OrderStatus, check_transition};

const ORDER_COLUMNS: &str = "number, user_id, status, accrual, uploaded_at";

/// Ledger backed by the `users`, `balances`, `orders` and `withdrawals` tables
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_order(row: &PgRow) -> Result<Order, LedgerError> {
        let raw_number: String = row.try_get("number")?;
        let number = OrderNumber::parse(&raw_number)
            .map_err(|e| LedgerError::CorruptRow(format!("orders.number: {}", e)))?;
        let status = status_from_row(row)?;
        let accrual: Decimal = row.try_get("accrual")?;

        Ok(Order {
            number,
            owner_user_id: row.try_get("user_id")?,
            status,
            accrual: visible_accrual(status, accrual),
            uploaded_at: row.try_get("uploaded_at")?,
        })
    }

    fn row_to_withdrawal(row: &PgRow) -> Result<Withdrawal, LedgerError> {
        let raw_number: String = row.try_get("order_number")?;
        let order_number = OrderNumber::parse(&raw_number)
            .map_err(|e| LedgerError::CorruptRow(format!("withdrawals.order_number: {}", e)))?;

        Ok(Withdrawal {
            order_number,
            user_id: row.try_get("user_id")?,
            sum: row.try_get("sum")?,
            processed_at: row.try_get("processed_at")?,
        })
    }
}

fn status_from_row(row: &PgRow) -> Result<OrderStatus, LedgerError> {
    let id: i16 = row.try_get("status")?;
    OrderStatus::from_id(id)
        .ok_or_else(|| LedgerError::CorruptRow(format!("orders.status: {}", id)))
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn create_user(&self, login: &str, password_hash: &str) -> Result<UserId, LedgerError> {
        let mut tx = self.pool.begin().await?;

        let user_id: i64 = match sqlx::query_scalar(
            "INSERT INTO users (login, password_hash) VALUES ($1, $2) RETURNING user_id",
        )
        .bind(login)
        .bind(password_hash)
        .fetch_one(&mut *tx)
        .await
        {
            Ok(id) => id,
            Err(e) if is_unique_violation(&e) => {
                return Err(LedgerError::LoginTaken(login.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        sqlx::query("INSERT INTO balances (user_id, current) VALUES ($1, 0)")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(user_id, login, "User registered with zero balance");
        Ok(user_id)
    }

    async fn create_order(
        &self,
        number: &OrderNumber,
        owner: UserId,
        uploaded_at: DateTime<Utc>,
    ) -> Result<CreateOrderResult, LedgerError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO orders (number, user_id, status, accrual, uploaded_at)
            VALUES ($1, $2, $3, 0, $4)
            ON CONFLICT (number) DO NOTHING
            "#,
        )
        .bind(number.as_str())
        .bind(owner)
        .bind(OrderStatus::initial().id())
        .bind(uploaded_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                LedgerError::UnknownUser(owner)
            } else {
                e.into()
            }
        })?;

        if inserted.rows_affected() > 0 {
            debug!(number = %number, owner, "Order created");
            return Ok(CreateOrderResult::Created);
        }

        // Orders are never deleted, so the conflicting row is still there
        let existing_owner: Option<i64> =
            sqlx::query_scalar("SELECT user_id FROM orders WHERE number = $1")
                .bind(number.as_str())
                .fetch_optional(&self.pool)
                .await?;

        match existing_owner {
            Some(id) if id == owner => Ok(CreateOrderResult::AlreadyOwnedByCaller),
            Some(_) => Ok(CreateOrderResult::OwnedByAnotherUser),
            None => Err(LedgerError::Storage(format!(
                "order {} conflicted on insert but is missing",
                number
            ))),
        }
    }

    async fn orders_in_non_terminal_status(&self) -> Result<Vec<Order>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM orders WHERE status = ANY($1) ORDER BY uploaded_at, number",
            ORDER_COLUMNS
        ))
        .bind(OrderStatus::non_terminal_ids().to_vec())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_order).collect()
    }

    async fn mark_processing(&self, number: &OrderNumber) -> Result<bool, LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $1, updated_at = NOW()
            WHERE number = $2 AND status = $3
            "#,
        )
        .bind(OrderStatus::Processing.id())
        .bind(number.as_str())
        .bind(OrderStatus::New.id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn apply_order_outcome(
        &self,
        number: &OrderNumber,
        new_status: OrderStatus,
        credit: Decimal,
        owner: UserId,
    ) -> Result<(), LedgerError> {
        check_credit(new_status, credit)?;

        let mut tx = self.pool.begin().await?;

        // Lock the order row so a concurrent cycle cannot apply it twice
        let row = sqlx::query("SELECT user_id, status FROM orders WHERE number = $1 FOR UPDATE")
            .bind(number.as_str())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| LedgerError::OrderNotFound(number.to_string()))?;

        let actual_owner: i64 = row.try_get("user_id")?;
        if actual_owner != owner {
            error!(number = %number, expected = owner, actual = actual_owner, "Order owner mismatch");
            return Err(LedgerError::OwnerMismatch {
                number: number.to_string(),
                expected: owner,
                actual: actual_owner,
            });
        }

        let current = status_from_row(&row)?;
        check_transition(current, new_status)?;

        sqlx::query(
            r#"
            UPDATE orders
            SET status = $1, accrual = $2, updated_at = NOW()
            WHERE number = $3
            "#,
        )
        .bind(new_status.id())
        .bind(credit)
        .bind(number.as_str())
        .execute(&mut *tx)
        .await?;

        if credit > Decimal::ZERO {
            let credited = sqlx::query(
                "UPDATE balances SET current = current + $1, updated_at = NOW() WHERE user_id = $2",
            )
            .bind(credit)
            .bind(owner)
            .execute(&mut *tx)
            .await?;

            if credited.rows_affected() == 0 {
                warn!(number = %number, owner, "No balance row to credit, rolling back");
                return Err(LedgerError::UnknownUser(owner));
            }
        }

        tx.commit().await?;

        info!(
            number = %number,
            owner,
            from = %current,
            to = %new_status,
            credit = %credit,
            "Order outcome applied"
        );
        Ok(())
    }

    async fn get_balance(&self, user: UserId) -> Result<BalanceSnapshot, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT b.current,
                   COALESCE((SELECT SUM(w.sum) FROM withdrawals w WHERE w.user_id = b.user_id), 0)
                       AS withdrawn
            FROM balances b
            WHERE b.user_id = $1
            "#,
        )
        .bind(user)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(LedgerError::UnknownUser(user))?;

        Ok(BalanceSnapshot {
            current: row.try_get("current")?,
            withdrawn: row.try_get("withdrawn")?,
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

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO withdrawals (order_number, user_id, sum, processed_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(order_number.as_str())
        .bind(user)
        .bind(sum)
        .bind(processed_at)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(LedgerError::DuplicateWithdrawal(order_number.to_string()));
            }
            Err(e) if is_foreign_key_violation(&e) => return Err(LedgerError::UnknownUser(user)),
            Err(e) => return Err(e.into()),
        }

        // The row lock taken here serializes concurrent debits and credits
        let remaining: Option<Decimal> = match sqlx::query_scalar(
            r#"
            UPDATE balances
            SET current = current - $1, updated_at = NOW()
            WHERE user_id = $2
            RETURNING current
            "#,
        )
        .bind(sum)
        .bind(user)
        .fetch_optional(&mut *tx)
        .await
        {
            Ok(remaining) => remaining,
            // balances.current carries CHECK (current >= 0)
            Err(e) if is_check_violation(&e) => return Err(LedgerError::InsufficientFunds),
            Err(e) => return Err(e.into()),
        };

        let Some(remaining) = remaining else {
            return Err(LedgerError::UnknownUser(user));
        };

        if remaining < Decimal::ZERO {
            tx.rollback().await?;
            return Err(LedgerError::InsufficientFunds);
        }

        tx.commit().await?;

        info!(user, order = %order_number, sum = %sum, remaining = %remaining, "Withdrawal applied");
        Ok(())
    }

    async fn orders_for_user(&self, user: UserId) -> Result<Vec<Order>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM orders WHERE user_id = $1 ORDER BY uploaded_at, number",
            ORDER_COLUMNS
        ))
        .bind(user)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_order).collect()
    }

    async fn withdrawals_for_user(&self, user: UserId) -> Result<Vec<Withdrawal>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT order_number, user_id, sum, processed_at
            FROM withdrawals
            WHERE user_id = $1
            ORDER BY processed_at, id
            "#,
        )
        .bind(user)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_withdrawal).collect()
    }
}
