//! Ledger schema
//!
//! Idempotent DDL, safe to run on every start.

use sqlx::PgPool;

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        user_id       BIGSERIAL PRIMARY KEY,
        login         VARCHAR(255) NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        created_at    TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS balances (
        user_id    BIGINT PRIMARY KEY REFERENCES users (user_id),
        current    NUMERIC NOT NULL DEFAULT 0 CHECK (current >= 0),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS orders (
        number      TEXT PRIMARY KEY,
        user_id     BIGINT NOT NULL REFERENCES users (user_id),
        status      SMALLINT NOT NULL DEFAULT 0,
        accrual     NUMERIC NOT NULL DEFAULT 0 CHECK (accrual >= 0),
        uploaded_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_orders_status ON orders (status)",
    "CREATE INDEX IF NOT EXISTS idx_orders_user ON orders (user_id, uploaded_at)",
    r#"
    CREATE TABLE IF NOT EXISTS withdrawals (
        id           BIGSERIAL PRIMARY KEY,
        order_number TEXT NOT NULL UNIQUE,
        user_id      BIGINT NOT NULL REFERENCES users (user_id),
        sum          NUMERIC NOT NULL CHECK (sum > 0),
        processed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_withdrawals_user ON withdrawals (user_id, processed_at)",
    // Order numbers have no length cap; widen columns created as VARCHAR(255)
    "ALTER TABLE orders ALTER COLUMN number TYPE TEXT",
    "ALTER TABLE withdrawals ALTER COLUMN order_number TYPE TEXT",
];

/// Create tables and indexes that do not exist yet
pub async fn init_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::info!(statements = STATEMENTS.len(), "Ledger schema ready");
    Ok(())
}
