//! Postgres-backed finance store (sqlx)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tokio::sync::OnceCell;
use tracing::info;
use uuid::Uuid;

use super::FinanceStore;
use crate::error::AdvisorError;
use crate::models::{
    balance_adjustments, Account, AccountType, AccountWithTransactions, Budget, BulkDeleteOutcome,
    Transaction, TransactionType, UserProfile,
};
use crate::Result;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
      id UUID PRIMARY KEY,
      identity TEXT NOT NULL UNIQUE,
      name TEXT,
      email TEXT,
      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS accounts (
      id UUID PRIMARY KEY,
      user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
      name TEXT NOT NULL,
      type TEXT NOT NULL,
      balance NUMERIC(18, 2),
      is_default BOOLEAN NOT NULL DEFAULT FALSE
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
      id UUID PRIMARY KEY,
      account_id UUID NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
      user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
      type TEXT NOT NULL,
      amount NUMERIC(18, 2),
      category TEXT,
      date TIMESTAMPTZ NOT NULL
    );
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_transactions_user_date
    ON transactions (user_id, date DESC);
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS budgets (
      id UUID PRIMARY KEY,
      user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
      amount NUMERIC(18, 2),
      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );
    "#,
];

const ACCOUNT_COLUMNS: &str = "id, user_id, name, type, balance, is_default";
const TRANSACTION_COLUMNS: &str = "id, account_id, user_id, type, amount, category, date";

pub struct PgFinanceStore {
    pool: PgPool,
    schema_ready: OnceCell<()>,
}

impl PgFinanceStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: OnceCell::new(),
        }
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                for statement in SCHEMA {
                    sqlx::query(*statement).execute(&self.pool).await?;
                }
                info!("Finance schema ready");
                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| AdvisorError::Database(format!("Failed to initialize finance schema: {}", e)))?;

        Ok(())
    }
}

fn account_from_row(row: &PgRow) -> Result<Account> {
    let raw_type: String = row.try_get("type")?;
    let account_type = AccountType::parse(&raw_type)
        .ok_or_else(|| AdvisorError::Database(format!("Unknown account type: {}", raw_type)))?;

    Ok(Account {
        account_id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
        account_type,
        balance: row.try_get::<Option<Decimal>, _>("balance")?,
        is_default: row.try_get("is_default")?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction> {
    let raw_type: String = row.try_get("type")?;
    let transaction_type = TransactionType::parse(&raw_type)
        .ok_or_else(|| AdvisorError::Database(format!("Unknown transaction type: {}", raw_type)))?;

    Ok(Transaction {
        transaction_id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        user_id: row.try_get("user_id")?,
        transaction_type,
        amount: row.try_get::<Option<Decimal>, _>("amount")?,
        category: row.try_get("category")?,
        date: row.try_get::<DateTime<Utc>, _>("date")?,
    })
}

#[async_trait]
impl FinanceStore for PgFinanceStore {
    async fn find_user_by_identity(&self, identity: &str) -> Result<Option<UserProfile>> {
        self.ensure_schema().await?;

        let row = sqlx::query("SELECT id, identity, name, email, created_at FROM users WHERE identity = $1")
            .bind(identity)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| -> Result<UserProfile> {
            Ok(UserProfile {
                user_id: row.try_get("id")?,
                identity: row.try_get("identity")?,
                name: row.try_get("name")?,
                email: row.try_get("email")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .transpose()
    }

    async fn accounts_with_transactions(&self, user_id: Uuid) -> Result<Vec<AccountWithTransactions>> {
        self.ensure_schema().await?;

        let account_rows = sqlx::query(&format!(
            "SELECT {} FROM accounts WHERE user_id = $1 ORDER BY name",
            ACCOUNT_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let transaction_rows = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE user_id = $1 ORDER BY date DESC",
            TRANSACTION_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let transactions = transaction_rows
            .iter()
            .map(transaction_from_row)
            .collect::<Result<Vec<_>>>()?;

        account_rows
            .iter()
            .map(|row| -> Result<AccountWithTransactions> {
                let account = account_from_row(row)?;
                let owned = transactions
                    .iter()
                    .filter(|t| t.account_id == account.account_id)
                    .cloned()
                    .collect();
                Ok(AccountWithTransactions {
                    account,
                    transactions: owned,
                })
            })
            .collect()
    }

    async fn account_with_transactions(
        &self,
        user_id: Uuid,
        account_id: Uuid,
    ) -> Result<Option<AccountWithTransactions>> {
        self.ensure_schema().await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM accounts WHERE id = $1 AND user_id = $2",
            ACCOUNT_COLUMNS
        ))
        .bind(account_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let account = account_from_row(&row)?;

        let transaction_rows = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE account_id = $1 ORDER BY date DESC",
            TRANSACTION_COLUMNS
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        let transactions = transaction_rows
            .iter()
            .map(transaction_from_row)
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(AccountWithTransactions {
            account,
            transactions,
        }))
    }

    async fn recent_transactions(&self, user_id: Uuid, limit: usize) -> Result<Vec<Transaction>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE user_id = $1 ORDER BY date DESC LIMIT $2",
            TRANSACTION_COLUMNS
        ))
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn budgets(&self, user_id: Uuid) -> Result<Vec<Budget>> {
        self.ensure_schema().await?;

        let rows = sqlx::query("SELECT id, user_id, amount FROM budgets WHERE user_id = $1 ORDER BY created_at")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<Budget> {
                Ok(Budget {
                    budget_id: row.try_get("id")?,
                    user_id: row.try_get("user_id")?,
                    amount: row.try_get::<Option<Decimal>, _>("amount")?,
                })
            })
            .collect()
    }

    async fn bulk_delete_transactions(
        &self,
        user_id: Uuid,
        transaction_ids: &[Uuid],
    ) -> Result<BulkDeleteOutcome> {
        self.ensure_schema().await?;

        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE id = ANY($1) AND user_id = $2 FOR UPDATE",
            TRANSACTION_COLUMNS
        ))
        .bind(transaction_ids)
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;

        let doomed = rows
            .iter()
            .map(transaction_from_row)
            .collect::<Result<Vec<_>>>()?;
        let adjustments = balance_adjustments(&doomed);

        sqlx::query("DELETE FROM transactions WHERE id = ANY($1) AND user_id = $2")
            .bind(transaction_ids)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        for adjustment in &adjustments {
            sqlx::query(
                "UPDATE accounts SET balance = COALESCE(balance, 0) + $1 WHERE id = $2 AND user_id = $3",
            )
            .bind(adjustment.change)
            .bind(adjustment.account_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(%user_id, deleted = doomed.len(), accounts = adjustments.len(), "Bulk deleted transactions");

        Ok(BulkDeleteOutcome {
            deleted: doomed.len(),
            adjusted_accounts: adjustments,
        })
    }

    async fn set_default_account(&self, user_id: Uuid, account_id: Uuid) -> Result<Account> {
        self.ensure_schema().await?;

        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query("SELECT id FROM accounts WHERE id = $1 AND user_id = $2 FOR UPDATE")
            .bind(account_id)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(AdvisorError::AccountNotFound(account_id));
        }

        sqlx::query("UPDATE accounts SET is_default = (id = $1) WHERE user_id = $2")
            .bind(account_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query(&format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS))
            .bind(account_id)
            .fetch_one(&mut *tx)
            .await?;
        let account = account_from_row(&row)?;

        tx.commit().await?;

        Ok(account)
    }
}
