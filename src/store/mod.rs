//! Finance data access layer
//!
//! The chat pipeline only reads through this trait. The two write operations
//! (bulk delete and default-account switch) keep the ledger invariants: both
//! run atomically and touch only rows owned by the caller.

use crate::models::{
    Account, AccountWithTransactions, Budget, BulkDeleteOutcome, FinancialRecords, Transaction,
    UserProfile,
};
use crate::Result;
use async_trait::async_trait;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryFinanceStore;
pub use postgres::PgFinanceStore;

#[async_trait]
pub trait FinanceStore: Send + Sync {
    async fn find_user_by_identity(&self, identity: &str) -> Result<Option<UserProfile>>;

    async fn accounts_with_transactions(&self, user_id: Uuid) -> Result<Vec<AccountWithTransactions>>;

    /// One of the user's accounts with its transactions, newest first.
    /// `None` when the account is missing or owned by someone else.
    async fn account_with_transactions(
        &self,
        user_id: Uuid,
        account_id: Uuid,
    ) -> Result<Option<AccountWithTransactions>>;

    /// Newest first, at most `limit` rows.
    async fn recent_transactions(&self, user_id: Uuid, limit: usize) -> Result<Vec<Transaction>>;

    async fn budgets(&self, user_id: Uuid) -> Result<Vec<Budget>>;

    /// Delete the caller's transactions among `transaction_ids` and reverse
    /// their effect on account balances. Ids owned by someone else are ignored.
    async fn bulk_delete_transactions(
        &self,
        user_id: Uuid,
        transaction_ids: &[Uuid],
    ) -> Result<BulkDeleteOutcome>;

    /// Make `account_id` the user's only default account.
    async fn set_default_account(&self, user_id: Uuid, account_id: Uuid) -> Result<Account>;
}

/// Gather everything the aggregator reads for one user.
pub async fn load_records(
    store: &dyn FinanceStore,
    user_id: Uuid,
    transaction_limit: usize,
) -> Result<FinancialRecords> {
    let accounts = store
        .accounts_with_transactions(user_id)
        .await?
        .into_iter()
        .map(|a| a.account)
        .collect();
    let transactions = store.recent_transactions(user_id, transaction_limit).await?;
    let budgets = store.budgets(user_id).await?;

    Ok(FinancialRecords {
        accounts,
        transactions,
        budgets,
    })
}
