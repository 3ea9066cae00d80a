//! In-memory finance store for development and tests

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::FinanceStore;
use crate::error::AdvisorError;
use crate::models::{
    balance_adjustments, Account, AccountWithTransactions, Budget, BulkDeleteOutcome, Transaction,
    UserProfile,
};
use crate::Result;

#[derive(Default)]
struct Ledger {
    users: Vec<UserProfile>,
    accounts: Vec<Account>,
    transactions: Vec<Transaction>,
    budgets: Vec<Budget>,
}

/// All tables behind one lock so multi-row writes are atomic.
pub struct InMemoryFinanceStore {
    ledger: Arc<RwLock<Ledger>>,
}

impl InMemoryFinanceStore {
    pub fn new() -> Self {
        Self {
            ledger: Arc::new(RwLock::new(Ledger::default())),
        }
    }

    pub async fn insert_user(&self, user: UserProfile) {
        self.ledger.write().await.users.push(user);
    }

    /// Inserting a default account clears the flag on the user's other accounts.
    pub async fn insert_account(&self, account: Account) {
        let mut ledger = self.ledger.write().await;
        if account.is_default {
            for existing in ledger.accounts.iter_mut().filter(|a| a.user_id == account.user_id) {
                existing.is_default = false;
            }
        }
        ledger.accounts.push(account);
    }

    pub async fn insert_transaction(&self, transaction: Transaction) {
        self.ledger.write().await.transactions.push(transaction);
    }

    pub async fn insert_budget(&self, budget: Budget) {
        self.ledger.write().await.budgets.push(budget);
    }

    pub async fn account(&self, account_id: Uuid) -> Option<Account> {
        let ledger = self.ledger.read().await;
        ledger.accounts.iter().find(|a| a.account_id == account_id).cloned()
    }
}

impl Default for InMemoryFinanceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FinanceStore for InMemoryFinanceStore {
    async fn find_user_by_identity(&self, identity: &str) -> Result<Option<UserProfile>> {
        let ledger = self.ledger.read().await;
        Ok(ledger.users.iter().find(|u| u.identity == identity).cloned())
    }

    async fn accounts_with_transactions(&self, user_id: Uuid) -> Result<Vec<AccountWithTransactions>> {
        let ledger = self.ledger.read().await;

        Ok(ledger
            .accounts
            .iter()
            .filter(|a| a.user_id == user_id)
            .map(|account| {
                let mut transactions: Vec<Transaction> = ledger
                    .transactions
                    .iter()
                    .filter(|t| t.account_id == account.account_id)
                    .cloned()
                    .collect();
                transactions.sort_by(|a, b| b.date.cmp(&a.date));

                AccountWithTransactions {
                    account: account.clone(),
                    transactions,
                }
            })
            .collect())
    }

    async fn account_with_transactions(
        &self,
        user_id: Uuid,
        account_id: Uuid,
    ) -> Result<Option<AccountWithTransactions>> {
        let ledger = self.ledger.read().await;

        let Some(account) = ledger
            .accounts
            .iter()
            .find(|a| a.account_id == account_id && a.user_id == user_id)
        else {
            return Ok(None);
        };

        let mut transactions: Vec<Transaction> = ledger
            .transactions
            .iter()
            .filter(|t| t.account_id == account_id)
            .cloned()
            .collect();
        transactions.sort_by(|a, b| b.date.cmp(&a.date));

        Ok(Some(AccountWithTransactions {
            account: account.clone(),
            transactions,
        }))
    }

    async fn recent_transactions(&self, user_id: Uuid, limit: usize) -> Result<Vec<Transaction>> {
        let ledger = self.ledger.read().await;

        let mut transactions: Vec<Transaction> = ledger
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        transactions.sort_by(|a, b| b.date.cmp(&a.date));
        transactions.truncate(limit);

        Ok(transactions)
    }

    async fn budgets(&self, user_id: Uuid) -> Result<Vec<Budget>> {
        let ledger = self.ledger.read().await;
        Ok(ledger
            .budgets
            .iter()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn bulk_delete_transactions(
        &self,
        user_id: Uuid,
        transaction_ids: &[Uuid],
    ) -> Result<BulkDeleteOutcome> {
        let mut ledger = self.ledger.write().await;

        let doomed: Vec<Transaction> = ledger
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id && transaction_ids.contains(&t.transaction_id))
            .cloned()
            .collect();

        let adjustments = balance_adjustments(&doomed);

        ledger
            .transactions
            .retain(|t| !(t.user_id == user_id && transaction_ids.contains(&t.transaction_id)));

        for adjustment in &adjustments {
            if let Some(account) = ledger
                .accounts
                .iter_mut()
                .find(|a| a.account_id == adjustment.account_id)
            {
                account.balance = Some(account.balance.unwrap_or_default() + adjustment.change);
            }
        }

        Ok(BulkDeleteOutcome {
            deleted: doomed.len(),
            adjusted_accounts: adjustments,
        })
    }

    async fn set_default_account(&self, user_id: Uuid, account_id: Uuid) -> Result<Account> {
        let mut ledger = self.ledger.write().await;

        let owned = ledger
            .accounts
            .iter()
            .any(|a| a.account_id == account_id && a.user_id == user_id);
        if !owned {
            return Err(AdvisorError::AccountNotFound(account_id));
        }

        let mut updated = None;
        for account in ledger.accounts.iter_mut().filter(|a| a.user_id == user_id) {
            account.is_default = account.account_id == account_id;
            if account.is_default {
                updated = Some(account.clone());
            }
        }

        updated.ok_or_else(|| AdvisorError::AccountNotFound(account_id))
    }
}
