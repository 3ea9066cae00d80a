//! Core data models for the finance advisor

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountType {
    Current,
    Savings,
    Investment,
    Loan,
    Credit,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Current => "CURRENT",
            AccountType::Savings => "SAVINGS",
            AccountType::Investment => "INVESTMENT",
            AccountType::Loan => "LOAN",
            AccountType::Credit => "CREDIT",
        }
    }

    /// Parse a stored type label. "CHECKING" is accepted as an alias of CURRENT.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_uppercase().as_str() {
            "CURRENT" | "CHECKING" => Some(AccountType::Current),
            "SAVINGS" => Some(AccountType::Savings),
            "INVESTMENT" => Some(AccountType::Investment),
            "LOAN" => Some(AccountType::Loan),
            "CREDIT" => Some(AccountType::Credit),
            _ => None,
        }
    }

    pub fn is_debt(&self) -> bool {
        matches!(self, AccountType::Loan | AccountType::Credit)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Income,
    Expense,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Income => "INCOME",
            TransactionType::Expense => "EXPENSE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_uppercase().as_str() {
            "INCOME" => Some(TransactionType::Income),
            "EXPENSE" => Some(TransactionType::Expense),
            _ => None,
        }
    }
}

//
// ================= Records =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    /// Subject issued by the upstream auth provider
    pub identity: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub account_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub account_type: AccountType,
    pub balance: Option<Decimal>,
    pub is_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: Uuid,
    pub account_id: Uuid,
    pub user_id: Uuid,
    pub transaction_type: TransactionType,
    pub amount: Option<Decimal>,
    pub category: Option<String>,
    pub date: DateTime<Utc>,
}

impl Transaction {
    /// Effect on the owning account's balance when this transaction is removed.
    pub fn reversal(&self) -> Decimal {
        let amount = self.amount.unwrap_or_default();
        match self.transaction_type {
            TransactionType::Expense => amount,
            TransactionType::Income => -amount,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Budget {
    pub budget_id: Uuid,
    pub user_id: Uuid,
    /// Monthly limit
    pub amount: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountWithTransactions {
    pub account: Account,
    pub transactions: Vec<Transaction>,
}

/// Everything the aggregator needs for one user, fetched once per turn.
#[derive(Debug, Clone, Default)]
pub struct FinancialRecords {
    pub accounts: Vec<Account>,
    pub transactions: Vec<Transaction>,
    pub budgets: Vec<Budget>,
}

impl FinancialRecords {
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty() && self.transactions.is_empty() && self.budgets.is_empty()
    }
}

/// Outcome of a balance-reversing bulk delete
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BulkDeleteOutcome {
    pub deleted: usize,
    pub adjusted_accounts: Vec<BalanceAdjustment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BalanceAdjustment {
    pub account_id: Uuid,
    pub change: Decimal,
}

/// Sum per-account reversals, in first-seen account order.
pub fn balance_adjustments<'a>(
    transactions: impl IntoIterator<Item = &'a Transaction>,
) -> Vec<BalanceAdjustment> {
    let mut adjustments: Vec<BalanceAdjustment> = Vec::new();

    for tx in transactions {
        match adjustments.iter_mut().find(|a| a.account_id == tx.account_id) {
            Some(existing) => existing.change += tx.reversal(),
            None => adjustments.push(BalanceAdjustment {
                account_id: tx.account_id,
                change: tx.reversal(),
            }),
        }
    }

    adjustments
}

//
// ================= Chat =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }

    /// Anything that is not the user is rendered as the assistant.
    pub fn from_label(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "user" => ChatRole::User,
            _ => ChatRole::Assistant,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
