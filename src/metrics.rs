//! Financial metrics aggregation
//!
//! Turns raw accounts, transactions and budgets into a `FinancialSummary`.
//! Everything here is pure: `now` is passed in so the 30-day window is
//! deterministic under test.
//!
//! Income and budget policies:
//! - monthly income is the amount of the most recent INCOME transaction, not a sum
//! - budget utilization reads only the first budget and uses all recent expenses as "spent"

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{Account, AccountType, FinancialRecords, Transaction, TransactionType, UserProfile};

#[derive(Debug, Clone)]
pub struct AggregationOptions {
    pub expense_window_days: i64,
    pub top_category_count: usize,
}

impl Default for AggregationOptions {
    fn default() -> Self {
        Self {
            expense_window_days: 30,
            top_category_count: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryAmount {
    pub category: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccountBalance {
    pub name: String,
    pub account_type: AccountType,
    pub balance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BudgetUtilization {
    pub limit: f64,
    pub spent: f64,
    pub remaining: f64,
    pub percent_used: f64,
}

/// Derived, never persisted
#[derive(Debug, Clone, PartialEq)]
pub struct FinancialSummary {
    pub name: String,
    pub monthly_income: f64,
    pub total_savings: f64,
    pub savings_rate: f64,
    pub monthly_expenses: f64,
    /// First-seen category order
    pub expenses_by_category: Vec<CategoryAmount>,
    pub top_categories: Vec<CategoryAmount>,
    pub accounts: Vec<AccountBalance>,
    pub investments: Vec<AccountBalance>,
    pub debt_accounts: Vec<AccountBalance>,
    pub total_debt: f64,
    pub debt_to_income: f64,
    pub budget: Option<BudgetUtilization>,
    pub as_of: DateTime<Utc>,
}

fn to_f64(value: Option<Decimal>) -> f64 {
    value.and_then(|d| d.to_f64()).unwrap_or(0.0)
}

fn balance_line(account: &Account, fallback_name: &str) -> AccountBalance {
    let name = if account.name.trim().is_empty() {
        fallback_name.to_string()
    } else {
        account.name.clone()
    };

    AccountBalance {
        name,
        account_type: account.account_type,
        balance: to_f64(account.balance),
    }
}

/// Percentage of `part` in `whole`, 0 when `whole` is not positive.
fn ratio_percent(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        part / whole * 100.0
    } else {
        0.0
    }
}

pub fn aggregate(
    profile: &UserProfile,
    records: &FinancialRecords,
    options: &AggregationOptions,
    now: DateTime<Utc>,
) -> FinancialSummary {
    let total_savings: f64 = records.accounts.iter().map(|a| to_f64(a.balance)).sum();

    // Most recent income wins; the first one seen wins a timestamp tie.
    let latest_income = records
        .transactions
        .iter()
        .filter(|t| t.transaction_type == TransactionType::Income)
        .fold(None, |latest: Option<&Transaction>, t| match latest {
            Some(current) if current.date >= t.date => Some(current),
            _ => Some(t),
        });
    let monthly_income = latest_income.map(|t| to_f64(t.amount)).unwrap_or(0.0);

    let window_start = now - Duration::days(options.expense_window_days);
    let mut expenses_by_category: Vec<CategoryAmount> = Vec::new();
    for tx in records
        .transactions
        .iter()
        .filter(|t| t.transaction_type == TransactionType::Expense && t.date >= window_start)
    {
        let category = tx
            .category
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or("Other");
        let amount = to_f64(tx.amount);

        match expenses_by_category.iter_mut().find(|c| c.category == category) {
            Some(entry) => entry.amount += amount,
            None => expenses_by_category.push(CategoryAmount {
                category: category.to_string(),
                amount,
            }),
        }
    }

    let monthly_expenses: f64 = expenses_by_category.iter().map(|c| c.amount).sum();
    let savings_rate = ratio_percent(monthly_income - monthly_expenses, monthly_income);

    // sort_by is stable, so equal amounts keep grouping order
    let mut top_categories = expenses_by_category.clone();
    top_categories.sort_by(|a, b| {
        b.amount
            .partial_cmp(&a.amount)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    top_categories.truncate(options.top_category_count);

    let accounts: Vec<AccountBalance> = records
        .accounts
        .iter()
        .map(|a| balance_line(a, "Account"))
        .collect();

    let investments: Vec<AccountBalance> = records
        .accounts
        .iter()
        .filter(|a| a.account_type == AccountType::Investment)
        .map(|a| balance_line(a, "Investment"))
        .collect();

    let debt_accounts: Vec<AccountBalance> = records
        .accounts
        .iter()
        .filter(|a| a.account_type.is_debt())
        .map(|a| balance_line(a, "Debt"))
        .collect();

    let total_debt: f64 = debt_accounts.iter().map(|d| d.balance).sum();
    let debt_to_income = ratio_percent(total_debt, monthly_income * 12.0);

    let budget = records.budgets.first().map(|b| {
        let limit = to_f64(b.amount);
        BudgetUtilization {
            limit,
            spent: monthly_expenses,
            remaining: limit - monthly_expenses,
            percent_used: ratio_percent(monthly_expenses, limit),
        }
    });

    debug!(
        user_id = %profile.user_id,
        monthly_income,
        monthly_expenses,
        categories = expenses_by_category.len(),
        "Aggregated financial summary"
    );

    FinancialSummary {
        name: profile
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| "User".to_string()),
        monthly_income,
        total_savings,
        savings_rate,
        monthly_expenses,
        expenses_by_category,
        top_categories,
        accounts,
        investments,
        debt_accounts,
        total_debt,
        debt_to_income,
        budget,
        as_of: now,
    }
}

//
// ================= Presentation =================
//
// The prompt embeds this shape verbatim. All money is fixed to 2 decimals.

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FinancialContext {
    pub user: UserContext,
    pub current_date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    pub name: String,
    pub monthly_income: String,
    pub total_savings: String,
    pub savings_rate: String,
    pub expenses: ExpenseContext,
    pub accounts: Vec<AccountContext>,
    pub investments: Vec<NamedBalance>,
    pub debt: DebtContext,
    pub budget: Option<BudgetContext>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseContext {
    pub monthly_total: String,
    pub categories: Vec<CategoryContext>,
    pub top_categories: Vec<TopCategoryContext>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryContext {
    pub category: String,
    pub amount: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TopCategoryContext {
    pub category: String,
    pub amount: String,
    pub percent_of_total: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountContext {
    pub name: String,
    #[serde(rename = "type")]
    pub account_type: AccountType,
    pub balance: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NamedBalance {
    pub name: String,
    pub balance: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DebtContext {
    pub total: String,
    pub debt_to_income_ratio: String,
    pub accounts: Vec<NamedBalance>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BudgetContext {
    pub monthly_limit: String,
    pub spent: String,
    pub remaining: String,
    pub percent_used: String,
}

pub fn money(value: f64) -> String {
    format!("{:.2}", value)
}

pub fn percent(value: f64) -> String {
    format!("{:.2}%", value)
}

impl FinancialSummary {
    pub fn to_context(&self) -> FinancialContext {
        let named = |lines: &[AccountBalance]| -> Vec<NamedBalance> {
            lines
                .iter()
                .map(|l| NamedBalance {
                    name: l.name.clone(),
                    balance: money(l.balance),
                })
                .collect()
        };

        let top_categories = self
            .top_categories
            .iter()
            .map(|c| TopCategoryContext {
                category: c.category.clone(),
                amount: money(c.amount),
                percent_of_total: if self.monthly_expenses > 0.0 {
                    percent(c.amount / self.monthly_expenses * 100.0)
                } else {
                    "0%".to_string()
                },
            })
            .collect();

        FinancialContext {
            user: UserContext {
                name: self.name.clone(),
                monthly_income: money(self.monthly_income),
                total_savings: money(self.total_savings),
                savings_rate: percent(self.savings_rate),
                expenses: ExpenseContext {
                    monthly_total: money(self.monthly_expenses),
                    categories: self
                        .expenses_by_category
                        .iter()
                        .map(|c| CategoryContext {
                            category: c.category.clone(),
                            amount: money(c.amount),
                        })
                        .collect(),
                    top_categories,
                },
                accounts: self
                    .accounts
                    .iter()
                    .map(|a| AccountContext {
                        name: a.name.clone(),
                        account_type: a.account_type,
                        balance: money(a.balance),
                    })
                    .collect(),
                investments: named(&self.investments),
                debt: DebtContext {
                    total: money(self.total_debt),
                    debt_to_income_ratio: percent(self.debt_to_income),
                    accounts: named(&self.debt_accounts),
                },
                budget: self.budget.as_ref().map(|b| BudgetContext {
                    monthly_limit: money(b.limit),
                    spent: money(b.spent),
                    remaining: money(b.remaining),
                    percent_used: percent(b.percent_used),
                }),
            },
            current_date: self.as_of.format("%Y-%m-%d").to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Budget;
    use uuid::Uuid;

    fn profile() -> UserProfile {
        UserProfile {
            user_id: Uuid::new_v4(),
            identity: "user_123".to_string(),
            name: Some("Asha".to_string()),
            email: None,
            created_at: Utc::now(),
        }
    }

    fn account(kind: AccountType, balance: i64) -> Account {
        Account {
            account_id: Uuid::new_v4(),
            user_id: Uuid::nil(),
            name: format!("{} account", kind),
            account_type: kind,
            balance: Some(Decimal::new(balance, 0)),
            is_default: false,
        }
    }

    fn tx(
        kind: TransactionType,
        amount: i64,
        category: Option<&str>,
        date: DateTime<Utc>,
    ) -> Transaction {
        Transaction {
            transaction_id: Uuid::new_v4(),
            account_id: Uuid::nil(),
            user_id: Uuid::nil(),
            transaction_type: kind,
            amount: Some(Decimal::new(amount, 0)),
            category: category.map(str::to_string),
            date,
        }
    }

    fn run(records: &FinancialRecords, now: DateTime<Utc>) -> FinancialSummary {
        aggregate(&profile(), records, &AggregationOptions::default(), now)
    }

    #[test]
    fn test_savings_rate_is_zero_without_income() {
        let now = Utc::now();
        let records = FinancialRecords {
            transactions: vec![tx(TransactionType::Expense, 500, Some("Food"), now)],
            ..Default::default()
        };

        let summary = run(&records, now);
        assert_eq!(summary.monthly_income, 0.0);
        assert_eq!(summary.monthly_expenses, 500.0);
        assert_eq!(summary.savings_rate, 0.0);
    }

    #[test]
    fn test_debt_to_income_is_zero_without_income() {
        let now = Utc::now();
        let records = FinancialRecords {
            accounts: vec![account(AccountType::Loan, 20_000), account(AccountType::Credit, 1_500)],
            ..Default::default()
        };

        let summary = run(&records, now);
        assert_eq!(summary.total_debt, 21_500.0);
        assert_eq!(summary.debt_to_income, 0.0);
        assert_eq!(summary.debt_accounts.len(), 2);
    }

    #[test]
    fn test_monthly_income_uses_most_recent_only() {
        let now = Utc::now();
        let records = FinancialRecords {
            transactions: vec![
                tx(TransactionType::Income, 3_000, None, now - Duration::days(40)),
                tx(TransactionType::Income, 4_000, None, now - Duration::days(2)),
                tx(TransactionType::Income, 1_000, None, now - Duration::days(10)),
            ],
            ..Default::default()
        };

        let summary = run(&records, now);
        assert_eq!(summary.monthly_income, 4_000.0);
    }

    #[test]
    fn test_top_categories_sorted_descending() {
        let now = Utc::now();
        let records = FinancialRecords {
            transactions: vec![
                tx(TransactionType::Expense, 300, Some("A"), now),
                tx(TransactionType::Expense, 100, Some("B"), now),
                tx(TransactionType::Expense, 500, Some("C"), now),
            ],
            ..Default::default()
        };

        let summary = run(&records, now);
        let order: Vec<&str> = summary.top_categories.iter().map(|c| c.category.as_str()).collect();
        assert_eq!(order, vec!["C", "A", "B"]);
    }

    #[test]
    fn test_top_categories_capped_and_stable_on_ties() {
        let now = Utc::now();
        let records = FinancialRecords {
            transactions: vec![
                tx(TransactionType::Expense, 50, Some("Rent"), now),
                tx(TransactionType::Expense, 50, Some("Food"), now),
                tx(TransactionType::Expense, 80, Some("Travel"), now),
                tx(TransactionType::Expense, 50, Some("Fun"), now),
            ],
            ..Default::default()
        };

        let summary = run(&records, now);
        let order: Vec<&str> = summary.top_categories.iter().map(|c| c.category.as_str()).collect();
        assert_eq!(order, vec!["Travel", "Rent", "Food"]);
    }

    #[test]
    fn test_expense_window_boundary() {
        let now = Utc::now();
        let records = FinancialRecords {
            transactions: vec![
                tx(TransactionType::Expense, 120, Some("Food"), now - Duration::days(30)),
                tx(TransactionType::Expense, 999, Some("Travel"), now - Duration::days(31)),
            ],
            ..Default::default()
        };

        let summary = run(&records, now);
        assert_eq!(summary.monthly_expenses, 120.0);
        assert_eq!(summary.expenses_by_category.len(), 1);
        assert_eq!(summary.expenses_by_category[0].category, "Food");
    }

    #[test]
    fn test_missing_category_groups_under_other() {
        let now = Utc::now();
        let records = FinancialRecords {
            transactions: vec![
                tx(TransactionType::Expense, 10, None, now),
                tx(TransactionType::Expense, 15, Some(""), now),
            ],
            ..Default::default()
        };

        let summary = run(&records, now);
        assert_eq!(
            summary.expenses_by_category,
            vec![CategoryAmount { category: "Other".to_string(), amount: 25.0 }]
        );
    }

    #[test]
    fn test_categories_group_on_exact_label() {
        let now = Utc::now();
        let records = FinancialRecords {
            transactions: vec![
                tx(TransactionType::Expense, 10, Some("Food"), now),
                tx(TransactionType::Expense, 20, Some(" Food"), now),
                tx(TransactionType::Expense, 5, Some("Food"), now),
            ],
            ..Default::default()
        };

        let summary = run(&records, now);
        assert_eq!(
            summary.expenses_by_category,
            vec![
                CategoryAmount { category: "Food".to_string(), amount: 15.0 },
                CategoryAmount { category: " Food".to_string(), amount: 20.0 },
            ]
        );
    }

    #[test]
    fn test_first_budget_only() {
        let now = Utc::now();
        let records = FinancialRecords {
            transactions: vec![
                tx(TransactionType::Income, 5_000, None, now),
                tx(TransactionType::Expense, 500, Some("Food"), now),
            ],
            budgets: vec![
                Budget { budget_id: Uuid::new_v4(), user_id: Uuid::nil(), amount: Some(Decimal::new(2_000, 0)) },
                Budget { budget_id: Uuid::new_v4(), user_id: Uuid::nil(), amount: Some(Decimal::new(9_000, 0)) },
            ],
            ..Default::default()
        };

        let summary = run(&records, now);
        let budget = summary.budget.expect("budget present");
        assert_eq!(budget.limit, 2_000.0);
        assert_eq!(budget.spent, 500.0);
        assert_eq!(budget.remaining, 1_500.0);
        assert_eq!(budget.percent_used, 25.0);
        assert_eq!(summary.savings_rate, 90.0);
    }

    #[test]
    fn test_zero_budget_limit_reports_zero_percent() {
        let now = Utc::now();
        let records = FinancialRecords {
            transactions: vec![tx(TransactionType::Expense, 40, None, now)],
            budgets: vec![Budget { budget_id: Uuid::new_v4(), user_id: Uuid::nil(), amount: None }],
            ..Default::default()
        };

        let budget = run(&records, now).budget.expect("budget present");
        assert_eq!(budget.percent_used, 0.0);
        assert_eq!(budget.remaining, -40.0);
    }

    #[test]
    fn test_context_formats_two_decimals() {
        let now = Utc::now();
        let mut savings = account(AccountType::Savings, 0);
        savings.balance = Some(Decimal::new(123_456, 2));
        let records = FinancialRecords {
            accounts: vec![savings, account(AccountType::Investment, 800)],
            transactions: vec![
                tx(TransactionType::Income, 3_000, None, now),
                tx(TransactionType::Expense, 750, Some("Rent"), now),
            ],
            ..Default::default()
        };

        let context = run(&records, now).to_context();
        assert_eq!(context.user.name, "Asha");
        assert_eq!(context.user.total_savings, "2034.56");
        assert_eq!(context.user.monthly_income, "3000.00");
        assert_eq!(context.user.savings_rate, "75.00%");
        assert_eq!(context.user.expenses.top_categories[0].percent_of_total, "100.00%");
        assert_eq!(context.user.investments.len(), 1);
        assert!(context.user.budget.is_none());
    }
}
