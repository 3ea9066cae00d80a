use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use welth_advisor::{
    config::{ChatConfig, GatewayConfig, RateLimitConfig},
    controller::{ChatController, TurnRequest},
    gateway::DryRunGateway,
    metrics::{aggregate, AggregationOptions},
    prompt::PromptAssembler,
    ratelimit::RateLimiter,
    session::InMemorySessionStore,
    store::{load_records, InMemoryFinanceStore},
    Account, AccountType, Budget, Transaction, TransactionType, UserProfile,
};

const DEMO_IDENTITY: &str = "user_demo";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .init();

    info!("Welth Advisor demo starting");

    let store = Arc::new(InMemoryFinanceStore::new());
    let profile = seed(&store).await;

    let chat = ChatConfig::default();
    let records = load_records(store.as_ref(), profile.user_id, chat.recent_transaction_limit).await?;
    let options = AggregationOptions {
        expense_window_days: chat.expense_window_days,
        top_category_count: chat.top_category_count,
    };
    let summary = aggregate(&profile, &records, &options, Utc::now());
    let context = summary.to_context();

    println!("\n=== FINANCIAL CONTEXT ===");
    println!("{}", serde_json::to_string_pretty(&context)?);

    let assembler = PromptAssembler::new(chat.assistant_name.clone(), chat.max_prompt_chars);
    let prompt = assembler.assemble(&context, &[], "Where can I cut spending?")?;
    println!("\n=== PROMPT ({} chars) ===", prompt.chars().count());
    println!("{}", prompt);

    let controller = ChatController::new(
        store,
        Arc::new(DryRunGateway),
        Arc::new(InMemorySessionStore::new()),
        Arc::new(RateLimiter::new(RateLimitConfig::default())),
        chat,
        GatewayConfig::default(),
    );

    let reply = controller
        .handle_turn(Some(DEMO_IDENTITY), TurnRequest::new("Where can I cut spending?"))
        .await?;

    println!("\n=== REPLY ({}) ===", reply.model);
    println!("{}", reply.response);

    Ok(())
}

async fn seed(store: &InMemoryFinanceStore) -> UserProfile {
    let user_id = Uuid::new_v4();
    let profile = UserProfile {
        user_id,
        identity: DEMO_IDENTITY.to_string(),
        name: Some("Demo User".to_string()),
        email: Some("demo@example.com".to_string()),
        created_at: Utc::now(),
    };
    store.insert_user(profile.clone()).await;

    let current = Account {
        account_id: Uuid::new_v4(),
        user_id,
        name: "Everyday".to_string(),
        account_type: AccountType::Current,
        balance: Some(Decimal::new(320_000, 2)),
        is_default: true,
    };
    let brokerage = Account {
        account_id: Uuid::new_v4(),
        user_id,
        name: "Index Fund".to_string(),
        account_type: AccountType::Investment,
        balance: Some(Decimal::new(1_250_000, 2)),
        is_default: false,
    };
    let card = Account {
        account_id: Uuid::new_v4(),
        user_id,
        name: "Credit Card".to_string(),
        account_type: AccountType::Credit,
        balance: Some(Decimal::new(-45_000, 2)),
        is_default: false,
    };
    let everyday_id = current.account_id;
    for account in [current, brokerage, card] {
        store.insert_account(account).await;
    }

    let entries = [
        (TransactionType::Income, 520_000, "Salary", 2),
        (TransactionType::Expense, 140_000, "Rent", 3),
        (TransactionType::Expense, 38_050, "Groceries", 5),
        (TransactionType::Expense, 12_999, "Dining", 8),
        (TransactionType::Expense, 6_500, "Transport", 12),
        (TransactionType::Expense, 24_000, "Travel", 45),
    ];
    for (kind, cents, category, days_ago) in entries {
        store
            .insert_transaction(Transaction {
                transaction_id: Uuid::new_v4(),
                account_id: everyday_id,
                user_id,
                transaction_type: kind,
                amount: Some(Decimal::new(cents, 2)),
                category: Some(category.to_string()),
                date: Utc::now() - Duration::days(days_ago),
            })
            .await;
    }

    store
        .insert_budget(Budget {
            budget_id: Uuid::new_v4(),
            user_id,
            amount: Some(Decimal::new(250_000, 2)),
        })
        .await;

    profile
}
