//! Chat session controller
//!
//! One turn: identity check → rate limit → session lock → load transcript →
//! resolve user → aggregate → assemble prompt → primary model (fallback once) →
//! save transcript.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{ChatConfig, GatewayConfig, ModelConfig};
use crate::error::AdvisorError;
use crate::gateway::AdviceGateway;
use crate::metrics::{aggregate, AggregationOptions};
use crate::models::{Account, AccountWithTransactions, BulkDeleteOutcome, ChatMessage, UserProfile};
use crate::prompt::PromptAssembler;
use crate::ratelimit::RateLimiter;
use crate::session::{ChatSession, SessionKey, SessionStore};
use crate::store::{load_records, FinanceStore};
use crate::Result;

/// One inbound chat turn, already detached from the transport.
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    pub message: String,
    /// Client-held transcript, used only to seed an empty session
    pub chat_history: Vec<ChatMessage>,
    pub session_id: Option<String>,
}

impl TurnRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnReply {
    pub response: String,
    /// Model that produced the reply
    pub model: String,
    pub session_id: Uuid,
}

pub struct ChatController {
    store: Arc<dyn FinanceStore>,
    gateway: Arc<dyn AdviceGateway>,
    sessions: Arc<dyn SessionStore>,
    limiter: Arc<RateLimiter>,
    assembler: PromptAssembler,
    chat: ChatConfig,
    gateway_config: GatewayConfig,
    session_locks: Mutex<HashMap<SessionKey, Arc<Mutex<()>>>>,
}

impl ChatController {
    pub fn new(
        store: Arc<dyn FinanceStore>,
        gateway: Arc<dyn AdviceGateway>,
        sessions: Arc<dyn SessionStore>,
        limiter: Arc<RateLimiter>,
        chat: ChatConfig,
        gateway_config: GatewayConfig,
    ) -> Self {
        let assembler = PromptAssembler::new(chat.assistant_name.clone(), chat.max_prompt_chars);
        Self {
            store,
            gateway,
            sessions,
            limiter,
            assembler,
            chat,
            gateway_config,
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Run one chat turn for `identity`.
    pub async fn handle_turn(&self, identity: Option<&str>, request: TurnRequest) -> Result<TurnReply> {
        let identity = identity
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(AdvisorError::Authentication)?;

        let message = request.message.trim();
        if message.is_empty() {
            return Err(AdvisorError::InvalidRequest("Message is required".to_string()));
        }

        let decision = self.limiter.check(identity, 1).await;
        if !decision.allowed {
            return Err(AdvisorError::RateLimited {
                remaining: decision.remaining,
                reset_in_secs: decision.reset_in_secs,
            });
        }

        let key = SessionKey::resolve(identity, request.session_id.as_deref());
        let lock = self.session_lock(&key).await;
        let result = {
            let _turn = lock.lock().await;
            self.locked_turn(identity, &key, request).await
        };
        self.release_session_lock(&key, lock).await;

        result
    }

    async fn locked_turn(&self, identity: &str, key: &SessionKey, request: TurnRequest) -> Result<TurnReply> {
        let message = request.message.trim();
        let mut session = self.sessions.load(key, self.chat.max_history).await?;
        if session.is_empty() && !request.chat_history.is_empty() {
            debug!(
                identity,
                seeded = request.chat_history.len(),
                "Seeding empty session from client history"
            );
            session.seed(request.chat_history);
        }

        session.begin_turn(ChatMessage::user(message));

        let outcome = self.run_turn(identity, &session, message).await;

        match &outcome {
            Ok((reply, _)) => session.finish_turn(Some(ChatMessage::assistant(reply.clone()))),
            Err(_) => session.finish_turn(None),
        }
        self.sessions.save(&session).await?;

        let (response, model) = outcome?;
        Ok(TurnReply {
            response,
            model,
            session_id: session.session_id,
        })
    }

    async fn run_turn(
        &self,
        identity: &str,
        session: &ChatSession,
        message: &str,
    ) -> Result<(String, String)> {
        let profile = self.resolve_user(identity).await?;

        let records = load_records(
            self.store.as_ref(),
            profile.user_id,
            self.chat.recent_transaction_limit,
        )
        .await?;
        if records.is_empty() {
            return Err(AdvisorError::NoData(profile.user_id.to_string()));
        }

        let options = AggregationOptions {
            expense_window_days: self.chat.expense_window_days,
            top_category_count: self.chat.top_category_count,
        };
        let summary = aggregate(&profile, &records, &options, Utc::now());
        let context = summary.to_context();

        let history = session.history_before_last();
        let prompt = self.assembler.assemble(&context, &history, message)?;

        info!(
            user_id = %profile.user_id,
            prompt_len = prompt.chars().count(),
            history = history.len(),
            "Submitting chat turn"
        );

        self.generate(&prompt).await
    }

    /// Primary model first, then exactly one fallback attempt.
    async fn generate(&self, prompt: &str) -> Result<(String, String)> {
        let primary = &self.gateway_config.primary;
        match self.attempt(prompt, primary).await {
            Ok(reply) => return Ok((reply, primary.model.clone())),
            Err(e) => warn!(model = %primary.model, error = %e, "Primary model failed, trying fallback"),
        }

        let fallback = &self.gateway_config.fallback;
        match self.attempt(prompt, fallback).await {
            Ok(reply) => Ok((reply, fallback.model.clone())),
            Err(e) => {
                error!(model = %fallback.model, error = %e, "Fallback model failed");
                Err(AdvisorError::Gateway(format!("all models failed: {}", e)))
            }
        }
    }

    async fn attempt(&self, prompt: &str, model: &ModelConfig) -> Result<String> {
        let started = Instant::now();
        let timeout = self.gateway_config.timeout;

        let result = tokio::time::timeout(
            timeout,
            self.gateway.submit(prompt, model, &self.gateway_config.safety),
        )
        .await
        .unwrap_or(Err(AdvisorError::GatewayTimeout(timeout.as_secs())));

        debug!(
            model = %model.model,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "Gateway attempt finished"
        );
        result
    }

    async fn resolve_user(&self, identity: &str) -> Result<UserProfile> {
        self.store
            .find_user_by_identity(identity)
            .await?
            .ok_or_else(|| AdvisorError::NotFound(format!("user {}", identity)))
    }

    async fn session_lock(&self, key: &SessionKey) -> Arc<Mutex<()>> {
        let mut locks = self.session_locks.lock().await;
        locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Forget the lock once no other turn holds or waits on it.
    async fn release_session_lock(&self, key: &SessionKey, lock: Arc<Mutex<()>>) {
        let mut locks = self.session_locks.lock().await;
        // one handle in the map, one here
        if Arc::strong_count(&lock) == 2 {
            locks.remove(key);
        }
    }

    /// Sessions with a turn in flight or queued.
    pub async fn active_sessions(&self) -> usize {
        self.session_locks.lock().await.len()
    }

    /// Delete the caller's transactions and reverse their balance effect.
    pub async fn bulk_delete(&self, identity: Option<&str>, transaction_ids: &[Uuid]) -> Result<BulkDeleteOutcome> {
        let identity = identity.filter(|id| !id.trim().is_empty()).ok_or(AdvisorError::Authentication)?;
        if transaction_ids.is_empty() {
            return Err(AdvisorError::InvalidRequest("No transactions selected".to_string()));
        }

        let profile = self.resolve_user(identity).await?;
        let outcome = self
            .store
            .bulk_delete_transactions(profile.user_id, transaction_ids)
            .await?;

        info!(user_id = %profile.user_id, deleted = outcome.deleted, "Bulk delete complete");
        Ok(outcome)
    }

    /// One account with its transactions, newest first.
    pub async fn account(&self, identity: Option<&str>, account_id: Uuid) -> Result<AccountWithTransactions> {
        let identity = identity.filter(|id| !id.trim().is_empty()).ok_or(AdvisorError::Authentication)?;
        let profile = self.resolve_user(identity).await?;
        self.store
            .account_with_transactions(profile.user_id, account_id)
            .await?
            .ok_or(AdvisorError::AccountNotFound(account_id))
    }

    pub async fn set_default_account(&self, identity: Option<&str>, account_id: Uuid) -> Result<Account> {
        let identity = identity.filter(|id| !id.trim().is_empty()).ok_or(AdvisorError::Authentication)?;
        let profile = self.resolve_user(identity).await?;
        self.store.set_default_account(profile.user_id, account_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateLimitConfig, SafetySetting};
    use crate::models::{
        AccountType, Budget, ChatRole, Transaction, TransactionType,
    };
    use crate::session::{InMemorySessionStore, SessionState};
    use crate::store::InMemoryFinanceStore;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const IDENTITY: &str = "user_2abc";

    enum Behavior {
        Reply(&'static str),
        Fail,
        Hang(Duration),
    }

    /// Answers per model name and records every call.
    struct ScriptedGateway {
        script: HashMap<String, Behavior>,
        calls: std::sync::Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedGateway {
        fn new(script: Vec<(&str, Behavior)>) -> Self {
            Self {
                script: script.into_iter().map(|(m, b)| (m.to_string(), b)).collect(),
                calls: std::sync::Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AdviceGateway for ScriptedGateway {
        async fn submit(&self, _prompt: &str, model: &ModelConfig, _safety: &[SafetySetting]) -> Result<String> {
            self.calls.lock().unwrap().push(model.model.clone());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let result = match self.script.get(&model.model) {
                Some(Behavior::Reply(text)) => {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(text.to_string())
                }
                Some(Behavior::Hang(d)) => {
                    tokio::time::sleep(*d).await;
                    Ok("too late".to_string())
                }
                Some(Behavior::Fail) | None => Err(AdvisorError::Gateway("upstream 503".to_string())),
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    /// Delegates to an in-memory store and counts lookups.
    struct CountingStore {
        inner: InMemoryFinanceStore,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl FinanceStore for CountingStore {
        async fn find_user_by_identity(&self, identity: &str) -> Result<Option<UserProfile>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.inner.find_user_by_identity(identity).await
        }
        async fn accounts_with_transactions(&self, user_id: Uuid) -> Result<Vec<AccountWithTransactions>> {
            self.inner.accounts_with_transactions(user_id).await
        }
        async fn account_with_transactions(
            &self,
            user_id: Uuid,
            account_id: Uuid,
        ) -> Result<Option<AccountWithTransactions>> {
            self.inner.account_with_transactions(user_id, account_id).await
        }
        async fn recent_transactions(&self, user_id: Uuid, limit: usize) -> Result<Vec<Transaction>> {
            self.inner.recent_transactions(user_id, limit).await
        }
        async fn budgets(&self, user_id: Uuid) -> Result<Vec<Budget>> {
            self.inner.budgets(user_id).await
        }
        async fn bulk_delete_transactions(&self, user_id: Uuid, ids: &[Uuid]) -> Result<BulkDeleteOutcome> {
            self.inner.bulk_delete_transactions(user_id, ids).await
        }
        async fn set_default_account(&self, user_id: Uuid, account_id: Uuid) -> Result<Account> {
            self.inner.set_default_account(user_id, account_id).await
        }
    }

    async fn seeded_store(with_data: bool) -> InMemoryFinanceStore {
        let store = InMemoryFinanceStore::new();
        let user_id = Uuid::new_v4();
        store
            .insert_user(UserProfile {
                user_id,
                identity: IDENTITY.to_string(),
                name: Some("Asha".to_string()),
                email: None,
                created_at: Utc::now(),
            })
            .await;

        if with_data {
            let account_id = Uuid::new_v4();
            store
                .insert_account(Account {
                    account_id,
                    user_id,
                    name: "Main".to_string(),
                    account_type: AccountType::Current,
                    balance: Some(Decimal::new(2_500, 0)),
                    is_default: true,
                })
                .await;
            store
                .insert_transaction(Transaction {
                    transaction_id: Uuid::new_v4(),
                    account_id,
                    user_id,
                    transaction_type: TransactionType::Income,
                    amount: Some(Decimal::new(4_000, 0)),
                    category: Some("Salary".to_string()),
                    date: Utc::now(),
                })
                .await;
        }
        store
    }

    fn gateway_config(timeout: Duration) -> GatewayConfig {
        GatewayConfig {
            primary: ModelConfig::named("primary"),
            fallback: ModelConfig::named("fallback"),
            timeout,
            ..GatewayConfig::default()
        }
    }

    fn controller_with(
        store: Arc<dyn FinanceStore>,
        gateway: Arc<ScriptedGateway>,
        sessions: Arc<InMemorySessionStore>,
        rate: RateLimitConfig,
        timeout: Duration,
    ) -> ChatController {
        ChatController::new(
            store,
            gateway,
            sessions,
            Arc::new(RateLimiter::new(rate)),
            ChatConfig::default(),
            gateway_config(timeout),
        )
    }

    async fn controller(script: Vec<(&str, Behavior)>) -> (ChatController, Arc<ScriptedGateway>, Arc<InMemorySessionStore>) {
        let gateway = Arc::new(ScriptedGateway::new(script));
        let sessions = Arc::new(InMemorySessionStore::new());
        let ctrl = controller_with(
            Arc::new(seeded_store(true).await),
            gateway.clone(),
            sessions.clone(),
            RateLimitConfig::default(),
            Duration::from_secs(2),
        );
        (ctrl, gateway, sessions)
    }

    #[tokio::test]
    async fn test_primary_reply_is_recorded() {
        let (ctrl, gateway, sessions) = controller(vec![("primary", Behavior::Reply("Save more."))]).await;

        let reply = ctrl
            .handle_turn(Some(IDENTITY), TurnRequest::new("How am I doing?"))
            .await
            .unwrap();

        assert_eq!(reply.response, "Save more.");
        assert_eq!(reply.model, "primary");
        assert_eq!(gateway.calls(), vec!["primary"]);

        let session = sessions.load(&SessionKey::resolve(IDENTITY, None), 20).await.unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        let roles: Vec<ChatRole> = session.messages().map(|m| m.role).collect();
        assert_eq!(roles, vec![ChatRole::User, ChatRole::Assistant]);
    }

    #[tokio::test]
    async fn test_fallback_after_primary_failure() {
        let (ctrl, gateway, _) = controller(vec![
            ("primary", Behavior::Fail),
            ("fallback", Behavior::Reply("From fallback")),
        ])
        .await;

        let reply = ctrl
            .handle_turn(Some(IDENTITY), TurnRequest::new("Budget tips?"))
            .await
            .unwrap();

        assert_eq!(reply.response, "From fallback");
        assert_eq!(reply.model, "fallback");
        assert_eq!(gateway.calls(), vec!["primary", "fallback"]);
    }

    #[tokio::test]
    async fn test_both_models_failing_surfaces_generic_error() {
        let (ctrl, gateway, sessions) =
            controller(vec![("primary", Behavior::Fail), ("fallback", Behavior::Fail)]).await;

        let err = ctrl
            .handle_turn(Some(IDENTITY), TurnRequest::new("Hello"))
            .await
            .unwrap_err();

        assert!(matches!(err, AdvisorError::Gateway(_)));
        assert_eq!(
            err.user_message(),
            "Failed to generate AI response. Please try again later."
        );
        assert_eq!(gateway.calls().len(), 2);

        let session = sessions.load(&SessionKey::resolve(IDENTITY, None), 20).await.unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.message_count(), 1);
    }

    #[tokio::test]
    async fn test_primary_timeout_falls_back() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            ("primary", Behavior::Hang(Duration::from_secs(5))),
            ("fallback", Behavior::Reply("Quick answer")),
        ]));
        let ctrl = controller_with(
            Arc::new(seeded_store(true).await),
            gateway.clone(),
            Arc::new(InMemorySessionStore::new()),
            RateLimitConfig::default(),
            Duration::from_millis(100),
        );

        let started = Instant::now();
        let reply = ctrl
            .handle_turn(Some(IDENTITY), TurnRequest::new("Hi"))
            .await
            .unwrap();

        assert_eq!(reply.response, "Quick answer");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_missing_identity_is_rejected() {
        let (ctrl, gateway, _) = controller(vec![("primary", Behavior::Reply("x"))]).await;

        let err = ctrl.handle_turn(None, TurnRequest::new("Hi")).await.unwrap_err();
        assert!(matches!(err, AdvisorError::Authentication));

        let err = ctrl.handle_turn(Some("  "), TurnRequest::new("Hi")).await.unwrap_err();
        assert!(matches!(err, AdvisorError::Authentication));
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected() {
        let (ctrl, gateway, _) = controller(vec![("primary", Behavior::Reply("x"))]).await;

        let err = ctrl.handle_turn(Some(IDENTITY), TurnRequest::new("   ")).await.unwrap_err();
        assert!(matches!(err, AdvisorError::InvalidRequest(_)));
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_found() {
        let (ctrl, gateway, _) = controller(vec![("primary", Behavior::Reply("x"))]).await;

        let err = ctrl
            .handle_turn(Some("user_missing"), TurnRequest::new("Hi"))
            .await
            .unwrap_err();

        assert!(matches!(err, AdvisorError::NotFound(_)));
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_user_without_records_gets_no_data() {
        let gateway = Arc::new(ScriptedGateway::new(vec![("primary", Behavior::Reply("x"))]));
        let ctrl = controller_with(
            Arc::new(seeded_store(false).await),
            gateway.clone(),
            Arc::new(InMemorySessionStore::new()),
            RateLimitConfig::default(),
            Duration::from_secs(1),
        );

        let err = ctrl.handle_turn(Some(IDENTITY), TurnRequest::new("Hi")).await.unwrap_err();
        assert!(matches!(err, AdvisorError::NoData(_)));
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_rate_limited_turn_never_reaches_store() {
        let store = Arc::new(CountingStore {
            inner: seeded_store(true).await,
            lookups: AtomicUsize::new(0),
        });
        let gateway = Arc::new(ScriptedGateway::new(vec![("primary", Behavior::Reply("ok"))]));
        let ctrl = controller_with(
            store.clone(),
            gateway.clone(),
            Arc::new(InMemorySessionStore::new()),
            RateLimitConfig {
                capacity: 1,
                refill_interval: Duration::from_secs(3600),
            },
            Duration::from_secs(1),
        );

        ctrl.handle_turn(Some(IDENTITY), TurnRequest::new("first")).await.unwrap();
        assert_eq!(store.lookups.load(Ordering::SeqCst), 1);

        let err = ctrl
            .handle_turn(Some(IDENTITY), TurnRequest::new("second"))
            .await
            .unwrap_err();

        match err {
            AdvisorError::RateLimited { remaining, reset_in_secs } => {
                assert_eq!(remaining, 0);
                assert!(reset_in_secs > 0);
            }
            other => panic!("expected rate limit, got {:?}", other),
        }
        assert_eq!(store.lookups.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_turns_on_one_session_are_serialized() {
        let (ctrl, gateway, sessions) = controller(vec![("primary", Behavior::Reply("answer"))]).await;
        let ctrl = Arc::new(ctrl);

        let a = {
            let ctrl = ctrl.clone();
            tokio::spawn(async move { ctrl.handle_turn(Some(IDENTITY), TurnRequest::new("one")).await })
        };
        let b = {
            let ctrl = ctrl.clone();
            tokio::spawn(async move { ctrl.handle_turn(Some(IDENTITY), TurnRequest::new("two")).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(gateway.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(ctrl.active_sessions().await, 0);

        let session = sessions.load(&SessionKey::resolve(IDENTITY, None), 20).await.unwrap();
        let roles: Vec<ChatRole> = session.messages().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![ChatRole::User, ChatRole::Assistant, ChatRole::User, ChatRole::Assistant]
        );
    }

    #[tokio::test]
    async fn test_session_locks_released_after_turns() {
        let (ctrl, _, _) = controller(vec![("primary", Behavior::Reply("ok")), ("fallback", Behavior::Fail)]).await;

        for i in 0..5 {
            let mut request = TurnRequest::new("hi");
            request.session_id = Some(format!("device-{}", i));
            ctrl.handle_turn(Some(IDENTITY), request).await.unwrap();
        }

        // Failed turns release their lock too.
        let mut request = TurnRequest::new("hi");
        request.session_id = Some("device-x".to_string());
        ctrl.handle_turn(Some("user_missing"), request).await.unwrap_err();

        assert_eq!(ctrl.active_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_client_history_seeds_empty_session_only() {
        let (ctrl, _, sessions) = controller(vec![("primary", Behavior::Reply("reply"))]).await;

        let mut request = TurnRequest::new("follow-up");
        request.chat_history = vec![ChatMessage::user("earlier"), ChatMessage::assistant("earlier reply")];
        ctrl.handle_turn(Some(IDENTITY), request.clone()).await.unwrap();

        let key = SessionKey::resolve(IDENTITY, None);
        assert_eq!(sessions.load(&key, 20).await.unwrap().message_count(), 4);

        // Stored transcript wins over the client copy from now on.
        ctrl.handle_turn(Some(IDENTITY), request).await.unwrap();
        assert_eq!(sessions.load(&key, 20).await.unwrap().message_count(), 6);
    }

    #[tokio::test]
    async fn test_bulk_delete_requires_selection() {
        let (ctrl, _, _) = controller(vec![]).await;

        let err = ctrl.bulk_delete(Some(IDENTITY), &[]).await.unwrap_err();
        assert!(matches!(err, AdvisorError::InvalidRequest(_)));

        let outcome = ctrl.bulk_delete(Some(IDENTITY), &[Uuid::new_v4()]).await.unwrap();
        assert_eq!(outcome.deleted, 0);
    }
}
