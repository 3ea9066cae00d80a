//! Session persistence
//!
//! In-memory for development and tests, Postgres when a database is configured.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use uuid::Uuid;

use super::{ChatSession, SessionKey};
use crate::error::AdvisorError;
use crate::models::{ChatMessage, ChatRole};
use crate::Result;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the session for `key`, or a fresh empty one.
    async fn load(&self, key: &SessionKey, max_history: usize) -> Result<ChatSession>;
    async fn save(&self, session: &ChatSession) -> Result<()>;
}

pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<SessionKey, ChatSession>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, key: &SessionKey, max_history: usize) -> Result<ChatSession> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(key)
            .cloned()
            .unwrap_or_else(|| ChatSession::new(key, max_history)))
    }

    async fn save(&self, session: &ChatSession) -> Result<()> {
        let key = SessionKey {
            identity: session.identity.clone(),
            session_id: session.session_id,
        };
        let mut sessions = self.sessions.write().await;
        sessions.insert(key, session.clone());
        Ok(())
    }
}

pub struct PgSessionStore {
    pool: PgPool,
    schema_ready: OnceCell<()>,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: OnceCell::new(),
        }
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS chat_messages (
                      message_id UUID PRIMARY KEY,
                      session_id UUID NOT NULL,
                      identity TEXT NOT NULL,
                      position INTEGER NOT NULL,
                      role TEXT NOT NULL,
                      content TEXT NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_chat_messages_session
                    ON chat_messages (identity, session_id, position);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                AdvisorError::Database(format!("Failed to initialize chat session schema: {}", e))
            })?;

        Ok(())
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn load(&self, key: &SessionKey, max_history: usize) -> Result<ChatSession> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            SELECT role, content
            FROM chat_messages
            WHERE identity = $1 AND session_id = $2
            ORDER BY position ASC
            "#,
        )
        .bind(&key.identity)
        .bind(key.session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AdvisorError::Database(format!("Failed to load chat session: {}", e)))?;

        let mut session = ChatSession::new(key, max_history);
        for row in rows {
            let role: String = row.try_get("role")?;
            let content: String = row.try_get("content")?;
            session.add_existing_message(ChatMessage {
                role: ChatRole::from_label(&role),
                content,
            });
        }

        Ok(session)
    }

    async fn save(&self, session: &ChatSession) -> Result<()> {
        self.ensure_schema().await?;

        let mut tx = self.pool.begin().await.map_err(|e| {
            AdvisorError::Database(format!("Failed to begin chat session transaction: {}", e))
        })?;

        sqlx::query("DELETE FROM chat_messages WHERE identity = $1 AND session_id = $2")
            .bind(&session.identity)
            .bind(session.session_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AdvisorError::Database(format!("Failed to clear chat session: {}", e)))?;

        for (position, msg) in session.messages().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO chat_messages
                  (message_id, session_id, identity, position, role, content)
                VALUES
                  ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(session.session_id)
            .bind(&session.identity)
            .bind(position as i32)
            .bind(msg.role.as_str())
            .bind(&msg.content)
            .execute(&mut *tx)
            .await
            .map_err(|e| AdvisorError::Database(format!("Failed to insert chat message: {}", e)))?;
        }

        tx.commit().await.map_err(|e| {
            AdvisorError::Database(format!("Failed to commit chat session: {}", e))
        })?;

        Ok(())
    }
}
