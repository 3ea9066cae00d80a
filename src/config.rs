//! Runtime configuration
//!
//! Every collaborator receives its settings through these structs at
//! construction time. `AppConfig::from_env` reads them from the process
//! environment (after `.env` has been loaded by the binary).

use crate::error::AdvisorError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_PRIMARY_MODEL: &str = "gemini-2.0-flash-001";
pub const DEFAULT_FALLBACK_MODEL: &str = "gemini-1.5-pro";

/// Generation parameters for one model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    pub model: String,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<i32>,
    pub max_output_tokens: Option<i32>,
}

impl ModelConfig {
    pub fn named(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: None,
            top_p: None,
            top_k: None,
            max_output_tokens: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SafetySetting {
    pub category: String,
    pub threshold: String,
}

impl SafetySetting {
    pub fn block_medium_and_above(category: &str) -> Self {
        Self {
            category: category.to_string(),
            threshold: "BLOCK_MEDIUM_AND_ABOVE".to_string(),
        }
    }
}

pub fn default_safety_settings() -> Vec<SafetySetting> {
    [
        "HARM_CATEGORY_HARASSMENT",
        "HARM_CATEGORY_HATE_SPEECH",
        "HARM_CATEGORY_SEXUALLY_EXPLICIT",
        "HARM_CATEGORY_DANGEROUS_CONTENT",
    ]
    .iter()
    .map(|c| SafetySetting::block_medium_and_above(c))
    .collect()
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub api_key: String,
    pub base_url: String,
    pub primary: ModelConfig,
    /// Used only after the primary call fails or times out
    pub fallback: ModelConfig,
    pub safety: Vec<SafetySetting>,
    pub timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            primary: ModelConfig::named(DEFAULT_PRIMARY_MODEL),
            fallback: ModelConfig::named(DEFAULT_FALLBACK_MODEL),
            safety: default_safety_settings(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Aggregation and prompt settings
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Maximum transcript entries retained per session
    pub max_history: usize,
    /// Hard cap on prompt length in characters
    pub max_prompt_chars: usize,
    /// How many of the latest transactions feed the aggregator
    pub recent_transaction_limit: usize,
    /// Trailing window for "monthly" expenses
    pub expense_window_days: i64,
    pub top_category_count: usize,
    pub assistant_name: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_history: 20,
            max_prompt_chars: 100_000,
            recent_transaction_limit: 100,
            expense_window_days: 30,
            top_category_count: 3,
            assistant_name: "WelthGPT".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Bucket size per identity
    pub capacity: u32,
    /// Time for an empty bucket to refill completely
    pub refill_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            refill_interval: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub chat: ChatConfig,
    pub rate_limit: RateLimitConfig,
    pub database_url: Option<String>,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let gateway_defaults = GatewayConfig::default();
        let chat_defaults = ChatConfig::default();
        let rate_defaults = RateLimitConfig::default();

        let gateway = GatewayConfig {
            api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
            base_url: env::var("GEMINI_BASE_URL").unwrap_or(gateway_defaults.base_url),
            primary: ModelConfig::named(
                env::var("GEMINI_PRIMARY_MODEL").unwrap_or_else(|_| DEFAULT_PRIMARY_MODEL.to_string()),
            ),
            fallback: ModelConfig::named(
                env::var("GEMINI_FALLBACK_MODEL").unwrap_or_else(|_| DEFAULT_FALLBACK_MODEL.to_string()),
            ),
            safety: gateway_defaults.safety,
            timeout: Duration::from_secs(parse_var("GATEWAY_TIMEOUT_SECS", 30u64)?),
        };

        let chat = ChatConfig {
            max_history: parse_var("CHAT_MAX_HISTORY", chat_defaults.max_history)?,
            max_prompt_chars: parse_var("MAX_PROMPT_CHARS", chat_defaults.max_prompt_chars)?,
            recent_transaction_limit: parse_var(
                "RECENT_TRANSACTION_LIMIT",
                chat_defaults.recent_transaction_limit,
            )?,
            expense_window_days: parse_var("EXPENSE_WINDOW_DAYS", chat_defaults.expense_window_days)?,
            top_category_count: chat_defaults.top_category_count,
            assistant_name: env::var("ASSISTANT_NAME").unwrap_or(chat_defaults.assistant_name),
        };

        let rate_limit = RateLimitConfig {
            capacity: parse_var("RATE_LIMIT_CAPACITY", rate_defaults.capacity)?,
            refill_interval: Duration::from_secs(parse_var(
                "RATE_LIMIT_REFILL_SECS",
                rate_defaults.refill_interval.as_secs(),
            )?),
        };

        let database_url = env::var("DATABASE_URL")
            .or_else(|_| env::var("POSTGRES_URL"))
            .ok()
            .filter(|url| !url.trim().is_empty());

        let port = match env::var("PORT").or_else(|_| env::var("API_PORT")) {
            Ok(raw) => parse_value("PORT", &raw)?,
            Err(_) => 8080,
        };

        Ok(Self {
            gateway,
            chat,
            rate_limit,
            database_url,
            port,
        })
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => parse_value(name, &raw),
        _ => Ok(default),
    }
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| AdvisorError::Config(format!("{} has an invalid value: {:?}", name, raw)))
}
