//! Error types for the financial advice service

use thiserror::Error;

/// Result type alias for advisor operations
pub type Result<T> = std::result::Result<T, AdvisorError>;

#[derive(Error, Debug)]
pub enum AdvisorError {

    // =============================
    // Request Pipeline Errors
    // =============================

    #[error("Unauthorized")]
    Authentication,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Account {0} not found")]
    AccountNotFound(uuid::Uuid),

    #[error("No financial data for user {0}")]
    NoData(String),

    #[error("Rate limit exceeded (remaining={remaining}, reset in {reset_in_secs}s)")]
    RateLimited { remaining: u32, reset_in_secs: u64 },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Gateway timed out after {0}s")]
    GatewayTimeout(u64),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown error: {0}")]
    Unknown(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("UUID parse error: {0}")]
    Uuid(#[from] uuid::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AdvisorError {
    /// Short text safe to show to the client.
    pub fn user_message(&self) -> String {
        match self {
            AdvisorError::Authentication => "Unauthorized".to_string(),
            AdvisorError::NotFound(_) => {
                "User profile not found. Please complete your profile setup to get personalized advice."
                    .to_string()
            }
            AdvisorError::AccountNotFound(_) => "Account not found".to_string(),
            AdvisorError::NoData(_) => {
                "No financial data found. Please add your accounts or transactions to get personalized advice."
                    .to_string()
            }
            AdvisorError::RateLimited { .. } => {
                "Too many requests. Please try again later.".to_string()
            }
            AdvisorError::InvalidRequest(reason) => reason.clone(),
            AdvisorError::Gateway(_) | AdvisorError::GatewayTimeout(_) | AdvisorError::Http(_) => {
                "Failed to generate AI response. Please try again later.".to_string()
            }
            AdvisorError::Database(_) | AdvisorError::Sql(_) => {
                "Error accessing financial data. Please try again later.".to_string()
            }
            _ => "Failed to process request".to_string(),
        }
    }
}
