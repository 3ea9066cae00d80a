//! Welth Advisor
//!
//! Conversational financial advice grounded in a user's own ledger:
//! - Aggregates accounts, transactions and budgets into a financial summary
//! - Assembles a bounded prompt from the summary and the chat transcript
//! - Calls a hosted model with timeout and a single fallback
//! - Rate limits per identity and serializes turns per session
//! - Keeps account balances consistent when transactions are bulk deleted
//!
//! TURN:
//! AUTH → RATE LIMIT → LOAD → AGGREGATE → ASSEMBLE → GENERATE (→ FALLBACK) → SAVE

pub mod api;
pub mod config;
pub mod controller;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod models;
pub mod prompt;
pub mod ratelimit;
pub mod session;
pub mod store;

pub use error::Result;

// Re-export common types
pub use controller::{ChatController, TurnReply, TurnRequest};
pub use models::*;
