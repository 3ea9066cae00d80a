//! Advice gateway trait and implementations
//!
//! The gateway turns an assembled prompt into free-text advice. Timeouts and
//! fallback are the controller's job; a gateway just makes one attempt.

use crate::config::{ModelConfig, SafetySetting};
use crate::Result;
use async_trait::async_trait;

pub mod gemini;
pub use gemini::GeminiClient;

#[async_trait]
pub trait AdviceGateway: Send + Sync {
    async fn submit(
        &self,
        prompt: &str,
        model: &ModelConfig,
        safety: &[SafetySetting],
    ) -> Result<String>;
}

/// Offline gateway for local runs without an API key.
/// Echoes the model name and prompt size instead of calling out.
pub struct DryRunGateway;

#[async_trait]
impl AdviceGateway for DryRunGateway {
    async fn submit(
        &self,
        prompt: &str,
        model: &ModelConfig,
        _safety: &[SafetySetting],
    ) -> Result<String> {
        Ok(format!(
            "[dry run] {} would answer a {}-character prompt.",
            model.model,
            prompt.chars().count()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dry_run_reports_model() {
        let model = ModelConfig::named("gemini-2.0-flash-001");
        let reply = tokio_test::block_on(DryRunGateway.submit("abc", &model, &[])).unwrap();
        assert!(reply.contains("gemini-2.0-flash-001"));
        assert!(reply.contains("3-character"));
    }
}
