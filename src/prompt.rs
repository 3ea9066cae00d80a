//! Prompt assembly for the advice gateway

use tracing::warn;

use crate::metrics::FinancialContext;
use crate::models::{ChatMessage, ChatRole};
use crate::Result;

pub struct PromptAssembler {
    assistant_name: String,
    max_prompt_chars: usize,
}

impl PromptAssembler {
    pub fn new(assistant_name: impl Into<String>, max_prompt_chars: usize) -> Self {
        Self {
            assistant_name: assistant_name.into(),
            max_prompt_chars,
        }
    }

    pub fn max_prompt_chars(&self) -> usize {
        self.max_prompt_chars
    }

    /// Build the full instruction block. `history` excludes `message`.
    pub fn assemble(
        &self,
        context: &FinancialContext,
        history: &[ChatMessage],
        message: &str,
    ) -> Result<String> {
        let context_json = serde_json::to_string_pretty(context)?;
        let user = &context.user;

        let has_investments = if user.investments.is_empty() { "they do not" } else { "they do" };
        let (has_budget, budget_limit, budget_spent, budget_percent) = match &user.budget {
            Some(b) => ("they do", b.monthly_limit.as_str(), b.spent.as_str(), b.percent_used.as_str()),
            None => ("they do not", "0.00", "0.00", "0%"),
        };

        let prompt = format!(
            r#"You are {name}, an AI financial advisor integrated into the Welth finance platform.

CRITICAL INSTRUCTION: You MUST ONLY use the REAL financial data for this specific user provided below. DO NOT use any demo, example, or made-up data. NEVER invent or estimate figures that are not present in the data. If the data shows the user has 0.00 in savings, acknowledge that fact - don't pretend they have savings.

Financial Context (REAL USER DATA - USE THIS DATA ONLY):
{context_json}

Previous conversation:
{history}

User's new message: {message}

MANDATORY REQUIREMENTS:
1. ONLY use the real user data provided above - NEVER make up or use demo data
2. ALWAYS refer to SPECIFIC NUMBERS from their financial data (exact income amount, exact expenses, exact savings rate, etc.)
3. ALWAYS mention their TOP SPENDING CATEGORIES BY NAME when relevant
4. ALWAYS reference their ACTUAL savings rate of {savings_rate} and debt-to-income ratio of {dti} when giving advice
5. If they have investment accounts ({has_investments}), mention the ACTUAL balances
6. If they have a monthly budget ({has_budget}), reference their ACTUAL budget of {budget_limit} and that they've spent {budget_spent} ({budget_percent} of budget)

Your response MUST be:
1. Personalized using their ACTUAL name ({user_name}) and their REAL financial data
2. Evidence-based using their REAL financial metrics (not general advice)
3. Risk-aware based on their ACTUAL financial profile
4. Actionable with specific next steps based on their REAL situation
5. Compliant with financial regulations (include disclaimer when needed)

Format your response with clear section headings when appropriate, numbered lists for prioritized advice, bullet points for related items and proper paragraph spacing.
Keep responses under 250 words, focus on practical advice, use simple language.
Never recommend specific stocks, always include risk warnings, and emphasize diversification.

If the user data shows limited or no financial activity, acknowledge this fact and offer guidance on how to start building their financial profile.

Always end your response with a brief disclaimer about financial advice.
"#,
            name = self.assistant_name,
            context_json = context_json,
            history = render_history(history),
            message = message,
            savings_rate = user.savings_rate,
            dti = user.debt.debt_to_income_ratio,
            has_investments = has_investments,
            has_budget = has_budget,
            budget_limit = budget_limit,
            budget_spent = budget_spent,
            budget_percent = budget_percent,
            user_name = user.name,
        );

        Ok(truncate_chars(prompt, self.max_prompt_chars))
    }
}

/// "User:" / "Assistant:" lines, oldest first.
pub fn render_history(history: &[ChatMessage]) -> String {
    history
        .iter()
        .map(|msg| {
            let label = match msg.role {
                ChatRole::User => "User",
                ChatRole::Assistant => "Assistant",
            };
            format!("{}: {}", label, msg.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Drop everything past `max_chars` characters.
pub fn truncate_chars(mut text: String, max_chars: usize) -> String {
    if let Some((byte_index, _)) = text.char_indices().nth(max_chars) {
        warn!(
            original_len = text.chars().count(),
            max_chars,
            "Prompt is very long, truncating"
        );
        text.truncate(byte_index);
    }
    text
}
