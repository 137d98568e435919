//! Price table for the chat models the pipeline calls.
//!
//! Prices are nanodollars (1e-9 USD) per token. Perplexity search models also
//! charge a flat fee per request.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelPricing {
    pub input_per_token: i64,
    pub output_per_token: i64,
    pub per_request: i64,
}

impl ModelPricing {
    const fn tokens(input_per_token: i64, output_per_token: i64) -> Self {
        Self {
            input_per_token,
            output_per_token,
            per_request: 0,
        }
    }

    const fn with_request_fee(mut self, nanos: i64) -> Self {
        self.per_request = nanos;
        self
    }

    pub fn cost(&self, input_tokens: u32, output_tokens: u32) -> i64 {
        self.per_request
            + i64::from(input_tokens) * self.input_per_token
            + i64::from(output_tokens) * self.output_per_token
    }
}

/// Used for models missing from the table.
pub const FALLBACK_PRICING: ModelPricing = ModelPricing::tokens(1_000, 5_000);

// Perplexity, low search context: sonar $1/$1 per 1M tokens + $5 per 1k
// requests; sonar-pro $3/$15 per 1M tokens + $6 per 1k requests.
// OpenRouter: gemini-2.5-flash $0.30/$2.50, gemini-2.5-pro $1.25/$10.00.
pub fn pricing_for(model_id: &str) -> Option<ModelPricing> {
    // OpenRouter serves the same Perplexity models under a vendor prefix.
    let id = model_id.strip_prefix("perplexity/").unwrap_or(model_id);
    let pricing = match id {
        "sonar" => ModelPricing::tokens(1_000, 1_000).with_request_fee(5_000_000),
        "sonar-pro" => ModelPricing::tokens(3_000, 15_000).with_request_fee(6_000_000),
        "google/gemini-2.5-flash" => ModelPricing::tokens(300, 2_500),
        "google/gemini-2.5-pro" => ModelPricing::tokens(1_250, 10_000),
        _ => return None,
    };
    Some(pricing)
}

/// Estimated cost of one chat call in nanodollars.
pub fn chat_cost(model_id: &str, input_tokens: u32, output_tokens: u32) -> i64 {
    pricing_for(model_id)
        .unwrap_or(FALLBACK_PRICING)
        .cost(input_tokens, output_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_pricing() {
        // 1000 * 300 + 1000 * 2500
        assert_eq!(chat_cost("google/gemini-2.5-flash", 1_000, 1_000), 2_800_000);
    }

    #[test]
    fn search_models_pay_per_request() {
        assert_eq!(chat_cost("sonar-pro", 0, 0), 6_000_000);
        assert_eq!(
            chat_cost("perplexity/sonar-pro", 10, 10),
            chat_cost("sonar-pro", 10, 10)
        );
    }

    #[test]
    fn unknown_model_uses_fallback() {
        assert_eq!(pricing_for("someone/new-model"), None);
        assert_eq!(chat_cost("someone/new-model", 1, 1), 6_000);
    }
}
