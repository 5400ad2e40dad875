use crate::config::ModelPricing;

/// Cost of one call; unpriced models are free rather than an error.
pub fn cost_for(pricing: Option<&ModelPricing>, input_tokens: u32, output_tokens: u32) -> f64 {
    pricing
        .map(|p| p.calculate_cost(input_tokens, output_tokens))
        .unwrap_or(0.0)
}
