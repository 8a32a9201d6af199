//! Model name normalization and token cost estimation.
//!
//! Prices are USD per 1000 tokens and only meant for dashboard estimates.

pub const UNKNOWN_MODEL: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPrice {
    pub prompt: f64,
    pub completion: f64,
}

const fn price(prompt: f64, completion: f64) -> ModelPrice {
    ModelPrice { prompt, completion }
}

/// Applied when a model matches nothing in [`PRICE_TABLE`].
pub const DEFAULT_PRICE: ModelPrice = price(0.01, 0.03);

/// Ordered so that a key never precedes a longer key containing it
/// (`gpt-4o-mini` before `gpt-4o`, `gpt-4-32k` before `gpt-4`).
pub const PRICE_TABLE: &[(&str, ModelPrice)] = &[
    ("gpt-4o-mini", price(0.0015, 0.002)),
    ("gpt-4o", price(0.005, 0.015)),
    ("gpt-4-turbo", price(0.01, 0.03)),
    ("gpt-4-32k", price(0.06, 0.12)),
    ("gpt-4", price(0.03, 0.06)),
    ("gpt-3.5-turbo-16k", price(0.003, 0.004)),
    ("gpt-3.5-turbo", price(0.0015, 0.002)),
    ("text-embedding-ada-002", price(0.0001, 0.0001)),
    ("text-embedding-3-small", price(0.00002, 0.00002)),
    ("text-embedding-3-large", price(0.00013, 0.00013)),
    ("claude-3-opus", price(0.015, 0.075)),
    ("claude-3-sonnet", price(0.003, 0.015)),
    ("claude-3-haiku", price(0.00025, 0.00125)),
    ("claude-instant", price(0.0008, 0.0024)),
    ("claude-2", price(0.008, 0.024)),
    ("claude-1", price(0.008, 0.024)),
    ("llama-3", price(0.0002, 0.0002)),
    ("llama2", price(0.0002, 0.0002)),
    ("mixtral", price(0.0007, 0.0007)),
];

/// Maps a raw model string onto the canonical tag used for pricing and
/// aggregation. Matching is case-insensitive substring containment, most
/// specific pattern first. Unrecognized names are returned verbatim.
pub fn normalize_model(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return UNKNOWN_MODEL.to_string();
    }
    let m = trimmed.to_lowercase();
    let has = |needle: &str| m.contains(needle);

    let canonical = if has("gpt-4o-mini") {
        "gpt-4o-mini"
    } else if has("gpt-4o") {
        "gpt-4o"
    } else if has("gpt-4-32k") {
        "gpt-4-32k"
    } else if has("gpt-4") && (has("turbo") || has("preview") || has("vision")) {
        "gpt-4-turbo"
    } else if has("gpt-4") {
        "gpt-4"
    } else if has("gpt-3.5-turbo-16k") || has("gpt-35-turbo-16k") {
        "gpt-3.5-turbo-16k"
    } else if has("gpt-3.5") || has("gpt-35-turbo") {
        "gpt-3.5-turbo"
    } else if has("claude-3-opus") {
        "claude-3-opus"
    } else if has("claude-3-sonnet") {
        "claude-3-sonnet"
    } else if has("claude-3-haiku") {
        "claude-3-haiku"
    } else if has("claude-instant") {
        "claude-instant"
    } else if has("claude-2") {
        "claude-2"
    } else if has("claude-1") {
        "claude-1"
    } else if has("llama-3") || has("llama3") {
        "llama-3"
    } else if has("llama-2") || has("llama2") {
        "llama2"
    } else if has("mixtral") {
        "mixtral"
    } else {
        return raw.to_string();
    };
    canonical.to_string()
}

pub fn price_for(model: &str) -> ModelPrice {
    let m = model.trim().to_lowercase();
    PRICE_TABLE
        .iter()
        .find(|(key, _)| *key == m)
        .or_else(|| PRICE_TABLE.iter().find(|(key, _)| m.contains(key)))
        .map(|(_, p)| *p)
        .unwrap_or(DEFAULT_PRICE)
}

/// `(prompt / 1000) * prompt_price + (completion / 1000) * completion_price`.
pub fn calculate_cost(model: &str, prompt_tokens: u64, completion_tokens: u64) -> f64 {
    let p = price_for(model);
    (prompt_tokens as f64 / 1000.0) * p.prompt + (completion_tokens as f64 / 1000.0) * p.completion
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn specific_patterns_win_over_generic_ones() {
        assert_eq!(normalize_model("gpt-4-32k-0613"), "gpt-4-32k");
        assert_eq!(normalize_model("gpt-4-1106-preview"), "gpt-4-turbo");
        assert_eq!(normalize_model("GPT-4-Turbo-2024-04-09"), "gpt-4-turbo");
        assert_eq!(normalize_model("gpt-4-0613"), "gpt-4");
        assert_eq!(normalize_model("gpt-3.5-turbo-16k-0613"), "gpt-3.5-turbo-16k");
        assert_eq!(normalize_model("gpt-3.5-turbo-0125"), "gpt-3.5-turbo");
        assert_eq!(normalize_model("gpt-4o-mini-2024-07-18"), "gpt-4o-mini");
    }

    #[test]
    fn recognizes_non_openai_families() {
        assert_eq!(normalize_model("claude-3-opus-20240229"), "claude-3-opus");
        assert_eq!(normalize_model("anthropic.claude-3-haiku"), "claude-3-haiku");
        assert_eq!(normalize_model("claude-instant-1.2"), "claude-instant");
        assert_eq!(normalize_model("claude-2.1"), "claude-2");
        assert_eq!(normalize_model("meta-llama/Llama-3-70b"), "llama-3");
        assert_eq!(normalize_model("llama2-70b-4096"), "llama2");
        assert_eq!(normalize_model("Mixtral-8x7b-32768"), "mixtral");
    }

    #[test]
    fn empty_is_unknown_and_unrecognized_passes_through() {
        assert_eq!(normalize_model(""), "unknown");
        assert_eq!(normalize_model("   "), "unknown");
        assert_eq!(normalize_model("Text-Embedding-3-Small"), "Text-Embedding-3-Small");
    }

    #[test]
    fn cost_uses_table_prices() {
        let cost = calculate_cost("gpt-4-turbo", 100, 50);
        assert!(approx(cost, 0.0025));
        let cost = calculate_cost("text-embedding-3-small", 1000, 0);
        assert!(approx(cost, 0.00002));
    }

    #[test]
    fn unknown_models_use_conservative_default() {
        assert_eq!(price_for("some-local-model"), DEFAULT_PRICE);
        assert!(approx(calculate_cost("unknown", 1000, 1000), 0.04));
    }

    #[test]
    fn cost_is_monotonic_in_both_token_counts() {
        for (model, _) in PRICE_TABLE.iter().chain([("mystery", DEFAULT_PRICE)].iter()) {
            let mut previous = 0.0;
            for prompt in (0..5_000).step_by(250) {
                let cost = calculate_cost(model, prompt, 120);
                assert!(cost >= previous, "{model} prompt={prompt}");
                previous = cost;
            }
            let mut previous = 0.0;
            for completion in (0..5_000).step_by(250) {
                let cost = calculate_cost(model, 80, completion);
                assert!(cost >= previous, "{model} completion={completion}");
                previous = cost;
            }
        }
    }
}
