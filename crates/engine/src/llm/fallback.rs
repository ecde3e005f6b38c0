// ── Model Normalization & Fallback Chain ─────────────────────────────────
// Retired or shorthand model IDs are remapped to a currently-served name
// before a call goes out, so old job configs and agent overrides keep
// working without an explicit migration step.

use crate::types::FallbackEntry;

/// Maps retired/renamed/shorthand model IDs to their current API names.
/// Unknown names pass through unchanged.
pub fn normalize_model_name(model: &str) -> &str {
    match model {
        "claude-3-5-haiku-20241022" => "claude-3-haiku-20240307",
        "claude-3-5-sonnet-20241022" | "claude-3-5-sonnet-20240620" => "claude-3-7-sonnet-20250219",
        "gpt-4" | "gpt-4-0613" => "gpt-4o",
        _ => model,
    }
}

/// Drives `complete_with_fallback`: tries each entry's circuit
/// breaker in order, returning the first whose breaker is closed/half-open.
/// `None` means every entry's breaker is open — the caller fails with
/// `all_llm_unavailable`.
pub fn next_available<'a>(
    chain: &'a [FallbackEntry],
    tried: &[String],
    is_open: impl Fn(&str) -> bool,
) -> Option<&'a FallbackEntry> {
    chain
        .iter()
        .filter(|entry| !tried.iter().any(|t| t == &entry.model))
        .find(|entry| !is_open(normalize_model_name(&entry.model)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_remaps_retired_ids() {
        assert_eq!(normalize_model_name("claude-3-5-sonnet-20241022"), "claude-3-7-sonnet-20250219");
        assert_eq!(normalize_model_name("gpt-4o-mini"), "gpt-4o-mini");
    }

    #[test]
    fn next_available_skips_open_breakers_and_tried_entries() {
        let chain = vec![
            FallbackEntry { model: "local/llama-3.1-8b".to_string(), is_local: true },
            FallbackEntry { model: "openai/gpt-4o-mini".to_string(), is_local: false },
        ];
        let tried = vec!["local/llama-3.1-8b".to_string()];
        let next = next_available(&chain, &tried, |_| false);
        assert_eq!(next.unwrap().model, "openai/gpt-4o-mini");

        let all_open = next_available(&chain, &[], |_| true);
        assert!(all_open.is_none());
    }
}
