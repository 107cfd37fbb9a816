//! Static model catalog and model-family classification.
//!
//! The catalog backs `GET /v1/models` and supplies the per-model output
//! budgets the request mappers fall back to when a client omits
//! `max_tokens`. Family classification drives thinking-config and schema
//! handling differences between Gemini and Claude variants.

/// Model families the upstream serves, as far as the mappers care.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    /// Gemini 3.x: thinking expressed as a level (`low`/`high`).
    Gemini3,
    /// Gemini 2.5: thinking expressed as a token budget.
    Gemini25,
    /// Claude variants served through the upstream: budget-based thinking,
    /// strict JSON-schema subset for tools.
    Claude,
    Other,
}

impl ModelFamily {
    pub fn from_model_name(model: &str) -> Self {
        let lower = model.to_lowercase();
        if lower.contains("claude") {
            Self::Claude
        } else if lower.contains("gemini-3") {
            Self::Gemini3
        } else if lower.contains("gemini-2.5") {
            Self::Gemini25
        } else {
            Self::Other
        }
    }

    pub fn is_claude(self) -> bool {
        matches!(self, Self::Claude)
    }
}

/// Whether a model is an Opus variant (thinking is forced on for these).
pub fn is_opus(model: &str) -> bool {
    model.to_lowercase().contains("opus")
}

/// Default `maxOutputTokens` for Claude variants when the client did not
/// set one. Opus runs with a smaller window than Sonnet.
pub fn claude_default_max_tokens(model: &str) -> u32 {
    if is_opus(model) {
        32_000
    } else {
        64_000
    }
}

/// One `/v1/models` catalog row.
#[derive(Debug, Clone, Copy)]
pub struct ModelCard {
    pub id: &'static str,
    /// Unix seconds, matching the OpenAI list-models shape.
    pub created: i64,
    pub owned_by: &'static str,
}

/// Models the proxy advertises. The upstream accepts more; this is the
/// stable, known-good subset.
pub static MODEL_CATALOG: &[ModelCard] = &[
    ModelCard { id: "gemini-3-pro-preview", created: 1_763_424_000, owned_by: "google" },
    ModelCard { id: "gemini-3-flash", created: 1_763_424_000, owned_by: "google" },
    ModelCard { id: "gemini-2.5-pro", created: 1_750_118_400, owned_by: "google" },
    ModelCard { id: "gemini-2.5-flash", created: 1_750_118_400, owned_by: "google" },
    ModelCard { id: "claude-sonnet-4-5", created: 1_758_758_400, owned_by: "anthropic" },
    ModelCard { id: "claude-opus-4-5", created: 1_761_696_000, owned_by: "anthropic" },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_classification() {
        assert_eq!(ModelFamily::from_model_name("gemini-3-flash"), ModelFamily::Gemini3);
        assert_eq!(ModelFamily::from_model_name("gemini-2.5-pro"), ModelFamily::Gemini25);
        assert_eq!(ModelFamily::from_model_name("claude-sonnet-4-5"), ModelFamily::Claude);
        assert_eq!(ModelFamily::from_model_name("gpt-4o"), ModelFamily::Other);
    }

    #[test]
    fn opus_detection_and_budgets() {
        assert!(is_opus("claude-opus-4-5"));
        assert!(!is_opus("claude-sonnet-4-5"));
        assert_eq!(claude_default_max_tokens("claude-opus-4-5"), 32_000);
        assert_eq!(claude_default_max_tokens("claude-sonnet-4-5"), 64_000);
    }
}
