use crate::error::ServiceError;
use serde::de::DeserializeOwned;

/// Strip markdown code fences from a response
pub(crate) fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = if trimmed.starts_with("```json") {
        trimmed.strip_prefix("```json").unwrap_or(trimmed)
    } else if trimmed.starts_with("```") {
        trimmed.strip_prefix("```").unwrap_or(trimmed)
    } else {
        trimmed
    };
    let clean = if clean.ends_with("```") {
        clean.strip_suffix("```").unwrap_or(clean)
    } else {
        clean
    };
    clean.trim()
}

/// Truncate a string for display (Unicode-safe)
pub(crate) fn truncate_str(s: &str, max_chars: usize) -> &str {
    if s.chars().count() <= max_chars {
        s
    } else {
        let byte_idx = s
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(s.len());
        &s[..byte_idx]
    }
}

/// Deserialize a structured reply, mapping any mismatch to `Malformed`
pub(crate) fn parse_structured<T: DeserializeOwned>(
    schema: &'static str,
    raw: &str,
) -> Result<T, ServiceError> {
    let clean = strip_markdown_fences(raw);
    serde_json::from_str(clean).map_err(|e| ServiceError::Malformed {
        schema,
        message: e.to_string(),
        preview: truncate_str(clean, 200).to_string(),
    })
}
