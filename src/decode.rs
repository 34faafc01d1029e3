//! Lenient decoding of structured text-generation output.
//!
//! Models wrap JSON in markdown fences or surround it with prose more often
//! than not. All of that leniency lives here: the input is stripped down to
//! its JSON payload, then handed to a strict `serde_json` parse. Callers
//! treat a decode failure as "no findings", never as a hard error.

use crate::errors::GenerationError;
use serde::de::DeserializeOwned;

/// Decode a JSON value of type `T` out of raw model output
pub fn decode_json<T: DeserializeOwned>(raw: &str) -> Result<T, GenerationError> {
    let cleaned = strip_wrapping(raw);
    serde_json::from_str(cleaned).map_err(|e| {
        GenerationError::MalformedOutput(format!("{}. Content: '{}'", e, truncate(cleaned, 200)))
    })
}

/// Strip markdown code fences and any prose around the JSON payload
fn strip_wrapping(raw: &str) -> &str {
    let trimmed = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    // Prose around the payload: cut to the outermost bracket pair
    let start = trimmed.find(['[', '{']);
    let end = trimmed.rfind([']', '}']);
    match (start, end) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        name: String,
    }

    #[test]
    fn test_plain_json() {
        let items: Vec<Item> = decode_json(r#"[{"name": "a"}]"#).unwrap();
        assert_eq!(items, vec![Item { name: "a".to_string() }]);
    }

    #[test]
    fn test_fenced_json() {
        let raw = "```json\n[{\"name\": \"a\"}]\n```";
        let items: Vec<Item> = decode_json(raw).unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_bare_fence_without_language_tag() {
        let raw = "```\n[{\"name\": \"a\"}]\n```";
        let items: Vec<Item> = decode_json(raw).unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_prose_around_payload() {
        let raw = "Here are the results:\n[{\"name\": \"a\"}]\nLet me know if you need more.";
        let items: Vec<Item> = decode_json(raw).unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_malformed_is_an_error_not_a_panic() {
        let result: Result<Vec<Item>, _> = decode_json("I could not find any entities.");
        assert!(matches!(result, Err(GenerationError::MalformedOutput(_))));
    }

    #[test]
    fn test_empty_array() {
        let items: Vec<Item> = decode_json("[]").unwrap();
        assert!(items.is_empty());
    }
}
