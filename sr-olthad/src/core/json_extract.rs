//! Detect, extract and parse a JSON object embedded in free-form LM text.

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// JSON objects with at most one level of nested braces.
static JSON_OBJECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{(?:[^{}]|\{[^{}]*\})*\}").expect("json object pattern should compile")
});

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("no JSON object found in the text")]
    NotFound,
    #[error("no valid JSON could be parsed from the text")]
    Unparseable,
    #[error("JSON data doesn't match the expected structure: {0}")]
    Mismatch(#[source] serde_json::Error),
}

/// Return the first JSON object in `text` that parses as JSON, decoded into `T`.
///
/// Candidates that are not valid JSON are skipped; the first valid one must
/// match `T`, otherwise [`ExtractError::Mismatch`] is returned.
pub fn extract_json<T: DeserializeOwned>(text: &str) -> Result<T, ExtractError> {
    let mut found_any = false;
    for candidate in JSON_OBJECT_RE.find_iter(text) {
        found_any = true;
        let Ok(value) = serde_json::from_str::<Value>(candidate.as_str()) else {
            continue;
        };
        return serde_json::from_value(value).map_err(ExtractError::Mismatch);
    }
    if found_any {
        Err(ExtractError::Unparseable)
    } else {
        Err(ExtractError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Answer {
        answer: String,
        retrospective: Option<String>,
    }

    #[test]
    fn extracts_object_after_reasoning() {
        let text = "Let me think... the tree is gone.\n```json\n{\n  \"answer\": \"A\",\n  \"retrospective\": \"Got the wood.\"\n}\n```";
        let parsed: Answer = extract_json(text).expect("parse");
        assert_eq!(parsed.answer, "A");
        assert_eq!(parsed.retrospective.as_deref(), Some("Got the wood."));
    }

    #[test]
    fn skips_invalid_candidates() {
        let text = "{not json} then {\"answer\": \"B\", \"retrospective\": null}";
        let parsed: Answer = extract_json(text).expect("parse");
        assert_eq!(parsed.answer, "B");
        assert_eq!(parsed.retrospective, None);
    }

    #[test]
    fn handles_one_level_of_nesting() {
        #[derive(Deserialize)]
        struct Outer {
            inner: Answer,
        }
        let text = "{\"inner\": {\"answer\": \"A\", \"retrospective\": null}}";
        let parsed: Outer = extract_json(text).expect("parse");
        assert_eq!(parsed.inner.answer, "A");
    }

    #[test]
    fn distinguishes_failure_modes() {
        assert!(matches!(
            extract_json::<Answer>("no braces here"),
            Err(ExtractError::NotFound)
        ));
        assert!(matches!(
            extract_json::<Answer>("{oops}"),
            Err(ExtractError::Unparseable)
        ));
        assert!(matches!(
            extract_json::<Answer>("{\"answer\": 3}"),
            Err(ExtractError::Mismatch(_))
        ));
    }
}
