//! Parsing of structured (JSON) judgments returned as model text.

use serde::de::DeserializeOwned;

#[derive(Debug, thiserror::Error)]
#[error("could not parse judgment: {reason}")]
pub struct JudgmentParseError {
    pub reason: String,
}

/// Remove a surrounding Markdown code fence (```json ... ``` or ``` ... ```).
/// Text without a fence is returned trimmed.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string on the opening line.
    let body = match rest.find('\n') {
        Some(nl) => &rest[nl + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Parse model text as `T`. Falls back to the outermost `{...}` span when the
/// model wrapped the object in prose.
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T, JudgmentParseError> {
    let text = strip_code_fences(raw);
    match serde_json::from_str::<T>(text) {
        Ok(value) => Ok(value),
        Err(first) => {
            let span = text
                .find('{')
                .zip(text.rfind('}'))
                .filter(|(start, end)| start < end)
                .map(|(start, end)| &text[start..=end]);
            match span {
                Some(inner) if inner.len() != text.len() => serde_json::from_str::<T>(inner)
                    .map_err(|e| JudgmentParseError {
                        reason: e.to_string(),
                    }),
                _ => Err(JudgmentParseError {
                    reason: first.to_string(),
                }),
            }
        }
    }
}

/// Follow-up turn sent after an unparseable judgment.
pub fn corrective_prompt(error: &JudgmentParseError) -> String {
    format!(
        "Your previous response could not be parsed ({}). Respond again with only the JSON \
         object in the requested format, with no surrounding text or code fences.",
        error.reason
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        status: String,
    }

    #[test]
    fn strips_json_fence() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("  {} \n"), "{}");
    }

    #[test]
    fn parses_fenced_object() {
        let v: Verdict = parse_structured("```json\n{\"status\": \"valid\"}\n```").unwrap();
        assert_eq!(v.status, "valid");
    }

    #[test]
    fn recovers_object_inside_prose() {
        let v: Verdict =
            parse_structured("Here is my verdict:\n{\"status\": \"invalid\"}\nThanks").unwrap();
        assert_eq!(v.status, "invalid");
    }

    #[test]
    fn rejects_garbage() {
        let err = parse_structured::<Verdict>("no json here").unwrap_err();
        assert!(!err.reason.is_empty());
        assert!(corrective_prompt(&err).contains("could not be parsed"));
    }

    #[test]
    fn rejects_wrong_shape() {
        assert!(parse_structured::<Verdict>("{\"other\": 1}").is_err());
    }
}
