//! Multi-strategy JSON extraction for LLM output.
//!
//! Agents are asked for JSON but return prose around it often enough that a
//! single parse is not good enough. The cascade tries, in order: a fenced
//! ```json block, any fenced block, the first `{…}` substring, then the
//! whole string. Callers supply a typed fallback when every strategy fails;
//! an unparseable string is never treated as authoritative.

use serde_json::Value;

fn fenced_block(text: &str, fence: &str) -> Option<String> {
    let start = text.find(fence)? + fence.len();
    let rest = &text[start..];
    let end = rest.find("```")?;
    Some(rest[..end].to_string())
}

fn brace_substring(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(text[start..=end].to_string())
}

/// Extracts the first parseable JSON value from LLM output, or `None`.
pub fn extract_json(text: &str) -> Option<Value> {
    let candidates = [
        fenced_block(text, "```json"),
        fenced_block(text, "```"),
        brace_substring(text),
        Some(text.to_string()),
    ];
    for candidate in candidates.into_iter().flatten() {
        if let Ok(value) = serde_json::from_str::<Value>(candidate.trim()) {
            return Some(value);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: a fenced json block wins even with prose around it.
    #[test]
    fn fenced_json_block() {
        let text = "Here you go:\n```json\n{\"verified\": true}\n```\nDone.";
        let value = extract_json(text).unwrap();
        assert_eq!(value["verified"], true);
    }

    /// **Scenario**: a plain fenced block parses when not tagged json.
    #[test]
    fn plain_fenced_block() {
        let text = "```\n{\"a\": 1}\n```";
        assert_eq!(extract_json(text).unwrap()["a"], 1);
    }

    /// **Scenario**: a bare object embedded in prose is found by brace scan.
    #[test]
    fn brace_substring_in_prose() {
        let text = "I think the answer is {\"findings\": []} as shown.";
        assert!(extract_json(text).unwrap()["findings"].is_array());
    }

    /// **Scenario**: whole-string parse as last resort.
    #[test]
    fn whole_string() {
        assert_eq!(extract_json("{\"x\": 2}").unwrap()["x"], 2);
    }

    /// **Scenario**: nothing parseable yields None, never a guess.
    #[test]
    fn unparseable_is_none() {
        assert!(extract_json("no json here at all").is_none());
        assert!(extract_json("broken { json").is_none());
    }
}
