//! Response decoding with readable diagnostics.
//!
//! Sidecar payload drift (a renamed field, a `null` where a number used to be)
//! should point straight at the offending field, so decode errors carry the
//! serde path, a simplified type mismatch and a snippet of the body.

use anyhow::Result;

/// Characters of body shown around the error position.
const SNIPPET_WIDTH: usize = 24;

/// Decode `body` as `T`, describing failures by field path.
pub fn decode_json<T: serde::de::DeserializeOwned>(body: &str) -> Result<T> {
    let de = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(de).map_err(|err| {
        let inner = err.inner();
        let (line, column) = (inner.line(), inner.column());
        let path = err.path().to_string();

        let raw = inner.to_string();
        let raw = raw
            .strip_suffix(&format!(" at line {line} column {column}"))
            .unwrap_or(&raw);

        let mut message = String::new();
        if !path.is_empty() && path != "." {
            message.push_str(&format!("at `{path}`: "));
        }
        message.push_str(&describe_mismatch(raw));
        message.push_str(&format!(" (line {line} col {column})\n"));
        message.push_str(&snippet(body, line, column));

        anyhow::anyhow!(message)
    })
}

/// Turn "invalid type: null, expected a string" into "expected a string, got null".
fn describe_mismatch(raw: &str) -> String {
    if let Some(rest) = raw.strip_prefix("invalid type: ")
        && let Some((actual, expected)) = rest.split_once(", expected ")
    {
        return format!("expected {}, got {}", expected.trim(), actual);
    }
    raw.to_string()
}

/// `column` is serde_json's 1-based byte column.
fn snippet(body: &str, line: usize, column: usize) -> String {
    let Some(text) = body.lines().nth(line.saturating_sub(1)) else {
        return "(no such line)".to_string();
    };
    if text.is_empty() {
        return "(empty line)".to_string();
    }

    let chars: Vec<char> = text.chars().collect();
    let byte_at = column.saturating_sub(1);
    let at = text.char_indices().take_while(|(i, _)| *i < byte_at).count();
    let start = at.saturating_sub(SNIPPET_WIDTH / 2);
    let end = (at + SNIPPET_WIDTH / 2).min(chars.len());

    let excerpt: String = chars[start..end].iter().collect();
    let marker = " ".repeat(at - start) + "^";
    format!("...{excerpt}...\n   {marker}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Alert {
        #[allow(dead_code)]
        id: i64,
        #[allow(dead_code)]
        repo_name: String,
    }

    #[test]
    fn mismatch_is_simplified() {
        assert_eq!(
            describe_mismatch("invalid type: null, expected a string"),
            "expected a string, got null"
        );
        assert_eq!(describe_mismatch("expected value"), "expected value");
    }

    #[test]
    fn error_names_the_field_path() {
        let body = r#"[{"id": 1, "repo_name": "a/b"}, {"id": 2, "repo_name": null}]"#;
        let err = decode_json::<Vec<Alert>>(body).unwrap_err().to_string();
        assert!(err.contains("[1].repo_name"), "{err}");
        assert!(err.contains("expected a string, got null"), "{err}");
        assert!(err.contains('^'), "{err}");
    }

    #[test]
    fn non_ascii_body_does_not_panic() {
        let body = r#"{"id": "七", "repo_name": "ünïcödé/repö"}"#;
        let err = decode_json::<Alert>(body).unwrap_err().to_string();
        assert!(err.contains("id"), "{err}");
    }

    #[test]
    fn caret_counts_characters_not_bytes() {
        // 'ü' is two bytes and '€' three, so 'x' sits at byte column 6.
        assert_eq!(snippet("ü€x", 1, 6), "...ü€x...\n     ^");
        assert_eq!(snippet("abc", 1, 3), "...abc...\n     ^");
    }

    #[test]
    fn valid_body_decodes() {
        let alerts: Vec<Alert> = decode_json(r#"[{"id": 3, "repo_name": "x/y"}]"#).unwrap();
        assert_eq!(alerts.len(), 1);
    }
}
