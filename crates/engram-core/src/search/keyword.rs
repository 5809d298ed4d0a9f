//! Lexical search helpers
//!
//! FTS5 treats many characters as syntax (quotes, parens, `NEAR`, `-`),
//! and raw user queries routinely contain them. Queries are reduced to a
//! quoted-token OR form: every alphanumeric token is double-quoted and the
//! set is OR-joined, which approximates best-effort fuzzy matching without
//! exposing FTS5 operators to user input.

/// Sanitize a free-text query for FTS5 MATCH.
///
/// Returns `None` when nothing searchable remains.
pub fn sanitize_fts5_query(query: &str) -> Option<String> {
    let tokens: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t.to_lowercase()))
        .collect();

    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" OR "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_words() {
        assert_eq!(
            sanitize_fts5_query("postgres tuning"),
            Some("\"postgres\" OR \"tuning\"".to_string())
        );
    }

    #[test]
    fn test_operators_neutralized() {
        let q = sanitize_fts5_query("why \"quoted\" AND (grouped) - dash").unwrap();
        assert!(!q.contains('('));
        assert!(q.contains("\"quoted\""));
        assert!(q.contains("\"and\""));
    }

    #[test]
    fn test_empty_and_symbol_only() {
        assert_eq!(sanitize_fts5_query(""), None);
        assert_eq!(sanitize_fts5_query("!!! ???"), None);
    }

    #[test]
    fn test_underscore_tokens_survive() {
        assert_eq!(
            sanitize_fts5_query("nonexistent_term_xyz123"),
            Some("\"nonexistent_term_xyz123\"".to_string())
        );
    }
}
