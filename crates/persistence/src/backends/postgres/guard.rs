//! Statement guard for tenant-bound connections.
//!
//! A bound connection must stay bound to its tenant schema, and must not be
//! left inside a transaction the scope does not know about. Statements that
//! could break either are rejected before they reach the server.

use crate::error::ValidationError;

/// Checks a statement issued through a tenant-bound executor.
pub(crate) fn check_statement(sql: &str) -> Result<(), ValidationError> {
    let words = leading_words(sql, 4);
    let word = |i: usize| words.get(i).map(String::as_str).unwrap_or("");

    let reason = match word(0) {
        "BEGIN" | "START" | "COMMIT" | "END" | "ROLLBACK" | "ABORT" => {
            Some("transaction control; use TenantConnection::transaction")
        }
        "PREPARE" if word(1) == "TRANSACTION" => Some("two-phase commit"),
        "DISCARD" => Some("session reset"),
        "SET" => session_target(words.get(1..).unwrap_or(&[])).or_else(|| match word(1) {
            "SESSION" | "LOCAL" => session_target(words.get(2..).unwrap_or(&[])),
            _ => None,
        }),
        "RESET" => match word(1) {
            "ALL" => Some("session reset"),
            _ => session_target(words.get(1..).unwrap_or(&[])),
        },
        _ => None,
    };

    let reason = reason.or_else(|| {
        let lowered = sql.to_ascii_lowercase();
        (lowered.contains("set_config") && lowered.contains("search_path"))
            .then_some("search_path change")
    });

    match reason {
        Some(reason) => Err(ValidationError::ForbiddenStatement {
            statement: truncate(sql.trim(), 80),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

fn session_target(words: &[String]) -> Option<&'static str> {
    match words.first().map(String::as_str) {
        Some("SEARCH_PATH") | Some("SCHEMA") => Some("search_path change"),
        Some("ROLE") => Some("role change"),
        Some("SESSION") if words.get(1).map(String::as_str) == Some("AUTHORIZATION") => {
            Some("role change")
        }
        _ => None,
    }
}

/// Returns up to `limit` leading keywords, uppercased, skipping whitespace
/// and comments. Quoted identifiers are unquoted.
fn leading_words(sql: &str, limit: usize) -> Vec<String> {
    let mut words = Vec::with_capacity(limit);
    let mut rest = sql;

    while words.len() < limit {
        rest = skip_trivia(rest);
        let end = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '"'))
            .unwrap_or(rest.len());
        if end == 0 {
            break;
        }
        words.push(rest[..end].replace('"', "").to_ascii_uppercase());
        rest = &rest[end..];
    }

    words
}

fn skip_trivia(mut s: &str) -> &str {
    loop {
        let trimmed = s.trim_start();
        if let Some(comment) = trimmed.strip_prefix("--") {
            s = comment.split_once('\n').map(|(_, after)| after).unwrap_or("");
        } else if let Some(comment) = trimmed.strip_prefix("/*") {
            s = comment.split_once("*/").map(|(_, after)| after).unwrap_or("");
        } else {
            return trimmed;
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
