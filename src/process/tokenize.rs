// src/process/tokenize.rs
use tracing::trace;

/// One `field=value` pair pulled out of a change log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub field_name: String,
    pub new_value: String,
}

/// Split a change log on top-level commas.
///
/// Commas inside `[...]` or `{...}` belong to the surrounding token. Depth is
/// clamped at zero, so a stray `]` or `}` never re-enables splitting inside a
/// span that is still open, and never drives the counter negative.
pub fn split_top_level(change_log: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut depth: usize = 0;

    for ch in change_log.chars() {
        match ch {
            '[' | '{' => {
                depth += 1;
                current.push(ch);
            }
            ']' | '}' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ',' if depth == 0 => {
                tokens.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    let tail = current.trim();
    if !tail.is_empty() {
        tokens.push(tail.to_string());
    }
    tokens
}

/// Parse a single token on its first `=`. Tokens without `=` yield `None`.
pub fn parse_token(token: &str) -> Option<FieldChange> {
    let (name, value) = token.split_once('=')?;
    Some(FieldChange {
        field_name: name.trim().to_string(),
        new_value: value.trim().to_string(),
    })
}

/// Tokenize a full change log into field changes, in log order.
pub fn tokenize(change_log: &str) -> Vec<FieldChange> {
    split_top_level(change_log)
        .iter()
        .filter_map(|tok| {
            let change = parse_token(tok);
            if change.is_none() {
                trace!(token = %tok, "dropping token without '='");
            }
            change
        })
        .collect()
}
