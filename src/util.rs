//! Shared utility functions used across the codebase.

use std::time::Duration;

use crate::config::ConfigError;

/// Parse an environment variable holding milliseconds, returning `default` if unset.
pub fn env_var_millis(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(name) {
        Ok(value) => parse_millis(&value)
            .ok_or_else(|| ConfigError::InvalidValue(name.to_string(), value.clone())),
        Err(_) => Ok(default),
    }
}

fn parse_millis(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_millis)
}

/// Split a whitespace-separated environment variable; unset means empty.
pub fn env_var_list(name: &str) -> Vec<String> {
    std::env::var(name)
        .map(|value| split_list(&value))
        .unwrap_or_default()
}

fn split_list(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

/// Truncate text for log lines, respecting char boundaries.
pub fn preview(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Render `text` as a Scheme string literal.
pub fn scheme_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}
