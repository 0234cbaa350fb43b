//! Extractor engine — evaluates response extractors during a test run and
//! stores captured values into the variable map.

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ExtractorRule
// ---------------------------------------------------------------------------

/// The kind of extraction operation to perform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExtractorRule {
    /// Extract a value using a simple dot-notation JSON path expression.
    JsonPath { expression: String },
    /// Extract a value using a regular expression capture group.
    Regex { pattern: String, group: u32 },
    /// Extract a response header value by name.
    Header { name: String },
    /// Extract a cookie value by name from a `Set-Cookie` response header.
    Cookie { name: String },
    /// Extract the numeric HTTP status code as a string.
    StatusCode,
    /// Extract the response time in milliseconds as a string.
    ResponseTime,
}

// ---------------------------------------------------------------------------
// ExtractionContext
// ---------------------------------------------------------------------------

/// Context needed to evaluate extractors against an HTTP response.
pub struct ExtractionContext<'a> {
    pub status_code: u16,
    pub headers: &'a HashMap<String, String>,
    pub body: &'a str,
    pub response_time_us: u64,
}

// ---------------------------------------------------------------------------
// evaluate_extractor
// ---------------------------------------------------------------------------

/// Evaluate a single extractor rule against the response context.
///
/// Returns `(success, extracted_value, message)` — never panics.
pub fn evaluate_extractor(
    rule: &ExtractorRule,
    ctx: &ExtractionContext,
) -> (bool, Option<String>, String) {
    match rule {
        ExtractorRule::JsonPath { expression } => {
            match serde_json::from_str::<serde_json::Value>(ctx.body) {
                Ok(json) => match navigate_json_path(&json, expression) {
                    Some(value) => {
                        let extracted = json_value_to_string(value);
                        (
                            true,
                            Some(extracted.clone()),
                            format!("JSON path \"{}\" extracted \"{}\"", expression, extracted),
                        )
                    }
                    None => (
                        false,
                        None,
                        format!("JSON path \"{}\" not found in response body", expression),
                    ),
                },
                Err(e) => (
                    false,
                    None,
                    format!("Failed to parse response body as JSON: {e}"),
                ),
            }
        }

        ExtractorRule::Regex { pattern, group } => match Regex::new(pattern) {
            Ok(re) => match re.captures(ctx.body) {
                Some(caps) => {
                    let group_idx = *group as usize;
                    match caps.get(group_idx) {
                        Some(m) => {
                            let extracted = m.as_str().to_string();
                            (
                                true,
                                Some(extracted.clone()),
                                format!(
                                    "Regex \"{}\" group {} extracted \"{}\"",
                                    pattern, group, extracted
                                ),
                            )
                        }
                        None => (
                            false,
                            None,
                            format!(
                                "Regex \"{}\" matched but group {} does not exist",
                                pattern, group
                            ),
                        ),
                    }
                }
                None => (
                    false,
                    None,
                    format!("Regex \"{}\" did not match the response body", pattern),
                ),
            },
            Err(e) => (
                false,
                None,
                format!("Invalid regex pattern \"{}\": {e}", pattern),
            ),
        },

        ExtractorRule::Header { name } => {
            // Header names are lowercased when stored in the response map.
            let key = name.to_lowercase();
            match ctx.headers.get(&key) {
                Some(value) => (
                    true,
                    Some(value.clone()),
                    format!("Header \"{}\" extracted \"{}\"", name, value),
                ),
                None => (
                    false,
                    None,
                    format!("Header \"{}\" not found in response", name),
                ),
            }
        }

        ExtractorRule::Cookie { name } => match extract_cookie(ctx.headers, name) {
            Some(value) => (
                true,
                Some(value.clone()),
                format!("Cookie \"{}\" extracted \"{}\"", name, value),
            ),
            None => (
                false,
                None,
                format!("Cookie \"{}\" not found in Set-Cookie header", name),
            ),
        },

        ExtractorRule::StatusCode => (
            true,
            Some(ctx.status_code.to_string()),
            format!("Status code extracted \"{}\"", ctx.status_code),
        ),

        ExtractorRule::ResponseTime => {
            let ms = ctx.response_time_us as f64 / 1000.0;
            (
                true,
                Some(ms.to_string()),
                format!("Response time extracted \"{}\"ms", ms),
            )
        }
    }
}

/// Parse a `Set-Cookie` header value (possibly several, joined by `, ` as some
/// servers send them) looking for `name`. Falls back to a plain `name=value`
/// split on failure, mirroring the original source's resilience.
fn extract_cookie(headers: &HashMap<String, String>, name: &str) -> Option<String> {
    let set_cookie = headers.get("set-cookie")?;
    for part in set_cookie.split(',') {
        for kv in part.split(';') {
            let kv = kv.trim();
            if let Some((k, v)) = kv.split_once('=') {
                if k.trim() == name {
                    return Some(v.trim().to_string());
                }
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// substitute_variables
// ---------------------------------------------------------------------------

/// Replace all `${varName}` placeholders in `input` with values from `variables`.
///
/// If a referenced variable is not found in the map, the placeholder is left
/// as-is so callers can detect unresolved references if needed.
pub fn substitute_variables(input: &str, variables: &HashMap<String, String>) -> String {
    // Fast path: nothing to substitute.
    if !input.contains("${") {
        return input.to_string();
    }

    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' {
            if chars.peek() == Some(&'{') {
                // Consume '{'.
                chars.next();

                // Collect variable name until '}'.
                let mut var_name = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    var_name.push(c);
                }

                if closed {
                    // Replace with variable value if found; otherwise restore placeholder.
                    if let Some(value) = variables.get(&var_name) {
                        result.push_str(value);
                    } else {
                        result.push('$');
                        result.push('{');
                        result.push_str(&var_name);
                        result.push('}');
                    }
                } else {
                    // Unclosed brace — restore what we consumed.
                    result.push('$');
                    result.push('{');
                    result.push_str(&var_name);
                }
            } else {
                result.push(ch);
            }
        } else {
            result.push(ch);
        }
    }

    result
}

// ---------------------------------------------------------------------------
// JSON path navigator (simple dot-notation)
// ---------------------------------------------------------------------------

/// Navigate a simple dot-notation JSON path.
///
/// Supports:
/// - `"key"` — top-level key
/// - `"key.subkey"` — nested key
/// - `"key[0]"` — array index
/// - `"key[0].subkey"` — array index followed by key
///
/// Does NOT support bracket-notation key access, wildcards, or filter
/// expressions.
pub(crate) fn navigate_json_path<'a>(
    value: &'a serde_json::Value,
    path: &str,
) -> Option<&'a serde_json::Value> {
    let mut current = value;
    for segment in path.split('.') {
        // Check for array index notation: "items[0]"
        if let Some(bracket_pos) = segment.find('[') {
            let key = &segment[..bracket_pos];
            let closing = segment.rfind(']').unwrap_or(segment.len() - 1);
            let idx_str = &segment[bracket_pos + 1..closing];

            // Navigate into the object key (if a key precedes the bracket).
            if !key.is_empty() {
                current = current.get(key)?;
            }
            let idx: usize = idx_str.parse().ok()?;
            current = current.get(idx)?;
        } else {
            current = current.get(segment)?;
        }
    }
    Some(current)
}

/// Convert a `serde_json::Value` to a plain string for storage as a variable.
///
/// Strings are returned without surrounding quotes; other types use their JSON
/// representation.
fn json_value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
