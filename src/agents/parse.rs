//! Pulling JSON out of LLM replies.

use serde::de::DeserializeOwned;

use crate::gateway::ProviderError;

/// The first balanced `{...}` in a model reply, or the trimmed reply when
/// there is none. Covers bare JSON, fenced blocks and JSON inside prose.
pub fn extract_json(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed
        .find('{')
        .and_then(|start| {
            let tail = &trimmed[start..];
            object_len(tail).map(|len| &tail[..len])
        })
        .unwrap_or(trimmed)
}

/// Length in bytes of the object opening `s`, which starts with `{`.
/// Braces inside string literals are ignored.
fn object_len(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut chars = s.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => skip_string(&mut chars),
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Advance past the closing quote of a string literal.
fn skip_string(chars: &mut std::str::CharIndices<'_>) {
    while let Some((_, c)) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '"' => return,
            _ => {}
        }
    }
}

/// Parse the JSON object in an LLM reply. Malformed output is permanent;
/// the same prompt at low temperature returns the same shape.
pub fn parse_reply<T: DeserializeOwned>(
    provider: &'static str,
    content: &str,
) -> Result<T, ProviderError> {
    serde_json::from_str(extract_json(content)).map_err(|e| {
        ProviderError::malformed(
            provider,
            format!("unparseable model output: {e}; raw: {}", truncate_chars(content, 500)),
        )
    })
}

/// First `max` characters of `s`.
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
