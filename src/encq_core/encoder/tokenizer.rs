//! Shell-like splitting of the free-form `custom_options` profile field.

use crate::encq_core::error::EncqError;

/// Splits a custom-options string into argv tokens.
///
/// Whitespace separates tokens outside quotes; `"…"` and `'…'` quote
/// literally; a backslash escapes a following `"`, `'`, or `\` and is
/// literal before anything else. Unterminated state at end of input is a
/// validation error so a broken profile never reaches the encoder.
pub(crate) fn tokenize_custom_options(input: &str) -> Result<Vec<String>, EncqError> {
    let mut tokens: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_single = false;
    let mut in_double = false;

    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.peek().copied() {
                Some(next @ ('"' | '\'' | '\\')) => {
                    buf.push(next);
                    chars.next();
                }
                Some(_) => buf.push('\\'),
                None => {
                    return Err(EncqError::validation_field(
                        "custom_options",
                        "dangling escape",
                    ));
                }
            },
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            ' ' | '\t' | '\n' | '\r' if !in_single && !in_double => {
                if !buf.is_empty() {
                    tokens.push(std::mem::take(&mut buf));
                }
            }
            _ => buf.push(c),
        }
    }

    if in_single || in_double {
        return Err(EncqError::validation_field(
            "custom_options",
            "unclosed quote",
        ));
    }
    if !buf.is_empty() {
        tokens.push(buf);
    }
    Ok(tokens)
}
