//! Placeholder templates for alert subjects and bodies.
//!
//! Templates use `{field}` tokens that are replaced by named values. `{{` and
//! `}}` produce literal braces. Unknown fields and stray braces are errors:
//! templates come from configuration, so a bad one is a programming error
//! surfaced the first time it is rendered (and at startup validation).

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Matches escaped braces, `{field}` tokens, and stray braces.
static TOKEN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\{\{|\}\}|\{([^{}]*)\}|[{}]").ok());

/// Characters that end a line in a description, besides `\r\n`.
const LINE_BREAKS: [char; 10] = [
    '\n', '\r', '\x0b', '\x0c', '\x1c', '\x1d', '\x1e', '\u{85}', '\u{2028}', '\u{2029}',
];

/// Error type for template rendering.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// The template references a field that was not supplied.
    #[error("unknown placeholder '{{{0}}}' in template")]
    UnknownPlaceholder(String),
    /// The template contains an unmatched `{` or `}`.
    #[error("unmatched brace at byte {0} in template")]
    Malformed(usize),
    /// The placeholder pattern could not be compiled.
    #[error("template token pattern failed to compile")]
    PatternUnavailable,
}

/// Named values available to a template.
pub type Fields = BTreeMap<&'static str, String>;

/// Render `template`, substituting every `{field}` from `fields`.
///
/// # Errors
///
/// Returns [`TemplateError::UnknownPlaceholder`] for a field missing from
/// `fields` and [`TemplateError::Malformed`] for an unmatched brace.
pub fn render(template: &str, fields: &Fields) -> Result<String, TemplateError> {
    let token = TOKEN.as_ref().ok_or(TemplateError::PatternUnavailable)?;
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in token.captures_iter(template) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        out.push_str(&template[last..whole.start()]);
        last = whole.end();

        match whole.as_str() {
            "{{" => out.push('{'),
            "}}" => out.push('}'),
            "{" | "}" => return Err(TemplateError::Malformed(whole.start())),
            _ => {
                let key = caps.get(1).map_or("", |m| m.as_str());
                let value = fields
                    .get(key)
                    .ok_or_else(|| TemplateError::UnknownPlaceholder(key.to_owned()))?;
                out.push_str(value);
            }
        }
    }

    out.push_str(&template[last..]);
    Ok(out)
}

/// Normalise a check description for use in templates.
///
/// Trims the whole text, then strips every line and terminates it with a
/// single newline. Line breaks are the Unicode set (`\v`, `\f`, the
/// information separators, NEL, LS, PS) as well as `\n`, `\r` and `\r\n`.
/// A missing description becomes the empty string.
pub fn strip_description(description: Option<&str>) -> String {
    let Some(text) = description else {
        return String::new();
    };
    let trimmed = text.trim_matches(is_blank);
    if trimmed.is_empty() {
        return String::new();
    }

    trimmed
        .replace("\r\n", "\n")
        .split(LINE_BREAKS)
        .fold(String::new(), |mut acc, line| {
            acc.push_str(line.trim_matches(is_blank));
            acc.push('\n');
            acc
        })
}

/// Unicode whitespace plus the ASCII information separators.
fn is_blank(c: char) -> bool {
    c.is_whitespace() || ('\x1c'..='\x1f').contains(&c)
}
