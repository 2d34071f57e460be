//! Variable placeholder syntax.
//!
//! An externalized value is referenced from the log as `${name}`: literal
//! prefix `${`, literal suffix `}`, a bare name in between, no escaping.
//! This module is the only place that parses or produces that syntax.

/// Literal placeholder prefix.
pub const PLACEHOLDER_PREFIX: &str = "${";

/// Literal placeholder suffix.
pub const PLACEHOLDER_SUFFIX: &str = "}";

/// Whether `name` can appear inside a placeholder.
///
/// Names are non-empty and contain only ASCII alphanumerics, `_`, `-` and `.`,
/// so a placeholder can never contain a nested brace.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Render the placeholder for a variable name.
pub fn placeholder(name: &str) -> String {
    format!("{PLACEHOLDER_PREFIX}{name}{PLACEHOLDER_SUFFIX}")
}

/// Extract the variable name if `text` is exactly one placeholder.
pub fn parse_placeholder(text: &str) -> Option<&str> {
    let name = text
        .strip_prefix(PLACEHOLDER_PREFIX)?
        .strip_suffix(PLACEHOLDER_SUFFIX)?;
    is_valid_name(name).then_some(name)
}

/// Message content read as a tagged value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Content<'a> {
    /// Plain text, used as-is.
    Literal(&'a str),
    /// A reference to an externalized variable.
    Variable(&'a str),
}

impl<'a> Content<'a> {
    pub fn parse(text: &'a str) -> Self {
        match parse_placeholder(text) {
            Some(name) => Content::Variable(name),
            None => Content::Literal(text),
        }
    }

    /// The referenced variable name, if any.
    pub fn variable(&self) -> Option<&'a str> {
        match self {
            Content::Variable(name) => Some(name),
            Content::Literal(_) => None,
        }
    }
}
