//! Trigger matching
//!
//! Decides whether an inbound message activates a conversation's agent. Pure
//! functions over the conversation's trigger configuration; no IO.

use serde::{Deserialize, Serialize};

/// Per-conversation trigger configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TriggerConfig {
    /// Trigger word the message must start with
    pub word: Option<String>,

    /// Whether a trigger is required at all; when false the
    /// conversation activates unconditionally
    pub required: bool,

    /// Match the trigger word case-sensitively
    pub case_sensitive: bool,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            word: None,
            required: false,
            case_sensitive: false,
        }
    }
}

impl TriggerConfig {
    /// A required, case-insensitive trigger word.
    pub fn word(word: impl Into<String>) -> Self {
        Self {
            word: Some(word.into()),
            required: true,
            case_sensitive: false,
        }
    }
}

/// Evaluate a message against a trigger configuration.
///
/// Returns the content to forward to the agent when the message activates,
/// `None` otherwise. Trigger-free conversations pass content through
/// unmodified; a matched trigger word and its separator are stripped.
pub fn evaluate(trigger: &TriggerConfig, text: &str) -> Option<String> {
    if !trigger.required {
        return Some(text.to_string());
    }

    let word = trigger.word.as_deref()?;
    if word.is_empty() {
        return None;
    }

    let trimmed = text.trim_start();
    if trimmed.is_empty() {
        return None;
    }

    let matches = match trimmed.get(..word.len()) {
        Some(prefix) if trigger.case_sensitive => prefix == word,
        Some(prefix) => prefix.eq_ignore_ascii_case(word),
        None => false,
    };
    if !matches {
        return None;
    }

    // The trigger must be a whole prefix word: end of message or a
    // non-alphanumeric separator must follow.
    let rest = &trimmed[word.len()..];
    match rest.chars().next() {
        Some(c) if c.is_alphanumeric() => None,
        _ => Some(
            rest.trim_start_matches(|c: char| c.is_whitespace() || ",;:.!?-".contains(c))
                .to_string(),
        ),
    }
}
