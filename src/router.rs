//! `/capability/action/arguments` commands and their dispatch.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::{Action, Capability, Registry};

/// Anchored at the start: a command embedded in prose is not a command.
/// The argument segment may be omitted, which means `null` arguments, and
/// may run over several lines.
static COMMAND_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^/(\w+)/(\w+)(?:/(.*)|\s*$)").expect("command pattern")
});

#[derive(Debug, Error)]
pub(crate) enum CommandError {
    #[error("not a /capability/action/arguments command: {0}")]
    Grammar(String),
    #[error("command arguments are not valid JSON: {0}")]
    Arguments(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Command {
    pub(crate) capability: String,
    pub(crate) action: String,
    pub(crate) arguments: Value,
}

pub(crate) fn is_command(text: &str) -> bool {
    COMMAND_PATTERN.is_match(text)
}

pub(crate) fn parse_command(text: &str) -> Result<Command, CommandError> {
    let caps = COMMAND_PATTERN
        .captures(text)
        .ok_or_else(|| CommandError::Grammar(text.chars().take(80).collect()))?;
    let arguments = match caps.get(3) {
        Some(raw) => serde_json::from_str(raw.as_str())?,
        None => Value::Null,
    };
    Ok(Command {
        capability: caps[1].to_string(),
        action: caps[2].to_string(),
        arguments,
    })
}

pub(crate) enum Resolution<'a> {
    Found(&'a Capability, &'a Action),
    CapabilityMissing,
    ActionMissing(&'a Capability),
}

impl Registry {
    pub(crate) fn resolve(&self, capability: &str, action: &str) -> Resolution<'_> {
        let Some(cap) = self.get(capability) else {
            return Resolution::CapabilityMissing;
        };
        match cap.action(action) {
            Some(found) => Resolution::Found(cap, found),
            None => Resolution::ActionMissing(cap),
        }
    }

    /// Resolution misses come back as descriptive strings, never as errors.
    pub(crate) fn dispatch(&self, command: &Command) -> Value {
        match self.resolve(&command.capability, &command.action) {
            Resolution::Found(cap, action) => {
                tracing::debug!(capability = cap.name(), action = %action.name, "dispatching command");
                action.call(&command.arguments)
            }
            Resolution::CapabilityMissing => {
                tracing::debug!(capability = %command.capability, "unknown capability");
                Value::String(format!(
                    "Unknown Capability {}. Available capabilities are: {}",
                    command.capability,
                    self.get_names().join(", ")
                ))
            }
            Resolution::ActionMissing(cap) => {
                tracing::debug!(capability = cap.name(), action = %command.action, "unknown action");
                Value::String(format!(
                    "Error: Unknown action '{}'. Available actions: {}",
                    command.action,
                    cap.action_names().join(", ")
                ))
            }
        }
    }

    pub(crate) fn route(&self, text: &str) -> Result<Value, CommandError> {
        let command = parse_command(text)?;
        Ok(self.dispatch(&command))
    }
}
