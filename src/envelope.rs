//! Text envelope for chat turns: `From:<user> To:<dialog> <text>`.
//!
//! Decoding is deliberately lenient. Models do not always reproduce the
//! prefix faithfully, so a decode never fails; it falls through four tiers:
//!
//! 1. full grammar: user, dialog token and text are all taken from the content
//!    (an unrecognized dialog token is still stripped, the dialog becomes open).
//!    Whitespace after the dialog token is required and all of it is consumed,
//!    so text never starts with whitespace;
//! 2. `From:` prefix and a malformed `To:`: user from the prefix, text is
//!    whatever follows the first literal `To:`, dialog keeps its default;
//! 3. `From:` prefix and no `To:` at all: user from the prefix, the whole
//!    content is the text;
//! 4. anything else: defaults for user and dialog, the whole content is the text.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Dialog, LlmMessage, Role, UNKNOWN_USER};

static FULL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^From:(\S+)\s+To:(\S+)\s+(?s:(.*))$").expect("envelope pattern")
});

static FROM_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^From:(\S+)").expect("from prefix pattern"));

const TO_MARKER: &str = "To:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Envelope {
    pub(crate) role: Role,
    pub(crate) user: String,
    pub(crate) dialog: Dialog,
    pub(crate) text: String,
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            role: Role::Human,
            user: UNKNOWN_USER.to_string(),
            dialog: Dialog::Open,
            text: String::new(),
        }
    }
}

impl Envelope {
    pub(crate) fn new(role: Role, user: &str, dialog: Dialog, text: &str) -> Self {
        let user = if user.trim().is_empty() { UNKNOWN_USER } else { user };
        Self {
            role,
            user: user.to_string(),
            dialog,
            text: text.to_string(),
        }
    }

    pub(crate) fn encode(user: &str, dialog: Dialog, text: &str) -> String {
        format!("From:{user} To:{} {text}", dialog.token())
    }

    pub(crate) fn encoded(&self) -> String {
        Self::encode(&self.user, self.dialog, &self.text)
    }

    pub(crate) fn as_llm_message(&self) -> LlmMessage {
        LlmMessage::new(self.role.as_str(), self.encoded())
    }

    pub(crate) fn decode(content: &str, role: Role) -> Self {
        Self::decode_with(content, role, None, Dialog::Open)
    }

    pub(crate) fn decode_with(
        content: &str,
        role: Role,
        default_user: Option<&str>,
        default_dialog: Dialog,
    ) -> Self {
        let default_user = default_user
            .filter(|u| !u.trim().is_empty())
            .unwrap_or(UNKNOWN_USER);

        if let Some(caps) = FULL_PATTERN.captures(content) {
            let dialog = Dialog::from_token(&caps[2]).unwrap_or(Dialog::Open);
            return Self {
                role,
                user: caps[1].to_string(),
                dialog,
                text: caps.get(3).map(|m| m.as_str()).unwrap_or("").to_string(),
            };
        }

        if let Some(caps) = FROM_PREFIX.captures(content) {
            let user = caps[1].to_string();
            if let Some(at) = content.find(TO_MARKER) {
                let text = content[at + TO_MARKER.len()..].trim().to_string();
                return Self {
                    role,
                    user,
                    dialog: default_dialog,
                    text,
                };
            }
            return Self {
                role,
                user,
                dialog: default_dialog,
                text: content.to_string(),
            };
        }

        Self {
            role,
            user: default_user.to_string(),
            dialog: default_dialog,
            text: content.to_string(),
        }
    }

    pub(crate) fn from_llm_message(message: &LlmMessage) -> Self {
        Self::decode(&message.content, Role::from_wire(&message.role))
    }
}
