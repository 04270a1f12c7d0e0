use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub(crate) const UNKNOWN_USER: &str = "unknown";
pub(crate) const HUMAN_ROLE: &str = "user";
pub(crate) const MODEL_ROLE: &str = "assistant";
pub(crate) const GROUP_DIALOG: &str = "group";
pub(crate) const TOOLS_DIALOG: &str = "tools";

/// Author of a turn as the model API sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub(crate) enum Role {
    #[default]
    #[serde(rename = "user")]
    Human,
    #[serde(rename = "assistant")]
    Model,
}

impl Role {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Human => HUMAN_ROLE,
            Self::Model => MODEL_ROLE,
        }
    }

    /// Anything that is not the model's own role is treated as human input.
    pub(crate) fn from_wire(role: &str) -> Self {
        if role.trim().eq_ignore_ascii_case(MODEL_ROLE) {
            Self::Model
        } else {
            Self::Human
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audience of a turn: the human-facing channel or the model/capability side channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub(crate) enum Dialog {
    #[default]
    #[serde(rename = "group")]
    Open,
    #[serde(rename = "tools")]
    Tool,
}

impl Dialog {
    pub(crate) fn token(&self) -> &'static str {
        match self {
            Self::Open => GROUP_DIALOG,
            Self::Tool => TOOLS_DIALOG,
        }
    }

    pub(crate) fn from_token(token: &str) -> Option<Self> {
        match token {
            GROUP_DIALOG => Some(Self::Open),
            TOOLS_DIALOG | "tool" => Some(Self::Tool),
            _ => None,
        }
    }
}

impl std::fmt::Display for Dialog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.token())
    }
}

/// The `{role, content}` shape chat APIs consume and the store hands back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct LlmMessage {
    pub(crate) role: String,
    #[serde(default)]
    pub(crate) content: String,
}

impl LlmMessage {
    pub(crate) fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ChatResponse {
    pub(crate) message: LlmMessage,
}

/// Row identifier of a stored document. Always crosses the wire as a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct DocumentId(pub(crate) i64);

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:024x}", self.0)
    }
}

impl Serialize for DocumentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DocumentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        i64::from_str_radix(raw.trim(), 16)
            .map(DocumentId)
            .map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for timestamps: `2025-03-05 12:34:56.789000`.
pub(crate) mod wire_time {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) const FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

    pub(crate) fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&value.format(FORMAT))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)
    }
}

pub(crate) fn format_wire_time(value: &NaiveDateTime) -> String {
    value.format(wire_time::FORMAT).to_string()
}

pub(crate) fn parse_wire_time(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, wire_time::FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_wire_names() {
        assert_eq!(Role::Human.as_str(), "user");
        assert_eq!(Role::Model.as_str(), "assistant");
        assert_eq!(Role::from_wire("assistant"), Role::Model);
        assert_eq!(Role::from_wire("system"), Role::Human);
    }

    #[test]
    fn dialog_tokens_and_alias() {
        assert_eq!(Dialog::from_token("group"), Some(Dialog::Open));
        assert_eq!(Dialog::from_token("tools"), Some(Dialog::Tool));
        assert_eq!(Dialog::from_token("tool"), Some(Dialog::Tool));
        assert_eq!(Dialog::from_token("Everyone"), None);
    }

    #[test]
    fn document_id_is_a_string_on_the_wire() {
        let id = DocumentId(42);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"00000000000000000000002a\"");
        let back: DocumentId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn wire_time_keeps_microseconds() {
        let ts = NaiveDateTime::parse_from_str("2025-03-05 12:34:56.789", "%Y-%m-%d %H:%M:%S%.3f").unwrap();
        assert_eq!(format_wire_time(&ts), "2025-03-05 12:34:56.789000");
        assert_eq!(parse_wire_time("2025-03-05 12:34:56.789000"), Some(ts));
    }
}
