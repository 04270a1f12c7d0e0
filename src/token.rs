use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

pub(crate) const ECHO_USER_ID: &str = "aaaa00000000000000000001";

/// Caller identity handed to every store operation. Carried, not enforced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Token {
    pub(crate) user_id: String,
    #[serde(default)]
    pub(crate) roles: Vec<String>,
}

/// Token the bot itself acts under.
pub(crate) fn create_echo_token() -> Token {
    Token {
        user_id: ECHO_USER_ID.to_string(),
        roles: vec!["Staff".to_string(), "admin".to_string()],
    }
}

/// Audit stamp written to `last_saved` on every store mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Breadcrumb {
    #[serde(with = "crate::types::wire_time")]
    pub(crate) at_time: NaiveDateTime,
    pub(crate) by_user: String,
    pub(crate) from_ip: String,
    pub(crate) correlation_id: String,
}

pub(crate) fn create_breadcrumb(token: &Token, from_ip: &str) -> Breadcrumb {
    let at_time = Utc::now().naive_utc();
    let mut hasher = blake3::Hasher::new();
    hasher.update(token.user_id.as_bytes());
    hasher.update(from_ip.as_bytes());
    hasher.update(&at_time.and_utc().timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    let digest = hasher.finalize().to_hex();
    Breadcrumb {
        at_time,
        by_user: token.user_id.clone(),
        from_ip: from_ip.to_string(),
        correlation_id: digest.as_str()[..32].to_string(),
    }
}
