//! Capabilities shipped with the bot and the registry that wires them up.

mod bot;
mod config;
mod conversation;
mod echo;

use std::sync::Arc;

use serde_json::Value;

use crate::{create_breadcrumb, create_echo_token, Breadcrumb, Config, ConversationStore, RegistrationError, Registry, Token};

pub(crate) use bot::create_bot_agent;
pub(crate) use config::create_config_agent;
pub(crate) use conversation::create_conversation_agent;
pub(crate) use echo::create_echo_agent;

/// Origin recorded in breadcrumbs for work the bot does on its own behalf.
pub(crate) const ECHO_ORIGIN: &str = "echo";

pub(crate) fn echo_credentials() -> (Token, Breadcrumb) {
    let token = create_echo_token();
    let breadcrumb = create_breadcrumb(&token, ECHO_ORIGIN);
    (token, breadcrumb)
}

/// Reads a channel id passed either as a bare string or as `{"channel_id": ..}`.
pub(crate) fn channel_arg(arguments: &Value) -> Result<String, Box<dyn std::error::Error>> {
    let channel = match arguments {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map.get("channel_id").and_then(Value::as_str),
        _ => None,
    };
    channel
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .ok_or_else(|| "channel_id is required".into())
}

/// Reads an optional search pattern passed as a string or as `{"query": ..}`.
pub(crate) fn query_arg(arguments: &Value) -> Option<String> {
    match arguments {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("query").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// Builds the shared registry. `echo` needs to see the registry it lives in,
/// so it gets a weak handle to the `Arc` being constructed.
pub(crate) fn build_registry(store: Arc<ConversationStore>, config: Arc<Config>) -> Result<Arc<Registry>, RegistrationError> {
    let mut failure = None;
    let registry = Arc::new_cyclic(|weak| {
        let mut registry = Registry::new();
        let wired = (|| {
            registry.register(create_echo_agent(weak.clone())?)?;
            registry.register(create_bot_agent(store.clone())?)?;
            registry.register(create_conversation_agent(store)?)?;
            registry.register(create_config_agent(config)?)?;
            Ok::<(), RegistrationError>(())
        })();
        if let Err(err) = wired {
            failure = Some(err);
        }
        registry
    });
    match failure {
        Some(err) => Err(err),
        None => Ok(registry),
    }
}
