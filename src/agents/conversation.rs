use std::sync::Arc;

use serde_json::{Value, json};

use crate::{
    channel_arg, echo_credentials, query_arg, with_error_sentinel, Capability, ConversationPatch, ConversationStore, LlmMessage,
    RegistrationError, HUMAN_ROLE,
};

/// A message passed as plain text is taken to be from the human side.
fn message_arg(arguments: &Value) -> Result<LlmMessage, Box<dyn std::error::Error>> {
    match arguments.get("message") {
        Some(Value::String(text)) => Ok(LlmMessage::new(HUMAN_ROLE, text.clone())),
        Some(value @ Value::Object(_)) => Ok(serde_json::from_value(value.clone())?),
        _ => Err("message is required".into()),
    }
}

fn conversation_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "_id": {"type": "string"},
            "channel_id": {"type": "string"},
            "status": {"type": "string"},
            "version": {"type": "string"},
            "created_at": {"type": "string"},
            "last_saved": {"type": "object"},
            "messages": {"type": "array", "items": message_schema()}
        }
    })
}

fn message_schema() -> Value {
    json!({
        "type": "object",
        "properties": {"role": {"type": "string"}, "content": {"type": "string"}},
        "required": ["role", "content"]
    })
}

fn summaries_schema() -> Value {
    json!({
        "type": "array",
        "items": {
            "type": "object",
            "properties": {"_id": {"type": "string"}, "channel_id": {"type": "string"}}
        }
    })
}

pub(crate) fn create_conversation_agent(store: Arc<ConversationStore>) -> Result<Capability, RegistrationError> {
    let mut agent = Capability::new("conversation");

    let s = store.clone();
    agent.register_action(
        "get_conversations",
        with_error_sentinel("conversation.get_conversations", move |_| {
            let (token, _breadcrumb) = echo_credentials();
            Ok(serde_json::to_value(s.get_conversations(&token)?)?)
        }),
        "List the live conversation of every channel",
        json!({"type": "null"}),
        summaries_schema(),
    )?;

    let s = store.clone();
    agent.register_action(
        "find_conversations",
        with_error_sentinel("conversation.find_conversations", move |arguments| {
            let (token, _breadcrumb) = echo_credentials();
            let query = query_arg(arguments);
            Ok(serde_json::to_value(s.find_conversations(query.as_deref(), &token)?)?)
        }),
        "List every conversation, live or completed, whose channel matches a regular expression",
        json!({"type": "string", "description": "Regular expression over channel_id"}),
        summaries_schema(),
    )?;

    let s = store.clone();
    agent.register_action(
        "get_conversation",
        with_error_sentinel("conversation.get_conversation", move |arguments| {
            let (token, breadcrumb) = echo_credentials();
            let channel = channel_arg(arguments)?;
            Ok(serde_json::to_value(s.get_conversation(&channel, &token, &breadcrumb)?)?)
        }),
        "Get the live conversation of a channel, creating it when missing",
        json!({"type": "string", "description": "channel_id"}),
        conversation_schema(),
    )?;

    let s = store.clone();
    agent.register_action(
        "update_conversation",
        with_error_sentinel("conversation.update_conversation", move |arguments| {
            let (token, breadcrumb) = echo_credentials();
            let channel = channel_arg(arguments)?;
            let patch: ConversationPatch = serde_json::from_value(arguments.clone())?;
            Ok(serde_json::to_value(s.update_conversation(&channel, &patch, &token, &breadcrumb)?)?)
        }),
        "Update status, version or messages of a channel's live conversation",
        json!({
            "type": "object",
            "properties": {
                "channel_id": {"type": "string"},
                "status": {"type": "string"},
                "version": {"type": "string"},
                "messages": {"type": "array", "items": message_schema()}
            },
            "required": ["channel_id"]
        }),
        conversation_schema(),
    )?;

    let s = store.clone();
    agent.register_action(
        "add_message",
        with_error_sentinel("conversation.add_message", move |arguments| {
            let (token, breadcrumb) = echo_credentials();
            let channel = channel_arg(arguments)?;
            let message = message_arg(arguments)?;
            Ok(serde_json::to_value(s.add_message(&channel, &message, &token, &breadcrumb)?)?)
        }),
        "Append a message to a channel's conversation and return the full history",
        json!({
            "type": "object",
            "properties": {"channel_id": {"type": "string"}, "message": message_schema()},
            "required": ["channel_id", "message"]
        }),
        json!({"type": "array", "items": message_schema()}),
    )?;

    let s = store.clone();
    agent.register_action(
        "reset_conversation",
        with_error_sentinel("conversation.reset_conversation", move |arguments| {
            let (token, breadcrumb) = echo_credentials();
            let channel = channel_arg(arguments)?;
            match s.reset_conversation(&channel, &token, &breadcrumb)? {
                Some(conversation) => Ok(serde_json::to_value(conversation)?),
                None => Ok(json!("Nothing to reset")),
            }
        }),
        "Retire a channel's live conversation so the next message starts a new one",
        json!({"type": "string", "description": "channel_id"}),
        conversation_schema(),
    )?;

    agent.register_action(
        "load_named_conversation",
        with_error_sentinel("conversation.load_named_conversation", move |arguments| {
            let (token, breadcrumb) = echo_credentials();
            let channel = channel_arg(arguments)?;
            let named = arguments
                .get("named_conversation")
                .and_then(Value::as_str)
                .ok_or("named_conversation is required")?;
            Ok(serde_json::to_value(store.load_named_conversation(&channel, named, &token, &breadcrumb)?)?)
        }),
        "Copy the messages of another channel's live conversation into this channel",
        json!({
            "type": "object",
            "properties": {"channel_id": {"type": "string"}, "named_conversation": {"type": "string"}},
            "required": ["channel_id", "named_conversation"]
        }),
        conversation_schema(),
    )?;

    Ok(agent)
}
