use std::sync::Arc;

use serde_json::{Value, json};

use crate::{echo_credentials, query_arg, with_error_sentinel, BotPatch, Capability, ConversationStore, RegistrationError};

/// Reads a bot id passed either as a bare string or as `{"bot_id": ..}`.
fn bot_arg(arguments: &Value) -> Result<String, Box<dyn std::error::Error>> {
    let bot_id = match arguments {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map.get("bot_id").and_then(Value::as_str),
        _ => None,
    };
    bot_id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| "bot_id is required".into())
}

fn channel_of(arguments: &Value) -> Result<String, Box<dyn std::error::Error>> {
    arguments
        .get("channel_id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| "channel_id is required".into())
}

fn bot_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "_id": {"type": "string"},
            "name": {"type": "string"},
            "description": {"type": "string"},
            "status": {"type": "string"},
            "channels": {"type": "array", "items": {"type": "string"}},
            "last_saved": {"type": "object"}
        }
    })
}

fn channels_schema() -> Value {
    json!({"type": "array", "items": {"type": "string"}})
}

fn bot_channel_schema() -> Value {
    json!({
        "type": "object",
        "properties": {"bot_id": {"type": "string"}, "channel_id": {"type": "string"}},
        "required": ["bot_id", "channel_id"]
    })
}

pub(crate) fn create_bot_agent(store: Arc<ConversationStore>) -> Result<Capability, RegistrationError> {
    let mut agent = Capability::new("bot");

    let s = store.clone();
    agent.register_action(
        "get_bots",
        with_error_sentinel("bot.get_bots", move |arguments| {
            let (token, _breadcrumb) = echo_credentials();
            let query = query_arg(arguments);
            Ok(serde_json::to_value(s.get_bots(query.as_deref(), &token)?)?)
        }),
        "List active bots whose name matches a regular expression",
        json!({"type": "string", "description": "Regular expression over bot name"}),
        json!({
            "type": "array",
            "items": {
                "type": "object",
                "properties": {"_id": {"type": "string"}, "name": {"type": "string"}, "description": {"type": "string"}}
            }
        }),
    )?;

    let s = store.clone();
    agent.register_action(
        "get_bot",
        with_error_sentinel("bot.get_bot", move |arguments| {
            let (token, _breadcrumb) = echo_credentials();
            Ok(serde_json::to_value(s.get_bot(&bot_arg(arguments)?, &token)?)?)
        }),
        "Get one bot by id",
        json!({"type": "string", "description": "bot_id"}),
        bot_schema(),
    )?;

    let s = store.clone();
    agent.register_action(
        "update_bot",
        with_error_sentinel("bot.update_bot", move |arguments| {
            let (token, breadcrumb) = echo_credentials();
            let bot_id = bot_arg(arguments)?;
            let patch: BotPatch = serde_json::from_value(arguments.clone())?;
            Ok(serde_json::to_value(s.update_bot(&bot_id, &patch, &token, &breadcrumb)?)?)
        }),
        "Update name, description, status or channels of a bot",
        json!({
            "type": "object",
            "properties": {
                "bot_id": {"type": "string"},
                "name": {"type": "string"},
                "description": {"type": "string"},
                "status": {"type": "string"},
                "channels": channels_schema()
            },
            "required": ["bot_id"]
        }),
        bot_schema(),
    )?;

    let s = store.clone();
    agent.register_action(
        "get_channels",
        with_error_sentinel("bot.get_channels", move |arguments| {
            let (token, _breadcrumb) = echo_credentials();
            Ok(json!(s.get_channels(&bot_arg(arguments)?, &token)?))
        }),
        "List the channels a bot listens on",
        json!({"type": "string", "description": "bot_id"}),
        channels_schema(),
    )?;

    let s = store.clone();
    agent.register_action(
        "add_channel",
        with_error_sentinel("bot.add_channel", move |arguments| {
            let (token, breadcrumb) = echo_credentials();
            let bot_id = bot_arg(arguments)?;
            let channel_id = channel_of(arguments)?;
            Ok(json!(s.add_channel(&bot_id, &channel_id, &token, &breadcrumb)?))
        }),
        "Add a channel to a bot and return its channels",
        bot_channel_schema(),
        channels_schema(),
    )?;

    agent.register_action(
        "remove_channel",
        with_error_sentinel("bot.remove_channel", move |arguments| {
            let (token, breadcrumb) = echo_credentials();
            let bot_id = bot_arg(arguments)?;
            let channel_id = channel_of(arguments)?;
            Ok(json!(store.remove_channel(&bot_id, &channel_id, &token, &breadcrumb)?))
        }),
        "Remove a channel from a bot and return its channels",
        bot_channel_schema(),
        channels_schema(),
    )?;

    Ok(agent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_breadcrumb, create_echo_token, DEFAULT_BOT_ID};

    fn agent() -> Capability {
        let store = Arc::new(ConversationStore::open_in_memory().unwrap());
        let token = create_echo_token();
        store
            .ensure_bot(DEFAULT_BOT_ID, "Echo", "Test bot", &token, &create_breadcrumb(&token, "test"))
            .unwrap();
        create_bot_agent(store).unwrap()
    }

    #[test]
    fn registers_every_action() {
        assert_eq!(
            agent().action_names(),
            vec!["get_bots", "get_bot", "update_bot", "get_channels", "add_channel", "remove_channel"]
        );
    }

    #[test]
    fn get_bot_by_plain_id() {
        let agent = agent();
        let bot = agent.invoke("get_bot", &json!(DEFAULT_BOT_ID));
        assert_eq!(bot["_id"], DEFAULT_BOT_ID);
        assert_eq!(bot["name"], "Echo");
        assert_eq!(bot["channels"], json!([]));
        let listed = agent.invoke("get_bots", &json!("^Ec"));
        assert_eq!(listed[0]["name"], "Echo");
    }

    #[test]
    fn channel_actions_return_channels() {
        let agent = agent();
        let args = json!({"bot_id": DEFAULT_BOT_ID, "channel_id": "test_channel"});
        assert_eq!(agent.invoke("add_channel", &args), json!(["test_channel"]));
        assert_eq!(agent.invoke("get_channels", &json!(DEFAULT_BOT_ID)), json!(["test_channel"]));
        assert_eq!(agent.invoke("remove_channel", &args), json!([]));
    }

    #[test]
    fn update_bot_patches_fields() {
        let agent = agent();
        let bot = agent.invoke("update_bot", &json!({"bot_id": DEFAULT_BOT_ID, "description": "Updated"}));
        assert_eq!(bot["description"], "Updated");
        assert_eq!(bot["last_saved"]["fromIp"], "echo");
    }

    #[test]
    fn failures_yield_the_sentinel() {
        let agent = agent();
        assert_eq!(agent.invoke("get_bot", &json!({"description": "test_bot_id"})), json!("error"));
        assert_eq!(agent.invoke("get_bot", &json!("missing")), json!("error"));
        assert_eq!(agent.invoke("get_channels", &json!("missing")), json!("error"));
        assert_eq!(agent.invoke("add_channel", &json!({"bot_id": DEFAULT_BOT_ID})), json!("error"));
        assert_eq!(agent.invoke("remove_channel", &json!({"bot_id": "missing", "channel_id": "c"})), json!("error"));
        assert_eq!(agent.invoke("get_bots", &json!("(")), json!("error"));
    }
}
