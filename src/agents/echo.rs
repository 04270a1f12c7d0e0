use std::sync::Weak;

use serde_json::{Value, json};

use crate::{echo_credentials, with_error_sentinel, Capability, RegistrationError, Registry};

fn registry(handle: &Weak<Registry>) -> Result<std::sync::Arc<Registry>, Box<dyn std::error::Error>> {
    handle.upgrade().ok_or_else(|| "registry has been dropped".into())
}

/// Discovery over the registry: liveness, capability names, action details.
pub(crate) fn create_echo_agent(handle: Weak<Registry>) -> Result<Capability, RegistrationError> {
    let mut agent = Capability::new("echo");

    agent.register_action(
        "ping",
        |_| json!("pong"),
        "Liveness check, always answers pong",
        json!({"type": "null"}),
        json!({"type": "string"}),
    )?;

    let names_handle = handle.clone();
    agent.register_action(
        "get_agents",
        with_error_sentinel("echo.get_agents", move |_| {
            let (_token, breadcrumb) = echo_credentials();
            let names = registry(&names_handle)?.get_names();
            tracing::debug!(correlation_id = %breadcrumb.correlation_id, "listed agents");
            Ok(json!(names))
        }),
        "List the names of every registered agent",
        json!({"type": "null"}),
        json!({"type": "array", "items": {"type": "string"}}),
    )?;

    agent.register_action(
        "get_action",
        with_error_sentinel("echo.get_action", move |arguments| {
            let (_token, breadcrumb) = echo_credentials();
            let agent_name = arguments.get("agent").and_then(Value::as_str).ok_or("agent is required")?;
            let action_name = arguments.get("action").and_then(Value::as_str).ok_or("action is required")?;
            tracing::debug!(agent = agent_name, action = action_name, correlation_id = %breadcrumb.correlation_id, "describing action");
            match registry(&handle)?.action_info(agent_name, action_name) {
                Some(info) => Ok(serde_json::to_value(info)?),
                None => Ok(json!(format!("Unknown action {agent_name}/{action_name}"))),
            }
        }),
        "Describe one action of an agent: description and schemas",
        json!({
            "type": "object",
            "properties": {"agent": {"type": "string"}, "action": {"type": "string"}},
            "required": ["agent", "action"]
        }),
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "description": {"type": "string"},
                "input_schema": {"type": "object"},
                "output_schema": {"type": "object"}
            }
        }),
    )?;

    Ok(agent)
}
