use std::sync::Arc;

use serde_json::json;

use crate::{echo_credentials, with_error_sentinel, Capability, Config, RegistrationError};

pub(crate) fn create_config_agent(config: Arc<Config>) -> Result<Capability, RegistrationError> {
    let mut agent = Capability::new("config");
    agent.register_action(
        "get_config",
        with_error_sentinel("config.get_config", move |_| {
            let (token, _breadcrumb) = echo_credentials();
            Ok(config.to_public_value(&token))
        }),
        "Report where each setting came from; secret values are masked",
        json!({"type": "null"}),
        json!({
            "type": "object",
            "properties": {
                "config_items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": {"type": "string"},
                            "value": {"type": "string"},
                            "from": {"type": "string"}
                        }
                    }
                },
                "token": {"type": "object"}
            }
        }),
    )?;
    Ok(agent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FileConfig;
    use serde_json::Value;

    #[test]
    fn get_config_lists_items() {
        let config = Config::resolve(&FileConfig::default(), &|_| None).unwrap();
        let agent = create_config_agent(Arc::new(config)).unwrap();
        let value = agent.invoke("get_config", &Value::Null);
        let items = value["config_items"].as_array().unwrap();
        assert!(items.iter().any(|i| i["name"] == "ECHO_BOT_NAME" && i["value"] == "Echo"));
        assert_eq!(value["token"]["roles"], json!(["Staff", "admin"]));
    }
}
