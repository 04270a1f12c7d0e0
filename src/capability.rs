use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub(crate) type ActionHandler = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Returned by handlers that swallowed their own failure.
pub(crate) const ERROR_SENTINEL: &str = "error";

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum RegistrationError {
    #[error("Missing required attributes for action registration")]
    MissingAttributes,
    #[error("invalid name '{0}': expected letters, digits or underscores")]
    InvalidName(String),
    #[error("capability '{0}' is already registered")]
    DuplicateCapability(String),
}

#[derive(Clone)]
pub(crate) struct Action {
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) input_schema: Value,
    pub(crate) output_schema: Value,
    handler: ActionHandler,
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl Action {
    pub(crate) fn call(&self, arguments: &Value) -> Value {
        (self.handler)(arguments)
    }

    pub(crate) fn info(&self) -> ActionInfo {
        ActionInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
            output_schema: self.output_schema.clone(),
        }
    }
}

/// Handler-free view of an action, used for discovery.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub(crate) struct ActionInfo {
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) input_schema: Value,
    pub(crate) output_schema: Value,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct CapabilityInfo {
    pub(crate) name: String,
    pub(crate) actions: Vec<ActionInfo>,
}

/// A named bundle of actions. Actions keep their registration order.
#[derive(Debug, Clone)]
pub(crate) struct Capability {
    name: String,
    actions: Vec<Action>,
}

pub(crate) fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_')
}

fn schema_present(schema: &Value) -> bool {
    match schema {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}

impl Capability {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            actions: Vec::new(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn register_action<F>(
        &mut self,
        name: &str,
        handler: F,
        description: &str,
        input_schema: Value,
        output_schema: Value,
    ) -> Result<(), RegistrationError>
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        if description.trim().is_empty() || !schema_present(&input_schema) || !schema_present(&output_schema) {
            return Err(RegistrationError::MissingAttributes);
        }
        if !is_valid_name(name) {
            return Err(RegistrationError::InvalidName(name.to_string()));
        }
        let action = Action {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
            output_schema,
            handler: Arc::new(handler),
        };
        match self.actions.iter_mut().find(|a| a.name == name) {
            Some(existing) => {
                tracing::debug!(capability = %self.name, action = name, "replacing action");
                *existing = action;
            }
            None => self.actions.push(action),
        }
        Ok(())
    }

    pub(crate) fn action(&self, name: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.name == name)
    }

    pub(crate) fn action_names(&self) -> Vec<&str> {
        self.actions.iter().map(|a| a.name.as_str()).collect()
    }

    /// Unknown actions produce a readable string instead of an error so a model
    /// can see what went wrong and try again.
    pub(crate) fn invoke(&self, action_name: &str, arguments: &Value) -> Value {
        match self.action(action_name) {
            Some(action) => action.call(arguments),
            None => Value::String(format!("Error: Action '{action_name}' not found")),
        }
    }

    pub(crate) fn info(&self) -> CapabilityInfo {
        CapabilityInfo {
            name: self.name.clone(),
            actions: self.actions.iter().map(Action::info).collect(),
        }
    }
}

/// Wraps a fallible handler so a failure is logged and reported as `"error"`.
pub(crate) fn with_error_sentinel<F>(label: &'static str, f: F) -> impl Fn(&Value) -> Value + Send + Sync + 'static
where
    F: Fn(&Value) -> Result<Value, Box<dyn std::error::Error>> + Send + Sync + 'static,
{
    move |arguments: &Value| match f(arguments) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(action = label, error = %err, "action failed");
            Value::String(ERROR_SENTINEL.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object_schema() -> Value {
        json!({"type": "object", "properties": {}})
    }

    fn string_schema() -> Value {
        json!({"type": "string"})
    }

    #[test]
    fn registers_action_with_all_attributes() {
        let mut cap = Capability::new("test_agent");
        cap.register_action("test_action", |_| json!("Executed"), "Test description", object_schema(), string_schema())
            .unwrap();
        assert_eq!(cap.action_names(), vec!["test_action"]);
    }

    #[test]
    fn missing_description_is_rejected() {
        let mut cap = Capability::new("test_agent");
        let err = cap
            .register_action("test_action", |_| json!("Executed"), "", object_schema(), string_schema())
            .unwrap_err();
        assert_eq!(err.to_string(), "Missing required attributes for action registration");
        assert!(cap.action_names().is_empty());
    }

    #[test]
    fn missing_schemas_are_rejected() {
        let mut cap = Capability::new("test_agent");
        let err = cap
            .register_action("test_action", |_| json!("Executed"), "Test description", Value::Null, Value::Null)
            .unwrap_err();
        assert_eq!(err, RegistrationError::MissingAttributes);

        let err = cap
            .register_action("test_action", |_| json!("Executed"), "Test description", object_schema(), json!({}))
            .unwrap_err();
        assert_eq!(err, RegistrationError::MissingAttributes);
        assert!(cap.action("test_action").is_none());
    }

    #[test]
    fn failed_registration_keeps_existing_actions() {
        let mut cap = Capability::new("test_agent");
        cap.register_action("first", |_| json!(1), "first", object_schema(), string_schema())
            .unwrap();
        assert!(cap.register_action("second", |_| json!(2), " ", object_schema(), string_schema()).is_err());
        assert_eq!(cap.action_names(), vec!["first"]);
    }

    #[test]
    fn invokes_with_arguments() {
        let mut cap = Capability::new("test_agent");
        cap.register_action(
            "test_action",
            |args| json!(format!("Received {args}")),
            "Test description",
            object_schema(),
            string_schema(),
        )
        .unwrap();
        let result = cap.invoke("test_action", &json!({"key": "value"}));
        assert_eq!(result, json!("Received {\"key\":\"value\"}"));
    }

    #[test]
    fn unknown_action_is_a_string() {
        let cap = Capability::new("test_agent");
        assert_eq!(
            cap.invoke("unknown_action", &json!({})),
            json!("Error: Action 'unknown_action' not found")
        );
    }

    #[test]
    fn sentinel_wrapper_swallows_errors() {
        let handler = with_error_sentinel("boom", |_| Err("Test Exception".into()));
        assert_eq!(handler(&Value::Null), json!("error"));
        let handler = with_error_sentinel("fine", |args| Ok(args.clone()));
        assert_eq!(handler(&json!([1, 2])), json!([1, 2]));
    }
}
