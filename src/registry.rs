use crate::{is_valid_name, ActionInfo, Capability, CapabilityInfo, RegistrationError};

/// Named capabilities, in registration order. Built once during startup and
/// shared read-only afterwards.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    capabilities: Vec<Capability>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&mut self, capability: Capability) -> Result<(), RegistrationError> {
        let name = capability.name().to_string();
        if !is_valid_name(&name) {
            return Err(RegistrationError::InvalidName(name));
        }
        if self.get(&name).is_some() {
            return Err(RegistrationError::DuplicateCapability(name));
        }
        tracing::info!(capability = %name, actions = ?capability.action_names(), "capability registered");
        self.capabilities.push(capability);
        Ok(())
    }

    pub(crate) fn get(&self, name: &str) -> Option<&Capability> {
        self.capabilities.iter().find(|c| c.name() == name)
    }

    pub(crate) fn get_names(&self) -> Vec<String> {
        self.capabilities.iter().map(|c| c.name().to_string()).collect()
    }

    pub(crate) fn describe(&self) -> Vec<CapabilityInfo> {
        self.capabilities.iter().map(Capability::info).collect()
    }

    pub(crate) fn action_info(&self, capability: &str, action: &str) -> Option<ActionInfo> {
        self.get(capability)?.action(action).map(|a| a.info())
    }
}
