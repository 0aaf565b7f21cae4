use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, RouterError};

/// Router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Router name, attached to every log line of its coordinator
    pub name: String,
    /// Capacity of the coordinator's event channel
    pub event_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            name: format!("router-{}", Uuid::new_v4()),
            event_capacity: 1024,
        }
    }
}

impl RouterConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Load a configuration from YAML; missing fields take their defaults
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| RouterError::configuration(format!("invalid router config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(RouterError::configuration_field("name cannot be empty", "name"));
        }
        if self.event_capacity == 0 {
            return Err(RouterError::configuration_field(
                "event_capacity cannot be zero",
                "event_capacity",
            ));
        }
        Ok(())
    }
}
