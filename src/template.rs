//! Declarative stack templates
//!
//! The typed boundary where a stack-create request enters the engine.
//! Templates are parsed from YAML (or JSON) into concrete structs and
//! validated up front, so malformed shapes and unknown personality names
//! are rejected here with a typed error instead of failing on missing-key
//! access deep inside a personality.

use crate::error::{ForgeError, Result};
use crate::personality::PersonalityRegistry;
use serde::{Deserialize, Serialize};

/// A compute layer request bound to a storage entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComputeTemplate {
    /// Compute personality name
    pub personality: String,
    /// Requested instance count, before role expansion
    pub instances: u32,
    /// Declared auxiliary layers (e.g. `hive` on a `hadoop` request)
    #[serde(default)]
    pub layers: Vec<String>,
}

/// One backend entry: a storage cluster plus the compute clusters that
/// bind against it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendTemplate {
    /// Storage personality name
    pub storage: String,
    /// Requested storage instance count
    pub instances: u32,
    /// Compute clusters for this backend
    #[serde(default)]
    pub compute: Vec<ComputeTemplate>,
}

/// A connector request, expanded into one service per instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectorTemplate {
    /// Connector personality name
    pub personality: String,
    /// Number of connector services to allocate
    pub instances: u32,
}

/// Declarative description of a full stack
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackTemplate {
    /// Template id, user-supplied or derived
    #[serde(default)]
    pub id: String,
    /// Backend entries, allocated in order
    #[serde(default)]
    pub backends: Vec<BackendTemplate>,
    /// Connector entries, allocated after all backends
    #[serde(default)]
    pub connectors: Vec<ConnectorTemplate>,
}

impl StackTemplate {
    /// Parse a template from YAML.
    pub fn parse_str(input: &str) -> Result<Self> {
        let template: StackTemplate = serde_yaml::from_str(input)
            .map_err(|e| ForgeError::InvalidTemplate(e.to_string()))?;
        Ok(template)
    }

    /// Validate the template against the personality registry: every
    /// named personality must exist and carry the right class, and every
    /// instance count must be positive.
    pub fn validate(&self, registry: &PersonalityRegistry) -> Result<()> {
        if self.backends.is_empty() {
            return Err(ForgeError::InvalidTemplate(
                "template declares no backends".to_string(),
            ));
        }
        for backend in &self.backends {
            let storage = registry.storage(&backend.storage)?;
            if backend.instances == 0 {
                return Err(ForgeError::InvalidTemplate(format!(
                    "storage '{}' requests zero instances",
                    storage.name()
                )));
            }
            for compute in &backend.compute {
                let personality = registry.compute(&compute.personality)?;
                if compute.instances == 0 {
                    return Err(ForgeError::InvalidTemplate(format!(
                        "compute '{}' requests zero instances",
                        personality.name()
                    )));
                }
            }
        }
        for connector in &self.connectors {
            registry.connector(&connector.personality)?;
            if connector.instances == 0 {
                return Err(ForgeError::InvalidTemplate(format!(
                    "connector '{}' requests zero instances",
                    connector.personality
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::personality::PersonalityRegistry;

    const MONGO_STACK: &str = r#"
id: mongo-demo
backends:
  - storage: mongodb
    instances: 1
connectors:
  - personality: mongo-client
    instances: 2
"#;

    #[test]
    fn test_parse_template() {
        let t = StackTemplate::parse_str(MONGO_STACK).unwrap();
        assert_eq!(t.id, "mongo-demo");
        assert_eq!(t.backends.len(), 1);
        assert_eq!(t.backends[0].storage, "mongodb");
        assert_eq!(t.connectors[0].instances, 2);
    }

    #[test]
    fn test_validate_ok() {
        let t = StackTemplate::parse_str(MONGO_STACK).unwrap();
        t.validate(&PersonalityRegistry::with_builtins()).unwrap();
    }

    #[test]
    fn test_unknown_personality_rejected() {
        let t = StackTemplate::parse_str(
            "backends:\n  - storage: cassandra\n    instances: 1\n",
        )
        .unwrap();
        let err = t.validate(&PersonalityRegistry::with_builtins()).unwrap_err();
        assert!(matches!(err, ForgeError::UnknownPersonality(_)));
    }

    #[test]
    fn test_zero_instances_rejected() {
        let t = StackTemplate::parse_str(
            "backends:\n  - storage: mongodb\n    instances: 0\n",
        )
        .unwrap();
        assert!(t.validate(&PersonalityRegistry::with_builtins()).is_err());
    }

    #[test]
    fn test_empty_template_rejected() {
        let t = StackTemplate::default();
        assert!(t.validate(&PersonalityRegistry::with_builtins()).is_err());
    }

    #[test]
    fn test_malformed_yaml_rejected() {
        assert!(StackTemplate::parse_str("backends: notalist").is_err());
    }
}
