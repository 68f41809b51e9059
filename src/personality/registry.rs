//! Personality registry
//!
//! A static mapping from personality-name constants to protocol
//! implementations, populated once at startup. Unknown names are a
//! configuration error; there is no dynamic discovery.

use super::gluster::Gluster;
use super::hadoop::Hadoop;
use super::mongo_client::MongoClient;
use super::mongodb::MongoDb;
use super::Personality;
use crate::entity::ServiceClass;
use crate::error::{ForgeError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Closed set of personalities keyed by type name.
pub struct PersonalityRegistry {
    personalities: HashMap<&'static str, Arc<dyn Personality>>,
}

impl Default for PersonalityRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl PersonalityRegistry {
    /// Empty registry; tests register their own personalities.
    pub fn new() -> Self {
        Self { personalities: HashMap::new() }
    }

    /// Registry with every built-in personality.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(MongoDb));
        registry.register(Arc::new(Gluster));
        registry.register(Arc::new(Hadoop));
        registry.register(Arc::new(MongoClient));
        registry
    }

    pub fn register(&mut self, personality: Arc<dyn Personality>) {
        self.personalities.insert(personality.name(), personality);
    }

    /// Look up any personality by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Personality>> {
        self.personalities
            .get(name)
            .cloned()
            .ok_or_else(|| ForgeError::UnknownPersonality(name.to_string()))
    }

    fn get_class(&self, name: &str, class: ServiceClass) -> Result<Arc<dyn Personality>> {
        let personality = self.get(name)?;
        if personality.class() != class {
            return Err(ForgeError::InvalidTemplate(format!(
                "personality '{}' is {}, not {}",
                name,
                personality.class(),
                class
            )));
        }
        Ok(personality)
    }

    /// Look up a storage personality.
    pub fn storage(&self, name: &str) -> Result<Arc<dyn Personality>> {
        self.get_class(name, ServiceClass::Storage)
    }

    /// Look up a compute personality.
    pub fn compute(&self, name: &str) -> Result<Arc<dyn Personality>> {
        self.get_class(name, ServiceClass::Compute)
    }

    /// Look up a connector personality.
    pub fn connector(&self, name: &str) -> Result<Arc<dyn Personality>> {
        self.get_class(name, ServiceClass::Connector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_present() {
        let registry = PersonalityRegistry::with_builtins();
        assert!(registry.storage("mongodb").is_ok());
        assert!(registry.storage("gluster").is_ok());
        assert!(registry.compute("hadoop").is_ok());
        assert!(registry.connector("mongo-client").is_ok());
    }

    #[test]
    fn test_unknown_name_is_config_error() {
        let registry = PersonalityRegistry::with_builtins();
        match registry.get("cassandra") {
            Err(ForgeError::UnknownPersonality(name)) => assert_eq!(name, "cassandra"),
            _ => panic!("expected UnknownPersonality"),
        }
    }

    #[test]
    fn test_class_mismatch_rejected() {
        let registry = PersonalityRegistry::with_builtins();
        // mongodb is storage, not compute
        assert!(registry.compute("mongodb").is_err());
        assert!(registry.connector("hadoop").is_err());
    }
}
