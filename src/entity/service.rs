//! Service entity

use super::container::Container;
use super::entry_point::EntryPoint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Class of a service within a stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceClass {
    /// Storage engine cluster
    Storage,
    /// Compute engine cluster
    Compute,
    /// Client connector instance group
    Connector,
}

impl std::fmt::Display for ServiceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceClass::Storage => write!(f, "storage"),
            ServiceClass::Compute => write!(f, "compute"),
            ServiceClass::Connector => write!(f, "connector"),
        }
    }
}

/// Service status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Running,
    Stopped,
    Failed,
}

/// One allocated instance-group of a single personality. Referenced, not
/// owned, by zero or more stacks via id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    /// Unique service id (`sv-` prefixed)
    pub id: String,
    /// Service class
    pub class: ServiceClass,
    /// Personality type name
    pub personality: String,
    /// Ordered container descriptors
    pub containers: Vec<Container>,
    /// Entry point published for dependent layers. Immutable for a given
    /// allocation generation; restart preserves it.
    pub entry_point: EntryPoint,
    /// For connectors: the storage entry points this service was bound against
    #[serde(default)]
    pub bound_storage: Vec<EntryPoint>,
    /// For connectors: the compute entry points this service was bound against
    #[serde(default)]
    pub bound_compute: Vec<EntryPoint>,
    /// Current status
    pub status: ServiceStatus,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Service {
    /// Create a service record for a successful allocation.
    pub fn new(
        id: &str,
        class: ServiceClass,
        personality: &str,
        containers: Vec<Container>,
        entry_point: EntryPoint,
    ) -> Self {
        Self {
            id: id.to_string(),
            class,
            personality: personality.to_string(),
            containers,
            entry_point,
            bound_storage: Vec::new(),
            bound_compute: Vec::new(),
            status: ServiceStatus::Running,
            created_at: Utc::now(),
        }
    }
}
