//! Stack entity and lifecycle state machine

use crate::error::{ForgeError, Result};
use crate::template::StackTemplate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stack lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StackStatus {
    /// Provisioning in progress
    Building,
    /// All layers allocated and started
    Running,
    /// Containers halted, not removed
    Stopped,
    /// Containers and data volumes deleted; terminal
    Removed,
    /// Provisioning failed; terminal for this attempt, still queryable
    Failed,
    /// Waking a stopped stack
    Restarting,
}

impl std::fmt::Display for StackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StackStatus::Building => write!(f, "building"),
            StackStatus::Running => write!(f, "running"),
            StackStatus::Stopped => write!(f, "stopped"),
            StackStatus::Removed => write!(f, "removed"),
            StackStatus::Failed => write!(f, "failed"),
            StackStatus::Restarting => write!(f, "restarting"),
        }
    }
}

impl StackStatus {
    /// Whether a transition from `self` to `next` is allowed by the
    /// lifecycle state graph. Snapshotting is a side effect, not a
    /// transition, and is checked separately.
    pub fn can_transition(self, next: StackStatus) -> bool {
        use StackStatus::*;
        matches!(
            (self, next),
            (Building, Running)
                | (Building, Failed)
                | (Running, Stopped)
                | (Stopped, Removed)
                | (Stopped, Restarting)
                | (Restarting, Building)
                | (Restarting, Failed)
        )
    }

    /// No further transitions leave this state.
    pub fn is_terminal(self) -> bool {
        matches!(self, StackStatus::Removed | StackStatus::Failed)
    }
}

/// One backend entry of a stack: a storage service id plus the compute
/// service ids bound against it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendRef {
    /// Storage service id
    pub storage: String,
    /// Compute service ids bound to this storage layer
    #[serde(default)]
    pub compute: Vec<String>,
}

/// Top-level user-visible unit: one requested topology tracked through
/// its whole lifecycle. Logically deleted (status `removed`) rather than
/// physically, until purge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stack {
    /// Unique stack id (`st-` prefixed)
    pub id: String,
    /// Originating template id
    pub template_id: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Current lifecycle status
    pub status: StackStatus,
    /// Allocated service ids per backend entry
    #[serde(default)]
    pub backends: Vec<BackendRef>,
    /// The original template this stack was built from
    pub template: StackTemplate,
    /// Connector service ids
    #[serde(default)]
    pub connectors: Vec<String>,
    /// Snapshot this stack was derived from, if any
    #[serde(default)]
    pub parent_snapshot: Option<String>,
    /// Monotonically increasing snapshot counter
    #[serde(default)]
    pub snapshot_count: u64,
    /// SSH key reference handed to the fabric
    #[serde(default)]
    pub ssh_key: Option<String>,
}

impl Stack {
    /// Create a new stack record in `building` status.
    pub fn new(id: &str, template_id: &str, template: StackTemplate, ssh_key: Option<String>) -> Self {
        Self {
            id: id.to_string(),
            template_id: template_id.to_string(),
            created_at: Utc::now(),
            status: StackStatus::Building,
            backends: Vec::new(),
            template,
            connectors: Vec::new(),
            parent_snapshot: None,
            snapshot_count: 0,
            ssh_key,
        }
    }

    /// Move the stack to `next`, enforcing the state graph.
    pub fn transition(&mut self, next: StackStatus) -> Result<()> {
        if !self.status.can_transition(next) {
            return Err(ForgeError::InvalidTransition(
                self.status.to_string(),
                next.to_string(),
            ));
        }
        self.status = next;
        Ok(())
    }
}
