//! Snapshot records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Image committed from one container during a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageDescriptor {
    /// Handle of the container the image was committed from
    pub container_handle: String,
    /// Resulting image reference
    pub image: String,
}

/// Point-in-time image commit of a stack's containers, enabling later
/// restore through the `Snapshotted` work action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unique snapshot id (`sn-` prefixed)
    pub id: String,
    /// Stack this snapshot was taken from
    pub stack_id: String,
    /// Generation counter at the time of the commit
    pub generation: u64,
    /// Committed images, one per container
    pub images: Vec<ImageDescriptor>,
    /// Commit timestamp
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(id: &str, stack_id: &str, generation: u64, images: Vec<ImageDescriptor>) -> Self {
        Self {
            id: id.to_string(),
            stack_id: stack_id.to_string(),
            generation,
            images,
            created_at: Utc::now(),
        }
    }
}
