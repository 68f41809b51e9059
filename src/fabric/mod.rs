//! Provisioning fabric
//!
//! The fabric is the substrate abstraction that actually creates and
//! controls container instances: the local container runtime over its
//! Unix socket, or a cloud VM fleet with its own network and security
//! group lifecycle. Exactly one fabric serves all containers belonging
//! to one stack.

pub mod cloud;
pub mod local;
pub mod memory;
pub mod remote;

pub use cloud::{CloudFabric, CloudProvider, Topology, TopologyRequest, VmInstance};
pub use local::LocalFabric;
pub use memory::MemoryFabric;

use crate::entity::{Container, ContainerSpec, ImageDescriptor};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Substrate operations the orchestrator consumes.
#[async_trait]
pub trait Fabric: Send + Sync {
    /// Allocate and start one container per spec, in order. Returns the
    /// resulting descriptors with addresses filled in.
    async fn alloc(&self, specs: Vec<ContainerSpec>) -> Result<Vec<Container>>;

    /// Restart one previously allocated container, returning a descriptor
    /// with possibly refreshed addresses.
    async fn restart(&self, container: &Container) -> Result<Container>;

    /// Halt containers without removing them or their volumes.
    async fn halt(&self, containers: &[Container]) -> Result<()>;

    /// Remove containers and their data volumes.
    async fn remove(&self, containers: &[Container]) -> Result<()>;

    /// Commit one image per container for the given stack generation.
    async fn snapshot(
        &self,
        containers: &[Container],
        stack_id: &str,
        generation: u64,
    ) -> Result<Vec<ImageDescriptor>>;

    /// Execute a command on each container, returning output keyed by
    /// substrate handle.
    async fn cmd(&self, containers: &[Container], command: &str) -> Result<HashMap<String, String>>;

    /// Copy a local file to the same destination path on each container.
    async fn copy(&self, containers: &[Container], src: &str, dst: &str) -> Result<()>;

    /// Whether an image reference is available on this substrate.
    async fn image_exists(&self, image: &str) -> Result<bool>;
}
