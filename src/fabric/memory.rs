//! In-process fabric
//!
//! Allocates synthetic containers with predictable addresses and tracks
//! their lifecycle in memory. Backs dry runs and the engine's test suite;
//! failure injection mimics substrate rejections and missing images.

use super::Fabric;
use crate::entity::{Container, ContainerSpec, ImageDescriptor};
use crate::error::{ForgeError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    /// handle -> (container, running)
    containers: HashMap<String, (Container, bool)>,
    /// order of allocation, for address assignment
    allocated: u32,
    /// images reported as unavailable
    missing_images: HashSet<String>,
    /// allocs left to reject before succeeding again
    reject_allocs: u32,
    /// executed commands, (handle, command)
    commands: Vec<(String, String)>,
    /// performed copies, (handle, src, dst)
    copies: Vec<(String, String, String)>,
}

/// Fabric that keeps everything in process memory.
#[derive(Clone, Default)]
pub struct MemoryFabric {
    state: Arc<RwLock<Inner>>,
}

impl MemoryFabric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `image` as unavailable from `image_exists`.
    pub fn mark_image_missing(&self, image: &str) {
        if let Ok(mut state) = self.state.write() {
            state.missing_images.insert(image.to_string());
        }
    }

    /// Reject the next `n` alloc calls with a substrate rejection.
    pub fn reject_next_allocs(&self, n: u32) {
        if let Ok(mut state) = self.state.write() {
            state.reject_allocs = n;
        }
    }

    fn handles_where(&self, running: bool) -> Vec<String> {
        let mut handles: Vec<String> = match self.state.read() {
            Ok(state) => state
                .containers
                .iter()
                .filter(|(_, (_, r))| *r == running)
                .map(|(h, _)| h.clone())
                .collect(),
            Err(_) => Vec::new(),
        };
        handles.sort();
        handles
    }

    /// Handles of containers currently running.
    pub fn running_handles(&self) -> Vec<String> {
        self.handles_where(true)
    }

    /// Handles of containers allocated but halted.
    pub fn halted_handles(&self) -> Vec<String> {
        self.handles_where(false)
    }

    /// Total containers allocated and still present.
    pub fn container_count(&self) -> usize {
        self.state.read().map(|s| s.containers.len()).unwrap_or(0)
    }

    /// Commands executed through `cmd`, in order.
    pub fn command_log(&self) -> Vec<(String, String)> {
        self.state.read().map(|s| s.commands.clone()).unwrap_or_default()
    }

    /// Copies performed through `copy`, in order.
    pub fn copy_log(&self) -> Vec<(String, String, String)> {
        self.state.read().map(|s| s.copies.clone()).unwrap_or_default()
    }

    fn lock_err() -> ForgeError {
        ForgeError::Lock("Failed to acquire fabric lock".to_string())
    }
}

#[async_trait]
impl Fabric for MemoryFabric {
    async fn alloc(&self, specs: Vec<ContainerSpec>) -> Result<Vec<Container>> {
        let mut state = self.state.write().map_err(|_| Self::lock_err())?;
        if state.reject_allocs > 0 {
            state.reject_allocs -= 1;
            return Err(ForgeError::SubstrateRejected("injected rejection".to_string()));
        }
        let mut out = Vec::with_capacity(specs.len());
        for spec in specs {
            state.allocated += 1;
            let n = state.allocated;
            let handle = format!("mem-{}", &Uuid::new_v4().to_string()[..8]);
            let container = Container {
                handle: handle.clone(),
                service_type: spec.service_type,
                hostname: spec.hostname,
                internal_ip: format!("10.0.0.{}", n),
                external_ip: Some(format!("172.16.0.{}", n)),
                manage_ip: format!("192.168.0.{}", n),
                port_mappings: Vec::new(),
                volumes: spec.volumes,
                image: spec.image,
                login_user: "root".to_string(),
                args: spec.args,
                unique_name: spec.unique_name,
            };
            state.containers.insert(handle, (container.clone(), true));
            out.push(container);
        }
        Ok(out)
    }

    async fn restart(&self, container: &Container) -> Result<Container> {
        let mut state = self.state.write().map_err(|_| Self::lock_err())?;
        let entry = state
            .containers
            .get_mut(&container.handle)
            .ok_or_else(|| ForgeError::Fabric(format!("unknown handle {}", container.handle)))?;
        entry.1 = true;
        Ok(entry.0.clone())
    }

    async fn halt(&self, containers: &[Container]) -> Result<()> {
        let mut state = self.state.write().map_err(|_| Self::lock_err())?;
        for container in containers {
            if let Some(entry) = state.containers.get_mut(&container.handle) {
                entry.1 = false;
            }
        }
        Ok(())
    }

    async fn remove(&self, containers: &[Container]) -> Result<()> {
        let mut state = self.state.write().map_err(|_| Self::lock_err())?;
        for container in containers {
            state.containers.remove(&container.handle);
        }
        Ok(())
    }

    async fn snapshot(
        &self,
        containers: &[Container],
        stack_id: &str,
        generation: u64,
    ) -> Result<Vec<ImageDescriptor>> {
        Ok(containers
            .iter()
            .map(|c| ImageDescriptor {
                container_handle: c.handle.clone(),
                image: format!("{}-gen{}-{}", stack_id, generation, c.hostname),
            })
            .collect())
    }

    async fn cmd(&self, containers: &[Container], command: &str) -> Result<HashMap<String, String>> {
        let mut state = self.state.write().map_err(|_| Self::lock_err())?;
        let mut outputs = HashMap::new();
        for container in containers {
            state.commands.push((container.handle.clone(), command.to_string()));
            outputs.insert(container.handle.clone(), String::new());
        }
        Ok(outputs)
    }

    async fn copy(&self, containers: &[Container], src: &str, dst: &str) -> Result<()> {
        let mut state = self.state.write().map_err(|_| Self::lock_err())?;
        for container in containers {
            state.copies.push((container.handle.clone(), src.to_string(), dst.to_string()));
        }
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        let state = self.state.read().map_err(|_| Self::lock_err())?;
        Ok(!state.missing_images.contains(image))
    }
}
