//! Cloud fabric
//!
//! Provisions per-stack network, subnet, security-group and floating-IP
//! resources through a narrow [`CloudProvider`] interface, then drives the
//! per-VM container runtime over SSH. The provider's resource-template
//! internals (the concrete network/instance descriptions for each cloud)
//! live behind the trait and are not part of this crate.

use super::remote::{self, retry_transient};
use super::Fabric;
use crate::config::EngineConfig;
use crate::entity::{Container, ContainerSpec, ImageDescriptor, PortRange};
use crate::error::{ForgeError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// What the fabric asks a provider to build for one allocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyRequest {
    /// Number of VM instances, one per container
    pub instance_count: usize,
    /// Ports that must be reachable from outside the private network
    pub exposed_ports: Vec<PortRange>,
    /// Ports open only within the private network
    pub necessary_ports: Vec<PortRange>,
    /// SSH key reference to install on the instances
    pub ssh_key: Option<String>,
}

/// One provisioned VM instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmInstance {
    /// Provider-side instance id
    pub id: String,
    /// Address on the stack's private subnet
    pub internal_ip: String,
    /// Floating IP, when an exposed port required one
    pub external_ip: Option<String>,
    /// Address the fabric reaches the instance's runtime on
    pub manage_ip: String,
}

/// Provider resources backing one allocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    /// Provider-side network id
    pub network_id: String,
    /// Instances, in request order
    pub instances: Vec<VmInstance>,
}

/// Narrow provisioning interface a cloud backend implements. The engine
/// only ever creates and destroys whole per-stack topologies.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Build network, subnet, security groups and instances for a stack.
    async fn create_topology(&self, stack_id: &str, request: &TopologyRequest) -> Result<Topology>;

    /// Tear down every resource created for the stack.
    async fn destroy_topology(&self, stack_id: &str) -> Result<()>;

    /// Stop instances without releasing them.
    async fn stop_instances(&self, instance_ids: &[String]) -> Result<()>;

    /// Start previously stopped instances, returning refreshed addresses.
    async fn start_instances(&self, instance_ids: &[String]) -> Result<Vec<VmInstance>>;
}

/// Fabric that runs each container on its own cloud VM.
pub struct CloudFabric<P: CloudProvider> {
    provider: P,
    /// Stack id the next alloc call belongs to; the fabric is constructed
    /// per stack by the orchestrator, matching the one-substrate-per-stack
    /// invariant.
    stack_id: String,
    login_user: String,
    /// Key reference installed on provisioned instances
    ssh_key: Option<String>,
    ssh_key_path: Option<PathBuf>,
    retry_delay: Duration,
}

impl<P: CloudProvider> CloudFabric<P> {
    pub fn new(
        provider: P,
        stack_id: &str,
        login_user: &str,
        ssh_key_path: Option<PathBuf>,
    ) -> Self {
        Self {
            provider,
            stack_id: stack_id.to_string(),
            login_user: login_user.to_string(),
            ssh_key: None,
            ssh_key_path,
            retry_delay: remote::DEFAULT_RETRY_DELAY,
        }
    }

    /// Build a per-stack fabric from engine configuration: the stack's
    /// key reference is resolved inside the configured key directory, the
    /// login user and transient-retry delay come from the config file.
    pub fn from_config(
        provider: P,
        stack_id: &str,
        ssh_key: Option<&str>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            provider,
            stack_id: stack_id.to_string(),
            login_user: config.login_user.clone(),
            ssh_key: ssh_key.map(str::to_string),
            ssh_key_path: ssh_key.map(|key| config.ssh_key_dir.join(key)),
            retry_delay: config.retry_delay(),
        }
    }

    /// Override the transient-retry delay (tests use a short one).
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    async fn agent_exec(&self, container: &Container, command: &str) -> Result<String> {
        let host = container.manage_ip.clone();
        let user = self.login_user.clone();
        let key = self.ssh_key_path.clone();
        let command = command.to_string();
        retry_transient(&format!("exec on {}", host), self.retry_delay, || {
            let (user, host, command) = (user.clone(), host.clone(), command.clone());
            let key = key.clone();
            async move { remote::ssh_exec(&user, &host, key.as_deref(), &command).await }
        })
        .await
    }
}

#[async_trait]
impl<P: CloudProvider> Fabric for CloudFabric<P> {
    async fn alloc(&self, specs: Vec<ContainerSpec>) -> Result<Vec<Container>> {
        let request = TopologyRequest {
            instance_count: specs.len(),
            exposed_ports: specs.iter().flat_map(|s| s.exposed_ports.clone()).collect(),
            necessary_ports: specs.iter().flat_map(|s| s.necessary_ports.clone()).collect(),
            ssh_key: self.ssh_key.clone(),
        };
        let topology = self.provider.create_topology(&self.stack_id, &request).await?;
        if topology.instances.len() != specs.len() {
            return Err(ForgeError::SubstrateRejected(format!(
                "provider returned {} instances for {} requested",
                topology.instances.len(),
                specs.len()
            )));
        }
        info!(
            "provisioned topology {} with {} instances for stack {}",
            topology.network_id,
            topology.instances.len(),
            self.stack_id
        );

        let mut containers = Vec::with_capacity(specs.len());
        for (spec, vm) in specs.into_iter().zip(topology.instances) {
            let container = Container {
                handle: vm.id,
                service_type: spec.service_type,
                hostname: spec.hostname,
                internal_ip: vm.internal_ip,
                external_ip: vm.external_ip,
                manage_ip: vm.manage_ip,
                port_mappings: Vec::new(),
                volumes: spec.volumes,
                image: spec.image,
                login_user: self.login_user.clone(),
                args: spec.args,
                unique_name: spec.unique_name,
            };
            self.agent_exec(
                &container,
                &format!(
                    "forge-agent run --image {} --hostname {}",
                    container.image, container.hostname
                ),
            )
            .await?;
            containers.push(container);
        }
        Ok(containers)
    }

    async fn restart(&self, container: &Container) -> Result<Container> {
        let refreshed = self
            .provider
            .start_instances(std::slice::from_ref(&container.handle))
            .await?;
        let vm = refreshed
            .into_iter()
            .next()
            .ok_or_else(|| ForgeError::Fabric(format!("instance {} not found", container.handle)))?;
        let mut updated = container.clone();
        updated.internal_ip = vm.internal_ip;
        updated.external_ip = vm.external_ip;
        updated.manage_ip = vm.manage_ip;
        self.agent_exec(&updated, "forge-agent restart").await?;
        Ok(updated)
    }

    async fn halt(&self, containers: &[Container]) -> Result<()> {
        for container in containers {
            self.agent_exec(container, "forge-agent stop").await?;
        }
        let ids: Vec<String> = containers.iter().map(|c| c.handle.clone()).collect();
        self.provider.stop_instances(&ids).await
    }

    async fn remove(&self, _containers: &[Container]) -> Result<()> {
        self.provider.destroy_topology(&self.stack_id).await
    }

    async fn snapshot(
        &self,
        containers: &[Container],
        stack_id: &str,
        generation: u64,
    ) -> Result<Vec<ImageDescriptor>> {
        let mut images = Vec::with_capacity(containers.len());
        for container in containers {
            let tag = format!("{}-gen{}-{}", stack_id, generation, container.hostname);
            self.agent_exec(container, &format!("forge-agent commit --tag {}", tag)).await?;
            images.push(ImageDescriptor { container_handle: container.handle.clone(), image: tag });
        }
        Ok(images)
    }

    async fn cmd(&self, containers: &[Container], command: &str) -> Result<HashMap<String, String>> {
        let mut outputs = HashMap::new();
        for container in containers {
            let output = self.agent_exec(container, command).await?;
            outputs.insert(container.handle.clone(), output);
        }
        Ok(outputs)
    }

    async fn copy(&self, containers: &[Container], src: &str, dst: &str) -> Result<()> {
        for container in containers {
            let host = container.manage_ip.clone();
            let user = self.login_user.clone();
            let key = self.ssh_key_path.clone();
            retry_transient(&format!("copy to {}", host), self.retry_delay, || {
                let (user, host) = (user.clone(), host.clone());
                let key = key.clone();
                async move {
                    remote::scp_copy(&user, &host, key.as_deref(), src, dst).await
                }
            })
            .await?;
        }
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        // Image availability is checked through any one instance; before
        // instances exist, trust the registry to carry engine images.
        let _ = image;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Provider that under-delivers instances and records teardowns.
    #[derive(Default)]
    struct ShortProvider {
        destroyed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CloudProvider for ShortProvider {
        async fn create_topology(
            &self,
            _stack_id: &str,
            request: &TopologyRequest,
        ) -> Result<Topology> {
            let instances = (0..request.instance_count.saturating_sub(1))
                .map(|n| VmInstance {
                    id: format!("vm-{}", n),
                    internal_ip: format!("10.1.0.{}", n + 1),
                    external_ip: None,
                    manage_ip: format!("192.168.1.{}", n + 1),
                })
                .collect();
            Ok(Topology { network_id: "net-1".to_string(), instances })
        }

        async fn destroy_topology(&self, stack_id: &str) -> Result<()> {
            if let Ok(mut destroyed) = self.destroyed.lock() {
                destroyed.push(stack_id.to_string());
            }
            Ok(())
        }

        async fn stop_instances(&self, _instance_ids: &[String]) -> Result<()> {
            Ok(())
        }

        async fn start_instances(&self, _instance_ids: &[String]) -> Result<Vec<VmInstance>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_instance_shortfall_is_substrate_rejection() {
        let fabric = CloudFabric::new(ShortProvider::default(), "st-1", "forge", None)
            .retry_delay(Duration::from_millis(1));
        let specs = vec![
            ContainerSpec::new("mongodb", "mongodb-0", "img"),
            ContainerSpec::new("mongodb", "mongodb-1", "img"),
        ];
        let err = fabric.alloc(specs).await.unwrap_err();
        assert!(err.is_substrate_rejection());
    }

    #[tokio::test]
    async fn test_remove_destroys_whole_topology() {
        let fabric = CloudFabric::new(ShortProvider::default(), "st-2", "forge", None);
        fabric.remove(&[]).await.unwrap();
        let destroyed = fabric.provider.destroyed.lock().unwrap().clone();
        assert_eq!(destroyed, vec!["st-2".to_string()]);
    }

    /// Provider that records every topology request, then rejects it.
    #[derive(Default)]
    struct RecordingProvider {
        requests: Mutex<Vec<TopologyRequest>>,
    }

    #[async_trait]
    impl CloudProvider for RecordingProvider {
        async fn create_topology(
            &self,
            _stack_id: &str,
            request: &TopologyRequest,
        ) -> Result<Topology> {
            if let Ok(mut requests) = self.requests.lock() {
                requests.push(request.clone());
            }
            Err(ForgeError::SubstrateRejected("no capacity".to_string()))
        }

        async fn destroy_topology(&self, _stack_id: &str) -> Result<()> {
            Ok(())
        }

        async fn stop_instances(&self, _instance_ids: &[String]) -> Result<()> {
            Ok(())
        }

        async fn start_instances(&self, _instance_ids: &[String]) -> Result<Vec<VmInstance>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_from_config_threads_key_user_and_delay() {
        let mut config = EngineConfig::default();
        config.login_user = "ops".to_string();
        config.ssh_key_dir = PathBuf::from("/var/lib/stackforge/keys");
        config.retry_delay_secs = 3;

        let fabric =
            CloudFabric::from_config(RecordingProvider::default(), "st-9", Some("key-1"), &config);
        assert_eq!(fabric.login_user, "ops");
        assert_eq!(
            fabric.ssh_key_path.as_deref(),
            Some(std::path::Path::new("/var/lib/stackforge/keys/key-1"))
        );
        assert_eq!(fabric.retry_delay, Duration::from_secs(3));

        let err = fabric
            .alloc(vec![ContainerSpec::new("mongodb", "mongodb-0", "img")])
            .await
            .unwrap_err();
        assert!(err.is_substrate_rejection());

        // the key reference reached the provider's topology request
        let requests = fabric.provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].ssh_key.as_deref(), Some("key-1"));
    }
}
