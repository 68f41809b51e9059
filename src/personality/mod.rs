//! Service personalities
//!
//! A personality is the pluggable implementation of the service
//! composition protocol for one distributed-system technology: it expands
//! requested instance counts into concrete roles, names hosts, declares
//! ports, renders configuration for freshly allocated containers and
//! publishes the entry point dependent layers bind against.

pub mod gluster;
pub mod hadoop;
pub mod mongo_client;
pub mod mongodb;
pub mod registry;

pub use registry::PersonalityRegistry;

use crate::entity::{Container, EntryPoint, PortRange, ServiceClass};
use crate::error::Result;
use crate::fabric::Fabric;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Container args key under which the composer attaches the upstream
/// entry point(s) a dependent layer was bound against.
pub const UPSTREAM_ARG: &str = "input";

/// Personality-specific configuration produced by `generate`: static
/// defaults (directories, port numbers) plus the instance count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonalityConfig {
    /// Personality type name
    pub personality: String,
    /// Requested instance count
    pub count: u32,
    /// Staging directory configuration payloads are rendered into
    pub staging_dir: PathBuf,
    /// Static defaults keyed by setting name
    pub settings: BTreeMap<String, Value>,
}

impl PersonalityConfig {
    pub fn new(personality: &str, count: u32) -> Self {
        Self {
            personality: personality.to_string(),
            count,
            staging_dir: std::env::temp_dir().join("stackforge").join(personality),
            settings: BTreeMap::new(),
        }
    }

    pub fn setting(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.settings.insert(key.to_string(), value.into());
        self
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(Value::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.settings.get(key).and_then(Value::as_u64)
    }
}

/// One rendered configuration payload to push to a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    /// Substrate handle of the target container
    pub handle: String,
    /// Rendered payload in the staging directory
    pub source: PathBuf,
    /// Destination path inside the container
    pub dest: String,
}

/// The contract every storage engine, compute engine and client connector
/// implements so heterogeneous backends can be wired together generically.
#[async_trait]
pub trait Personality: Send + Sync {
    /// Personality type name, the registry key.
    fn name(&self) -> &'static str;

    /// Which layer of a stack this personality fills.
    fn class(&self) -> ServiceClass;

    /// Image reference containers of this personality run.
    fn image(&self) -> &'static str;

    /// Deterministic per-instance hostname.
    fn new_host_name(&self, index: usize) -> String {
        format!("{}-{}", self.name(), index)
    }

    /// Expand a user-requested count into the actual ordered role list.
    /// Some personalities need fixed auxiliary roles regardless of the
    /// requested scale; the default is one role per requested instance.
    fn total_instances(&self, requested: u32, layers: &[String]) -> Vec<String> {
        let _ = layers;
        vec![self.name().to_string(); requested as usize]
    }

    /// Ports that must be reachable from outside the cluster network.
    fn exposed_ports(&self, count: u32) -> Vec<PortRange>;

    /// Ports needed only within the cluster's private network.
    fn necessary_ports(&self, count: u32) -> Vec<PortRange>;

    /// Produce the configuration object for `count` instances.
    fn generate(&self, count: u32) -> PersonalityConfig;

    /// Render configuration payloads for the just-allocated containers and
    /// produce the entry point for dependent layers. Containers carry any
    /// upstream entry points under [`UPSTREAM_ARG`] in their args map.
    /// Returns `None` when no compatible upstream entry point exists; the
    /// orchestrator treats that as an allocation failure. Must not touch
    /// container state; transfers and remote starts are the orchestrator's.
    fn apply(
        &self,
        config: &PersonalityConfig,
        containers: &[Container],
    ) -> Result<Option<(Vec<Transfer>, EntryPoint)>>;

    /// Issue the substrate-level start commands, respecting intra-cluster
    /// ordering where the technology needs it.
    async fn start_service(
        &self,
        containers: &[Container],
        entry_point: &EntryPoint,
        fabric: &dyn Fabric,
    ) -> Result<()>;

    /// Start again after a restart; defaults to the initial start path.
    async fn restart_service(
        &self,
        containers: &[Container],
        entry_point: &EntryPoint,
        fabric: &dyn Fabric,
    ) -> Result<()> {
        self.start_service(containers, entry_point, fabric).await
    }

    /// Stop the service's processes on its containers.
    async fn stop_service(&self, containers: &[Container], fabric: &dyn Fabric) -> Result<()>;
}

/// Read the upstream entry point attached to a container, if any.
pub fn upstream_entry_point(container: &Container) -> Option<EntryPoint> {
    container
        .args
        .get(UPSTREAM_ARG)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}
