//! Container descriptors

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Port mapping between the substrate host and the container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub host_port: u16,
    pub container_port: u16,
}

/// A contiguous range of ports a personality needs opened. A single port
/// is a range of length one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub from: u16,
    pub to: u16,
}

impl PortRange {
    /// Single-port range
    pub fn single(port: u16) -> Self {
        Self { from: port, to: port }
    }

    pub fn span(from: u16, to: u16) -> Self {
        Self { from, to }
    }
}

/// Request to the fabric for one container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Declared service type (role) this container fills
    pub service_type: String,
    /// Deterministic hostname from the personality
    pub hostname: String,
    /// Image reference
    pub image: String,
    /// Ports reachable from outside the cluster network
    #[serde(default)]
    pub exposed_ports: Vec<PortRange>,
    /// Ports open only within the cluster's private network
    #[serde(default)]
    pub necessary_ports: Vec<PortRange>,
    /// Volume mounts (name -> container path)
    #[serde(default)]
    pub volumes: HashMap<String, String>,
    /// Free-form args handed through to the personality's `apply`
    #[serde(default)]
    pub args: HashMap<String, serde_json::Value>,
    /// Optional user-defined unique name
    #[serde(default)]
    pub unique_name: Option<String>,
}

impl ContainerSpec {
    pub fn new(service_type: &str, hostname: &str, image: &str) -> Self {
        Self {
            service_type: service_type.to_string(),
            hostname: hostname.to_string(),
            image: image.to_string(),
            exposed_ports: Vec::new(),
            necessary_ports: Vec::new(),
            volumes: HashMap::new(),
            args: HashMap::new(),
            unique_name: None,
        }
    }
}

/// One running unit in the fabric. Read-only after allocation except for
/// the address fields, which may be refreshed on restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    /// Substrate handle (container or VM id)
    pub handle: String,
    /// Declared service type (role)
    pub service_type: String,
    /// Hostname inside the cluster network
    pub hostname: String,
    /// Address on the cluster-internal network
    pub internal_ip: String,
    /// Externally reachable address, if any
    #[serde(default)]
    pub external_ip: Option<String>,
    /// Management-plane address the fabric uses for remote commands
    pub manage_ip: String,
    /// Host/container port mappings
    #[serde(default)]
    pub port_mappings: Vec<PortMapping>,
    /// Mounted volumes (name -> container path)
    #[serde(default)]
    pub volumes: HashMap<String, String>,
    /// Image reference the container was created from
    pub image: String,
    /// Default login identity for remote commands
    pub login_user: String,
    /// Free-form args map, carries upstream entry points among others
    #[serde(default)]
    pub args: HashMap<String, serde_json::Value>,
    /// Optional user-defined unique name
    #[serde(default)]
    pub unique_name: Option<String>,
}

impl Container {
    /// Refresh address fields from a newly restarted instance, leaving
    /// everything else untouched.
    pub fn refresh_addresses(&mut self, other: &Container) {
        self.internal_ip = other.internal_ip.clone();
        self.external_ip = other.external_ip.clone();
        self.manage_ip = other.manage_ip.clone();
    }
}
