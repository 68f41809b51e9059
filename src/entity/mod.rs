//! Core entities: stacks, services, containers, entry points, snapshots

pub mod container;
pub mod entry_point;
pub mod service;
pub mod snapshot;
pub mod stack;

pub use container::{Container, ContainerSpec, PortMapping, PortRange};
pub use entry_point::{merge_entry_points, EntryPoint};
pub use service::{Service, ServiceClass, ServiceStatus};
pub use snapshot::{ImageDescriptor, Snapshot};
pub use stack::{BackendRef, Stack, StackStatus};
