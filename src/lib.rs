//! Stackforge - a provisioning engine for multi-node distributed-system
//! stacks
//!
//! Stackforge turns a declarative template into a running stack: storage
//! clusters, compute clusters bound against them and client connectors,
//! allocated over a pluggable provisioning fabric. It provides:
//!
//! - A stack lifecycle state machine (building, running, stopped,
//!   removed, failed, restarting)
//! - A service composition protocol implemented per personality
//!   (MongoDB, Gluster, Hadoop, client connectors)
//! - A single-worker provisioning queue with rollback on failure
//! - Snapshot, stop, remove and restart workflows
//! - A document-store persistence layer (in-memory or HTTP)

pub mod composer;
pub mod config;
pub mod entity;
pub mod error;
pub mod fabric;
pub mod orchestrator;
pub mod personality;
pub mod store;
pub mod template;

pub use error::{ForgeError, Result};
