//! Stack orchestrator
//!
//! Owns stack and service lifecycle: the state machine, the allocate /
//! restart / snapshot / stop / remove workflows and the rollback path,
//! delegating substrate work to the fabric and configuration work to the
//! composer. All provisioning entry points here run on the single worker
//! task; only the read side is called from request handlers.

pub mod worker;

pub use worker::{Engine, WorkAction, WorkItem};

use crate::composer::{Composition, ConfigComposer};
use crate::entity::{
    merge_entry_points, BackendRef, EntryPoint, Service, ServiceClass, Snapshot, Stack,
    StackStatus,
};
use crate::error::{ForgeError, Result};
use crate::fabric::Fabric;
use crate::personality::PersonalityRegistry;
use crate::store::{Collection, StateStore};
use crate::template::{BackendTemplate, ConnectorTemplate, StackTemplate};
use rand::Rng;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Aggregate status of a multi-entry allocation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocStatus {
    Ok,
    Failed,
}

impl std::fmt::Display for AllocStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocStatus::Ok => write!(f, "ok"),
            AllocStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Result of `allocate_backend`: the aggregate status plus the service
/// ids actually created, and the entry points for connector binding.
#[derive(Debug)]
pub struct BackendAllocation {
    pub status: AllocStatus,
    pub backends: Vec<BackendRef>,
    /// (storage entry point, compute entry points) per allocated backend
    pub entry_points: Vec<(EntryPoint, Vec<EntryPoint>)>,
}

impl BackendAllocation {
    /// Flatten the entry-point set in allocation order: storage first,
    /// then the compute layers bound against it.
    pub fn all_entry_points(&self) -> Vec<EntryPoint> {
        let mut out = Vec::new();
        for (storage, compute) in &self.entry_points {
            out.push(storage.clone());
            out.extend(compute.iter().cloned());
        }
        out
    }
}

/// Result of `allocate_connectors`.
#[derive(Debug)]
pub struct ConnectorAllocation {
    pub status: AllocStatus,
    pub connectors: Vec<String>,
}

/// Options for `allocate_backend`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllocateOpts {
    /// First allocation for this stack (alloc) vs. a wake-up (restart)
    pub is_new_stack: bool,
}

/// Lifecycle actions accepted by `manage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManageAction {
    Snapshot,
    Stop,
    Remove,
}

impl std::fmt::Display for ManageAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManageAction::Snapshot => write!(f, "snapshot"),
            ManageAction::Stop => write!(f, "stop"),
            ManageAction::Remove => write!(f, "remove"),
        }
    }
}

/// Status precondition for a lifecycle action. Returns the rejection
/// message on violation. Used both for the synchronous request-side check
/// and by the authoritative check on the worker.
pub fn manage_precondition(
    status: StackStatus,
    action: ManageAction,
) -> std::result::Result<(), String> {
    let allowed = match action {
        ManageAction::Snapshot => {
            matches!(status, StackStatus::Running | StackStatus::Stopped)
        }
        ManageAction::Stop => status == StackStatus::Running,
        ManageAction::Remove => status == StackStatus::Stopped,
    };
    if allowed {
        Ok(())
    } else {
        Err(format!("cannot {} stack in status {}", action, status))
    }
}

/// Outcome of a manage request. Precondition violations come back as
/// `status: false` with an explanation rather than an error, and cause no
/// container mutation.
#[derive(Debug, Clone)]
pub struct ManageOutcome {
    pub status: bool,
    pub msg: String,
}

impl ManageOutcome {
    fn ok(msg: impl Into<String>) -> Self {
        Self { status: true, msg: msg.into() }
    }

    fn rejected(msg: impl Into<String>) -> Self {
        Self { status: false, msg: msg.into() }
    }
}

/// The orchestration core.
pub struct StackOrchestrator {
    store: StateStore,
    fabric: Arc<dyn Fabric>,
    registry: Arc<PersonalityRegistry>,
    staging_dir: Option<std::path::PathBuf>,
}

impl StackOrchestrator {
    pub fn new(
        store: StateStore,
        fabric: Arc<dyn Fabric>,
        registry: Arc<PersonalityRegistry>,
    ) -> Self {
        Self { store, fabric, registry, staging_dir: None }
    }

    /// Render personality configuration under this directory instead of
    /// the per-personality default.
    pub fn with_staging_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn registry(&self) -> &PersonalityRegistry {
        &self.registry
    }

    /// Allocate a globally unique id: a role tag plus a short random hex
    /// suffix, collision-checked against the store.
    pub async fn new_id(&self, prefix: &str, collection: Collection) -> Result<String> {
        loop {
            let suffix: String = {
                let mut rng = rand::thread_rng();
                (0..6).map(|_| format!("{:x}", rng.gen_range(0..16u8))).collect()
            };
            let id = format!("{}-{}", prefix, suffix);
            if !self.store.id_exists(collection, &id).await? {
                return Ok(id);
            }
        }
    }

    /// Idempotent upsert of a stack record. With no `stack_id` a fresh id
    /// is allocated and a new record inserted in the given status;
    /// otherwise the existing record's fields are updated. Store write
    /// errors propagate.
    pub async fn register(
        &self,
        stack_id: Option<&str>,
        template_id: &str,
        template: StackTemplate,
        status: StackStatus,
        ssh_key: Option<String>,
    ) -> Result<Stack> {
        match stack_id {
            None => {
                let id = self.new_id("st", Collection::Stacks).await?;
                let mut stack = Stack::new(&id, template_id, template, ssh_key);
                stack.status = status;
                self.store.put_stack(&stack).await?;
                info!("registered stack {} in status {}", stack.id, stack.status);
                Ok(stack)
            }
            Some(id) => {
                let mut stack = self.store.require_stack(id).await?;
                stack.template_id = template_id.to_string();
                stack.template = template;
                stack.status = status;
                if ssh_key.is_some() {
                    stack.ssh_key = ssh_key;
                }
                self.store.put_stack(&stack).await?;
                Ok(stack)
            }
        }
    }

    /// Allocate (or restart) the storage and compute layers for every
    /// backend entry, storage first, each compute layer bound to its
    /// storage entry point. Fails fast: the first sub-allocation failure
    /// returns a failed aggregate without attempting remaining entries.
    pub async fn allocate_backend(
        &self,
        stack_id: &str,
        backends: &[BackendTemplate],
        opts: AllocateOpts,
    ) -> Result<BackendAllocation> {
        let mut allocation = BackendAllocation {
            status: AllocStatus::Ok,
            backends: Vec::new(),
            entry_points: Vec::new(),
        };

        // on a wake-up the stack record already names the services to reuse
        let existing: Vec<BackendRef> = if opts.is_new_stack {
            Vec::new()
        } else {
            self.store.require_stack(stack_id).await?.backends
        };

        for (index, backend) in backends.iter().enumerate() {
            let reuse = existing.get(index);

            let (storage_id, storage_ep) = match reuse {
                Some(backend_ref) => {
                    let ep = self
                        .restart_service(&backend_ref.storage, backend.instances)
                        .await?;
                    (backend_ref.storage.clone(), ep)
                }
                None => {
                    let personality = self.registry.storage(&backend.storage)?;
                    let roles = personality.total_instances(backend.instances, &[]);
                    let composition = ConfigComposer::allocate(
                        &personality,
                        &roles,
                        backend.instances,
                        None,
                        None,
                        self.staging_dir.as_deref(),
                        self.fabric.as_ref(),
                    )
                    .await?;
                    let (containers, ep) = match composition {
                        Composition::Ready { containers, entry_point } => {
                            (containers, entry_point)
                        }
                        Composition::Incompatible { containers } => {
                            warn!(
                                "storage {} incompatible for stack {}",
                                backend.storage, stack_id
                            );
                            self.halt_orphans(&containers).await;
                            allocation.status = AllocStatus::Failed;
                            return Ok(allocation);
                        }
                    };
                    let id = self
                        .persist_service(
                            stack_id,
                            ServiceClass::Storage,
                            &backend.storage,
                            containers,
                            ep.clone(),
                            Vec::new(),
                            Vec::new(),
                        )
                        .await?;
                    (id, ep)
                }
            };

            let mut backend_ref = BackendRef { storage: storage_id, compute: Vec::new() };
            let mut compute_eps = Vec::new();

            for (slot, compute) in backend.compute.iter().enumerate() {
                let reused_compute = reuse.and_then(|r| r.compute.get(slot));
                match reused_compute {
                    Some(service_id) => {
                        let ep = self.restart_service(service_id, compute.instances).await?;
                        backend_ref.compute.push(service_id.clone());
                        compute_eps.push(ep);
                    }
                    None => {
                        let personality = self.registry.compute(&compute.personality)?;
                        let roles =
                            personality.total_instances(compute.instances, &compute.layers);
                        let composition = ConfigComposer::allocate(
                            &personality,
                            &roles,
                            compute.instances,
                            Some(&storage_ep),
                            None,
                            self.staging_dir.as_deref(),
                            self.fabric.as_ref(),
                        )
                        .await?;

                        match composition {
                            Composition::Ready { containers, entry_point } => {
                                let id = self
                                    .persist_service(
                                        stack_id,
                                        ServiceClass::Compute,
                                        &compute.personality,
                                        containers,
                                        entry_point.clone(),
                                        vec![storage_ep.clone()],
                                        Vec::new(),
                                    )
                                    .await?;
                                backend_ref.compute.push(id);
                                compute_eps.push(entry_point);
                            }
                            Composition::Incompatible { containers } => {
                                warn!(
                                    "compute {} incompatible with storage {} for stack {}",
                                    compute.personality, backend.storage, stack_id
                                );
                                self.halt_orphans(&containers).await;
                                allocation.backends.push(backend_ref);
                                allocation.entry_points.push((storage_ep, compute_eps));
                                allocation.status = AllocStatus::Failed;
                                self.record_backends(stack_id, &allocation.backends).await?;
                                return Ok(allocation);
                            }
                        }
                    }
                }
            }

            allocation.backends.push(backend_ref);
            allocation.entry_points.push((storage_ep, compute_eps));
            // record progress so rollback sees every service created so far
            self.record_backends(stack_id, &allocation.backends).await?;
        }

        Ok(allocation)
    }

    /// Expand each connector template entry into N connector services,
    /// each bound against the full backend entry-point set. Personalities
    /// and image availability are validated before any container is
    /// allocated, so an unavailable image fails the whole call without
    /// partially registering later connectors. A stack derived from a
    /// snapshot draws its connector images from the snapshot's committed
    /// set, in commit order, instead of the personality defaults.
    pub async fn allocate_connectors(
        &self,
        stack_id: &str,
        connectors: &[ConnectorTemplate],
        backend_info: &[EntryPoint],
    ) -> Result<ConnectorAllocation> {
        let stack = self.store.require_stack(stack_id).await?;
        let mut seed_images: VecDeque<String> = match &stack.parent_snapshot {
            Some(snapshot_id) => {
                let snapshot = self.store.require_snapshot(snapshot_id).await?;
                snapshot.images.into_iter().map(|i| i.image).collect()
            }
            None => VecDeque::new(),
        };

        // validation pass before anything is created
        for connector in connectors {
            let personality = self.registry.connector(&connector.personality)?;
            if seed_images.is_empty() && !self.fabric.image_exists(personality.image()).await? {
                return Err(ForgeError::ImageUnavailable(personality.image().to_string()));
            }
        }
        for image in &seed_images {
            if !self.fabric.image_exists(image).await? {
                return Err(ForgeError::ImageUnavailable(image.clone()));
            }
        }

        let merged = merge_entry_points(backend_info);
        let mut allocation =
            ConnectorAllocation { status: AllocStatus::Ok, connectors: Vec::new() };

        for connector in connectors {
            let personality = self.registry.connector(&connector.personality)?;
            for _ in 0..connector.instances {
                let roles = personality.total_instances(1, &[]);
                let seed = seed_images.pop_front();
                let composition = ConfigComposer::allocate(
                    &personality,
                    &roles,
                    1,
                    Some(&merged),
                    seed.as_deref(),
                    self.staging_dir.as_deref(),
                    self.fabric.as_ref(),
                )
                .await?;

                match composition {
                    Composition::Ready { containers, entry_point } => {
                        let id = self
                            .persist_service(
                                stack_id,
                                ServiceClass::Connector,
                                &connector.personality,
                                containers,
                                entry_point,
                                backend_info.to_vec(),
                                Vec::new(),
                            )
                            .await?;
                        allocation.connectors.push(id);
                        self.record_connectors(stack_id, &allocation.connectors).await?;
                    }
                    Composition::Incompatible { containers } => {
                        warn!(
                            "connector {} found no compatible backend for stack {}",
                            connector.personality, stack_id
                        );
                        self.halt_orphans(&containers).await;
                        allocation.status = AllocStatus::Failed;
                        return Ok(allocation);
                    }
                }
            }
        }

        Ok(allocation)
    }

    /// Rollback after a failed build: halt (never remove) every container
    /// belonging to the assembled descriptors, then mark the stack
    /// `failed`. A partially built stack never transitions to `running`.
    pub async fn cancel_stack(
        &self,
        stack_id: &str,
        backends: &[BackendRef],
        connectors: &[String],
    ) -> Result<()> {
        let mut service_ids: Vec<&str> = Vec::new();
        for backend in backends {
            service_ids.push(&backend.storage);
            service_ids.extend(backend.compute.iter().map(String::as_str));
        }
        service_ids.extend(connectors.iter().map(String::as_str));

        for id in service_ids {
            match self.store.get_service(id).await {
                Ok(Some(service)) => {
                    if let Err(e) = self.fabric.halt(&service.containers).await {
                        warn!("rollback: failed to halt containers of {}: {}", id, e);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("rollback: failed to load service {}: {}", id, e),
            }
        }

        let mut stack = self.store.require_stack(stack_id).await?;
        if stack.status != StackStatus::Failed {
            stack.transition(StackStatus::Failed)?;
            self.store.put_stack(&stack).await?;
        }
        error!("stack {} rolled back to failed", stack_id);
        Ok(())
    }

    /// Halt every container the stack currently references and drop its
    /// service records, leaving the status untouched. Clears the ground
    /// between build attempts.
    pub async fn reset_allocation(&self, stack_id: &str) -> Result<()> {
        let stack = self.store.require_stack(stack_id).await?;
        for id in Self::service_ids(&stack) {
            if let Some(service) = self.store.get_service(&id).await? {
                if let Err(e) = self.fabric.halt(&service.containers).await {
                    warn!("reset: failed to halt containers of {}: {}", id, e);
                }
                self.store.delete_service(&id).await?;
            }
        }
        let mut stack = self.store.require_stack(stack_id).await?;
        stack.backends.clear();
        stack.connectors.clear();
        self.store.put_stack(&stack).await
    }

    /// Precondition-checked lifecycle action. Violations are rejected
    /// with an explanatory message instead of mutating the wrong state.
    pub async fn manage(&self, stack_id: &str, action: ManageAction) -> Result<ManageOutcome> {
        let stack = self.store.require_stack(stack_id).await?;
        if let Err(msg) = manage_precondition(stack.status, action) {
            return Ok(ManageOutcome::rejected(msg));
        }
        match action {
            ManageAction::Snapshot => self.snapshot_stack(stack).await,
            ManageAction::Stop => self.stop_stack(stack).await,
            ManageAction::Remove => self.remove_stack(stack).await,
        }
    }

    pub async fn get_stack(&self, stack_id: &str) -> Result<Option<Stack>> {
        self.store.get_stack(stack_id).await
    }

    pub async fn list_stacks(&self) -> Result<Vec<Stack>> {
        self.store.list_stacks().await
    }

    /// Every service id a stack references, storage and compute first,
    /// connectors last.
    fn service_ids(stack: &Stack) -> Vec<String> {
        let mut ids = Vec::new();
        for backend in &stack.backends {
            ids.push(backend.storage.clone());
            ids.extend(backend.compute.iter().cloned());
        }
        ids.extend(stack.connectors.iter().cloned());
        ids
    }

    async fn snapshot_stack(&self, mut stack: Stack) -> Result<ManageOutcome> {
        // connectors carry the user-visible state worth committing
        let mut containers = Vec::new();
        for id in &stack.connectors {
            let service = self.store.require_service(id).await?;
            containers.extend(service.containers);
        }

        let generation = stack.snapshot_count + 1;
        let images = self.fabric.snapshot(&containers, &stack.id, generation).await?;
        let snapshot_id = self.new_id("sn", Collection::Snapshots).await?;
        let snapshot = Snapshot::new(&snapshot_id, &stack.id, generation, images);
        self.store.put_snapshot(&snapshot).await?;

        stack.snapshot_count = generation;
        self.store.put_stack(&stack).await?;
        info!("snapshotted stack {} as {} (generation {})", stack.id, snapshot_id, generation);
        Ok(ManageOutcome::ok(snapshot_id))
    }

    async fn stop_stack(&self, mut stack: Stack) -> Result<ManageOutcome> {
        for id in Self::service_ids(&stack) {
            let mut service = self.store.require_service(&id).await?;
            let personality = self.registry.get(&service.personality)?;
            ConfigComposer::stop(&personality, &service.containers, self.fabric.as_ref()).await?;
            service.status = crate::entity::ServiceStatus::Stopped;
            self.store.put_service(&service).await?;
        }
        stack.transition(StackStatus::Stopped)?;
        self.store.put_stack(&stack).await?;
        info!("stopped stack {}", stack.id);
        Ok(ManageOutcome::ok("stopped"))
    }

    async fn remove_stack(&self, mut stack: Stack) -> Result<ManageOutcome> {
        for id in Self::service_ids(&stack) {
            if let Some(service) = self.store.get_service(&id).await? {
                self.fabric.remove(&service.containers).await?;
            }
        }
        stack.transition(StackStatus::Removed)?;
        self.store.put_stack(&stack).await?;
        info!("removed stack {}", stack.id);
        Ok(ManageOutcome::ok("removed"))
    }

    /// Restart one existing service in place: same service id, same entry
    /// point, refreshed container addresses. Returns the preserved entry
    /// point for downstream re-binding.
    async fn restart_service(&self, service_id: &str, requested: u32) -> Result<EntryPoint> {
        let mut service = self.store.require_service(service_id).await?;
        let personality = self.registry.get(&service.personality)?;
        let refreshed = ConfigComposer::restart(
            &personality,
            &service.containers,
            requested,
            &service.entry_point,
            self.staging_dir.as_deref(),
            self.fabric.as_ref(),
        )
        .await?;
        service.containers = refreshed;
        service.status = crate::entity::ServiceStatus::Running;
        self.store.put_service(&service).await?;
        info!("restarted service {} ({})", service_id, service.personality);
        Ok(service.entry_point)
    }

    /// Restart every connector the stack references, in record order.
    pub async fn restart_connectors(&self, stack_id: &str) -> Result<()> {
        let stack = self.store.require_stack(stack_id).await?;
        for id in &stack.connectors {
            self.restart_service(id, 1).await?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist_service(
        &self,
        stack_id: &str,
        class: ServiceClass,
        personality: &str,
        containers: Vec<crate::entity::Container>,
        entry_point: EntryPoint,
        bound_storage: Vec<EntryPoint>,
        bound_compute: Vec<EntryPoint>,
    ) -> Result<String> {
        let id = self.new_id("sv", Collection::Services).await?;
        let mut service = Service::new(&id, class, personality, containers, entry_point);
        service.bound_storage = bound_storage;
        service.bound_compute = bound_compute;
        self.store.put_service(&service).await?;
        info!("allocated {} service {} ({}) for stack {}", class, id, personality, stack_id);
        Ok(id)
    }

    async fn record_backends(&self, stack_id: &str, backends: &[BackendRef]) -> Result<()> {
        let mut stack = self.store.require_stack(stack_id).await?;
        stack.backends = backends.to_vec();
        self.store.put_stack(&stack).await
    }

    async fn record_connectors(&self, stack_id: &str, connectors: &[String]) -> Result<()> {
        let mut stack = self.store.require_stack(stack_id).await?;
        stack.connectors = connectors.to_vec();
        self.store.put_stack(&stack).await
    }

    /// Containers that never became a service still get halted on the
    /// failure path.
    async fn halt_orphans(&self, containers: &[crate::entity::Container]) {
        if let Err(e) = self.fabric.halt(containers).await {
            warn!("failed to halt orphaned containers: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::MemoryFabric;
    use crate::store::MemoryStore;
    use crate::template::ComputeTemplate;

    fn orchestrator_with(fabric: MemoryFabric) -> StackOrchestrator {
        StackOrchestrator::new(
            StateStore::new(Arc::new(MemoryStore::new())),
            Arc::new(fabric),
            Arc::new(PersonalityRegistry::with_builtins()),
        )
    }

    fn mongo_template() -> StackTemplate {
        StackTemplate {
            id: "tpl-mongo".to_string(),
            backends: vec![BackendTemplate {
                storage: "mongodb".to_string(),
                instances: 1,
                compute: Vec::new(),
            }],
            connectors: vec![ConnectorTemplate {
                personality: "mongo-client".to_string(),
                instances: 2,
            }],
        }
    }

    async fn register_building(orch: &StackOrchestrator, template: StackTemplate) -> Stack {
        orch.register(None, &template.id.clone(), template, StackStatus::Building, None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_register_allocates_prefixed_id() {
        let orch = orchestrator_with(MemoryFabric::new());
        let stack = register_building(&orch, mongo_template()).await;
        assert!(stack.id.starts_with("st-"));
        assert_eq!(stack.status, StackStatus::Building);
        // immediately queryable
        let read = orch.get_stack(&stack.id).await.unwrap().unwrap();
        assert_eq!(read.status, StackStatus::Building);
    }

    #[tokio::test]
    async fn test_register_upserts_existing() {
        let orch = orchestrator_with(MemoryFabric::new());
        let stack = register_building(&orch, mongo_template()).await;
        let updated = orch
            .register(
                Some(&stack.id),
                "tpl-mongo",
                mongo_template(),
                StackStatus::Building,
                Some("key-1".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(updated.id, stack.id);
        assert_eq!(updated.ssh_key.as_deref(), Some("key-1"));
    }

    #[tokio::test]
    async fn test_allocate_backend_storage_only() {
        let fabric = MemoryFabric::new();
        let orch = orchestrator_with(fabric.clone());
        let stack = register_building(&orch, mongo_template()).await;

        let allocation = orch
            .allocate_backend(
                &stack.id,
                &mongo_template().backends,
                AllocateOpts { is_new_stack: true },
            )
            .await
            .unwrap();

        assert_eq!(allocation.status, AllocStatus::Ok);
        assert_eq!(allocation.backends.len(), 1);
        assert_eq!(fabric.container_count(), 1);

        let service = orch
            .store()
            .require_service(&allocation.backends[0].storage)
            .await
            .unwrap();
        assert_eq!(service.class, ServiceClass::Storage);
        assert_eq!(service.containers.len(), 1);
    }

    #[tokio::test]
    async fn test_incompatible_compute_fails_fast() {
        let fabric = MemoryFabric::new();
        let orch = orchestrator_with(fabric.clone());
        // hadoop requires gluster; mongodb storage is incompatible
        let template = StackTemplate {
            id: "tpl-bad".to_string(),
            backends: vec![BackendTemplate {
                storage: "mongodb".to_string(),
                instances: 1,
                compute: vec![ComputeTemplate {
                    personality: "hadoop".to_string(),
                    instances: 1,
                    layers: Vec::new(),
                }],
            }],
            connectors: Vec::new(),
        };
        let stack = register_building(&orch, template.clone()).await;

        let allocation = orch
            .allocate_backend(
                &stack.id,
                &template.backends,
                AllocateOpts { is_new_stack: true },
            )
            .await
            .unwrap();

        assert_eq!(allocation.status, AllocStatus::Failed);
        // incompatibility surfaces at apply time, after the compute
        // containers exist; rollback halts them and records no service
        assert!(allocation.backends[0].compute.is_empty());
        assert!(!fabric.halted_handles().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_guards_the_transition() {
        let orch = orchestrator_with(MemoryFabric::new());
        let mut stack = register_building(&orch, mongo_template()).await;
        stack.transition(StackStatus::Running).unwrap();
        orch.store().put_stack(&stack).await.unwrap();

        // running never drops to failed; rollback only applies mid-build
        let err = orch.cancel_stack(&stack.id, &[], &[]).await.unwrap_err();
        assert!(matches!(err, ForgeError::InvalidTransition(_, _)));
        let read = orch.get_stack(&stack.id).await.unwrap().unwrap();
        assert_eq!(read.status, StackStatus::Running);
    }

    #[tokio::test]
    async fn test_connector_binding_round_trip() {
        let fabric = MemoryFabric::new();
        let orch = orchestrator_with(fabric.clone());
        let template = mongo_template();
        let stack = register_building(&orch, template.clone()).await;

        let backend_alloc = orch
            .allocate_backend(
                &stack.id,
                &template.backends,
                AllocateOpts { is_new_stack: true },
            )
            .await
            .unwrap();
        assert_eq!(backend_alloc.status, AllocStatus::Ok);
        let storage_ep = backend_alloc.entry_points[0].0.clone();

        let connector_alloc = orch
            .allocate_connectors(
                &stack.id,
                &template.connectors,
                &backend_alloc.all_entry_points(),
            )
            .await
            .unwrap();

        assert_eq!(connector_alloc.status, AllocStatus::Ok);
        assert_eq!(connector_alloc.connectors.len(), 2);

        for id in &connector_alloc.connectors {
            let service = orch.store().require_service(id).await.unwrap();
            assert_eq!(service.class, ServiceClass::Connector);
            assert_eq!(service.containers.len(), 1);
            assert_eq!(service.entry_point.personality_type(), Some("mongo-client"));
            // the stored entry point reproduces the storage address exactly
            assert_eq!(service.entry_point.get_str("ip"), storage_ep.get_str("ip"));
        }
    }

    #[tokio::test]
    async fn test_connector_missing_image_fails_before_alloc() {
        let fabric = MemoryFabric::new();
        fabric.mark_image_missing("stackforge/mongo-client");
        let orch = orchestrator_with(fabric.clone());
        let template = mongo_template();
        let stack = register_building(&orch, template.clone()).await;

        let backend_alloc = orch
            .allocate_backend(
                &stack.id,
                &template.backends,
                AllocateOpts { is_new_stack: true },
            )
            .await
            .unwrap();
        let before = fabric.container_count();

        let err = orch
            .allocate_connectors(
                &stack.id,
                &template.connectors,
                &backend_alloc.all_entry_points(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::ImageUnavailable(_)));
        // nothing allocated by the failed call
        assert_eq!(fabric.container_count(), before);
    }

    #[tokio::test]
    async fn test_cancel_halts_and_marks_failed() {
        let fabric = MemoryFabric::new();
        let orch = orchestrator_with(fabric.clone());
        let template = mongo_template();
        let stack = register_building(&orch, template.clone()).await;

        let allocation = orch
            .allocate_backend(
                &stack.id,
                &template.backends,
                AllocateOpts { is_new_stack: true },
            )
            .await
            .unwrap();

        orch.cancel_stack(&stack.id, &allocation.backends, &[]).await.unwrap();

        assert!(fabric.running_handles().is_empty());
        // halted, not removed
        assert_eq!(fabric.container_count(), 1);
        let stack = orch.get_stack(&stack.id).await.unwrap().unwrap();
        assert_eq!(stack.status, StackStatus::Failed);
    }

    #[tokio::test]
    async fn test_manage_remove_rejected_unless_stopped() {
        let orch = orchestrator_with(MemoryFabric::new());
        let mut stack = register_building(&orch, mongo_template()).await;
        stack.transition(StackStatus::Running).unwrap();
        orch.store().put_stack(&stack).await.unwrap();

        let outcome = orch.manage(&stack.id, ManageAction::Remove).await.unwrap();
        assert!(!outcome.status);
        assert!(outcome.msg.contains("running"));
        // no state change
        let read = orch.get_stack(&stack.id).await.unwrap().unwrap();
        assert_eq!(read.status, StackStatus::Running);
    }

    #[tokio::test]
    async fn test_manage_stop_rejected_when_building() {
        let orch = orchestrator_with(MemoryFabric::new());
        let stack = register_building(&orch, mongo_template()).await;
        let outcome = orch.manage(&stack.id, ManageAction::Stop).await.unwrap();
        assert!(!outcome.status);
    }

    #[tokio::test]
    async fn test_snapshot_increments_counter() {
        let fabric = MemoryFabric::new();
        let orch = orchestrator_with(fabric.clone());
        let template = mongo_template();
        let mut stack = register_building(&orch, template.clone()).await;

        let backend_alloc = orch
            .allocate_backend(
                &stack.id,
                &template.backends,
                AllocateOpts { is_new_stack: true },
            )
            .await
            .unwrap();
        let connector_alloc = orch
            .allocate_connectors(
                &stack.id,
                &template.connectors,
                &backend_alloc.all_entry_points(),
            )
            .await
            .unwrap();
        stack = orch.get_stack(&stack.id).await.unwrap().unwrap();
        stack.backends = backend_alloc.backends.clone();
        stack.connectors = connector_alloc.connectors.clone();
        stack.transition(StackStatus::Running).unwrap();
        orch.store().put_stack(&stack).await.unwrap();

        for expected in 1..=3u64 {
            let outcome = orch.manage(&stack.id, ManageAction::Snapshot).await.unwrap();
            assert!(outcome.status);
            let read = orch.get_stack(&stack.id).await.unwrap().unwrap();
            assert_eq!(read.snapshot_count, expected);
        }

        let snapshots = orch.store().list_snapshots().await.unwrap();
        assert_eq!(snapshots.len(), 3);
        assert!(snapshots.iter().all(|s| s.stack_id == stack.id));
        // status unchanged by snapshotting
        let read = orch.get_stack(&stack.id).await.unwrap().unwrap();
        assert_eq!(read.status, StackStatus::Running);
    }
}
