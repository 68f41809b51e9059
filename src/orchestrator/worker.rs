//! Provisioning work queue
//!
//! All mutating workflows run on one worker task draining a bounded FIFO
//! queue, so at most one provisioning workflow touches the fabric and the
//! store at a time. Requests get a synchronous acknowledgement (the stack
//! record in `building`, or a precondition rejection) and the worker does
//! the rest.

use super::{
    manage_precondition, AllocStatus, AllocateOpts, ManageAction, ManageOutcome,
    StackOrchestrator,
};
use crate::entity::{Stack, StackStatus};
use crate::error::{ForgeError, Result};
use crate::template::StackTemplate;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What the worker should do with a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkAction {
    /// Fresh build of a newly registered stack
    New,
    /// Wake a stopped stack back up
    Stopped,
    /// Fresh build seeded from a snapshot's committed images
    Snapshotted,
    /// Run a precondition-checked lifecycle action
    Manage(ManageAction),
}

/// One queued unit of provisioning work.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub stack_id: String,
    pub action: WorkAction,
}

/// Front door of the engine: accepts requests, acknowledges them
/// synchronously and feeds the single provisioning worker.
pub struct Engine {
    orchestrator: Arc<StackOrchestrator>,
    tx: mpsc::Sender<WorkItem>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    pub fn new(orchestrator: Arc<StackOrchestrator>, queue_depth: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let handle = tokio::spawn(run_worker(orchestrator.clone(), rx));
        Self { orchestrator, tx, worker: tokio::sync::Mutex::new(Some(handle)) }
    }

    pub fn orchestrator(&self) -> &StackOrchestrator {
        &self.orchestrator
    }

    /// Owned handle on the orchestrator, for reads after shutdown.
    pub fn orchestrator_handle(&self) -> Arc<StackOrchestrator> {
        self.orchestrator.clone()
    }

    /// Register a stack from a validated template and queue its build.
    /// Returns the record in `building`; the caller polls for the final
    /// status.
    pub async fn create_stack(
        &self,
        template_id: &str,
        template: StackTemplate,
        ssh_key: Option<String>,
    ) -> Result<Stack> {
        template.validate(self.orchestrator.registry())?;
        let stack = self
            .orchestrator
            .register(None, template_id, template, StackStatus::Building, ssh_key)
            .await?;
        self.enqueue(WorkItem { stack_id: stack.id.clone(), action: WorkAction::New })
            .await?;
        Ok(stack)
    }

    /// Wake a stopped stack. The transition to `restarting` is the
    /// synchronous acknowledgement; the worker carries it through
    /// `building` back to `running`.
    pub async fn restart_stack(&self, stack_id: &str) -> Result<Stack> {
        let mut stack = self.orchestrator.store().require_stack(stack_id).await?;
        stack.transition(StackStatus::Restarting)?;
        self.orchestrator.store().put_stack(&stack).await?;
        self.enqueue(WorkItem { stack_id: stack.id.clone(), action: WorkAction::Stopped })
            .await?;
        Ok(stack)
    }

    /// Register a new stack seeded from a snapshot and queue its build.
    /// Backends are provisioned fresh from the source stack's template;
    /// connectors come up from the snapshot's committed images.
    pub async fn restore_stack(
        &self,
        snapshot_id: &str,
        ssh_key: Option<String>,
    ) -> Result<Stack> {
        let store = self.orchestrator.store();
        let snapshot = store.require_snapshot(snapshot_id).await?;
        let source = store.require_stack(&snapshot.stack_id).await?;

        let mut stack = self
            .orchestrator
            .register(None, &source.template_id, source.template, StackStatus::Building, ssh_key)
            .await?;
        stack.parent_snapshot = Some(snapshot.id.clone());
        store.put_stack(&stack).await?;

        self.enqueue(WorkItem { stack_id: stack.id.clone(), action: WorkAction::Snapshotted })
            .await?;
        Ok(stack)
    }

    /// Queue a lifecycle action. Precondition violations are rejected
    /// here, before anything is enqueued; the worker re-checks against
    /// current state before acting.
    pub async fn manage_stack(
        &self,
        stack_id: &str,
        action: ManageAction,
    ) -> Result<ManageOutcome> {
        let stack = self.orchestrator.store().require_stack(stack_id).await?;
        if let Err(msg) = manage_precondition(stack.status, action) {
            return Ok(ManageOutcome::rejected(msg));
        }
        self.enqueue(WorkItem {
            stack_id: stack_id.to_string(),
            action: WorkAction::Manage(action),
        })
        .await?;
        Ok(ManageOutcome::ok(format!("{} queued", action)))
    }

    pub async fn get_stack(&self, stack_id: &str) -> Result<Option<Stack>> {
        self.orchestrator.get_stack(stack_id).await
    }

    pub async fn list_stacks(&self) -> Result<Vec<Stack>> {
        self.orchestrator.list_stacks().await
    }

    /// Close the queue and wait for the worker to drain it.
    pub async fn shutdown(self) {
        let Engine { orchestrator: _, tx, worker } = self;
        drop(tx);
        if let Some(handle) = worker.into_inner() {
            if let Err(e) = handle.await {
                error!("worker task panicked: {}", e);
            }
        }
    }

    async fn enqueue(&self, item: WorkItem) -> Result<()> {
        self.tx.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                ForgeError::Queue("work queue is full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                ForgeError::Queue("work queue is closed".to_string())
            }
        })
    }
}

async fn run_worker(orchestrator: Arc<StackOrchestrator>, mut rx: mpsc::Receiver<WorkItem>) {
    while let Some(item) = rx.recv().await {
        debug!("worker picked up {:?} for stack {}", item.action, item.stack_id);
        let result = match item.action {
            WorkAction::New | WorkAction::Snapshotted => {
                build_stack(&orchestrator, &item.stack_id).await
            }
            WorkAction::Stopped => rebuild_stack(&orchestrator, &item.stack_id).await,
            WorkAction::Manage(action) => {
                match orchestrator.manage(&item.stack_id, action).await {
                    Ok(outcome) => {
                        if !outcome.status {
                            warn!(
                                "{} rejected for stack {}: {}",
                                action, item.stack_id, outcome.msg
                            );
                        }
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
        };
        if let Err(e) = result {
            error!("work item for stack {} failed: {}", item.stack_id, e);
        }
    }
    debug!("work queue closed, worker exiting");
}

/// Fresh build: backends, then connectors, then `running`. A substrate
/// rejection gets one whole-workflow retry from a clean slate; any other
/// failure rolls the stack back to `failed`.
async fn build_stack(orchestrator: &StackOrchestrator, stack_id: &str) -> Result<()> {
    match provision(orchestrator, stack_id).await {
        Ok(AllocStatus::Ok) => Ok(()),
        Ok(AllocStatus::Failed) => fail_stack(orchestrator, stack_id).await,
        Err(e) if e.is_substrate_rejection() => {
            warn!("substrate rejected allocation for stack {}, retrying once: {}", stack_id, e);
            orchestrator.reset_allocation(stack_id).await?;
            match provision(orchestrator, stack_id).await {
                Ok(AllocStatus::Ok) => Ok(()),
                Ok(AllocStatus::Failed) => fail_stack(orchestrator, stack_id).await,
                Err(e) => {
                    error!("retry failed for stack {}: {}", stack_id, e);
                    fail_stack(orchestrator, stack_id).await
                }
            }
        }
        Err(e) => {
            error!("build failed for stack {}: {}", stack_id, e);
            fail_stack(orchestrator, stack_id).await
        }
    }
}

async fn provision(orchestrator: &StackOrchestrator, stack_id: &str) -> Result<AllocStatus> {
    let stack = orchestrator.store().require_stack(stack_id).await?;
    let backend = orchestrator
        .allocate_backend(stack_id, &stack.template.backends, AllocateOpts { is_new_stack: true })
        .await?;
    if backend.status == AllocStatus::Failed {
        return Ok(AllocStatus::Failed);
    }

    let connectors = orchestrator
        .allocate_connectors(stack_id, &stack.template.connectors, &backend.all_entry_points())
        .await?;
    if connectors.status == AllocStatus::Failed {
        return Ok(AllocStatus::Failed);
    }

    let mut stack = orchestrator.store().require_stack(stack_id).await?;
    stack.transition(StackStatus::Running)?;
    orchestrator.store().put_stack(&stack).await?;
    info!("stack {} running", stack_id);
    Ok(AllocStatus::Ok)
}

/// Wake-up build: the same ordering as a fresh build, but every service
/// is restarted in place with its entry point preserved.
async fn rebuild_stack(orchestrator: &StackOrchestrator, stack_id: &str) -> Result<()> {
    let mut stack = orchestrator.store().require_stack(stack_id).await?;
    stack.transition(StackStatus::Building)?;
    orchestrator.store().put_stack(&stack).await?;

    let rebuilt: Result<()> = async {
        let backend = orchestrator
            .allocate_backend(
                stack_id,
                &stack.template.backends,
                AllocateOpts { is_new_stack: false },
            )
            .await?;
        if backend.status == AllocStatus::Failed {
            return Err(ForgeError::Stack(format!(
                "stack {} failed to rebuild its backends",
                stack_id
            )));
        }
        orchestrator.restart_connectors(stack_id).await
    }
    .await;

    match rebuilt {
        Ok(()) => {
            let mut stack = orchestrator.store().require_stack(stack_id).await?;
            stack.transition(StackStatus::Running)?;
            orchestrator.store().put_stack(&stack).await?;
            info!("stack {} running again", stack_id);
            Ok(())
        }
        Err(e) => {
            error!("rebuild failed for stack {}: {}", stack_id, e);
            fail_stack(orchestrator, stack_id).await
        }
    }
}

async fn fail_stack(orchestrator: &StackOrchestrator, stack_id: &str) -> Result<()> {
    let stack = orchestrator.store().require_stack(stack_id).await?;
    orchestrator
        .cancel_stack(stack_id, &stack.backends, &stack.connectors)
        .await
}
