//! The orchestrator - runs one stage of one task end to end.

use std::sync::Arc;
use std::time::Duration;
use taskflow_conflict::ConflictDetector;
use taskflow_core::{
    ConflictRecord, ConflictReport, ContextBundle, FailureKind, Outcome, Stage, StageContract,
    StageFailure, StageRegistry, StageResult, Task, TaskDraft, TaskFilter, TaskId, TaskSnapshot,
    TaskStatus, Time, Workspace,
};
use taskflow_retrieval::{HttpRetrievalClient, RetrievalGateway, SearchFilters, StoredTaskHistory};
use taskflow_state::{TaskLock, TaskStateMachine};
use taskflow_storage::{JsonStorage, Storage};
use taskflow_workspace::{GitWorktreeManager, WorkspaceError, WorkspaceManager};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use crate::{
    Deadline, HandlerRegistry, OrchestratorConfig, OrchestratorError, Result, StageHandler,
    StageInvocation, StageOutput,
};

/// Composes conflict checking, workspace isolation, context retrieval,
/// handler execution and state transitions.
///
/// One stage run:
/// ```text
/// Lock → Gate on conflicts → Ensure workspace → Build context → Run handler → Record
/// ```
///
/// Calls for different tasks run concurrently. Calls for the same task queue
/// on the task's lock and run in arrival order.
pub struct Orchestrator<S: Storage + 'static> {
    config: OrchestratorConfig,
    registry: StageRegistry,
    handlers: HandlerRegistry,
    state: TaskStateMachine<S>,
    conflicts: ConflictDetector<S>,
    workspaces: Arc<dyn WorkspaceManager>,
    retrieval: RetrievalGateway,
}

impl Orchestrator<JsonStorage> {
    /// Build an orchestrator from configuration alone: a JSON store under
    /// `storage_dir`, git worktrees over `workspace.repository`, and the HTTP
    /// retrieval service if an endpoint is configured (local task history
    /// otherwise).
    pub async fn open(config: OrchestratorConfig) -> Result<Self> {
        config.validate()?;
        let storage = Arc::new(Mutex::new(JsonStorage::new(&config.storage_dir).await?));
        let workspaces = Arc::new(GitWorktreeManager::new(
            config.workspace.clone(),
            storage.clone(),
        ));

        let timeout = config.timeouts.retrieval();
        let retrieval = RetrievalGateway::disabled().with_timeout(timeout);
        let retrieval = match &config.retrieval.endpoint {
            Some(endpoint) => {
                let client = Arc::new(HttpRetrievalClient::new(endpoint.clone(), timeout));
                retrieval
                    .with_code_search(client.clone())
                    .with_task_history(client)
            }
            None => retrieval.with_task_history(Arc::new(StoredTaskHistory::new(storage.clone()))),
        };

        info!(
            storage_dir = %config.storage_dir.display(),
            repository = %config.workspace.repository.display(),
            endpoint = ?config.retrieval.endpoint,
            "opened orchestrator"
        );
        Ok(Self::new(config, storage, workspaces).with_retrieval(retrieval))
    }
}

impl<S: Storage + 'static> Orchestrator<S> {
    /// Create an orchestrator over a store and a workspace manager.
    ///
    /// Starts with no handlers and retrieval disabled.
    pub fn new(
        config: OrchestratorConfig,
        storage: Arc<Mutex<S>>,
        workspaces: Arc<dyn WorkspaceManager>,
    ) -> Self {
        let conflicts =
            ConflictDetector::new(storage.clone()).with_inference(config.footprint_inference);
        let retrieval = RetrievalGateway::disabled().with_timeout(config.timeouts.retrieval());
        Self {
            registry: StageRegistry::standard(),
            handlers: HandlerRegistry::new(),
            state: TaskStateMachine::new(storage),
            conflicts,
            workspaces,
            retrieval,
            config,
        }
    }

    /// Set the stage handlers.
    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    /// Replace the stage contracts.
    pub fn with_stage_registry(mut self, registry: StageRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Set the retrieval gateway.
    pub fn with_retrieval(mut self, retrieval: RetrievalGateway) -> Self {
        self.retrieval = retrieval;
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Stage contracts in use.
    pub fn stage_registry(&self) -> &StageRegistry {
        &self.registry
    }

    /// Workspace manager in use.
    pub fn workspaces(&self) -> Arc<dyn WorkspaceManager> {
        self.workspaces.clone()
    }

    // === Tasks ===

    /// Create a task.
    pub async fn create_task(&self, draft: TaskDraft) -> Result<Task> {
        Ok(self.state.create(draft).await?)
    }

    /// Current view of a task, with a fresh conflict check.
    pub async fn get_task(&self, task_id: TaskId) -> Result<TaskSnapshot> {
        let task = self.state.get(task_id).await?;
        self.snapshot(&task).await
    }

    /// Tasks matching a filter, oldest first.
    pub async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        Ok(self.state.list(filter).await?)
    }

    /// Tasks that are neither `done` nor `abandoned`.
    pub async fn list_active(&self) -> Result<Vec<Task>> {
        self.list_tasks(&TaskFilter::active()).await
    }

    /// Declare a task's footprint. Only allowed in its first stage.
    pub async fn set_footprint(&self, task_id: TaskId, footprint: Vec<String>) -> Result<Task> {
        Ok(self.state.set_footprint(task_id, footprint).await?)
    }

    /// Replace a task's footprint at any stage.
    pub async fn reset_footprint(&self, task_id: TaskId, footprint: Vec<String>) -> Result<Task> {
        Ok(self.state.reset_footprint(task_id, footprint).await?)
    }

    /// Conflict report for a task against all other active tasks.
    pub async fn check_conflicts(&self, task_id: TaskId) -> Result<ConflictReport> {
        Ok(self.conflicts.check(task_id).await?)
    }

    // === Lifecycle ===

    /// Run the current stage with the registered handler.
    pub async fn advance_stage(&self, task_id: TaskId) -> Result<TaskSnapshot> {
        self.advance(task_id, None).await
    }

    /// Run the current stage with an explicit handler.
    pub async fn advance_stage_with(
        &self,
        task_id: TaskId,
        handler: Arc<dyn StageHandler>,
    ) -> Result<TaskSnapshot> {
        self.advance(task_id, Some(handler)).await
    }

    /// Move a task back to an earlier stage. Later results are superseded.
    pub async fn reopen(&self, task_id: TaskId, target: Stage) -> Result<TaskSnapshot> {
        let lock = self.state.lock_task(task_id).await;
        let task = self.state.reopen_locked(&lock, target).await?;
        self.snapshot(&task).await
    }

    /// Abandon a task and release its workspace.
    ///
    /// A failed release does not undo the abandonment; the snapshot still
    /// shows the unreleased workspace and [`Self::release_workspace`] retries.
    pub async fn abandon(&self, task_id: TaskId, reason: &str) -> Result<TaskSnapshot> {
        let lock = self.state.lock_task(task_id).await;
        let task = self.state.abandon_locked(&lock, reason).await?;
        let task = self.release_after_finish(&lock, task).await;
        self.snapshot(&task).await
    }

    /// Release the workspace of a `done` or `abandoned` task.
    ///
    /// Finishes a release that failed when the task reached its terminal
    /// stage. Releasing twice is harmless.
    pub async fn release_workspace(&self, task_id: TaskId) -> Result<TaskSnapshot> {
        let lock = self.state.lock_task(task_id).await;
        let task = self.state.get(task_id).await?;
        if !task.is_terminal() {
            return Err(OrchestratorError::IllegalTransition {
                task_id,
                stage: task.stage,
                reason: "workspace is released when the task is done or abandoned".to_string(),
            });
        }
        let task = self.release_locked(&lock).await?.unwrap_or(task);
        self.snapshot(&task).await
    }

    async fn advance(
        &self,
        task_id: TaskId,
        explicit: Option<Arc<dyn StageHandler>>,
    ) -> Result<TaskSnapshot> {
        // 1. Serialize with other calls for this task
        let lock = self.state.lock_task(task_id).await;

        // 2. Load and check the task
        let task = self.state.get(task_id).await?;
        if task.is_terminal() {
            return Err(OrchestratorError::TerminalTask(task_id));
        }
        let stage = task.stage;
        let handler = match explicit {
            Some(handler) => handler,
            None => self
                .handlers
                .get(stage)
                .ok_or(OrchestratorError::NoHandler(stage))?,
        };

        // 3. Gate on high-severity conflicts
        let mut report = self.gate(&task).await?;

        // 4. Ensure the workspace exists
        self.ensure_workspace(&lock, &task).await?;

        let contract = self.registry.contract(stage);
        let timeout = self
            .config
            .timeouts
            .stage_timeout(stage, contract.default_timeout);
        let max_attempts = self.config.retry.max_attempts.max(1);

        let mut attempt = 1;
        let task = loop {
            // 5. Fresh context per attempt
            let current = self.state.get(task_id).await?;
            let bundle = self.build_bundle(&current, contract.clone(), &report).await;
            let degraded = bundle.degraded;

            let workspace = self.workspaces.activate(task_id).await?;
            self.state
                .record_workspace_locked(&lock, workspace.clone())
                .await?;
            let running = self.state.mark_in_progress_locked(&lock).await?;

            // 6. Run the handler under its deadline
            info!(task_id = %task_id, stage = %stage, attempt, degraded, "running stage handler");
            let started_at = chrono::Utc::now();
            let invocation = StageInvocation {
                task: running,
                workspace,
                bundle,
                deadline: Deadline::new(timeout),
                attempt,
            };
            let outcome = invoke(handler.clone(), invocation, timeout).await;

            // 7. Normalize into a result
            let result = self
                .to_result(task_id, stage, started_at, outcome, &contract)
                .with_attempt(attempt)
                .with_degraded_context(degraded);

            // 8. Record it
            let task = match self.state.advance_locked(&lock, result).await {
                Ok(task) => task,
                Err(e) => {
                    if let Err(reset) = self.state.mark_pending_locked(&lock).await {
                        warn!(task_id = %task_id, error = %reset, "failed to reset task status");
                    }
                    return Err(e.into());
                }
            };

            if task.status != TaskStatus::Blocked || attempt >= max_attempts {
                break task;
            }

            let delay = self.config.retry.backoff(attempt);
            info!(
                task_id = %task_id,
                stage = %stage,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                "retrying stage"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
            report = self.gate(&task).await?;
        };

        if task.status == TaskStatus::Blocked {
            warn!(
                task_id = %task_id,
                stage = %stage,
                attempts = attempt,
                "stage blocked after exhausting retries"
            );
        }

        // 9. Done releases the workspace
        let task = if task.stage == Stage::Done {
            self.release_after_finish(&lock, task).await
        } else {
            task
        };

        self.snapshot(&task).await
    }

    // === Steps ===

    async fn gate(&self, task: &Task) -> Result<ConflictReport> {
        let report = self.conflicts.check_task(task).await?;
        if report.is_blocked() {
            let records: Vec<ConflictRecord> = report.blocking().into_iter().cloned().collect();
            warn!(
                task_id = %task.id,
                stage = %task.stage,
                blocking = records.len(),
                "stage blocked by conflict"
            );
            return Err(OrchestratorError::ConflictBlocked {
                task_id: task.id,
                records,
            });
        }
        Ok(report)
    }

    async fn ensure_workspace(&self, lock: &TaskLock, task: &Task) -> Result<Workspace> {
        if let Some(workspace) = &task.workspace {
            return Ok(workspace.clone());
        }

        // A manager record without a task record means an earlier call died
        // between allocating and recording.
        let workspace = match self.workspaces.handle(task.id).await {
            Ok(workspace) => {
                debug!(task_id = %task.id, "recovered unrecorded workspace");
                workspace
            }
            Err(WorkspaceError::NotFound(_)) => {
                let base_ref = task
                    .base_ref
                    .as_deref()
                    .unwrap_or(&self.config.workspace.default_base_ref);
                self.workspaces.allocate(task.id, base_ref).await?
            }
            Err(e) => return Err(e.into()),
        };
        self.state
            .record_workspace_locked(lock, workspace.clone())
            .await?;
        Ok(workspace)
    }

    /// Release once the terminal transition is saved. The transition stands
    /// even if the release fails.
    async fn release_after_finish(&self, lock: &TaskLock, task: Task) -> Task {
        match self.release_locked(lock).await {
            Ok(released) => released.unwrap_or(task),
            Err(e) => {
                warn!(
                    task_id = %task.id,
                    stage = %task.stage,
                    error = %e,
                    "workspace release failed, task keeps its workspace until released"
                );
                task
            }
        }
    }

    async fn release_locked(&self, lock: &TaskLock) -> Result<Option<Task>> {
        match self.workspaces.release(lock.task_id()).await {
            Ok(workspace) => Ok(Some(
                self.state.record_workspace_locked(lock, workspace).await?,
            )),
            Err(WorkspaceError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Assemble the context bundle. Retrieval failures degrade it, never fail it.
    async fn build_bundle(
        &self,
        task: &Task,
        contract: StageContract,
        report: &ConflictReport,
    ) -> ContextBundle {
        let mut bundle = ContextBundle::new(task.id, task.stage, contract);
        bundle.footprint = self.conflicts.effective_footprint(task);
        bundle.history = task.live_history().cloned().collect();
        bundle.warnings = report.warnings();
        bundle.parameters = task.parameters.clone();

        let sizes = &self.config.retrieval;
        let query = format!("{}\n{}", task.title, task.description);
        let filters = SearchFilters::default();
        // One extra so dropping the task itself still leaves top_k
        let (code, similar) = tokio::join!(
            self.retrieval.search_code(&query, sizes.code_top_k, &filters),
            self.retrieval
                .find_similar_tasks(&task.description, sizes.similar_tasks_top_k + 1),
        );

        match code {
            Ok(hits) => bundle.code = hits.collect(),
            Err(e) => {
                debug!(task_id = %task.id, error = %e, "code search degraded");
                bundle.mark_degraded(format!("code search: {}", e));
            }
        }
        match similar {
            Ok(hits) => {
                let me = task.id.to_string();
                bundle.similar_tasks = hits
                    .filter(|t| t.reference != me)
                    .take(sizes.similar_tasks_top_k)
                    .collect();
            }
            Err(e) => {
                debug!(task_id = %task.id, error = %e, "similar-task search degraded");
                bundle.mark_degraded(format!("similar tasks: {}", e));
            }
        }
        bundle
    }

    fn to_result(
        &self,
        task_id: TaskId,
        stage: Stage,
        started_at: Time,
        outcome: std::result::Result<StageOutput, StageFailure>,
        contract: &StageContract,
    ) -> StageResult {
        let output = match outcome {
            Ok(output) => output,
            Err(failure) => {
                warn!(task_id = %task_id, stage = %stage, kind = ?failure.kind, message = %failure.message, "stage execution failed");
                return StageResult::failure(stage, started_at, failure);
            }
        };

        match output.outcome {
            Outcome::Success => {
                let missing: Vec<String> = {
                    let kinds: Vec<&str> = output.artifacts.iter().map(|a| a.kind.as_str()).collect();
                    contract
                        .missing_outputs(&kinds)
                        .into_iter()
                        .map(str::to_string)
                        .collect()
                };
                if !missing.is_empty() {
                    warn!(task_id = %task_id, stage = %stage, missing = ?missing, "handler output lacks declared artifacts");
                    if self.config.enforce_contracts {
                        let failure = StageFailure::new(
                            FailureKind::ContractViolation,
                            format!("missing outputs: {}", missing.join(", ")),
                        );
                        return StageResult::failure(stage, started_at, failure)
                            .with_artifacts(output.artifacts);
                    }
                }
                StageResult::success(stage, started_at, output.summary)
                    .with_artifacts(output.artifacts)
            }
            Outcome::Failure => {
                let failure =
                    StageFailure::new(FailureKind::HandlerReportedFailure, output.summary);
                StageResult::failure(stage, started_at, failure).with_artifacts(output.artifacts)
            }
            Outcome::Skipped => StageResult::failure(
                stage,
                started_at,
                StageFailure::new(
                    FailureKind::ContractViolation,
                    "handlers may not report a skipped outcome",
                ),
            ),
        }
    }

    async fn snapshot(&self, task: &Task) -> Result<TaskSnapshot> {
        let warnings = self.conflicts.check_task(task).await?.records;
        Ok(task.snapshot(warnings))
    }
}

/// Run a handler on its own task so the deadline holds even if the handler
/// never yields.
async fn invoke(
    handler: Arc<dyn StageHandler>,
    invocation: StageInvocation,
    timeout: Duration,
) -> std::result::Result<StageOutput, StageFailure> {
    let token = invocation.deadline.token().clone();
    let mut join = tokio::spawn(async move { handler.handle(invocation).await });

    match tokio::time::timeout(timeout, &mut join).await {
        Ok(Ok(Ok(output))) => Ok(output),
        Ok(Ok(Err(e))) => Err(StageFailure::new(FailureKind::HandlerError, format!("{:#}", e))),
        Ok(Err(e)) if e.is_panic() => {
            let payload = e.into_panic();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "handler panicked".to_string());
            Err(StageFailure::new(FailureKind::HandlerPanicked, message))
        }
        Ok(Err(e)) => Err(StageFailure::new(FailureKind::HandlerPanicked, e.to_string())),
        Err(_) => {
            // Signal first so a cooperative handler can see it, then stop waiting.
            token.cancel();
            join.abort();
            Err(StageFailure::new(
                FailureKind::Timeout,
                format!("handler exceeded {:?}", timeout),
            ))
        }
    }
}
