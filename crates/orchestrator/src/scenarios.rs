//! End-to-end tests for the orchestrator over a scratch git repository.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use git2::Repository;
use tempfile::TempDir;
use taskflow_core::{
    CodeSnippet, ConflictSeverity, FailureKind, Outcome, SimilarTask, Stage, StageContract,
    StageRegistry, Task, TaskDraft, TaskFilter, TaskId, TaskStatus, Workspace, WorkspaceState,
};
use taskflow_retrieval::{
    CodeSearch, RankedResults, RetrievalGateway, RetrievalError, SearchFilters, TaskHistorySearch,
};
use taskflow_storage::MemoryStorage;
use taskflow_workspace::{GitWorktreeManager, WorkspaceConfig, WorkspaceManager};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use crate::{
    handler_fn, HandlerRegistry, Orchestrator, OrchestratorConfig, OrchestratorError,
    RetryConfig, StageHandler, StageInvocation, StageOutput,
};

fn init_repo(dir: &Path) {
    let repo = Repository::init(dir).unwrap();
    std::fs::create_dir_all(dir.join("src")).unwrap();
    std::fs::write(dir.join("src/a.py"), "print('a')\n").unwrap();
    let mut index = repo.index().unwrap();
    index.add_path(Path::new("src/a.py")).unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let sig = git2::Signature::now("Test", "test@example.com").unwrap();
    repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
        .unwrap();
}

fn create_test_config(temp_dir: &TempDir) -> OrchestratorConfig {
    let repo_dir = temp_dir.path().join("repo");
    std::fs::create_dir_all(&repo_dir).unwrap();
    init_repo(&repo_dir);

    OrchestratorConfig::default()
        .with_storage_dir(temp_dir.path().join("store"))
        .with_workspace(
            WorkspaceConfig::new(&repo_dir).with_worktrees_dir(temp_dir.path().join("worktrees")),
        )
        .with_retry(RetryConfig::default().with_initial_backoff(Duration::from_millis(10)))
}

fn create_test_orchestrator(config: OrchestratorConfig) -> Orchestrator<MemoryStorage> {
    let storage = Arc::new(Mutex::new(MemoryStorage::new()));
    let workspaces = Arc::new(GitWorktreeManager::new(config.workspace.clone(), storage.clone()));
    Orchestrator::new(config, storage, workspaces)
}

/// Succeeds with every artifact the stage contract asks for.
fn contract_handler() -> Arc<dyn StageHandler> {
    handler_fn(|invocation: StageInvocation| async move {
        let stage = invocation.stage();
        let output = invocation
            .bundle
            .contract
            .outputs
            .iter()
            .fold(StageOutput::success(format!("{} done", stage)), |out, kind| {
                out.with_artifact(kind.as_str(), format!("docs/{}.md", kind))
            });
        Ok(output)
    })
}

fn draft(footprint: &[&str]) -> TaskDraft {
    TaskDraft::new("Add login endpoint", "Accept a username and password")
        .with_footprint(footprint.iter().copied())
}

async fn advance_to(orchestrator: &Orchestrator<MemoryStorage>, task_id: TaskId, target: Stage) {
    loop {
        let snapshot = orchestrator.get_task(task_id).await.unwrap();
        if snapshot.stage == target {
            return;
        }
        let snapshot = orchestrator.advance_stage(task_id).await.unwrap();
        assert_ne!(snapshot.status, TaskStatus::Blocked);
    }
}

async fn find_task(orchestrator: &Orchestrator<MemoryStorage>, task_id: TaskId) -> Task {
    orchestrator
        .list_tasks(&TaskFilter::default())
        .await
        .unwrap()
        .into_iter()
        .find(|t| t.id == task_id)
        .unwrap()
}

struct FixedCode;

#[async_trait]
impl CodeSearch for FixedCode {
    async fn search_code(
        &self,
        _query: &str,
        top_k: usize,
        _filters: &SearchFilters,
    ) -> taskflow_retrieval::Result<RankedResults<CodeSnippet>> {
        let hits = vec![
            CodeSnippet { path: "src/auth.py".to_string(), snippet: "def login():".to_string(), score: 0.9 },
            CodeSnippet { path: "src/db.py".to_string(), snippet: "def connect():".to_string(), score: 0.4 },
        ];
        Ok(RankedResults::new(hits, top_k))
    }
}

struct DownHistory;

#[async_trait]
impl TaskHistorySearch for DownHistory {
    async fn find_similar_tasks(
        &self,
        _description: &str,
        _top_k: usize,
    ) -> taskflow_retrieval::Result<RankedResults<SimilarTask>> {
        Err(RetrievalError::Unavailable("connection refused".to_string()))
    }
}

struct HangingCode;

#[async_trait]
impl CodeSearch for HangingCode {
    async fn search_code(
        &self,
        _query: &str,
        _top_k: usize,
        _filters: &SearchFilters,
    ) -> taskflow_retrieval::Result<RankedResults<CodeSnippet>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(RankedResults::empty())
    }
}

#[tokio::test]
async fn test_full_pipeline_releases_workspace() {
    let temp_dir = TempDir::new().unwrap();
    let orchestrator = create_test_orchestrator(create_test_config(&temp_dir))
        .with_handlers(HandlerRegistry::new().with_fallback(contract_handler()));
    let task = orchestrator.create_task(draft(&["src/a.py"])).await.unwrap();

    let mut snapshot = orchestrator.get_task(task.id).await.unwrap();
    let mut calls = 0;
    while snapshot.stage != Stage::Done {
        snapshot = orchestrator.advance_stage(task.id).await.unwrap();
        calls += 1;
    }

    assert_eq!(calls, 6);
    assert_eq!(snapshot.status, TaskStatus::Completed);
    assert_eq!(snapshot.workspace_state, Some(WorkspaceState::Released));
    assert_eq!(snapshot.last_result.unwrap().stage, Stage::Merge);

    let workspace = orchestrator.workspaces().handle(task.id).await.unwrap();
    assert!(workspace.released_at.is_some());
    assert!(!workspace.root.exists());

    // The branch survives release
    let repo = Repository::open(temp_dir.path().join("repo")).unwrap();
    assert!(repo.find_branch(&workspace.branch, git2::BranchType::Local).is_ok());

    assert!(matches!(
        orchestrator.advance_stage(task.id).await,
        Err(OrchestratorError::TerminalTask(_))
    ));
}

#[tokio::test]
async fn test_release_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let orchestrator = create_test_orchestrator(create_test_config(&temp_dir))
        .with_handlers(HandlerRegistry::new().with_fallback(contract_handler()));
    let task = orchestrator.create_task(draft(&["src/a.py"])).await.unwrap();
    advance_to(&orchestrator, task.id, Stage::Done).await;

    let workspaces = orchestrator.workspaces();
    let first = workspaces.handle(task.id).await.unwrap();
    let second = workspaces.release(task.id).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(second.state, WorkspaceState::Released);

    // Released once, never re-allocated
    assert!(matches!(
        workspaces.allocate(task.id, "HEAD").await,
        Err(taskflow_workspace::WorkspaceError::WorkspaceConflict(_))
    ));
}

#[tokio::test]
async fn test_same_file_same_stage_blocks() {
    let temp_dir = TempDir::new().unwrap();
    let orchestrator = create_test_orchestrator(create_test_config(&temp_dir))
        .with_handlers(HandlerRegistry::new().with_fallback(contract_handler()));
    let t1 = orchestrator.create_task(draft(&["src/a.py"])).await.unwrap();
    let t2 = orchestrator.create_task(draft(&["src/b.py"])).await.unwrap();

    // Sibling files in one directory only warn
    advance_to(&orchestrator, t1.id, Stage::Implementation).await;
    advance_to(&orchestrator, t2.id, Stage::Implementation).await;
    let snapshot = orchestrator.get_task(t1.id).await.unwrap();
    assert_eq!(snapshot.conflict_warnings.len(), 1);
    assert_eq!(snapshot.conflict_warnings[0].severity, ConflictSeverity::Low);

    orchestrator
        .reset_footprint(t2.id, vec!["src/a.py".to_string()])
        .await
        .unwrap();

    let report = orchestrator.check_conflicts(t1.id).await.unwrap();
    assert_eq!(report.records.len(), 1);
    let record = &report.records[0];
    assert_eq!((record.task_id, record.other_task_id), (t1.id, t2.id));
    assert_eq!(record.shared, vec!["src/a.py".to_string()]);
    assert_eq!(record.severity, ConflictSeverity::High);

    let history_before = find_task(&orchestrator, t1.id).await.history.len();
    match orchestrator.advance_stage(t1.id).await {
        Err(OrchestratorError::ConflictBlocked { task_id, records }) => {
            assert_eq!(task_id, t1.id);
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].other_task_id, t2.id);
        }
        other => panic!("expected ConflictBlocked, got {:?}", other.map(|s| s.stage)),
    }

    // Nothing ran
    let t1_now = find_task(&orchestrator, t1.id).await;
    assert_eq!(t1_now.history.len(), history_before);
    assert_eq!(t1_now.stage, Stage::Implementation);
}

#[tokio::test]
async fn test_failing_handler_blocks_after_retries() {
    let temp_dir = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let failing = handler_fn(move |_invocation: StageInvocation| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<StageOutput, _>(anyhow::anyhow!("test runner crashed"))
        }
    });
    let orchestrator = create_test_orchestrator(create_test_config(&temp_dir)).with_handlers(
        HandlerRegistry::new()
            .with_fallback(contract_handler())
            .with_handler(Stage::Testing, failing),
    );
    let task = orchestrator.create_task(draft(&["src/a.py"])).await.unwrap();
    advance_to(&orchestrator, task.id, Stage::Testing).await;

    let snapshot = orchestrator.advance_stage(task.id).await.unwrap();
    assert_eq!(snapshot.stage, Stage::Testing);
    assert_eq!(snapshot.status, TaskStatus::Blocked);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let last = snapshot.last_result.unwrap();
    assert_eq!(last.outcome, Outcome::Failure);
    assert!(last.failure.unwrap().message.contains("test runner crashed"));

    let task = find_task(&orchestrator, task.id).await;
    let failures: Vec<_> = task
        .history
        .iter()
        .filter(|r| r.stage == Stage::Testing && r.outcome == Outcome::Failure)
        .collect();
    assert_eq!(failures.len(), 3);
    let attempts: Vec<u32> = failures.iter().map(|r| r.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
    for failure in failures {
        assert_eq!(failure.failure.as_ref().unwrap().kind, FailureKind::HandlerError);
        assert!(failure.finished_at >= failure.started_at);
    }

    // A later call starts a fresh round
    let snapshot = orchestrator
        .advance_stage_with(task.id, contract_handler())
        .await
        .unwrap();
    assert_eq!(snapshot.stage, Stage::Review);
    assert_eq!(snapshot.status, TaskStatus::Pending);
}

#[tokio::test]
async fn test_reopen_supersedes_later_results() {
    let temp_dir = TempDir::new().unwrap();
    let orchestrator = create_test_orchestrator(create_test_config(&temp_dir))
        .with_handlers(HandlerRegistry::new().with_fallback(contract_handler()));
    let task = orchestrator.create_task(draft(&["src/a.py"])).await.unwrap();
    advance_to(&orchestrator, task.id, Stage::Review).await;

    let snapshot = orchestrator.reopen(task.id, Stage::Design).await.unwrap();
    assert_eq!(snapshot.stage, Stage::Design);
    assert_eq!(snapshot.status, TaskStatus::Pending);

    let task = find_task(&orchestrator, task.id).await;
    for result in task.history.iter().filter(|r| r.marker.is_none()) {
        let expect_superseded = result.stage != Stage::Requirements;
        assert_eq!(result.superseded, expect_superseded, "{}", result.stage);
    }

    // The workspace carries over; the redo runs in the same checkout
    let branch = task.workspace.as_ref().unwrap().branch.clone();
    advance_to(&orchestrator, task.id, Stage::Review).await;
    let task = find_task(&orchestrator, task.id).await;
    assert_eq!(task.workspace.unwrap().branch, branch);

    assert!(matches!(
        orchestrator.reopen(task.id, Stage::Merge).await,
        Err(OrchestratorError::IllegalReopen { current: Stage::Review, target: Stage::Merge, .. })
    ));
}

#[tokio::test]
async fn test_abandon_releases_workspace() {
    let temp_dir = TempDir::new().unwrap();
    let orchestrator = create_test_orchestrator(create_test_config(&temp_dir))
        .with_handlers(HandlerRegistry::new().with_fallback(contract_handler()));
    let task = orchestrator.create_task(draft(&["src/a.py"])).await.unwrap();
    advance_to(&orchestrator, task.id, Stage::Implementation).await;

    let snapshot = orchestrator.abandon(task.id, "duplicate").await.unwrap();
    assert_eq!(snapshot.stage, Stage::Abandoned);
    assert_eq!(snapshot.status, TaskStatus::Failed);
    assert_eq!(snapshot.workspace_state, Some(WorkspaceState::Released));
    assert!(orchestrator.list_active().await.unwrap().is_empty());

    // Abandoning before any workspace exists is fine too
    let fresh = orchestrator.create_task(draft(&["src/c.py"])).await.unwrap();
    let snapshot = orchestrator.abandon(fresh.id, "not needed").await.unwrap();
    assert_eq!(snapshot.workspace_state, None);
}

/// Git-backed manager whose first `release` fails.
struct FlakyRelease {
    inner: GitWorktreeManager<MemoryStorage>,
    failures: AtomicUsize,
}

#[async_trait]
impl WorkspaceManager for FlakyRelease {
    async fn allocate(&self, task_id: TaskId, base_ref: &str) -> taskflow_workspace::Result<Workspace> {
        self.inner.allocate(task_id, base_ref).await
    }

    async fn activate(&self, task_id: TaskId) -> taskflow_workspace::Result<Workspace> {
        self.inner.activate(task_id).await
    }

    async fn release(&self, task_id: TaskId) -> taskflow_workspace::Result<Workspace> {
        if self.failures.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "worktree busy").into());
        }
        self.inner.release(task_id).await
    }

    async fn handle(&self, task_id: TaskId) -> taskflow_workspace::Result<Workspace> {
        self.inner.handle(task_id).await
    }

    async fn has_uncommitted_changes(&self, task_id: TaskId) -> taskflow_workspace::Result<bool> {
        self.inner.has_uncommitted_changes(task_id).await
    }
}

fn create_flaky_orchestrator(config: OrchestratorConfig) -> Orchestrator<MemoryStorage> {
    let storage = Arc::new(Mutex::new(MemoryStorage::new()));
    let workspaces = Arc::new(FlakyRelease {
        inner: GitWorktreeManager::new(config.workspace.clone(), storage.clone()),
        failures: AtomicUsize::new(0),
    });
    Orchestrator::new(config, storage, workspaces)
        .with_handlers(HandlerRegistry::new().with_fallback(contract_handler()))
}

#[tokio::test]
async fn test_failed_release_at_done_can_be_retried() {
    let temp_dir = TempDir::new().unwrap();
    let orchestrator = create_flaky_orchestrator(create_test_config(&temp_dir));
    let task = orchestrator.create_task(draft(&["src/a.py"])).await.unwrap();

    let mut snapshot = orchestrator.get_task(task.id).await.unwrap();
    while snapshot.stage != Stage::Done {
        snapshot = orchestrator.advance_stage(task.id).await.unwrap();
    }
    // The transition stands; the workspace is still held
    assert_eq!(snapshot.status, TaskStatus::Completed);
    assert_eq!(snapshot.workspace_state, Some(WorkspaceState::Active));

    let snapshot = orchestrator.release_workspace(task.id).await.unwrap();
    assert_eq!(snapshot.stage, Stage::Done);
    assert_eq!(snapshot.workspace_state, Some(WorkspaceState::Released));
    let workspace = orchestrator.workspaces().handle(task.id).await.unwrap();
    assert_eq!(workspace.state, WorkspaceState::Released);
    assert!(!workspace.root.exists());

    // A second release changes nothing
    let again = orchestrator.release_workspace(task.id).await.unwrap();
    assert_eq!(again.workspace_state, Some(WorkspaceState::Released));
    assert_eq!(
        orchestrator.workspaces().handle(task.id).await.unwrap(),
        workspace
    );
}

#[tokio::test]
async fn test_failed_release_on_abandon_can_be_retried() {
    let temp_dir = TempDir::new().unwrap();
    let orchestrator = create_flaky_orchestrator(create_test_config(&temp_dir));
    let task = orchestrator.create_task(draft(&["src/a.py"])).await.unwrap();
    advance_to(&orchestrator, task.id, Stage::Implementation).await;

    let snapshot = orchestrator.abandon(task.id, "duplicate").await.unwrap();
    assert_eq!(snapshot.stage, Stage::Abandoned);
    assert_eq!(snapshot.workspace_state, Some(WorkspaceState::Active));

    let snapshot = orchestrator.release_workspace(task.id).await.unwrap();
    assert_eq!(snapshot.workspace_state, Some(WorkspaceState::Released));
}

#[tokio::test]
async fn test_release_refused_for_live_task() {
    let temp_dir = TempDir::new().unwrap();
    let orchestrator = create_test_orchestrator(create_test_config(&temp_dir))
        .with_handlers(HandlerRegistry::new().with_fallback(contract_handler()));
    let task = orchestrator.create_task(draft(&["src/a.py"])).await.unwrap();
    orchestrator.advance_stage(task.id).await.unwrap();

    assert!(matches!(
        orchestrator.release_workspace(task.id).await,
        Err(OrchestratorError::IllegalTransition { .. })
    ));
    let workspace = orchestrator.workspaces().handle(task.id).await.unwrap();
    assert_eq!(workspace.state, WorkspaceState::Active);
}

#[tokio::test]
async fn test_unreachable_retrieval_degrades() {
    let temp_dir = TempDir::new().unwrap();
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();
    let recording = handler_fn(move |invocation: StageInvocation| {
        let sink = sink.clone();
        async move {
            sink.lock().unwrap().push(invocation.bundle.clone());
            Ok(StageOutput::success("ok").with_artifact("requirements", "REQ.md"))
        }
    });

    // No backends at all
    let orchestrator = create_test_orchestrator(create_test_config(&temp_dir))
        .with_handlers(HandlerRegistry::new().with_fallback(recording.clone()));
    let task = orchestrator.create_task(draft(&["src/a.py"])).await.unwrap();
    let snapshot = orchestrator.advance_stage(task.id).await.unwrap();
    assert_eq!(snapshot.stage, Stage::Design);
    assert!(snapshot.last_result.unwrap().degraded_context);
    assert_eq!(seen.lock().unwrap()[0].degraded_reasons.len(), 2);

    // One working backend and one down
    let gateway = RetrievalGateway::disabled()
        .with_code_search(Arc::new(FixedCode))
        .with_task_history(Arc::new(DownHistory));
    let second_dir = TempDir::new().unwrap();
    let orchestrator = create_test_orchestrator(create_test_config(&second_dir))
        .with_handlers(HandlerRegistry::new().with_fallback(recording.clone()))
        .with_retrieval(gateway);
    let task = orchestrator.create_task(draft(&["src/a.py"])).await.unwrap();
    let snapshot = orchestrator.advance_stage(task.id).await.unwrap();
    assert!(snapshot.last_result.unwrap().degraded_context);
    let bundle = seen.lock().unwrap()[1].clone();
    assert_eq!(bundle.code.len(), 2);
    assert_eq!(bundle.code[0].path, "src/auth.py");
    assert!(bundle.similar_tasks.is_empty());

    // A hanging backend is cut off by the retrieval timeout
    let third_dir = TempDir::new().unwrap();
    let mut config = create_test_config(&third_dir);
    config.timeouts.retrieval_ms = 50;
    let gateway = RetrievalGateway::disabled()
        .with_code_search(Arc::new(HangingCode))
        .with_timeout(config.timeouts.retrieval());
    let orchestrator = create_test_orchestrator(config)
        .with_handlers(HandlerRegistry::new().with_fallback(recording))
        .with_retrieval(gateway);
    let task = orchestrator.create_task(draft(&["src/a.py"])).await.unwrap();
    let snapshot = tokio::time::timeout(Duration::from_secs(5), orchestrator.advance_stage(task.id))
        .await
        .expect("retrieval must not hang the stage")
        .unwrap();
    assert_eq!(snapshot.stage, Stage::Design);
    assert!(snapshot.last_result.unwrap().degraded_context);
}

#[tokio::test]
async fn test_bundle_contents() {
    let temp_dir = TempDir::new().unwrap();
    let seen = Arc::new(std::sync::Mutex::new(None));
    let sink = seen.clone();
    let recording = handler_fn(move |invocation: StageInvocation| {
        let sink = sink.clone();
        async move {
            let root_exists = invocation.workspace.root.join("src/a.py").exists();
            *sink.lock().unwrap() = Some((invocation.bundle.clone(), invocation.workspace.state, root_exists));
            Ok(StageOutput::success("ok"))
        }
    });
    let gateway = RetrievalGateway::disabled().with_code_search(Arc::new(FixedCode));
    let orchestrator = create_test_orchestrator(create_test_config(&temp_dir))
        .with_handlers(HandlerRegistry::new().with_fallback(contract_handler()))
        .with_retrieval(gateway);

    let task = orchestrator
        .create_task(
            draft(&["src/a.py"]).with_parameter("complexity", serde_json::json!("moderate")),
        )
        .await
        .unwrap();
    orchestrator.advance_stage(task.id).await.unwrap();
    orchestrator.advance_stage_with(task.id, recording).await.unwrap();

    let (bundle, workspace_state, root_exists) = seen.lock().unwrap().take().unwrap();
    assert_eq!(bundle.stage, Stage::Design);
    assert_eq!(bundle.contract.inputs, vec!["requirements".to_string()]);
    assert_eq!(bundle.footprint, vec!["src/a.py".to_string()]);
    assert_eq!(bundle.history.len(), 1);
    assert_eq!(bundle.parameter("complexity"), Some(&serde_json::json!("moderate")));
    assert_eq!(workspace_state, WorkspaceState::Active);
    assert!(root_exists);
}

#[tokio::test]
async fn test_timeout_cancels_handler() {
    let temp_dir = TempDir::new().unwrap();
    let config = create_test_config(&temp_dir).with_retry(RetryConfig::default().with_max_attempts(1));
    let tokens: Arc<std::sync::Mutex<Vec<CancellationToken>>> = Arc::default();
    let sink = tokens.clone();
    let slow = handler_fn(move |invocation: StageInvocation| {
        let sink = sink.clone();
        async move {
            sink.lock().unwrap().push(invocation.deadline.token().clone());
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(StageOutput::success("too late"))
        }
    });
    let registry = StageRegistry::standard().with_contract(
        StageContract::new(Stage::Requirements)
            .with_outputs(&["requirements"])
            .with_default_timeout(Duration::from_millis(100)),
    );
    let orchestrator = create_test_orchestrator(config)
        .with_stage_registry(registry)
        .with_handlers(HandlerRegistry::new().with_handler(Stage::Requirements, slow));
    let task = orchestrator.create_task(draft(&["src/a.py"])).await.unwrap();

    let snapshot = tokio::time::timeout(Duration::from_secs(5), orchestrator.advance_stage(task.id))
        .await
        .expect("orchestrator must stop waiting at the deadline")
        .unwrap();
    assert_eq!(snapshot.stage, Stage::Requirements);
    assert_eq!(snapshot.status, TaskStatus::Blocked);
    let failure = snapshot.last_result.unwrap().failure.unwrap();
    assert_eq!(failure.kind, FailureKind::Timeout);
    assert!(failure.kind.is_execution_failure());
    assert!(tokens.lock().unwrap()[0].is_cancelled());
}

#[tokio::test]
async fn test_panicking_and_misbehaving_handlers() {
    let temp_dir = TempDir::new().unwrap();
    let config = create_test_config(&temp_dir).with_retry(RetryConfig::default().with_max_attempts(1));
    let orchestrator = create_test_orchestrator(config);
    let task = orchestrator.create_task(draft(&["src/a.py"])).await.unwrap();

    let panicking = handler_fn(|_invocation: StageInvocation| async move {
        if true {
            panic!("handler bug");
        }
        Ok(StageOutput::success("unreachable"))
    });
    let snapshot = orchestrator.advance_stage_with(task.id, panicking).await.unwrap();
    let failure = snapshot.last_result.unwrap().failure.unwrap();
    assert_eq!(failure.kind, FailureKind::HandlerPanicked);
    assert!(failure.message.contains("handler bug"));

    let skipping = handler_fn(|_invocation: StageInvocation| async move {
        Ok(StageOutput {
            outcome: Outcome::Skipped,
            summary: "nothing to do".to_string(),
            artifacts: Vec::new(),
        })
    });
    let snapshot = orchestrator.advance_stage_with(task.id, skipping).await.unwrap();
    assert_eq!(
        snapshot.last_result.unwrap().failure.unwrap().kind,
        FailureKind::ContractViolation
    );

    let reporting = handler_fn(|_invocation: StageInvocation| async move {
        Ok(StageOutput::failure("requirements are contradictory"))
    });
    let snapshot = orchestrator.advance_stage_with(task.id, reporting).await.unwrap();
    let failure = snapshot.last_result.unwrap().failure.unwrap();
    assert_eq!(failure.kind, FailureKind::HandlerReportedFailure);
    assert!(!failure.kind.is_execution_failure());
    assert_eq!(snapshot.status, TaskStatus::Blocked);
}

#[tokio::test]
async fn test_contract_enforcement() {
    let temp_dir = TempDir::new().unwrap();
    let bare = handler_fn(|_invocation: StageInvocation| async move { Ok(StageOutput::success("done")) });

    // Advisory by default
    let orchestrator = create_test_orchestrator(create_test_config(&temp_dir));
    let task = orchestrator.create_task(draft(&["src/a.py"])).await.unwrap();
    let snapshot = orchestrator.advance_stage_with(task.id, bare.clone()).await.unwrap();
    assert_eq!(snapshot.stage, Stage::Design);

    let strict_dir = TempDir::new().unwrap();
    let config = create_test_config(&strict_dir)
        .with_enforce_contracts(true)
        .with_retry(RetryConfig::default().with_max_attempts(1));
    let orchestrator = create_test_orchestrator(config);
    let task = orchestrator.create_task(draft(&["src/a.py"])).await.unwrap();
    let snapshot = orchestrator.advance_stage_with(task.id, bare).await.unwrap();
    assert_eq!(snapshot.stage, Stage::Requirements);
    assert_eq!(snapshot.status, TaskStatus::Blocked);
    let failure = snapshot.last_result.unwrap().failure.unwrap();
    assert_eq!(failure.kind, FailureKind::ContractViolation);
    assert!(failure.message.contains("requirements"));
}

#[tokio::test]
async fn test_caller_errors() {
    let temp_dir = TempDir::new().unwrap();
    let orchestrator = create_test_orchestrator(create_test_config(&temp_dir));

    assert!(matches!(
        orchestrator.advance_stage(TaskId::new()).await,
        Err(OrchestratorError::TaskNotFound(_))
    ));
    assert!(matches!(
        orchestrator.get_task(TaskId::new()).await,
        Err(OrchestratorError::TaskNotFound(_))
    ));

    let task = orchestrator.create_task(draft(&["src/a.py"])).await.unwrap();
    assert!(matches!(
        orchestrator.advance_stage(task.id).await,
        Err(OrchestratorError::NoHandler(Stage::Requirements))
    ));

    let missing_base = orchestrator
        .create_task(draft(&["lib/x.rs"]).with_base_ref("no-such-branch"))
        .await
        .unwrap();
    assert!(matches!(
        orchestrator.advance_stage_with(missing_base.id, contract_handler()).await,
        Err(OrchestratorError::BaseRefNotFound(r)) if r == "no-such-branch"
    ));

    orchestrator.advance_stage_with(task.id, contract_handler()).await.unwrap();
    assert!(matches!(
        orchestrator.set_footprint(task.id, vec!["src/z.py".to_string()]).await,
        Err(OrchestratorError::FootprintLocked(_))
    ));
}

#[tokio::test]
async fn test_concurrent_calls_for_one_task_run_in_order() {
    let temp_dir = TempDir::new().unwrap();
    let orchestrator = Arc::new(
        create_test_orchestrator(create_test_config(&temp_dir))
            .with_handlers(HandlerRegistry::new().with_fallback(contract_handler())),
    );
    let task = orchestrator.create_task(draft(&["src/a.py"])).await.unwrap();

    let a = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.advance_stage(task.id).await.map(|s| s.stage) }
    });
    let b = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.advance_stage(task.id).await.map(|s| s.stage) }
    });
    let mut stages = vec![a.await.unwrap().unwrap(), b.await.unwrap().unwrap()];
    stages.sort();
    assert_eq!(stages, vec![Stage::Design, Stage::Implementation]);

    let task = find_task(&orchestrator, task.id).await;
    for stage in [Stage::Requirements, Stage::Design] {
        let successes = task
            .history
            .iter()
            .filter(|r| r.stage == stage && r.is_live_success())
            .count();
        assert_eq!(successes, 1);
    }
}

#[tokio::test]
async fn test_different_tasks_get_separate_workspaces() {
    let temp_dir = TempDir::new().unwrap();
    let orchestrator = Arc::new(
        create_test_orchestrator(create_test_config(&temp_dir))
            .with_handlers(HandlerRegistry::new().with_fallback(contract_handler())),
    );
    let t1 = orchestrator.create_task(draft(&["src/a.py"])).await.unwrap();
    let t2 = orchestrator.create_task(draft(&["docs/guide.md"])).await.unwrap();

    let (r1, r2) = tokio::join!(
        orchestrator.advance_stage(t1.id),
        orchestrator.advance_stage(t2.id)
    );
    assert_eq!(r1.unwrap().stage, Stage::Design);
    assert_eq!(r2.unwrap().stage, Stage::Design);

    let workspaces = orchestrator.workspaces();
    let w1 = workspaces.handle(t1.id).await.unwrap();
    let w2 = workspaces.handle(t2.id).await.unwrap();
    assert_ne!(w1.root, w2.root);
    assert_ne!(w1.branch, w2.branch);

    // Edits in one checkout are invisible in the other
    std::fs::write(w1.root.join("src/a.py"), "print('changed')\n").unwrap();
    assert!(workspaces.has_uncommitted_changes(t1.id).await.unwrap());
    assert!(!workspaces.has_uncommitted_changes(t2.id).await.unwrap());
    assert_eq!(
        std::fs::read_to_string(w2.root.join("src/a.py")).unwrap(),
        "print('a')\n"
    );
}

#[tokio::test]
async fn test_open_from_config() {
    let temp_dir = TempDir::new().unwrap();
    let config = create_test_config(&temp_dir);
    let store = config.storage_dir.clone();

    let orchestrator = Orchestrator::open(config.clone()).await.unwrap();
    let task = orchestrator.create_task(draft(&["src/a.py"])).await.unwrap();
    drop(orchestrator);

    // Durable across restarts
    let reopened = Orchestrator::open(config).await.unwrap();
    let snapshot = reopened.get_task(task.id).await.unwrap();
    assert_eq!(snapshot.title, "Add login endpoint");
    assert!(store.join("tasks").exists());

    let bad = OrchestratorConfig::default().with_retry(RetryConfig::default().with_max_attempts(0));
    assert!(matches!(
        Orchestrator::open(bad).await,
        Err(OrchestratorError::Config(_))
    ));
}
