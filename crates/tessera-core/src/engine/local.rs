//! LocalEngine - プロセス内の durable execution engine
//!
//! # 構成
//! - 各 run は tokio task として実行され、Semaphore で同時実行数を制限
//! - step 結果と状態遷移は HistoryStore に記録
//! - `recover()` で未完了の run を HistoryStore から読み直して再開
//!
//! # Lease
//! run は作成（submit）か claim（recover）した engine だけが実行します。
//! 実行中は TTL の 1/3 ごとに lease を延長し、延長できなければ run を手放します。
//! engine error で止まった run は lease を解放し、次の `recover()` で再開されます。
//!
//! # 使用例
//! ```ignore
//! let engine = LocalEngineBuilder::new(history)
//!     .register_activity::<FetchAndConvert, _>(fetch_handler)?
//!     .register_workflow(ImportLayerWorkflow::new(options))?
//!     .task_queue("import_layer")
//!     .concurrency(8)
//!     .build()?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::context::{Services, WorkflowContext};
use super::retry::{Decider, DefaultDecider};
use super::workflow::{DynWorkflow, TypedWorkflow, Workflow};
use crate::activity::{Activity, ActivityRegistry, Handler, RegistryError};
use crate::domain::WorkflowState;
use crate::error::{EngineError, WorkflowError};
use crate::observability::RunCounts;
use crate::ports::{
    Clock, ExecutionSubstrate, HistoryError, HistoryStore, RunHandle, RunRecord, RunStatus,
    StepRecord, SubmitError, SubmitRequest, SystemClock,
};

pub const DEFAULT_TASK_QUEUE: &str = "import_layer";
pub const DEFAULT_CONCURRENCY: usize = 8;
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(60);

/// BuildError はエンジン構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("workflow type '{0}' is already registered")]
    DuplicateWorkflow(String),

    #[error("workflow '{workflow}' uses activity types that are not registered: {missing:?}")]
    MissingActivityTypes {
        workflow: String,
        missing: Vec<String>,
    },

    #[error("worker concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("run lease TTL must be positive")]
    ZeroLeaseTtl,
}

/// LocalEngineBuilder はエンジンを構築
///
/// # Fail-fast 設計
/// build() 時に、登録された各 workflow の `ACTIVITIES` がすべて
/// 登録済みであることを検証します。
pub struct LocalEngineBuilder {
    history: Arc<dyn HistoryStore>,
    registry: ActivityRegistry,
    workflows: HashMap<&'static str, Arc<dyn DynWorkflow>>,
    task_queue: String,
    concurrency: usize,
    decider: Arc<dyn Decider>,
    clock: Arc<dyn Clock>,
    owner: Option<String>,
    lease_ttl: Duration,
}

impl LocalEngineBuilder {
    pub fn new(history: Arc<dyn HistoryStore>) -> Self {
        Self {
            history,
            registry: ActivityRegistry::new(),
            workflows: HashMap::new(),
            task_queue: DEFAULT_TASK_QUEUE.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            decider: Arc::new(DefaultDecider),
            clock: Arc::new(SystemClock),
            owner: None,
            lease_ttl: DEFAULT_LEASE_TTL,
        }
    }

    pub fn register_activity<A: Activity, H: Handler<A> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, BuildError> {
        self.registry.register::<A, H>(handler)?;
        Ok(self)
    }

    pub fn register_workflow<W: Workflow>(mut self, workflow: W) -> Result<Self, BuildError> {
        if self.workflows.contains_key(W::TYPE) {
            return Err(BuildError::DuplicateWorkflow(W::TYPE.to_string()));
        }
        self.workflows
            .insert(W::TYPE, Arc::new(TypedWorkflow::new(workflow)));
        Ok(self)
    }

    pub fn task_queue(mut self, name: impl Into<String>) -> Self {
        self.task_queue = name.into();
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n;
        self
    }

    pub fn decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = decider;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Lease owner name; unique per process unless set.
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    pub fn build(self) -> Result<LocalEngine, BuildError> {
        if self.concurrency == 0 {
            return Err(BuildError::ZeroConcurrency);
        }
        if self.lease_ttl.is_zero() {
            return Err(BuildError::ZeroLeaseTtl);
        }
        let registered = self.registry.registered_types();
        let mut names: Vec<&&'static str> = self.workflows.keys().collect();
        names.sort();
        for name in names {
            let workflow = &self.workflows[*name];
            let missing: Vec<String> = workflow
                .activity_types()
                .iter()
                .filter(|t| !registered.iter().any(|r| r.as_str() == **t))
                .map(|t| t.to_string())
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingActivityTypes {
                    workflow: name.to_string(),
                    missing,
                });
            }
        }

        Ok(LocalEngine {
            inner: Arc::new(Inner {
                services: Services {
                    history: self.history,
                    registry: Arc::new(self.registry),
                    decider: self.decider,
                    clock: self.clock,
                },
                workflows: self.workflows,
                task_queue: self.task_queue,
                permits: Arc::new(Semaphore::new(self.concurrency)),
                runs: Mutex::new(HashMap::new()),
                tracker: TaskTracker::new(),
                owner: self
                    .owner
                    .unwrap_or_else(|| format!("engine-{}-{}", std::process::id(), ulid::Ulid::new())),
                lease_ttl: self.lease_ttl,
            }),
        })
    }
}

struct RunEntry {
    state: watch::Receiver<WorkflowState>,
    status: watch::Receiver<RunStatus>,
    cancel: CancellationToken,
}

impl RunEntry {
    /// Still executing in this engine.
    fn is_live(&self) -> bool {
        !self.status.borrow().is_finished()
    }
}

struct Inner {
    services: Services,
    workflows: HashMap<&'static str, Arc<dyn DynWorkflow>>,
    task_queue: String,
    permits: Arc<Semaphore>,
    runs: Mutex<HashMap<String, RunEntry>>,
    tracker: TaskTracker,
    owner: String,
    lease_ttl: Duration,
}

impl Inner {
    /// Keep renewing the lease on `run_id`; returns only once it is lost.
    async fn hold_lease(&self, run_id: &str) {
        let every = (self.lease_ttl / 3).max(Duration::from_millis(1));
        loop {
            tokio::time::sleep(every).await;
            match self
                .services
                .history
                .renew_lease(run_id, &self.owner, self.lease_ttl)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    tracing::error!(run_id, owner = %self.owner, "lease lost, abandoning run");
                    return;
                }
                Err(e) => tracing::warn!(run_id, error = %e, "failed to renew lease"),
            }
        }
    }
}

/// Cheap to clone; clones share the same runs and worker pool.
#[derive(Clone)]
pub struct LocalEngine {
    inner: Arc<Inner>,
}

impl LocalEngine {
    pub fn task_queue(&self) -> &str {
        &self.inner.task_queue
    }

    /// Name this engine holds run leases under.
    pub fn owner(&self) -> &str {
        &self.inner.owner
    }

    /// Current state of a run started by this engine.
    pub async fn run_state(&self, run_id: &str) -> Option<WorkflowState> {
        let runs = self.inner.runs.lock().await;
        runs.get(run_id).map(|e| *e.state.borrow())
    }

    /// Request cancellation of a run.
    ///
    /// Only honoured while the run is importing or registering; the in-flight
    /// activity is dropped and the workflow takes its failure branch.
    pub async fn cancel(&self, run_id: &str) -> Result<(), EngineError> {
        let runs = self.inner.runs.lock().await;
        let entry = runs
            .get(run_id)
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
        let state = *entry.state.borrow();
        if entry.status.borrow().is_finished() || !state.is_cancellable() {
            return Err(EngineError::NotCancellable {
                run_id: run_id.to_string(),
                state,
            });
        }
        tracing::info!(run_id, %state, "cancellation requested");
        entry.cancel.cancel();
        Ok(())
    }

    /// Resume every unfinished run of this task queue found in history.
    ///
    /// Only runs whose lease this engine can claim are resumed; runs another
    /// engine is still executing are left alone. Steps already recorded are
    /// replayed from history and execution continues at the first step
    /// without a recorded result. Safe to call repeatedly.
    pub async fn recover(&self) -> Result<Vec<RunHandle>, EngineError> {
        let inner = &self.inner;
        let history = &inner.services.history;
        let mut handles = Vec::new();
        if inner.tracker.is_closed() {
            return Ok(handles);
        }
        for run in history.unfinished_runs().await? {
            if run.task_queue != inner.task_queue {
                continue;
            }
            let Some(workflow) = inner.workflows.get(run.workflow_type.as_str()).cloned() else {
                tracing::warn!(
                    run_id = %run.run_id,
                    workflow_type = %run.workflow_type,
                    "skipping run of unregistered workflow type"
                );
                continue;
            };

            let mut runs = inner.runs.lock().await;
            if runs.get(&run.run_id).is_some_and(RunEntry::is_live) {
                continue;
            }
            if !history
                .claim_run(&run.run_id, &inner.owner, inner.lease_ttl)
                .await?
            {
                tracing::debug!(run_id = %run.run_id, "run is leased by another engine");
                continue;
            }
            let steps = match history.load_steps(&run.run_id).await {
                Ok(steps) => steps,
                Err(e) => {
                    if let Err(release) = history.release_run(&run.run_id, &inner.owner).await {
                        tracing::warn!(run_id = %run.run_id, error = %release, "failed to release lease");
                    }
                    return Err(e.into());
                }
            };
            tracing::info!(
                run_id = %run.run_id,
                state = %run.state,
                recorded_steps = steps.len(),
                "resuming workflow run"
            );
            handles.push(self.spawn_run(&mut runs, run, workflow, steps));
        }
        Ok(handles)
    }

    pub async fn counts(&self) -> RunCounts {
        let runs = self.inner.runs.lock().await;
        let mut counts = RunCounts::default();
        for entry in runs.values() {
            match &*entry.status.borrow() {
                RunStatus::Running => counts.running += 1,
                RunStatus::Completed => counts.completed += 1,
                RunStatus::Failed(_) => counts.failed += 1,
            }
        }
        counts
    }

    /// Stop accepting runs and wait for the ones already accepted.
    pub async fn shutdown(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }

    fn spawn_run(
        &self,
        runs: &mut HashMap<String, RunEntry>,
        run: RunRecord,
        workflow: Arc<dyn DynWorkflow>,
        recorded: Vec<StepRecord>,
    ) -> RunHandle {
        let (state_tx, state_rx) = watch::channel(WorkflowState::Started);
        let (status_tx, status_rx) = watch::channel(RunStatus::Running);
        let cancel = CancellationToken::new();
        runs.insert(
            run.run_id.clone(),
            RunEntry {
                state: state_rx,
                status: status_rx.clone(),
                cancel: cancel.clone(),
            },
        );

        let inner = Arc::clone(&self.inner);
        let handle_id = run.run_id.clone();
        self.inner.tracker.spawn(async move {
            let RunRecord { run_id, input, .. } = run;
            let history = Arc::clone(&inner.services.history);
            let execution = async {
                let Ok(_permit) = Arc::clone(&inner.permits).acquire_owned().await else {
                    return None;
                };
                let mut ctx = WorkflowContext::new(
                    run_id.clone(),
                    inner.services.clone(),
                    state_tx,
                    cancel,
                    recorded,
                );
                Some(workflow.run_dyn(&mut ctx, input).await)
            };

            // losing the lease drops the workflow future and whatever activity it runs
            let result = tokio::select! {
                result = execution => result,
                () = inner.hold_lease(&run_id) => {
                    status_tx.send_replace(RunStatus::Failed(format!("lease on run '{run_id}' lost")));
                    return;
                }
            };
            let Some(result) = result else {
                return;
            };

            let status = match result {
                Ok(()) => RunStatus::Completed,
                Err(WorkflowError::Engine(e)) => {
                    // left unfinished in history so that recover() picks it up again
                    tracing::error!(run_id = %run_id, error = %e, "workflow run aborted by engine error");
                    if let Err(e) = history.release_run(&run_id, &inner.owner).await {
                        tracing::warn!(run_id = %run_id, error = %e, "failed to release lease");
                    }
                    status_tx.send_replace(RunStatus::Failed(e.to_string()));
                    return;
                }
                Err(e) => RunStatus::Failed(e.to_string()),
            };
            if let Err(e) = history.finish_run(&run_id, &status).await {
                tracing::error!(run_id = %run_id, error = %e, "failed to record run status");
            }
            tracing::info!(run_id = %run_id, ?status, "workflow run finished");
            status_tx.send_replace(status);
        });

        RunHandle::new(handle_id, status_rx)
    }
}

#[async_trait]
impl ExecutionSubstrate for LocalEngine {
    async fn submit_workflow(&self, request: SubmitRequest) -> Result<RunHandle, SubmitError> {
        if self.inner.tracker.is_closed() {
            return Err(SubmitError::ShuttingDown);
        }
        if request.task_queue != self.inner.task_queue {
            return Err(SubmitError::UnknownTaskQueue(request.task_queue));
        }
        let Some(workflow) = self
            .inner
            .workflows
            .get(request.workflow_type.as_str())
            .cloned()
        else {
            return Err(SubmitError::UnknownWorkflow(request.workflow_type));
        };

        let mut runs = self.inner.runs.lock().await;
        if runs.contains_key(&request.run_id) {
            return Err(SubmitError::AlreadyStarted(request.run_id));
        }
        let run = RunRecord {
            run_id: request.run_id,
            workflow_type: request.workflow_type,
            task_queue: request.task_queue,
            input: request.input,
            state: WorkflowState::Started,
            status: RunStatus::Running,
            created_at: self.inner.services.clock.now(),
        };
        let created = self
            .inner
            .services
            .history
            .create_run(&run, &self.inner.owner, self.inner.lease_ttl)
            .await;
        match created {
            Ok(()) => {}
            Err(HistoryError::AlreadyExists(id)) => return Err(SubmitError::AlreadyStarted(id)),
            Err(e) => return Err(SubmitError::History(e.to_string())),
        }
        tracing::info!(run_id = %run.run_id, workflow_type = %run.workflow_type, "workflow run submitted");
        Ok(self.spawn_run(&mut runs, run, workflow, Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ActivityError, StepFailureKind};
    use crate::engine::retry::{ActivityOptions, RetryPolicy};
    use crate::impls::InMemoryHistoryStore;
    use crate::ports::StepResult;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

    #[derive(Debug, Serialize, Deserialize)]
    struct Bump {
        key: String,
    }

    impl Activity for Bump {
        const TYPE: &'static str = "test.bump.v1";
        type Output = u32;
    }

    #[derive(Default)]
    struct BumpTally {
        calls: AtomicU32,
        running: AtomicUsize,
        max_running: AtomicUsize,
        started: tokio::sync::Notify,
    }

    struct BumpHandler {
        tally: Arc<BumpTally>,
        failures: AtomicU32,
        fatal: bool,
        delay: Duration,
    }

    impl BumpHandler {
        fn new(tally: Arc<BumpTally>) -> Self {
            Self {
                tally,
                failures: AtomicU32::new(0),
                fatal: false,
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl Handler<Bump> for BumpHandler {
        async fn handle(&self, _input: Bump) -> Result<u32, ActivityError> {
            let n = self.tally.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let now = self.tally.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.tally.max_running.fetch_max(now, Ordering::SeqCst);
            self.tally.started.notify_one();
            tokio::time::sleep(self.delay).await;
            self.tally.running.fetch_sub(1, Ordering::SeqCst);

            if self.fatal {
                return Err(ActivityError::fatal("bad input"));
            }
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| f.checked_sub(1))
                .is_ok()
            {
                return Err(ActivityError::retryable("blip"));
            }
            Ok(n)
        }
    }

    struct Walk {
        options: ActivityOptions,
    }

    #[async_trait]
    impl Workflow for Walk {
        const TYPE: &'static str = "test.walk";
        const ACTIVITIES: &'static [&'static str] = &[Bump::TYPE];
        type Input = String;

        async fn run(&self, ctx: &mut WorkflowContext, key: String) -> Result<(), WorkflowError> {
            ctx.transition(WorkflowState::Processing).await?;
            ctx.transition(WorkflowState::Importing).await?;
            ctx.execute(Bump { key: key.clone() }, &self.options).await?;
            ctx.transition(WorkflowState::Registering).await?;
            ctx.execute(Bump { key }, &self.options).await?;
            ctx.transition(WorkflowState::Completed).await?;
            Ok(())
        }
    }

    fn fast_options(maximum_attempts: u32) -> ActivityOptions {
        ActivityOptions {
            retry: RetryPolicy {
                initial_interval: Duration::from_millis(1),
                backoff_coefficient: 2.0,
                maximum_interval: Duration::from_millis(5),
                maximum_attempts,
            },
            start_to_close_timeout: Duration::from_secs(5),
        }
    }

    fn builder(
        history: Arc<dyn HistoryStore>,
        handler: BumpHandler,
        options: ActivityOptions,
    ) -> LocalEngineBuilder {
        LocalEngineBuilder::new(history)
            .register_activity::<Bump, _>(handler)
            .unwrap()
            .register_workflow(Walk { options })
            .unwrap()
            .task_queue("test")
    }

    fn engine(
        history: Arc<InMemoryHistoryStore>,
        handler: BumpHandler,
        options: ActivityOptions,
    ) -> LocalEngine {
        builder(history, handler, options).build().unwrap()
    }

    fn walk_run(run_id: &str) -> RunRecord {
        RunRecord {
            run_id: run_id.into(),
            workflow_type: Walk::TYPE.into(),
            task_queue: "test".into(),
            input: json!("k"),
            state: WorkflowState::Importing,
            status: RunStatus::Running,
            created_at: chrono::Utc::now(),
        }
    }

    fn request(run_id: &str) -> SubmitRequest {
        SubmitRequest {
            workflow_type: Walk::TYPE.to_string(),
            task_queue: "test".to_string(),
            run_id: run_id.to_string(),
            input: json!("k"),
        }
    }

    #[tokio::test]
    async fn run_completes_and_records_steps() {
        let history = Arc::new(InMemoryHistoryStore::new());
        let tally = Arc::new(BumpTally::default());
        let engine = engine(history.clone(), BumpHandler::new(tally.clone()), fast_options(3));

        let handle = engine.submit_workflow(request("r1")).await.unwrap();
        assert_eq!(handle.wait().await, RunStatus::Completed);

        let steps = history.load_steps("r1").await.unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].result, StepResult::Completed(json!(1)));
        assert_eq!(steps[1].result, StepResult::Completed(json!(2)));
        assert_eq!(
            history.get_run("r1").await.unwrap().unwrap().state,
            WorkflowState::Completed
        );
        assert_eq!(engine.counts().await.completed, 1);
    }

    #[tokio::test]
    async fn submit_rejects_unknown_queue_workflow_and_duplicates() {
        let history = Arc::new(InMemoryHistoryStore::new());
        let tally = Arc::new(BumpTally::default());
        let engine = engine(history, BumpHandler::new(tally), fast_options(3));

        let mut wrong_queue = request("a");
        wrong_queue.task_queue = "elsewhere".into();
        assert_eq!(
            engine.submit_workflow(wrong_queue).await.unwrap_err(),
            SubmitError::UnknownTaskQueue("elsewhere".into())
        );

        let mut wrong_type = request("a");
        wrong_type.workflow_type = "Nope".into();
        assert_eq!(
            engine.submit_workflow(wrong_type).await.unwrap_err(),
            SubmitError::UnknownWorkflow("Nope".into())
        );

        let first = engine.submit_workflow(request("a")).await.unwrap();
        assert_eq!(
            engine.submit_workflow(request("a")).await.unwrap_err(),
            SubmitError::AlreadyStarted("a".into())
        );
        first.wait().await;
    }

    #[tokio::test]
    async fn attempts_are_bounded_by_policy() {
        let history = Arc::new(InMemoryHistoryStore::new());
        let tally = Arc::new(BumpTally::default());
        let mut handler = BumpHandler::new(tally.clone());
        handler.failures = AtomicU32::new(u32::MAX);
        let engine = engine(history.clone(), handler, fast_options(4));

        let status = engine.submit_workflow(request("r")).await.unwrap().wait().await;
        assert!(matches!(status, RunStatus::Failed(_)));
        assert_eq!(tally.calls.load(Ordering::SeqCst), 4);

        let steps = history.load_steps("r").await.unwrap();
        let StepResult::Failed(failure) = &steps[0].result else {
            panic!("expected failed step");
        };
        assert_eq!(failure.kind, StepFailureKind::Exhausted);
        assert_eq!(failure.attempts, 4);
        assert_eq!(steps[0].attempts.len(), 4);
        let decisions: Vec<&str> = steps[0].decisions.iter().map(|d| d.decision.as_str()).collect();
        assert_eq!(
            decisions,
            vec!["schedule_retry", "schedule_retry", "schedule_retry", "give_up"]
        );
        assert!(steps[0].decisions.iter().all(|d| d.policy == "retry_policy"));
    }

    #[tokio::test]
    async fn transient_failures_within_budget_succeed() {
        let history = Arc::new(InMemoryHistoryStore::new());
        let tally = Arc::new(BumpTally::default());
        let mut handler = BumpHandler::new(tally.clone());
        handler.failures = AtomicU32::new(2);
        let engine = engine(history.clone(), handler, fast_options(3));

        let status = engine.submit_workflow(request("r")).await.unwrap().wait().await;
        assert_eq!(status, RunStatus::Completed);
        let steps = history.load_steps("r").await.unwrap();
        assert_eq!(steps[0].attempts.len(), 3);
        assert!(steps[0].attempts[2].error.is_none());
    }

    #[tokio::test]
    async fn fatal_error_is_not_retried() {
        let history = Arc::new(InMemoryHistoryStore::new());
        let tally = Arc::new(BumpTally::default());
        let mut handler = BumpHandler::new(tally.clone());
        handler.fatal = true;
        let engine = engine(history.clone(), handler, fast_options(3));

        let status = engine.submit_workflow(request("r")).await.unwrap().wait().await;
        assert!(matches!(status, RunStatus::Failed(reason) if reason.contains("bad input")));
        assert_eq!(tally.calls.load(Ordering::SeqCst), 1);
        let steps = history.load_steps("r").await.unwrap();
        assert!(matches!(
            &steps[0].result,
            StepResult::Failed(f) if f.kind == StepFailureKind::Fatal
        ));
    }

    #[tokio::test]
    async fn slow_attempts_time_out() {
        let history = Arc::new(InMemoryHistoryStore::new());
        let tally = Arc::new(BumpTally::default());
        let mut handler = BumpHandler::new(tally.clone());
        handler.delay = Duration::from_secs(5);
        let mut options = fast_options(2);
        options.start_to_close_timeout = Duration::from_millis(10);
        let engine = engine(history.clone(), handler, options);

        let status = engine.submit_workflow(request("r")).await.unwrap().wait().await;
        assert!(matches!(status, RunStatus::Failed(_)));
        assert_eq!(tally.calls.load(Ordering::SeqCst), 2);
        let steps = history.load_steps("r").await.unwrap();
        assert!(matches!(
            &steps[0].result,
            StepResult::Failed(f) if f.kind == StepFailureKind::TimedOut
        ));
    }

    #[tokio::test]
    async fn recover_replays_recorded_steps() {
        let history = Arc::new(InMemoryHistoryStore::new());
        history
            .create_run(&walk_run("crashed"), "crashed-worker", Duration::ZERO)
            .await
            .unwrap();
        history
            .record_step(
                "crashed",
                &StepRecord {
                    seq: 1,
                    activity: Bump::TYPE.into(),
                    result: StepResult::Completed(json!(41)),
                    attempts: vec![],
                    decisions: vec![],
                },
            )
            .await
            .unwrap();

        let tally = Arc::new(BumpTally::default());
        let engine = engine(history.clone(), BumpHandler::new(tally.clone()), fast_options(3));
        let handles = engine.recover().await.unwrap();
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].run_id(), "crashed");
        let handle = handles.into_iter().next().unwrap();
        assert_eq!(handle.wait().await, RunStatus::Completed);

        // only the second step ran
        assert_eq!(tally.calls.load(Ordering::SeqCst), 1);
        assert!(history.unfinished_runs().await.unwrap().is_empty());
        assert!(engine.recover().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replay_mismatch_is_an_engine_error() {
        let history = Arc::new(InMemoryHistoryStore::new());
        history
            .create_run(&walk_run("odd"), "crashed-worker", Duration::ZERO)
            .await
            .unwrap();
        history
            .record_step(
                "odd",
                &StepRecord {
                    seq: 1,
                    activity: "test.other.v1".into(),
                    result: StepResult::Completed(json!(null)),
                    attempts: vec![],
                    decisions: vec![],
                },
            )
            .await
            .unwrap();

        let tally = Arc::new(BumpTally::default());
        let engine = engine(history.clone(), BumpHandler::new(tally), fast_options(3));
        let handle = engine.recover().await.unwrap().pop().unwrap();
        assert!(matches!(handle.wait().await, RunStatus::Failed(reason) if reason.contains("diverged")));
        // still resumable once the workflow is fixed
        assert_eq!(history.unfinished_runs().await.unwrap().len(), 1);
        assert_eq!(history.owner("odd").await, None);
    }

    #[tokio::test]
    async fn second_engine_leaves_running_run_alone() {
        let history = Arc::new(InMemoryHistoryStore::new());
        let tally_a = Arc::new(BumpTally::default());
        let mut handler_a = BumpHandler::new(tally_a.clone());
        handler_a.delay = Duration::from_millis(200);
        let a = builder(history.clone(), handler_a, fast_options(1))
            .owner("a")
            .build()
            .unwrap();
        let tally_b = Arc::new(BumpTally::default());
        let b = builder(history.clone(), BumpHandler::new(tally_b.clone()), fast_options(1))
            .owner("b")
            .build()
            .unwrap();

        let handle = a.submit_workflow(request("r")).await.unwrap();
        tally_a.started.notified().await;
        assert_eq!(history.owner("r").await.as_deref(), Some("a"));
        assert!(b.recover().await.unwrap().is_empty());
        assert!(a.recover().await.unwrap().is_empty());

        assert_eq!(handle.wait().await, RunStatus::Completed);
        assert!(b.recover().await.unwrap().is_empty());
        assert_eq!(tally_a.calls.load(Ordering::SeqCst), 2);
        assert_eq!(tally_b.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn recover_waits_for_foreign_lease_to_expire() {
        let history = Arc::new(InMemoryHistoryStore::new());
        history
            .create_run(&walk_run("r"), "elsewhere", Duration::from_secs(60))
            .await
            .unwrap();

        let tally = Arc::new(BumpTally::default());
        let engine = builder(history.clone(), BumpHandler::new(tally.clone()), fast_options(1))
            .owner("here")
            .build()
            .unwrap();
        assert!(engine.recover().await.unwrap().is_empty());
        assert_eq!(tally.calls.load(Ordering::SeqCst), 0);

        history.expire_lease("r").await;
        let handle = engine.recover().await.unwrap().pop().unwrap();
        assert_eq!(history.owner("r").await.as_deref(), Some("here"));
        assert_eq!(handle.wait().await, RunStatus::Completed);
        assert_eq!(history.owner("r").await, None);
    }

    #[tokio::test]
    async fn lost_lease_abandons_run() {
        let history = Arc::new(InMemoryHistoryStore::new());
        let tally = Arc::new(BumpTally::default());
        let mut handler = BumpHandler::new(tally.clone());
        handler.delay = Duration::from_secs(30);
        let engine = builder(history.clone(), handler, fast_options(1))
            .owner("slow")
            .lease_ttl(Duration::from_millis(30))
            .build()
            .unwrap();

        let handle = engine.submit_workflow(request("r")).await.unwrap();
        tally.started.notified().await;
        history.expire_lease("r").await;
        assert!(
            history
                .claim_run("r", "other", Duration::from_secs(60))
                .await
                .unwrap()
        );

        assert!(matches!(handle.wait().await, RunStatus::Failed(reason) if reason.contains("lease")));
        // the new owner finishes it, not us
        assert_eq!(history.unfinished_runs().await.unwrap().len(), 1);
        assert_eq!(history.owner("r").await.as_deref(), Some("other"));
        assert!(history.load_steps("r").await.unwrap().is_empty());
    }

    /// Fails the first `record_step` call, then behaves like the wrapped store.
    struct FlakyHistory {
        inner: InMemoryHistoryStore,
        fail_next_step: AtomicBool,
    }

    #[async_trait]
    impl HistoryStore for FlakyHistory {
        async fn create_run(
            &self,
            run: &RunRecord,
            owner: &str,
            ttl: Duration,
        ) -> Result<(), HistoryError> {
            self.inner.create_run(run, owner, ttl).await
        }

        async fn claim_run(&self, run_id: &str, owner: &str, ttl: Duration) -> Result<bool, HistoryError> {
            self.inner.claim_run(run_id, owner, ttl).await
        }

        async fn renew_lease(&self, run_id: &str, owner: &str, ttl: Duration) -> Result<bool, HistoryError> {
            self.inner.renew_lease(run_id, owner, ttl).await
        }

        async fn release_run(&self, run_id: &str, owner: &str) -> Result<(), HistoryError> {
            self.inner.release_run(run_id, owner).await
        }

        async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, HistoryError> {
            self.inner.get_run(run_id).await
        }

        async fn record_state(&self, run_id: &str, state: WorkflowState) -> Result<(), HistoryError> {
            self.inner.record_state(run_id, state).await
        }

        async fn record_step(&self, run_id: &str, step: &StepRecord) -> Result<(), HistoryError> {
            if self.fail_next_step.swap(false, Ordering::SeqCst) {
                return Err(HistoryError::Backend("connection reset".into()));
            }
            self.inner.record_step(run_id, step).await
        }

        async fn load_steps(&self, run_id: &str) -> Result<Vec<StepRecord>, HistoryError> {
            self.inner.load_steps(run_id).await
        }

        async fn finish_run(&self, run_id: &str, status: &RunStatus) -> Result<(), HistoryError> {
            self.inner.finish_run(run_id, status).await
        }

        async fn unfinished_runs(&self) -> Result<Vec<RunRecord>, HistoryError> {
            self.inner.unfinished_runs().await
        }
    }

    #[tokio::test]
    async fn run_stopped_by_history_error_is_resumed_by_next_recover() {
        let history = Arc::new(FlakyHistory {
            inner: InMemoryHistoryStore::new(),
            fail_next_step: AtomicBool::new(true),
        });
        let tally = Arc::new(BumpTally::default());
        let engine = builder(history.clone(), BumpHandler::new(tally.clone()), fast_options(1))
            .build()
            .unwrap();

        let status = engine.submit_workflow(request("r")).await.unwrap().wait().await;
        assert!(matches!(status, RunStatus::Failed(reason) if reason.contains("connection reset")));
        assert_eq!(history.unfinished_runs().await.unwrap().len(), 1);
        assert_eq!(history.inner.owner("r").await, None);

        let handles = engine.recover().await.unwrap();
        assert_eq!(handles.len(), 1);
        let handle = handles.into_iter().next().unwrap();
        assert_eq!(handle.wait().await, RunStatus::Completed);
        // the unrecorded first step ran again
        assert_eq!(tally.calls.load(Ordering::SeqCst), 3);
        assert!(history.unfinished_runs().await.unwrap().is_empty());
        assert!(engine.recover().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_is_honoured_only_in_cancellable_states() {
        let history = Arc::new(InMemoryHistoryStore::new());
        let tally = Arc::new(BumpTally::default());
        let mut handler = BumpHandler::new(tally.clone());
        handler.delay = Duration::from_secs(30);
        let engine = engine(history.clone(), handler, fast_options(3));

        assert!(matches!(
            engine.cancel("missing").await,
            Err(EngineError::RunNotFound(_))
        ));

        let handle = engine.submit_workflow(request("r")).await.unwrap();
        tally.started.notified().await;
        assert_eq!(engine.run_state("r").await, Some(WorkflowState::Importing));
        engine.cancel("r").await.unwrap();

        let status = handle.wait().await;
        assert!(matches!(status, RunStatus::Failed(reason) if reason.contains("cancelled")));
        let steps = history.load_steps("r").await.unwrap();
        assert!(matches!(&steps[0].result, StepResult::Failed(f) if f.is_cancelled()));

        assert!(matches!(
            engine.cancel("r").await,
            Err(EngineError::NotCancellable { .. })
        ));
    }

    #[tokio::test]
    async fn pool_bounds_concurrent_runs() {
        let history = Arc::new(InMemoryHistoryStore::new());
        let tally = Arc::new(BumpTally::default());
        let mut handler = BumpHandler::new(tally.clone());
        handler.delay = Duration::from_millis(20);
        let engine = LocalEngineBuilder::new(history)
            .register_activity::<Bump, _>(handler)
            .unwrap()
            .register_workflow(Walk {
                options: fast_options(1),
            })
            .unwrap()
            .task_queue("test")
            .concurrency(1)
            .build()
            .unwrap();

        let a = engine.submit_workflow(request("a")).await.unwrap();
        let b = engine.submit_workflow(request("b")).await.unwrap();
        assert_eq!(a.wait().await, RunStatus::Completed);
        assert_eq!(b.wait().await, RunStatus::Completed);
        assert_eq!(tally.max_running.load(Ordering::SeqCst), 1);
        assert_eq!(tally.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn shutdown_rejects_new_runs() {
        let history = Arc::new(InMemoryHistoryStore::new());
        let tally = Arc::new(BumpTally::default());
        let engine = engine(history, BumpHandler::new(tally), fast_options(1));
        let handle = engine.submit_workflow(request("a")).await.unwrap();
        engine.shutdown().await;
        assert!(handle.status().is_finished());
        assert_eq!(
            engine.submit_workflow(request("b")).await.unwrap_err(),
            SubmitError::ShuttingDown
        );
    }

    #[test]
    fn build_fails_on_missing_activity_types() {
        let result = LocalEngineBuilder::new(Arc::new(InMemoryHistoryStore::new()))
            .register_workflow(Walk {
                options: fast_options(1),
            })
            .unwrap()
            .build();
        assert!(matches!(
            result,
            Err(BuildError::MissingActivityTypes { missing, .. }) if missing == vec![Bump::TYPE.to_string()]
        ));
    }

    #[test]
    fn build_rejects_zero_concurrency() {
        let result = LocalEngineBuilder::new(Arc::new(InMemoryHistoryStore::new()))
            .concurrency(0)
            .build();
        assert!(matches!(result, Err(BuildError::ZeroConcurrency)));
    }

    #[test]
    fn build_rejects_zero_lease_ttl() {
        let result = LocalEngineBuilder::new(Arc::new(InMemoryHistoryStore::new()))
            .lease_ttl(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(BuildError::ZeroLeaseTtl)));
    }

    #[test]
    fn default_owners_are_unique() {
        let history = Arc::new(InMemoryHistoryStore::new());
        let a = LocalEngineBuilder::new(history.clone()).build().unwrap();
        let b = LocalEngineBuilder::new(history).build().unwrap();
        assert_ne!(a.owner(), b.owner());
    }
}
