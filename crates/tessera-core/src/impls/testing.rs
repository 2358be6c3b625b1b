//! Test doubles shared by the unit tests of this crate.

use async_trait::async_trait;
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{
    FsStyleStorage, InMemoryArchiveFetcher, InMemoryHistoryStore, InMemoryJobStore,
    InMemoryLayerStore,
};
use crate::activity::{
    CompensateDropTable, CompensateRemoveStyle, ConverterSettings, DropTableHandler,
    FetchAndConvert, FetchAndConvertHandler, Notify, NotifyHandler, RegisterLayer,
    RegisterLayerHandler, RemoveStyleHandler, UpdateJobStatus, UpdateJobStatusHandler,
};
use crate::domain::{DbId, GeometryType, ImportEvent, Job, JobOutcome, JobToken};
use crate::engine::{
    ActivityOptions, DEFAULT_TASK_QUEUE, LocalEngine, LocalEngineBuilder, RetryPolicy, Workflow,
};
use crate::ports::{
    ConvertError, ConvertRequest, ExecutionSubstrate, GeodataConverter, JobStore, JobStoreError,
    Notification, Notifier, NotifyError, RunHandle, RunStatus, SubmitRequest, SystemClock,
    UlidGenerator,
};
use crate::scheduler::Scheduler;
use crate::workflow::{ImportLayerWorkflow, WorkflowOptions};

/// Build a zip archive in memory from `(path, contents)` pairs.
pub fn zip_archive(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, contents) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(contents.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Converter that fails a fixed number of times, then succeeds.
///
/// On success it registers the target table in `tables`, if given, the way
/// the real converter leaves a table behind in the database.
pub struct ScriptedConverter {
    remaining_failures: AtomicU32,
    delay: Option<Duration>,
    tables: Option<Arc<InMemoryLayerStore>>,
    requests: Mutex<Vec<ConvertRequest>>,
}

impl ScriptedConverter {
    pub fn succeeding() -> Self {
        Self::failing_times(0)
    }

    pub fn failing_times(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
            delay: None,
            tables: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn always_failing() -> Self {
        Self::failing_times(u32::MAX)
    }

    pub fn creating_tables_in(mut self, store: Arc<InMemoryLayerStore>) -> Self {
        self.tables = Some(store);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<ConvertRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl GeodataConverter for ScriptedConverter {
    async fn convert(&self, request: &ConvertRequest) -> Result<(), ConvertError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let failed = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(ConvertError::Failed {
                exit_code: Some(1),
                output: "ERROR 1: scripted failure".to_string(),
            });
        }
        if let Some(tables) = &self.tables {
            tables.create_table(&request.table).await;
        }
        Ok(())
    }
}

/// Notifier that keeps every notification.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: tokio::sync::Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().await.push(notification.clone());
        Ok(())
    }
}

/// Notifier whose every call fails.
pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn notify(&self, _notification: &Notification) -> Result<(), NotifyError> {
        Err(NotifyError("notification sink unavailable".to_string()))
    }
}

/// Job store that cannot create jobs.
pub struct FailingJobStore;

#[async_trait]
impl JobStore for FailingJobStore {
    async fn add_job(&self, _token: JobToken, _outcome: JobOutcome) -> Result<DbId, JobStoreError> {
        Err(JobStoreError::Backend("connection refused".to_string()))
    }

    async fn get_job_by_token(&self, token: JobToken) -> Result<Job, JobStoreError> {
        Err(JobStoreError::NotFound(token))
    }

    async fn update_job(&self, token: JobToken, _outcome: JobOutcome) -> Result<bool, JobStoreError> {
        Err(JobStoreError::NotFound(token))
    }
}

/// Millisecond backoff so that retry tests stay fast.
pub fn fast_options(maximum_attempts: u32) -> ActivityOptions {
    ActivityOptions {
        retry: RetryPolicy {
            initial_interval: Duration::from_millis(1),
            backoff_coefficient: 2.0,
            maximum_interval: Duration::from_millis(5),
            maximum_attempts,
        },
        start_to_close_timeout: Duration::from_secs(10),
    }
}

/// The whole import pipeline on in-memory stores: engine, workflow,
/// scheduler and every activity handler.
pub struct Pipeline {
    pub jobs: Arc<InMemoryJobStore>,
    pub layers: Arc<InMemoryLayerStore>,
    pub history: Arc<InMemoryHistoryStore>,
    pub archives: Arc<InMemoryArchiveFetcher>,
    pub converter: Arc<ScriptedConverter>,
    pub notifier: Arc<RecordingNotifier>,
    pub ids: Arc<UlidGenerator<SystemClock>>,
    pub engine: LocalEngine,
    pub scheduler: Scheduler,
    workspace: tempfile::TempDir,
    styles: tempfile::TempDir,
}

pub struct PipelineBuilder {
    converter: ScriptedConverter,
    notifier: Option<Arc<dyn Notifier>>,
    options: WorkflowOptions,
}

impl PipelineBuilder {
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn options(mut self, options: WorkflowOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Pipeline {
        let jobs = Arc::new(InMemoryJobStore::new());
        let layers = Arc::new(InMemoryLayerStore::new());
        let history = Arc::new(InMemoryHistoryStore::new());
        let archives = Arc::new(InMemoryArchiveFetcher::new());
        let converter = Arc::new(self.converter.creating_tables_in(layers.clone()));
        let recording = Arc::new(RecordingNotifier::new());
        let notifier: Arc<dyn Notifier> = match self.notifier {
            Some(n) => n,
            None => recording.clone() as Arc<dyn Notifier>,
        };
        let ids = Arc::new(UlidGenerator::new(SystemClock));
        let workspace = tempfile::tempdir().unwrap();
        let styles = tempfile::tempdir().unwrap();
        let style_storage = Arc::new(FsStyleStorage::new(styles.path()));

        let fetch = FetchAndConvertHandler::new(
            archives.clone(),
            converter.clone(),
            style_storage.clone(),
            ConverterSettings {
                connection: "PG:dbname=test".to_string(),
                geometry_type: GeometryType::MultiPolygon,
                workspace_root: Some(workspace.path().to_path_buf()),
            },
        );
        let engine = LocalEngineBuilder::new(history.clone())
            .register_activity::<UpdateJobStatus, _>(UpdateJobStatusHandler::new(jobs.clone()))
            .unwrap()
            .register_activity::<FetchAndConvert, _>(fetch)
            .unwrap()
            .register_activity::<RegisterLayer, _>(RegisterLayerHandler::new(layers.clone()))
            .unwrap()
            .register_activity::<CompensateDropTable, _>(DropTableHandler::new(layers.clone()))
            .unwrap()
            .register_activity::<CompensateRemoveStyle, _>(RemoveStyleHandler::new(style_storage))
            .unwrap()
            .register_activity::<Notify, _>(NotifyHandler::new(
                jobs.clone(),
                notifier,
                Arc::new(SystemClock),
            ))
            .unwrap()
            .register_workflow(ImportLayerWorkflow::new(self.options))
            .unwrap()
            .build()
            .unwrap();
        let scheduler = Scheduler::new(
            jobs.clone(),
            Arc::new(engine.clone()),
            ids.clone(),
            DEFAULT_TASK_QUEUE,
        );

        Pipeline {
            jobs,
            layers,
            history,
            archives,
            converter,
            notifier: recording,
            ids,
            engine,
            scheduler,
            workspace,
            styles,
        }
    }
}

impl Pipeline {
    pub fn new(converter: ScriptedConverter) -> Self {
        Self::builder(converter).build()
    }

    pub fn builder(converter: ScriptedConverter) -> PipelineBuilder {
        PipelineBuilder {
            converter,
            notifier: None,
            options: WorkflowOptions::uniform(fast_options(3)),
        }
    }

    /// Make an archive available under `key`.
    pub async fn upload(&self, key: &str, entries: &[(&str, &str)]) {
        self.archives.insert(key, zip_archive(entries)).await;
    }

    /// Schedule an import and wait for its run to finish.
    pub async fn import(&self, key: &str) -> (JobToken, RunStatus) {
        let scheduled = self.scheduler.schedule_import(key).await.unwrap();
        (scheduled.token, scheduled.run.wait().await)
    }

    /// Submit a run directly, bypassing the scheduler.
    pub async fn submit(&self, event: ImportEvent) -> RunHandle {
        self.engine
            .submit_workflow(SubmitRequest {
                workflow_type: ImportLayerWorkflow::TYPE.to_string(),
                task_queue: self.engine.task_queue().to_string(),
                run_id: event.job_token.to_string(),
                input: serde_json::to_value(&event).unwrap(),
            })
            .await
            .unwrap()
    }

    pub async fn job(&self, token: JobToken) -> Job {
        self.jobs.get_job_by_token(token).await.unwrap()
    }

    /// No import workspace is left on disk.
    pub fn workspace_is_empty(&self) -> bool {
        std::fs::read_dir(self.workspace.path()).unwrap().next().is_none()
    }

    /// No style document is left in style storage.
    pub fn styles_are_empty(&self) -> bool {
        std::fs::read_dir(self.styles.path()).unwrap().next().is_none()
    }
}
