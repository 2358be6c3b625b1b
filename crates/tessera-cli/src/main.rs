//! tessera - import worker と操作用コマンド
//!
//! ```text
//! tessera worker                 未完了の run を定期的に再開し、Ctrl-C まで待機
//! tessera import <key>...        archive を import して完了まで待つ
//! tessera status <job-token>     job の status を表示
//! ```

use std::sync::Arc;

use anyhow::{Context, bail};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tessera_core::activity::{
    CompensateDropTable, CompensateRemoveStyle, DropTableHandler, FetchAndConvert,
    FetchAndConvertHandler, Notify, NotifyHandler, RegisterLayer, RegisterLayerHandler,
    RemoveStyleHandler, UpdateJobStatus, UpdateJobStatusHandler,
};
use tessera_core::domain::JobToken;
use tessera_core::impls::{FsStyleStorage, HttpArchiveFetcher, Ogr2OgrConverter, TracingNotifier};
use tessera_core::ports::{Clock, JobStore, LayerStore, SystemClock, UlidGenerator};
use tessera_core::{Config, ImportLayerWorkflow, LocalEngine, LocalEngineBuilder, RunStatus, Scheduler};
use tessera_pg::{PgHistoryStore, PgJobStore, PgLayerStore};

const MAX_DB_CONNECTIONS: u32 = 10;

const USAGE: &str = "usage: tessera <worker | import <archive-key>... | status <job-token>>";

enum Command {
    Worker,
    Import(Vec<String>),
    Status(JobToken),
}

fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<Command> {
    let Some(command) = args.next() else {
        bail!(USAGE);
    };
    match command.as_str() {
        "worker" => Ok(Command::Worker),
        "import" => {
            let keys: Vec<String> = args.collect();
            if keys.is_empty() {
                bail!("import needs at least one archive key\n{USAGE}");
            }
            Ok(Command::Import(keys))
        }
        "status" => {
            let token = args.next().context(USAGE)?;
            Ok(Command::Status(token.parse()?))
        }
        other => bail!("unknown command '{other}'\n{USAGE}"),
    }
}

struct App {
    engine: LocalEngine,
    scheduler: Scheduler,
}

fn build_app(config: &Config, pool: sqlx::PgPool) -> anyhow::Result<App> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let jobs: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone()));
    let layers: Arc<dyn LayerStore> = Arc::new(PgLayerStore::new(pool.clone()));
    let history = Arc::new(PgHistoryStore::new(pool));

    let fetcher = Arc::new(HttpArchiveFetcher::new(&config.filer_base_url)?);
    let styles = Arc::new(FsStyleStorage::new(&config.styles_dir));
    let fetch = FetchAndConvertHandler::new(
        fetcher,
        Arc::new(Ogr2OgrConverter::new(&config.converter_program)),
        styles.clone(),
        config.converter_settings(),
    );

    let engine = LocalEngineBuilder::new(history)
        .register_activity::<UpdateJobStatus, _>(UpdateJobStatusHandler::new(jobs.clone()))?
        .register_activity::<FetchAndConvert, _>(fetch)?
        .register_activity::<RegisterLayer, _>(RegisterLayerHandler::new(layers.clone()))?
        .register_activity::<CompensateDropTable, _>(DropTableHandler::new(layers))?
        .register_activity::<CompensateRemoveStyle, _>(RemoveStyleHandler::new(styles))?
        .register_activity::<Notify, _>(NotifyHandler::new(
            jobs.clone(),
            Arc::new(TracingNotifier),
            clock.clone(),
        ))?
        .register_workflow(ImportLayerWorkflow::new(config.workflow.clone()))?
        .task_queue(&config.task_queue)
        .concurrency(config.worker_concurrency)
        .lease_ttl(config.lease_ttl)
        .clock(clock.clone())
        .build()?;

    let scheduler = Scheduler::new(
        jobs,
        Arc::new(engine.clone()),
        Arc::new(UlidGenerator::new(SystemClock)),
        &config.task_queue,
    );
    Ok(App { engine, scheduler })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tessera=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let command = parse_args(std::env::args().skip(1))?;
    let config = Config::from_env()?;

    let pool = tessera_pg::connect(&config.database_url, MAX_DB_CONNECTIONS)
        .await
        .context("failed to connect to the database")?;
    tessera_pg::MIGRATOR
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    let app = build_app(&config, pool)?;

    match command {
        Command::Worker => {
            tracing::info!(
                task_queue = %config.task_queue,
                concurrency = config.worker_concurrency,
                owner = app.engine.owner(),
                "worker started"
            );
            let shutdown = tokio::signal::ctrl_c();
            tokio::pin!(shutdown);
            // first tick fires immediately
            let mut recover = tokio::time::interval(config.recover_interval);
            loop {
                tokio::select! {
                    signal = &mut shutdown => {
                        signal?;
                        break;
                    }
                    _ = recover.tick() => match app.engine.recover().await {
                        Ok(resumed) if !resumed.is_empty() => {
                            tracing::info!(resumed = resumed.len(), "resumed unfinished runs");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!(error = %e, "failed to recover runs"),
                    },
                }
            }
            tracing::info!("shutting down, waiting for runs in flight");
            app.engine.shutdown().await;
            let counts = app.engine.counts().await;
            tracing::info!(completed = counts.completed, failed = counts.failed, "worker stopped");
        }
        Command::Import(keys) => {
            let mut scheduled = Vec::new();
            for key in &keys {
                let import = app.scheduler.schedule_import(key).await?;
                println!("{key}: {}", import.token);
                scheduled.push(import);
            }
            let mut failed = 0;
            for import in scheduled {
                let token = import.token;
                match import.run.wait().await {
                    RunStatus::Failed(reason) => {
                        failed += 1;
                        println!("{token}: failed: {reason}");
                    }
                    status => println!("{token}: {status:?}"),
                }
            }
            app.engine.shutdown().await;
            if failed > 0 {
                bail!("{failed} of {} imports failed", keys.len());
            }
        }
        Command::Status(token) => {
            let job = app.scheduler.job_status(token).await?;
            match job.error() {
                Some(error) => println!("{token}: {} ({error})", job.status()),
                None => println!("{token}: {}", job.status()),
            }
        }
    }
    Ok(())
}
