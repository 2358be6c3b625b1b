//! Config - 環境変数からの設定読み込み
//!
//! すべての項目にローカル開発向けのデフォルトがあります（`DATABASE_URL` を除く）。
//! 不正な値は panic せず [`ConfigError`] を返します。

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::activity::ConverterSettings;
use crate::domain::GeometryType;
use crate::engine::DEFAULT_TASK_QUEUE;
use crate::workflow::{ActivityClass, WorkflowOptions};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: String, value: String },
}

/// Runtime configuration.
///
/// | Env Var                        | Default                                   |
/// |--------------------------------|-------------------------------------------|
/// | `DATABASE_URL`                 | (required)                                |
/// | `TESSERA_TASK_QUEUE`           | `import_layer`                            |
/// | `TESSERA_WORKER_CONCURRENCY`   | `8`                                       |
/// | `TESSERA_FILER_BASE_URL`       | `http://127.0.0.1:5005`                   |
/// | `TESSERA_CONVERTER_PROGRAM`    | `ogr2ogr`                                 |
/// | `TESSERA_CONVERTER_CONNECTION` | `PG:host=localhost dbname=vectorlayer_db` |
/// | `TESSERA_GEOMETRY_TYPE`        | `MULTIPOLYGON`                            |
/// | `TESSERA_STYLES_DIR`           | `./styles`                                |
/// | `TESSERA_WORKSPACE_DIR`        | system temp dir                           |
/// | `TESSERA_LEASE_TTL_SECS`       | `60`                                      |
/// | `TESSERA_RECOVER_INTERVAL_SECS`| `30`                                      |
///
/// Per activity class (`JOB_STATUS`, `IMPORT`, `REGISTER`, `COMPENSATE`, `NOTIFY`):
/// `TESSERA_<CLASS>_INITIAL_INTERVAL_MS` (1000), `TESSERA_<CLASS>_BACKOFF_COEFFICIENT` (2.0),
/// `TESSERA_<CLASS>_MAXIMUM_INTERVAL_MS` (600000), `TESSERA_<CLASS>_MAXIMUM_ATTEMPTS` (3),
/// `TESSERA_<CLASS>_START_TO_CLOSE_SECS` (86400).
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database_url: String,
    pub task_queue: String,
    pub worker_concurrency: usize,
    pub filer_base_url: String,
    pub converter_program: String,
    pub converter_connection: String,
    pub geometry_type: GeometryType,
    pub styles_dir: PathBuf,
    pub workspace_dir: Option<PathBuf>,
    /// How long a run stays claimed by this worker without renewal.
    pub lease_ttl: Duration,
    /// How often the worker looks for runs to resume.
    pub recover_interval: Duration,
    pub workflow: WorkflowOptions,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (the environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup: &lookup };

        let database_url = env
            .string("DATABASE_URL")
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let worker_concurrency: usize = env.parse("TESSERA_WORKER_CONCURRENCY", 8)?;
        if worker_concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "TESSERA_WORKER_CONCURRENCY".into(),
                value: "0".into(),
            });
        }

        let lease_ttl = Duration::from_secs(env.positive("TESSERA_LEASE_TTL_SECS", 60)?);
        let recover_interval =
            Duration::from_secs(env.positive("TESSERA_RECOVER_INTERVAL_SECS", 30)?);

        let mut workflow = WorkflowOptions::default();
        for class in ActivityClass::ALL {
            let prefix = format!("TESSERA_{}", class.env_name());
            let options = workflow.get_mut(class);
            options.retry.initial_interval =
                Duration::from_millis(env.parse(&format!("{prefix}_INITIAL_INTERVAL_MS"), 1000)?);
            options.retry.backoff_coefficient =
                env.parse(&format!("{prefix}_BACKOFF_COEFFICIENT"), 2.0)?;
            options.retry.maximum_interval =
                Duration::from_millis(env.parse(&format!("{prefix}_MAXIMUM_INTERVAL_MS"), 600_000)?);
            options.retry.maximum_attempts =
                env.parse(&format!("{prefix}_MAXIMUM_ATTEMPTS"), 3)?;
            options.start_to_close_timeout =
                Duration::from_secs(env.parse(&format!("{prefix}_START_TO_CLOSE_SECS"), 86_400)?);

            if options.retry.maximum_attempts == 0 {
                return Err(ConfigError::Invalid {
                    key: format!("{prefix}_MAXIMUM_ATTEMPTS"),
                    value: "0".into(),
                });
            }
            let coefficient = options.retry.backoff_coefficient;
            if !coefficient.is_finite() || coefficient < 1.0 {
                return Err(ConfigError::Invalid {
                    key: format!("{prefix}_BACKOFF_COEFFICIENT"),
                    value: coefficient.to_string(),
                });
            }
        }

        Ok(Self {
            database_url,
            task_queue: env
                .string("TESSERA_TASK_QUEUE")
                .unwrap_or_else(|| DEFAULT_TASK_QUEUE.into()),
            worker_concurrency,
            filer_base_url: env
                .string("TESSERA_FILER_BASE_URL")
                .unwrap_or_else(|| "http://127.0.0.1:5005".into()),
            converter_program: env
                .string("TESSERA_CONVERTER_PROGRAM")
                .unwrap_or_else(|| "ogr2ogr".into()),
            converter_connection: env
                .string("TESSERA_CONVERTER_CONNECTION")
                .unwrap_or_else(|| "PG:host=localhost dbname=vectorlayer_db".into()),
            geometry_type: env.parse("TESSERA_GEOMETRY_TYPE", GeometryType::MultiPolygon)?,
            styles_dir: env
                .string("TESSERA_STYLES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./styles")),
            workspace_dir: env.string("TESSERA_WORKSPACE_DIR").map(PathBuf::from),
            lease_ttl,
            recover_interval,
            workflow,
        })
    }
}

impl Config {
    pub fn converter_settings(&self) -> ConverterSettings {
        ConverterSettings {
            connection: self.converter_connection.clone(),
            geometry_type: self.geometry_type,
            workspace_root: self.workspace_dir.clone(),
        }
    }
}

struct Env<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Env<'_> {
    /// Set and non-blank.
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.string(key) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                value,
            }),
        }
    }

    fn positive(&self, key: &str, default: u64) -> Result<u64, ConfigError> {
        match self.parse(key, default)? {
            0 => Err(ConfigError::Invalid {
                key: key.to_string(),
                value: "0".into(),
            }),
            n => Ok(n),
        }
    }
}
