//! GeodataConverter port - 外部 converter（ogr2ogr など）の呼び出し
//!
//! converter は job ごとに独立した外部プロセスとして起動されるため、
//! プロセス内でのロックは不要です。

use async_trait::async_trait;
use std::path::PathBuf;

use crate::domain::GeometryType;

pub const TARGET_SRS: &str = "EPSG:4326";
pub const GEOMETRY_COLUMN: &str = "wkb_geometry";
pub const FID_COLUMN: &str = "ogc_fid";

/// One conversion: load `source` into table `table` of the target database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertRequest {
    pub source: PathBuf,
    pub connection: String,
    pub table: String,
    pub geometry_type: GeometryType,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConvertError {
    /// The converter executable could not be started.
    #[error("failed to launch converter '{program}': {message}")]
    Launch { program: String, message: String },

    #[error("converter exited with status {exit_code:?}: {output}")]
    Failed {
        exit_code: Option<i32>,
        output: String,
    },
}

#[async_trait]
pub trait GeodataConverter: Send + Sync {
    async fn convert(&self, request: &ConvertRequest) -> Result<(), ConvertError>;
}
