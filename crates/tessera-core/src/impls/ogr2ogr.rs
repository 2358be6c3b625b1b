//! Ogr2OgrConverter - ogr2ogr を job ごとの独立プロセスとして起動
//!
//! `kill_on_drop` を付けているので、activity の future が cancel / timeout で
//! drop されるとプロセスも終了します。

use async_trait::async_trait;
use std::ffi::OsString;
use std::process::Stdio;
use tokio::process::Command;

use crate::ports::converter::{FID_COLUMN, GEOMETRY_COLUMN, TARGET_SRS};
use crate::ports::{ConvertError, ConvertRequest, GeodataConverter};

pub struct Ogr2OgrConverter {
    program: String,
}

impl Ogr2OgrConverter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

/// Command-line arguments for one conversion.
pub fn build_args(request: &ConvertRequest) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-f".into(),
        "PostgreSQL".into(),
        request.connection.clone().into(),
        request.source.clone().into_os_string(),
        "-nln".into(),
        request.table.clone().into(),
        "-overwrite".into(),
        "-append".into(),
        "-nlt".into(),
        request.geometry_type.as_str().into(),
        "-t_srs".into(),
        TARGET_SRS.into(),
    ];
    args.extend(
        [
            format!("GEOMETRY_NAME={GEOMETRY_COLUMN}"),
            format!("FID={FID_COLUMN}"),
        ]
        .into_iter()
        .flat_map(|opt| [OsString::from("-lco"), OsString::from(opt)]),
    );
    args
}

#[async_trait]
impl GeodataConverter for Ogr2OgrConverter {
    async fn convert(&self, request: &ConvertRequest) -> Result<(), ConvertError> {
        tracing::info!(
            program = %self.program,
            source = %request.source.display(),
            table = %request.table,
            "running converter"
        );

        let output = Command::new(&self.program)
            .args(build_args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ConvertError::Launch {
                program: self.program.clone(),
                message: e.to_string(),
            })?;

        if output.status.success() {
            return Ok(());
        }

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let combined = combined.trim().to_string();
        tracing::warn!(
            table = %request.table,
            exit_code = ?output.status.code(),
            output = %combined,
            "converter failed"
        );
        Err(ConvertError::Failed {
            exit_code: output.status.code(),
            output: combined,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::GeometryType;
    use std::path::PathBuf;

    fn request() -> ConvertRequest {
        ConvertRequest {
            source: PathBuf::from("/tmp/shapefile-1/extracted/parcels.shp"),
            connection: "PG:host=localhost dbname=vectorlayer_db".into(),
            table: "parcels".into(),
            geometry_type: GeometryType::MultiPolygon,
        }
    }

    #[test]
    fn arguments_follow_converter_contract() {
        let args: Vec<String> = build_args(&request())
            .into_iter()
            .map(|a| a.into_string().unwrap())
            .collect();
        assert_eq!(
            args,
            vec![
                "-f",
                "PostgreSQL",
                "PG:host=localhost dbname=vectorlayer_db",
                "/tmp/shapefile-1/extracted/parcels.shp",
                "-nln",
                "parcels",
                "-overwrite",
                "-append",
                "-nlt",
                "MULTIPOLYGON",
                "-t_srs",
                "EPSG:4326",
                "-lco",
                "GEOMETRY_NAME=wkb_geometry",
                "-lco",
                "FID=ogc_fid",
            ]
        );
    }

    #[tokio::test]
    async fn missing_program_is_a_launch_error() {
        let converter = Ogr2OgrConverter::new("tessera-no-such-converter");
        let err = converter.convert(&request()).await.unwrap_err();
        assert!(matches!(err, ConvertError::Launch { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_reported_with_status() {
        let converter = Ogr2OgrConverter::new("false");
        let err = converter.convert(&request()).await.unwrap_err();
        assert!(matches!(err, ConvertError::Failed { exit_code: Some(1), .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn zero_exit_is_success() {
        let converter = Ogr2OgrConverter::new("true");
        converter.convert(&request()).await.unwrap();
    }
}
