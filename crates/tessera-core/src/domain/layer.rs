//! Layer and Style catalog records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use super::ids::DbId;

/// Geometry type the converter is told to produce (`-nlt`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GeometryType {
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
}

impl GeometryType {
    pub fn as_str(self) -> &'static str {
        match self {
            GeometryType::Point => "POINT",
            GeometryType::LineString => "LINESTRING",
            GeometryType::Polygon => "POLYGON",
            GeometryType::MultiPoint => "MULTIPOINT",
            GeometryType::MultiLineString => "MULTILINESTRING",
            GeometryType::MultiPolygon => "MULTIPOLYGON",
        }
    }
}

impl fmt::Display for GeometryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown geometry type '{0}'")]
pub struct UnknownGeometryType(pub String);

impl std::str::FromStr for GeometryType {
    type Err = UnknownGeometryType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "POINT" => Ok(GeometryType::Point),
            "LINESTRING" => Ok(GeometryType::LineString),
            "POLYGON" => Ok(GeometryType::Polygon),
            "MULTIPOINT" => Ok(GeometryType::MultiPoint),
            "MULTILINESTRING" => Ok(GeometryType::MultiLineString),
            "MULTIPOLYGON" => Ok(GeometryType::MultiPolygon),
            _ => Err(UnknownGeometryType(s.to_string())),
        }
    }
}

/// Path of a style document that has been copied out of the import
/// workspace into durable style storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StyleFileRef(PathBuf);

impl StyleFileRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for StyleFileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.display().fmt(f)
    }
}

/// A registered map layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub id: DbId,
    pub name: String,
    pub geometry_type: GeometryType,
    pub default_style_id: Option<DbId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to create a layer row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLayer {
    pub name: String,
    pub geometry_type: GeometryType,
    pub default_style_id: Option<DbId>,
}

/// An uploaded cartographic style document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Style {
    pub id: DbId,
    pub file_path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
