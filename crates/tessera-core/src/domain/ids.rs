//! Domain identifiers (strongly-typed IDs).
//!
//! # ULID ベースの ID + ジェネリック実装
//! 外部に見せる識別子（job token, style blob 名）は ULID を使います。
//! `Id<T>` の `T` は PhantomData のマーカー型で、コンパイル時に
//! JobToken と StyleKey を混同できないようにしています。
//!
//! Store が採番する surrogate key は `DbId`（i64）です。

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// Surrogate key assigned by a store on creation.
pub type DbId = i64;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"layer_", "style_"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
///
/// 文字列表現は `{prefix}{ulid}` で、serde も同じ表現を使います
/// （DB の token 列や workflow run id としてそのまま使えるように）。
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Error returned when a string is not a valid `{prefix}{ulid}` identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid identifier '{value}': expected prefix '{prefix}' followed by a ULID")]
pub struct ParseIdError {
    pub value: String,
    pub prefix: &'static str,
}

impl<T: IdMarker> FromStr for Id<T> {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseIdError {
            value: s.to_string(),
            prefix: T::prefix(),
        };
        let raw = s.strip_prefix(T::prefix()).ok_or_else(err)?;
        let ulid = Ulid::from_string(raw).map_err(|_| err())?;
        Ok(Self::from_ulid(ulid))
    }
}

impl<T: IdMarker> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de, T: IdMarker> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Import job のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Job {}

impl IdMarker for Job {
    fn prefix() -> &'static str {
        "layer_"
    }
}

/// 永続化された style document のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StyleBlob {}

impl IdMarker for StyleBlob {
    fn prefix() -> &'static str {
        "style_"
    }
}

/// Externally-visible correlation id of a job; also the workflow run id.
pub type JobToken = Id<Job>;

/// Name of a persisted style document in the style storage.
pub type StyleKey = Id<StyleBlob>;
