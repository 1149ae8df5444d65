//! Core timeline data types shared by capture, storage and replay.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Placeholder prefix written into stylesheet text in place of a resource URL.
pub const CSS_PLACEHOLDER_PREFIX: &str = "[[ASSET:";
/// Placeholder suffix written into stylesheet text.
pub const CSS_PLACEHOLDER_SUFFIX: &str = "]]";
/// Side attribute carrying the asset id of a rewritten image.
pub const IMAGE_ASSET_ATTR: &str = "data-asset-id";

/// Identity of one recording: its own timeline and asset map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh identity for a capture session started without an explicit name.
    pub fn generate() -> Self {
        Self(format!("rec_{}", Uuid::now_v7().simple()))
    }

    /// Fresh identity for an imported bundle.
    pub fn imported() -> Self {
        Self(format!("imported_{}", Uuid::now_v7().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Absolute URL of an external resource, used verbatim as dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(String);

impl AssetId {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The stylesheet placeholder token for this id.
    pub fn css_placeholder(&self) -> String {
        format!(
            "{}{}{}",
            CSS_PLACEHOLDER_PREFIX, self.0, CSS_PLACEHOLDER_SUFFIX
        )
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<url::Url> for AssetId {
    fn from(url: url::Url) -> Self {
        Self(url.into())
    }
}

/// Outcome of resolving one asset. `data` is `None` when the fetch failed or
/// has not finished; replay then falls back to the id itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub id: AssetId,
    pub data: Option<String>,
}

impl AssetRecord {
    pub fn resolved(id: AssetId, data: String) -> Self {
        Self {
            id,
            data: Some(data),
        }
    }

    pub fn absent(id: AssetId) -> Self {
        Self { id, data: None }
    }
}

/// Asset map of a session. Only resolved records are present.
pub type AssetMap = BTreeMap<AssetId, String>;

/// One captured document state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Capture time in milliseconds since the epoch. Informational only.
    #[serde(default)]
    pub time: u64,
    /// Serialized `<html>` element, scripts removed, placeholders in place.
    pub html: String,
    /// Absolute document base URI at capture time.
    #[serde(default)]
    pub base_url: String,
}

/// Portable export/import unit of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineBundle {
    #[serde(default)]
    pub snapshots: Vec<Snapshot>,
    #[serde(default, deserialize_with = "deserialize_asset_map")]
    pub assets: AssetMap,
}

impl TimelineBundle {
    pub fn new(snapshots: Vec<Snapshot>, assets: AssetMap) -> Self {
        Self { snapshots, assets }
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

/// `null` entries are treated as absent records rather than rejected.
fn deserialize_asset_map<'de, D>(deserializer: D) -> Result<AssetMap, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<AssetId, Option<String>>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(id, data)| data.map(|data| (id, data)))
        .collect())
}
