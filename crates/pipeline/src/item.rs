//! Item records tracked by the pipeline.
//!
//! An item is one submitted file and its conversion lifecycle. The state
//! payload lives inside [`ItemState`], so an output exists only on success and
//! a failure reason only on failure.

use crate::config::TargetFormat;
use crate::naming::normalize_source_name;
use crate::preview::PreviewHandle;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

/// Opaque, never-reused item identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(Uuid);

impl ItemId {
    /// Allocate a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ItemId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Error building conversion settings.
#[derive(Debug, Error, PartialEq)]
pub enum SettingsError {
    #[error("quality must be in (0, 1], got {0}")]
    QualityOutOfRange(f32),
}

/// Format and quality captured when a batch is submitted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConversionSettings {
    format: TargetFormat,
    quality: f32,
}

impl ConversionSettings {
    pub fn new(format: TargetFormat, quality: f32) -> Result<Self, SettingsError> {
        if quality > 0.0 && quality <= 1.0 {
            Ok(Self { format, quality })
        } else {
            Err(SettingsError::QualityOutOfRange(quality))
        }
    }

    pub fn format(&self) -> TargetFormat {
        self.format
    }

    pub fn quality(&self) -> f32 {
        self.quality
    }
}

impl Default for ConversionSettings {
    fn default() -> Self {
        Self {
            format: TargetFormat::Jpeg,
            quality: 0.8,
        }
    }
}

/// An immutable submitted file.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    name: String,
    original_name: String,
    mime: Option<String>,
    bytes: Bytes,
}

impl SourceFile {
    /// Wraps raw bytes, normalizing the HEIC/HEIF extension of `name`.
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        let original_name = name.into();
        Self {
            name: normalize_source_name(&original_name),
            original_name,
            mime: None,
            bytes: bytes.into(),
        }
    }

    /// Attach the MIME type reported by the submitter.
    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    /// Name with the canonical lowercase extension.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name exactly as submitted.
    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    pub fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }
}

/// Payload-free lifecycle stage of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Waiting for a conversion slot.
    Queued,
    /// Admitted into a slot and running.
    Converting,
    /// Output produced.
    Success,
    /// Conversion failed or timed out.
    Failed,
}

impl ItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemStatus::Success | ItemStatus::Failed)
    }

    pub fn is_pending(self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemStatus::Queued => write!(f, "queued"),
            ItemStatus::Converting => write!(f, "converting"),
            ItemStatus::Success => write!(f, "success"),
            ItemStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Result of a successful conversion, owned by its item until removal.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedOutput {
    pub bytes: Bytes,
    pub name: String,
    pub preview: PreviewHandle,
}

/// Lifecycle state with its stage-specific payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemState {
    Queued,
    Converting,
    Success(ConvertedOutput),
    Failed(String),
}

impl ItemState {
    pub fn status(&self) -> ItemStatus {
        match self {
            ItemState::Queued => ItemStatus::Queued,
            ItemState::Converting => ItemStatus::Converting,
            ItemState::Success(_) => ItemStatus::Success,
            ItemState::Failed(_) => ItemStatus::Failed,
        }
    }
}

/// One submitted file and its conversion lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: ItemId,
    pub source: SourceFile,
    pub settings: ConversionSettings,
    pub state: ItemState,
    /// Unix timestamp (milliseconds) when the item was submitted.
    pub created_at: i64,
    /// Unix timestamp (milliseconds) of the last state transition.
    pub updated_at: i64,
}

impl Item {
    /// Create a queued item for a freshly submitted file.
    pub fn queued(source: SourceFile, settings: ConversionSettings) -> Self {
        let now = current_timestamp_ms();
        Self {
            id: ItemId::new(),
            source,
            settings,
            state: ItemState::Queued,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> ItemStatus {
        self.state.status()
    }

    /// Replace the state and update the timestamp.
    pub fn transition(&mut self, state: ItemState) {
        self.state = state;
        self.updated_at = current_timestamp_ms();
    }

    pub fn output(&self) -> Option<&ConvertedOutput> {
        match &self.state {
            ItemState::Success(output) => Some(output),
            _ => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.state {
            ItemState::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn preview(&self) -> Option<&PreviewHandle> {
        self.output().map(|o| &o.preview)
    }
}

/// Serializable projection of an item, without payload bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemView {
    pub id: ItemId,
    pub name: String,
    pub original_name: String,
    pub status: ItemStatus,
    pub format: TargetFormat,
    pub quality: f32,
    pub source_size: u64,
    pub output_name: Option<String>,
    pub output_size: Option<u64>,
    pub failure_reason: Option<String>,
    pub has_preview: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&Item> for ItemView {
    fn from(item: &Item) -> Self {
        let output = item.output();
        Self {
            id: item.id,
            name: item.source.name().to_string(),
            original_name: item.source.original_name().to_string(),
            status: item.status(),
            format: item.settings.format(),
            quality: item.settings.quality(),
            source_size: item.source.bytes().len() as u64,
            output_name: output.map(|o| o.name.clone()),
            output_size: output.map(|o| o.bytes.len() as u64),
            failure_reason: item.failure_reason().map(str::to_string),
            has_preview: output.is_some(),
            created_at: item.created_at,
            updated_at: item.updated_at,
        }
    }
}

/// Get current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
