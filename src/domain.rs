use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BackfillError;

pub type ObjectId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    Staged,
    Parsed,
    Materialized,
    Failed,
}

impl RecordStatus {
    pub const ALL: [RecordStatus; 4] = [
        RecordStatus::Staged,
        RecordStatus::Parsed,
        RecordStatus::Materialized,
        RecordStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Staged => "STAGED",
            RecordStatus::Parsed => "PARSED",
            RecordStatus::Materialized => "MATERIALIZED",
            RecordStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordStatus::Materialized | RecordStatus::Failed)
    }

    pub fn can_advance_to(&self, next: RecordStatus) -> bool {
        matches!(
            (self, next),
            (RecordStatus::Staged, RecordStatus::Parsed)
                | (RecordStatus::Staged, RecordStatus::Failed)
                | (RecordStatus::Parsed, RecordStatus::Materialized)
                | (RecordStatus::Parsed, RecordStatus::Failed)
        )
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = BackfillError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "STAGED" => Ok(RecordStatus::Staged),
            "PARSED" => Ok(RecordStatus::Parsed),
            "MATERIALIZED" => Ok(RecordStatus::Materialized),
            "FAILED" => Ok(RecordStatus::Failed),
            other => Err(BackfillError::InvalidStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedFields {
    pub ingested_at: Option<String>,
    pub relative_path: Option<String>,
    pub package_name: Option<String>,
    pub original_file_name: Option<String>,
    pub original_file_size: Option<u64>,
    pub format_name: Option<String>,
    pub format_version: Option<String>,
    pub format_registry_name: Option<String>,
    pub format_registry_key: Option<String>,
    pub preservation_copy_file_name: Option<String>,
    pub preservation_copy_file_size: Option<u64>,
    pub preservation_copy_normalized_at: Option<String>,
}

impl ExtractedFields {
    pub fn clear_preservation_copy(&mut self) {
        self.preservation_copy_file_name = None;
        self.preservation_copy_file_size = None;
        self.preservation_copy_normalized_at = None;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyObjectRecord {
    pub object_id: ObjectId,
    pub object_uuid: String,
    pub package_uuid: String,
    pub extracted_fields: Option<ExtractedFields>,
    pub status: RecordStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyScope {
    PremisData,
    FormatIdentification,
}

impl PropertyScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyScope::PremisData => "premisData",
            PropertyScope::FormatIdentification => "formatIdentification",
        }
    }
}

impl fmt::Display for PropertyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyName {
    ObjectUuid,
    AipUuid,
    AipName,
    RelativePathWithinAip,
    OriginalFileName,
    OriginalFileSize,
    OriginalFileIngestedAt,
    PreservationCopyFileName,
    PreservationCopyFileSize,
    PreservationCopyNormalizedAt,
    FormatName,
    FormatVersion,
    FormatRegistryName,
    FormatRegistryKey,
}

impl PropertyName {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyName::ObjectUuid => "objectUUID",
            PropertyName::AipUuid => "aipUUID",
            PropertyName::AipName => "aipName",
            PropertyName::RelativePathWithinAip => "relativePathWithinAip",
            PropertyName::OriginalFileName => "originalFileName",
            PropertyName::OriginalFileSize => "originalFileSize",
            PropertyName::OriginalFileIngestedAt => "originalFileIngestedAt",
            PropertyName::PreservationCopyFileName => "preservationCopyFileName",
            PropertyName::PreservationCopyFileSize => "preservationCopyFileSize",
            PropertyName::PreservationCopyNormalizedAt => "preservationCopyNormalizedAt",
            PropertyName::FormatName => "formatName",
            PropertyName::FormatVersion => "formatVersion",
            PropertyName::FormatRegistryName => "formatRegistryName",
            PropertyName::FormatRegistryKey => "formatRegistryKey",
        }
    }

    pub fn scope(&self) -> PropertyScope {
        match self {
            PropertyName::FormatName
            | PropertyName::FormatVersion
            | PropertyName::FormatRegistryName
            | PropertyName::FormatRegistryKey => PropertyScope::FormatIdentification,
            _ => PropertyScope::PremisData,
        }
    }
}

impl fmt::Display for PropertyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyRecord {
    pub object_id: ObjectId,
    pub scope: Option<String>,
    pub name: String,
    pub value: String,
}

impl PropertyRecord {
    pub fn new(object_id: ObjectId, name: PropertyName, value: impl Into<String>) -> Self {
        Self {
            object_id,
            scope: Some(name.scope().as_str().to_string()),
            name: name.as_str().to_string(),
            value: value.into(),
        }
    }
}
