use std::fmt;
use std::path::PathBuf;

use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum BackfillError {
    #[error("missing config file aip-backfill.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    #[diagnostic(help("check aip-backfill.json or the AIP_BACKFILL_API_KEY variable"))]
    InvalidConfig(String),

    #[error("storage service is unreachable: {0}")]
    #[diagnostic(help("verify the storage service URL and credentials"))]
    ServiceUnreachable(String),

    #[error("descriptive database is unavailable: {0}")]
    DatabaseUnavailable(String),

    #[error("storage service request failed: {0}")]
    StorageHttp(String),

    #[error("storage service returned status {status}: {message}")]
    StorageStatus { status: u16, message: String },

    #[error("unable to resolve {identifier} for object #{object_id}: {reason}")]
    IdentifierResolution {
        object_id: i64,
        identifier: &'static str,
        reason: String,
    },

    #[error("unable to fetch manifest for package {package_uuid}: {reason}")]
    PackageFetch {
        package_uuid: String,
        reason: String,
    },

    #[error("unable to parse manifest for package {package_uuid}: {reason}")]
    ManifestParse {
        package_uuid: String,
        reason: String,
    },

    #[error("file {file_uuid} not found in manifest of package {package_uuid}")]
    FileLookup {
        package_uuid: String,
        file_uuid: String,
    },

    #[error("no format registry match for file {file_uuid}; classified as {fallback}")]
    FormatIdentification { file_uuid: String, fallback: String },

    #[error("unable to resolve preservation copy of file {file_uuid}: {reason}")]
    DerivativeResolution { file_uuid: String, reason: String },

    #[error("unable to write property {name} for object #{object_id}: {reason}")]
    PropertyWrite {
        object_id: i64,
        name: String,
        reason: String,
    },

    #[error("record #{0} has no extracted fields")]
    MissingExtraction(i64),

    #[error("record #{object_id} cannot move from {from} to {to}")]
    InvalidTransition {
        object_id: i64,
        from: String,
        to: String,
    },

    #[error("invalid record status: {0}")]
    InvalidStatus(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    SetupConnectivity,
    IdentifierResolution,
    PackageFetch,
    ManifestParse,
    FileLookup,
    FormatIdentification,
    DerivativeResolution,
    PropertyWrite,
    Persistence,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::SetupConnectivity => "setup_connectivity",
            ErrorKind::IdentifierResolution => "identifier_resolution",
            ErrorKind::PackageFetch => "package_fetch",
            ErrorKind::ManifestParse => "manifest_parse",
            ErrorKind::FileLookup => "file_lookup",
            ErrorKind::FormatIdentification => "format_identification",
            ErrorKind::DerivativeResolution => "derivative_resolution",
            ErrorKind::PropertyWrite => "property_write",
            ErrorKind::Persistence => "persistence",
        };
        f.write_str(label)
    }
}

impl BackfillError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BackfillError::MissingConfig
            | BackfillError::ConfigRead(_)
            | BackfillError::ConfigParse(_)
            | BackfillError::InvalidConfig(_) => ErrorKind::Configuration,
            BackfillError::ServiceUnreachable(_) | BackfillError::DatabaseUnavailable(_) => {
                ErrorKind::SetupConnectivity
            }
            BackfillError::IdentifierResolution { .. } => ErrorKind::IdentifierResolution,
            BackfillError::StorageHttp(_)
            | BackfillError::StorageStatus { .. }
            | BackfillError::PackageFetch { .. } => ErrorKind::PackageFetch,
            BackfillError::ManifestParse { .. } => ErrorKind::ManifestParse,
            BackfillError::FileLookup { .. } => ErrorKind::FileLookup,
            BackfillError::FormatIdentification { .. } => ErrorKind::FormatIdentification,
            BackfillError::DerivativeResolution { .. } => ErrorKind::DerivativeResolution,
            BackfillError::PropertyWrite { .. } => ErrorKind::PropertyWrite,
            BackfillError::MissingExtraction(_)
            | BackfillError::InvalidTransition { .. }
            | BackfillError::InvalidStatus(_)
            | BackfillError::Database(_)
            | BackfillError::Filesystem(_) => ErrorKind::Persistence,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Configuration | ErrorKind::SetupConnectivity
        )
    }
}

impl From<rusqlite::Error> for BackfillError {
    fn from(err: rusqlite::Error) -> Self {
        BackfillError::Database(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_failures_classify_as_package_fetch() {
        let err = BackfillError::StorageStatus {
            status: 404,
            message: "not found".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::PackageFetch);
        assert!(!err.is_fatal());
    }

    #[test]
    fn connectivity_failures_are_fatal() {
        assert!(BackfillError::ServiceUnreachable("refused".to_string()).is_fatal());
        assert!(BackfillError::DatabaseUnavailable("locked".to_string()).is_fatal());
    }
}
