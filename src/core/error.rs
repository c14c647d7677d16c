use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Manifest-level failures raised while parsing a pack.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("manifest '{0}' is missing from the archive")]
    MissingManifest(String),
    #[error("manifest is not valid JSON: {0}")]
    InvalidManifest(String),
    #[error("unknown manifest schema tag '{0}'")]
    UnknownSchema(String),
    #[error("manifest contents mismatch: missing from archive {missing:?}, undeclared in manifest {extra:?}")]
    ManifestMismatch {
        missing: Vec<String>,
        extra: Vec<String>,
    },
    #[error("manifest contents are not sorted and unique")]
    UnsortedContents,
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArchiveError {
    #[error("corrupt archive: {reason}")]
    Corrupt { reason: String },
}

/// One file whose current base content disagrees with what a patch expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileConflict {
    pub path: String,
    pub expected_sha256: Option<String>,
    pub actual_sha256: Option<String>,
}

/// Detail carried by a patch conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictInfo {
    pub base_project_id: String,
    pub expected_base_pack_sha256: String,
    pub actual_base_pack_sha256: String,
    pub files: Vec<FileConflict>,
}

impl std::fmt::Display for ConflictInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let paths = self
            .files
            .iter()
            .map(|c| c.path.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        write!(
            f,
            "base of project '{}' diverged (expected {}, found {}); conflicting paths: {}",
            self.base_project_id,
            self.expected_base_pack_sha256,
            self.actual_base_pack_sha256,
            paths
        )
    }
}

#[derive(Error, Debug)]
pub enum SpecPackError {
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),
    #[error("Hash mismatch for {label}: expected {expected}, got {actual}")]
    HashMismatch {
        label: String,
        expected: String,
        actual: String,
    },
    #[error("Patch conflict: {0}")]
    PatchConflict(Box<ConflictInfo>),
    #[error("Project '{project_id}' is locked at pack {locked_pack_sha256}")]
    LockedPack {
        project_id: String,
        locked_pack_sha256: String,
    },
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Malformed patch: {0}")]
    MalformedPatch(String),
    #[error("Proposal '{id}' is stale: {reason}")]
    StaleProposal { id: String, reason: String },
    #[error("Base of project '{project_id}' moved: expected {expected:?}, found {actual:?}")]
    BaseMoved {
        project_id: String,
        expected: Option<String>,
        actual: Option<String>,
    },
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<serde_json::Error> for SpecPackError {
    fn from(err: serde_json::Error) -> Self {
        SpecPackError::Serialization(err.to_string())
    }
}

impl SpecPackError {
    /// Locked-project and conflict errors are expected operator-facing outcomes.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SpecPackError::LockedPack { .. }
                | SpecPackError::PatchConflict(_)
                | SpecPackError::StaleProposal { .. }
                | SpecPackError::BaseMoved { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SpecPackError>;
