//! Pack model: manifest + ordered file map, parsed from and serialized to a
//! deterministic archive.
//!
//! A pack's identity (`pack_sha256`) is always the hash of its canonical
//! re-encoding, so archives with the same logical content but a different
//! incidental byte layout collapse to the same identity.

use crate::core::archive::{self, FileMap};
use crate::core::canonical;
use crate::core::error::{SchemaError, SpecPackError};
use crate::core::hash;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

pub const MANIFEST_NAME: &str = "spec_pack_manifest.json";

pub const MANIFEST_SCHEMA_V1: &str = "specpack.manifest.v1";
pub const MANIFEST_SCHEMA_V2: &str = "specpack.manifest.v2";
pub const CURRENT_MANIFEST_SCHEMA: &str = MANIFEST_SCHEMA_V2;

/// Default manifest timestamp; matches the archive entry epoch.
pub const PACK_EPOCH_UTC: &str = "1980-01-01T00:00:00Z";

pub const DEFAULT_PACK_VERSION: &str = "1";

pub fn default_producer_version() -> String {
    format!("specpack/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub producer_version: String,
    pub validator_version: String,
}

impl Default for Provenance {
    fn default() -> Self {
        Self {
            producer_version: default_producer_version(),
            validator_version: default_producer_version(),
        }
    }
}

/// Current-version manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackManifest {
    pub created_at_utc: String,
    pub project_id: String,
    #[serde(rename = "spec_pack_version")]
    pub pack_version: String,
    pub provenance: Provenance,
    pub contents: Vec<String>,
}

impl PackManifest {
    pub fn schema_id(&self) -> &'static str {
        CURRENT_MANIFEST_SCHEMA
    }
}

/// First manifest shape: flat producer version, no validator version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestV1 {
    pub created_at_utc: String,
    pub project_id: String,
    pub spec_pack_version: String,
    pub producer_version: String,
    pub contents: Vec<String>,
}

impl ManifestV1 {
    pub fn upgrade(self) -> PackManifest {
        PackManifest {
            created_at_utc: self.created_at_utc,
            project_id: self.project_id,
            pack_version: self.spec_pack_version,
            provenance: Provenance {
                producer_version: self.producer_version,
                validator_version: "unknown".to_string(),
            },
            contents: self.contents,
        }
    }
}

/// Every manifest shape ever written, discriminated by the `schema` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "schema")]
pub enum ManifestRecord {
    #[serde(rename = "specpack.manifest.v1")]
    V1(ManifestV1),
    #[serde(rename = "specpack.manifest.v2")]
    V2(PackManifest),
}

impl ManifestRecord {
    pub fn into_current(self) -> PackManifest {
        match self {
            ManifestRecord::V1(v1) => v1.upgrade(),
            ManifestRecord::V2(v2) => v2,
        }
    }
}

fn schema_failure(err: SchemaError) -> SpecPackError {
    error!(error = %err, "pack schema validation failed");
    SpecPackError::Schema(err)
}

/// Parses manifest JSON of any known schema version into the current shape.
pub fn parse_manifest(bytes: &[u8]) -> Result<PackManifest, SpecPackError> {
    let value: JsonValue = serde_json::from_slice(bytes)
        .map_err(|e| schema_failure(SchemaError::InvalidManifest(e.to_string())))?;
    let tag = value
        .get("schema")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| {
            schema_failure(SchemaError::InvalidManifest(
                "missing string field 'schema'".to_string(),
            ))
        })?;
    if tag != MANIFEST_SCHEMA_V1 && tag != MANIFEST_SCHEMA_V2 {
        return Err(schema_failure(SchemaError::UnknownSchema(tag.to_string())));
    }
    let record: ManifestRecord = serde_json::from_value(value)
        .map_err(|e| schema_failure(SchemaError::InvalidManifest(e.to_string())))?;
    let manifest = record.into_current();
    validate_contents(&manifest.contents)?;
    Ok(manifest)
}

pub fn manifest_bytes(manifest: &PackManifest) -> Result<Vec<u8>, SpecPackError> {
    canonical::to_canonical_bytes(&ManifestRecord::V2(manifest.clone()))
}

fn validate_contents(contents: &[String]) -> Result<(), SpecPackError> {
    if contents.windows(2).any(|w| w[0] >= w[1]) {
        return Err(schema_failure(SchemaError::UnsortedContents));
    }
    for path in contents {
        validate_content_path(path)?;
    }
    Ok(())
}

fn validate_content_path(path: &str) -> Result<(), SpecPackError> {
    if path == MANIFEST_NAME {
        return Err(schema_failure(SchemaError::InvalidPath {
            path: path.to_string(),
            reason: "reserved for the manifest".to_string(),
        }));
    }
    archive::check_relative_path(path).map_err(|reason| {
        schema_failure(SchemaError::InvalidPath {
            path: path.to_string(),
            reason,
        })
    })
}

/// One content file of a pack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackFile {
    pub path: String,
    pub bytes: Vec<u8>,
    pub is_text: bool,
    pub sha256: String,
}

impl PackFile {
    pub fn new(path: impl Into<String>, bytes: Vec<u8>) -> Self {
        let is_text = is_text_content(&bytes);
        let sha256 = hash::sha256_hex(&bytes);
        Self {
            path: path.into(),
            bytes,
            is_text,
            sha256,
        }
    }

    pub fn text(&self) -> Option<&str> {
        if self.is_text {
            std::str::from_utf8(&self.bytes).ok()
        } else {
            None
        }
    }
}

/// Text means valid UTF-8 with no NUL byte.
pub fn is_text_content(bytes: &[u8]) -> bool {
    !bytes.contains(&0) && std::str::from_utf8(bytes).is_ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecPack {
    manifest: PackManifest,
    files: BTreeMap<String, PackFile>,
    pack_sha256: String,
}

impl SpecPack {
    /// Builds a pack from a manifest template and files. `contents` is
    /// recomputed from the file set.
    pub fn assemble(
        mut manifest: PackManifest,
        files: BTreeMap<String, PackFile>,
    ) -> Result<Self, SpecPackError> {
        manifest.contents = files.keys().cloned().collect();
        validate_contents(&manifest.contents)?;
        let mut pack = Self {
            manifest,
            files,
            pack_sha256: String::new(),
        };
        let bytes = pack.to_archive_bytes()?;
        pack.pack_sha256 = hash::sha256_hex(&bytes);
        Ok(pack)
    }

    /// A pack with no content files, used as the base of a project that has
    /// never adopted anything.
    pub fn empty(project_id: &str) -> Result<Self, SpecPackError> {
        PackBuilder::new(project_id).build()
    }

    pub fn manifest(&self) -> &PackManifest {
        &self.manifest
    }

    pub fn project_id(&self) -> &str {
        &self.manifest.project_id
    }

    pub fn pack_sha256(&self) -> &str {
        &self.pack_sha256
    }

    pub fn files(&self) -> &BTreeMap<String, PackFile> {
        &self.files
    }

    pub fn file(&self, path: &str) -> Option<&PackFile> {
        self.files.get(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn to_archive_bytes(&self) -> Result<Vec<u8>, SpecPackError> {
        let mut entries: FileMap = self
            .files
            .iter()
            .map(|(path, file)| (path.clone(), file.bytes.clone()))
            .collect();
        entries.insert(MANIFEST_NAME.to_string(), manifest_bytes(&self.manifest)?);
        archive::encode_map(&entries)
    }

    /// New pack value with a different file set and the same manifest fields.
    pub fn with_files(&self, files: BTreeMap<String, PackFile>) -> Result<Self, SpecPackError> {
        Self::assemble(self.manifest.clone(), files)
    }
}

pub fn parse(bytes: &[u8]) -> Result<SpecPack, SpecPackError> {
    let mut entries = archive::decode(bytes)?;
    let manifest_raw = entries
        .remove(MANIFEST_NAME)
        .ok_or_else(|| schema_failure(SchemaError::MissingManifest(MANIFEST_NAME.to_string())))?;
    let manifest = parse_manifest(&manifest_raw)?;

    let declared: BTreeSet<&str> = manifest.contents.iter().map(String::as_str).collect();
    let found: BTreeSet<&str> = entries.keys().map(String::as_str).collect();
    let missing: Vec<String> = declared
        .difference(&found)
        .map(|p| p.to_string())
        .collect();
    let extra: Vec<String> = found
        .difference(&declared)
        .map(|p| p.to_string())
        .collect();
    if !missing.is_empty() || !extra.is_empty() {
        return Err(schema_failure(SchemaError::ManifestMismatch { missing, extra }));
    }

    let files = entries
        .into_iter()
        .map(|(path, bytes)| (path.clone(), PackFile::new(path, bytes)))
        .collect();
    let pack = SpecPack::assemble(manifest, files)?;
    debug!(
        project_id = %pack.project_id(),
        files = pack.len(),
        pack_sha256 = %pack.pack_sha256(),
        "parsed pack"
    );
    Ok(pack)
}

pub fn serialize(pack: &SpecPack) -> Result<Vec<u8>, SpecPackError> {
    pack.to_archive_bytes()
}

/// Parses a pack and checks its identity against `expected_sha256`.
pub fn verify_pack(bytes: &[u8], expected_sha256: &str) -> Result<SpecPack, SpecPackError> {
    let pack = parse(bytes)?;
    if pack.pack_sha256() != expected_sha256 {
        return Err(SpecPackError::HashMismatch {
            label: "pack".to_string(),
            expected: expected_sha256.to_string(),
            actual: pack.pack_sha256().to_string(),
        });
    }
    Ok(pack)
}

/// Normalizes a caller-supplied path to the pack's POSIX form.
pub fn normalize_path(raw: &str) -> Result<String, SpecPackError> {
    let mut path = raw.replace('\\', "/");
    while let Some(rest) = path.strip_prefix("./") {
        path = rest.to_string();
    }
    validate_content_path(&path)?;
    Ok(path)
}

/// Assembles a [`SpecPack`] from loose files.
#[derive(Debug, Clone)]
pub struct PackBuilder {
    project_id: String,
    pack_version: String,
    created_at_utc: String,
    provenance: Provenance,
    files: Vec<(String, Vec<u8>)>,
}

impl PackBuilder {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            pack_version: DEFAULT_PACK_VERSION.to_string(),
            created_at_utc: PACK_EPOCH_UTC.to_string(),
            provenance: Provenance::default(),
            files: Vec::new(),
        }
    }

    pub fn pack_version(mut self, version: impl Into<String>) -> Self {
        self.pack_version = version.into();
        self
    }

    pub fn created_at(mut self, created_at_utc: impl Into<String>) -> Self {
        self.created_at_utc = created_at_utc.into();
        self
    }

    pub fn provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    pub fn file(mut self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.files.push((path.into(), bytes.into()));
        self
    }

    /// Adds every regular file under `dir`, except a top-level manifest.
    pub fn dir(mut self, dir: &Path) -> Result<Self, SpecPackError> {
        let mut found = Vec::new();
        collect_files(dir, dir, &mut found)?;
        found.sort();
        for rel in found {
            if rel == MANIFEST_NAME {
                continue;
            }
            let bytes = fs::read(dir.join(&rel))?;
            self.files.push((rel, bytes));
        }
        Ok(self)
    }

    pub fn build(self) -> Result<SpecPack, SpecPackError> {
        if self.project_id.trim().is_empty() {
            return Err(SpecPackError::ValidationError(
                "project_id cannot be empty".to_string(),
            ));
        }
        let mut files = BTreeMap::new();
        for (raw, bytes) in self.files {
            let path = normalize_path(&raw)?;
            if files.contains_key(&path) {
                return Err(SpecPackError::ValidationError(format!(
                    "duplicate pack path '{path}'"
                )));
            }
            files.insert(path.clone(), PackFile::new(path, bytes));
        }
        let manifest = PackManifest {
            created_at_utc: self.created_at_utc,
            project_id: self.project_id,
            pack_version: self.pack_version,
            provenance: self.provenance,
            contents: Vec::new(),
        };
        SpecPack::assemble(manifest, files)
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<(), SpecPackError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path: PathBuf = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(root, &path, out)?;
        } else if file_type.is_file() {
            let rel = path.strip_prefix(root).map_err(|_| {
                SpecPackError::ValidationError(format!("{} escapes {}", path.display(), root.display()))
            })?;
            let parts: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect();
            out.push(parts.join("/"));
        }
    }
    Ok(())
}
