//! Deterministic ZIP codec for pack archives.
//!
//! `encode` is a pure function of the path→bytes map: entries are written in
//! ascending path order, every entry carries the ZIP epoch as its timestamp,
//! the same Deflate level and the same unix permissions. Local headers and the
//! central directory therefore depend only on (path, bytes).

use crate::core::error::{ArchiveError, SpecPackError};
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use tracing::{debug, error};
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

/// Deflate level used for every entry. Changing it changes every pack identity.
pub const COMPRESSION_LEVEL: i32 = 6;

/// Unix mode recorded for every entry.
pub const ENTRY_PERMISSIONS: u32 = 0o644;

/// Upper bound on the total decoded size of one archive.
pub const MAX_DECODED_BYTES: u64 = 256 * 1024 * 1024;

pub type FileMap = BTreeMap<String, Vec<u8>>;

fn entry_options() -> FileOptions {
    FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(COMPRESSION_LEVEL))
        .last_modified_time(DateTime::default())
        .unix_permissions(ENTRY_PERMISSIONS)
}

/// Checks that `path` is a relative POSIX path without traversal segments.
pub fn check_relative_path(path: &str) -> Result<(), String> {
    if path.is_empty() {
        return Err("path is empty".to_string());
    }
    if path.starts_with('/') {
        return Err("path is absolute".to_string());
    }
    if path.contains('\\') {
        return Err("path contains a backslash".to_string());
    }
    if path.ends_with('/') {
        return Err("path names a directory".to_string());
    }
    if let Some(c) = path.chars().find(|c| c.is_control()) {
        return Err(format!("path contains control character {c:?}"));
    }
    for segment in path.split('/') {
        match segment {
            "" => return Err("path contains an empty segment".to_string()),
            "." | ".." => return Err(format!("path contains a '{segment}' segment")),
            _ => {}
        }
    }
    Ok(())
}

fn corrupt(reason: impl Into<String>) -> SpecPackError {
    let reason = reason.into();
    error!(%reason, "rejecting corrupt archive");
    SpecPackError::Archive(ArchiveError::Corrupt { reason })
}

fn zip_failure(context: &str, err: ZipError) -> SpecPackError {
    corrupt(format!("{context}: {err}"))
}

/// Encodes files into archive bytes. Iteration order of the input is irrelevant.
pub fn encode<'a, I>(files: I) -> Result<Vec<u8>, SpecPackError>
where
    I: IntoIterator<Item = (&'a String, &'a Vec<u8>)>,
{
    let sorted: BTreeMap<&String, &Vec<u8>> = files.into_iter().collect();

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (path, bytes) in &sorted {
        check_relative_path(path).map_err(|reason| {
            SpecPackError::ValidationError(format!("cannot archive '{path}': {reason}"))
        })?;
        writer
            .start_file(path.as_str(), entry_options())
            .map_err(|e| SpecPackError::ValidationError(format!("cannot archive '{path}': {e}")))?;
        writer.write_all(bytes)?;
    }
    let cursor = writer
        .finish()
        .map_err(|e| SpecPackError::ValidationError(format!("cannot finish archive: {e}")))?;
    let out = cursor.into_inner();
    debug!(entries = sorted.len(), bytes = out.len(), "encoded archive");
    Ok(out)
}

pub fn encode_map(files: &FileMap) -> Result<Vec<u8>, SpecPackError> {
    encode(files.iter())
}

/// Decodes archive bytes, verifying the central directory and every entry checksum.
pub fn decode(bytes: &[u8]) -> Result<FileMap, SpecPackError> {
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).map_err(|e| zip_failure("unreadable container", e))?;

    let mut files = FileMap::new();
    let mut total: u64 = 0;
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| zip_failure(&format!("entry {index}"), e))?;
        let name = entry.name().to_string();
        if entry.is_dir() {
            return Err(corrupt(format!("entry '{name}' is a directory")));
        }
        check_relative_path(&name).map_err(|reason| corrupt(format!("entry '{name}': {reason}")))?;
        if files.contains_key(&name) {
            return Err(corrupt(format!("duplicate entry '{name}'")));
        }

        total = total.saturating_add(entry.size());
        if total > MAX_DECODED_BYTES {
            return Err(corrupt(format!(
                "decoded size exceeds {MAX_DECODED_BYTES} bytes"
            )));
        }

        let mut data = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut data)
            .map_err(|e| corrupt(format!("entry '{name}': {e}")))?;
        if data.len() as u64 != entry.size() {
            return Err(corrupt(format!(
                "entry '{name}' declares {} bytes but holds {}",
                entry.size(),
                data.len()
            )));
        }
        files.insert(name, data);
    }

    debug!(entries = files.len(), "decoded archive");
    Ok(files)
}
