//! Patch building and replay.
//!
//! A patch replays against any base whose touched files still carry the
//! hashes the patch was computed from. Untouched files are carried through,
//! so a base that moved only elsewhere still merges; a base that moved under
//! a touched file yields a conflict, never a silent overwrite.

use crate::core::diff::DiffReport;
use crate::core::error::{ConflictInfo, FileConflict, SpecPackError};
use crate::core::hash;
use crate::core::pack::{PackFile, PackManifest, SpecPack};
use crate::core::unified::{self, FileSection};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub const PATCH_SCHEMA: &str = "specpack.patch.v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddedChange {
    pub path: String,
    pub after_sha256: String,
    pub is_text: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_image_base64: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedChange {
    pub path: String,
    pub before_sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifiedChange {
    pub path: String,
    pub before_sha256: String,
    pub after_sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unified_diff: Option<String>,
    /// Only binary post-images are embedded; text is replayed from `patch_text`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_image_base64: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredChanges {
    pub added: Vec<AddedChange>,
    pub removed: Vec<RemovedChange>,
    pub modified: Vec<ModifiedChange>,
}

impl StructuredChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub schema: String,
    pub base_project_id: String,
    pub base_pack_sha256: String,
    pub target_pack_sha256: String,
    pub target_manifest: PackManifest,
    pub patch_text: String,
    pub structured_changes: StructuredChanges,
    pub summary: String,
}

impl Patch {
    pub fn canonical_hash_hex(&self) -> Result<String, SpecPackError> {
        let bytes = crate::core::canonical::to_canonical_bytes(self)?;
        Ok(hash::sha256_hex(&bytes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Merged(SpecPack),
    Conflict(ConflictInfo),
}

impl ApplyOutcome {
    pub fn into_result(self) -> Result<SpecPack, SpecPackError> {
        match self {
            ApplyOutcome::Merged(pack) => Ok(pack),
            ApplyOutcome::Conflict(info) => Err(SpecPackError::PatchConflict(Box::new(info))),
        }
    }

    pub fn is_merged(&self) -> bool {
        matches!(self, ApplyOutcome::Merged(_))
    }
}

fn require_file<'a>(pack: &'a SpecPack, path: &str, side: &str) -> Result<&'a PackFile, SpecPackError> {
    pack.file(path).ok_or_else(|| {
        SpecPackError::ValidationError(format!(
            "diff names '{path}' but the {side} pack has no such file"
        ))
    })
}

fn binary_post_image(file: &PackFile) -> Option<String> {
    if file.is_text {
        None
    } else {
        Some(BASE64.encode(&file.bytes))
    }
}

/// Packages `diff` (computed from `base` to `proposal`) into a replayable patch.
pub fn build_patch(
    base: &SpecPack,
    proposal: &SpecPack,
    diff: &DiffReport,
    summary: &str,
    base_project_id: &str,
) -> Result<Patch, SpecPackError> {
    let mut changes = StructuredChanges::default();

    for path in &diff.added {
        if base.file(path).is_some() {
            return Err(SpecPackError::ValidationError(format!(
                "diff adds '{path}' but the base pack already has it"
            )));
        }
        let file = require_file(proposal, path, "proposal")?;
        changes.added.push(AddedChange {
            path: path.clone(),
            after_sha256: file.sha256.clone(),
            is_text: file.is_text,
            post_image_base64: binary_post_image(file),
        });
    }

    for path in &diff.removed {
        if proposal.file(path).is_some() {
            return Err(SpecPackError::ValidationError(format!(
                "diff removes '{path}' but the proposal pack still has it"
            )));
        }
        let file = require_file(base, path, "base")?;
        changes.removed.push(RemovedChange {
            path: path.clone(),
            before_sha256: file.sha256.clone(),
        });
    }

    for entry in &diff.modified {
        let before = require_file(base, &entry.path, "base")?;
        let after = require_file(proposal, &entry.path, "proposal")?;
        let post_image = if entry.unified_diff.is_some() {
            None
        } else {
            Some(BASE64.encode(&after.bytes))
        };
        changes.modified.push(ModifiedChange {
            path: entry.path.clone(),
            before_sha256: before.sha256.clone(),
            after_sha256: after.sha256.clone(),
            unified_diff: entry.unified_diff.clone(),
            post_image_base64: post_image,
        });
    }

    let patch = Patch {
        schema: PATCH_SCHEMA.to_string(),
        base_project_id: base_project_id.to_string(),
        base_pack_sha256: base.pack_sha256().to_string(),
        target_pack_sha256: proposal.pack_sha256().to_string(),
        target_manifest: proposal.manifest().clone(),
        patch_text: diff.full_patch.clone(),
        structured_changes: changes,
        summary: summary.to_string(),
    };
    debug!(
        project_id = %base_project_id,
        base = %patch.base_pack_sha256,
        target = %patch.target_pack_sha256,
        "built patch"
    );
    Ok(patch)
}

/// Collects every touched file whose base content is not what the patch expects.
pub fn find_conflicts(base: &SpecPack, patch: &Patch) -> Vec<FileConflict> {
    let mut conflicts = Vec::new();
    let mut expect = |path: &str, expected: Option<&str>| {
        let actual = base.file(path).map(|f| f.sha256.as_str());
        if actual != expected {
            conflicts.push(FileConflict {
                path: path.to_string(),
                expected_sha256: expected.map(str::to_string),
                actual_sha256: actual.map(str::to_string),
            });
        }
    };

    for change in &patch.structured_changes.removed {
        expect(&change.path, Some(&change.before_sha256));
    }
    for change in &patch.structured_changes.modified {
        expect(&change.path, Some(&change.before_sha256));
    }
    for change in &patch.structured_changes.added {
        // Already holding the target content counts as applied.
        let present = base.file(&change.path).map(|f| f.sha256.as_str());
        if present.is_some() && present != Some(change.after_sha256.as_str()) {
            expect(&change.path, None);
        }
    }

    conflicts.sort_by(|a, b| a.path.cmp(&b.path));
    conflicts
}

fn decode_post_image(path: &str, encoded: Option<&String>) -> Result<Vec<u8>, SpecPackError> {
    let encoded = encoded.ok_or_else(|| {
        SpecPackError::MalformedPatch(format!("binary change '{path}' has no post-image"))
    })?;
    BASE64
        .decode(encoded)
        .map_err(|e| SpecPackError::MalformedPatch(format!("post-image of '{path}': {e}")))
}

fn replay_text(
    sections: &BTreeMap<String, FileSection>,
    path: &str,
    original: &str,
) -> Result<Vec<u8>, SpecPackError> {
    let section = sections.get(path).ok_or_else(|| {
        SpecPackError::MalformedPatch(format!("patch text has no section for '{path}'"))
    })?;
    let replayed = unified::apply_hunks(original, &section.hunks)
        .map_err(|reason| SpecPackError::MalformedPatch(format!("'{path}': {reason}")))?;
    Ok(replayed.into_bytes())
}

fn checked_file(path: &str, bytes: Vec<u8>, expected: &str) -> Result<PackFile, SpecPackError> {
    hash::verify_sha256(path, &bytes, expected)?;
    Ok(PackFile::new(path, bytes))
}

/// Applies `patch` to `base`. Returns a conflict when a touched file moved.
pub fn apply_patch(base: &SpecPack, patch: &Patch) -> Result<ApplyOutcome, SpecPackError> {
    if base.project_id() != patch.base_project_id {
        return Err(SpecPackError::ValidationError(format!(
            "patch targets project '{}' but the base belongs to '{}'",
            patch.base_project_id,
            base.project_id()
        )));
    }

    let conflicts = find_conflicts(base, patch);
    if !conflicts.is_empty() {
        let info = ConflictInfo {
            base_project_id: patch.base_project_id.clone(),
            expected_base_pack_sha256: patch.base_pack_sha256.clone(),
            actual_base_pack_sha256: base.pack_sha256().to_string(),
            files: conflicts,
        };
        warn!(conflict = %info, "patch does not apply to current base");
        return Ok(ApplyOutcome::Conflict(info));
    }

    let sections: BTreeMap<String, FileSection> = unified::parse_patch_text(&patch.patch_text)?
        .into_iter()
        .map(|s| (s.path.clone(), s))
        .collect();

    let mut files = base.files().clone();
    let changes = &patch.structured_changes;

    for change in &changes.removed {
        files.remove(&change.path);
    }

    for change in &changes.added {
        let bytes = if change.is_text {
            replay_text(&sections, &change.path, "")?
        } else {
            decode_post_image(&change.path, change.post_image_base64.as_ref())?
        };
        let file = checked_file(&change.path, bytes, &change.after_sha256)?;
        files.insert(change.path.clone(), file);
    }

    for change in &changes.modified {
        let bytes = match &change.post_image_base64 {
            Some(_) => decode_post_image(&change.path, change.post_image_base64.as_ref())?,
            None => {
                let original = files
                    .get(&change.path)
                    .and_then(PackFile::text)
                    .ok_or_else(|| {
                        SpecPackError::MalformedPatch(format!(
                            "text change '{}' targets a non-text base file",
                            change.path
                        ))
                    })?;
                replay_text(&sections, &change.path, original)?
            }
        };
        let file = checked_file(&change.path, bytes, &change.after_sha256)?;
        files.insert(change.path.clone(), file);
    }

    let merged = SpecPack::assemble(patch.target_manifest.clone(), files)?;
    debug!(
        base = %base.pack_sha256(),
        merged = %merged.pack_sha256(),
        "applied patch"
    );
    Ok(ApplyOutcome::Merged(merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::diff::diff;
    use crate::core::pack::PackBuilder;

    fn pack(files: &[(&str, &[u8])]) -> SpecPack {
        files
            .iter()
            .fold(PackBuilder::new("p1"), |b, (p, c)| b.file(*p, c.to_vec()))
            .build()
            .unwrap()
    }

    fn patch_between(a: &SpecPack, b: &SpecPack) -> Patch {
        build_patch(a, b, &diff(a, b), "test", "p1").unwrap()
    }

    #[test]
    fn replay_reaches_proposal_identity() {
        let a = pack(&[
            ("a.json", b"{}"),
            ("spel/app.spel", b"module app\n  page home\n"),
            ("old.txt", b"remove me\n"),
            ("logo.png", &[0x00, 0x10, 0x20]),
        ]);
        let b = pack(&[
            ("a.json", b"{}"),
            ("spel/app.spel", b"module app\n  page home\n  page about\n"),
            ("new.bin", &[0xff, 0x00]),
            ("logo.png", &[0x00, 0x11]),
        ]);
        let merged = apply_patch(&a, &patch_between(&a, &b))
            .unwrap()
            .into_result()
            .unwrap();
        assert_eq!(merged.pack_sha256(), b.pack_sha256());
        assert_eq!(merged, b);
    }

    #[test]
    fn empty_patch_is_identity() {
        let a = pack(&[("a.json", b"{}")]);
        let patch = patch_between(&a, &a);
        assert!(patch.structured_changes.is_empty());
        let merged = apply_patch(&a, &patch).unwrap().into_result().unwrap();
        assert_eq!(merged.pack_sha256(), a.pack_sha256());
    }

    #[test]
    fn diverged_modified_file_conflicts() {
        let a = pack(&[("a.txt", b"one\n")]);
        let b = pack(&[("a.txt", b"two\n")]);
        let moved = pack(&[("a.txt", b"three\n")]);
        match apply_patch(&moved, &patch_between(&a, &b)).unwrap() {
            ApplyOutcome::Conflict(info) => {
                assert_eq!(info.files.len(), 1);
                assert_eq!(info.files[0].path, "a.txt");
                assert_eq!(info.expected_base_pack_sha256, a.pack_sha256());
                assert_eq!(info.actual_base_pack_sha256, moved.pack_sha256());
            }
            ApplyOutcome::Merged(_) => panic!("diverged base must conflict"),
        }
    }

    #[test]
    fn removed_file_missing_from_base_conflicts() {
        let a = pack(&[("a.txt", b"one\n"), ("b.txt", b"b\n")]);
        let b = pack(&[("a.txt", b"one\n")]);
        let moved = pack(&[("a.txt", b"one\n")]);
        let outcome = apply_patch(&moved, &patch_between(&a, &b)).unwrap();
        assert!(!outcome.is_merged());
        assert!(matches!(
            outcome.into_result(),
            Err(SpecPackError::PatchConflict(_))
        ));
    }

    #[test]
    fn untouched_divergence_still_merges() {
        let a = pack(&[("a.txt", b"one\n")]);
        let b = pack(&[("a.txt", b"two\n")]);
        let moved = pack(&[("a.txt", b"one\n"), ("other.txt", b"x\n")]);
        let merged = apply_patch(&moved, &patch_between(&a, &b))
            .unwrap()
            .into_result()
            .unwrap();
        assert_eq!(merged.file("a.txt").unwrap().bytes, b"two\n");
        assert!(merged.file("other.txt").is_some());
    }

    #[test]
    fn tampered_patch_text_is_caught_by_post_hash() {
        let a = pack(&[("a.txt", b"one\n")]);
        let b = pack(&[("a.txt", b"two\n")]);
        let mut patch = patch_between(&a, &b);
        patch.patch_text = patch.patch_text.replace("+two", "+TWO");
        assert!(matches!(
            apply_patch(&a, &patch),
            Err(SpecPackError::HashMismatch { .. })
        ));
    }

    #[test]
    fn foreign_project_is_refused() {
        let a = pack(&[("a.txt", b"one\n")]);
        let mut patch = patch_between(&a, &a);
        patch.base_project_id = "other".to_string();
        assert!(matches!(
            apply_patch(&a, &patch),
            Err(SpecPackError::ValidationError(_))
        ));
    }

    #[test]
    fn patch_hash_is_stable() {
        let a = pack(&[("a.txt", b"one\n")]);
        let b = pack(&[("a.txt", b"two\n")]);
        let p1 = patch_between(&a, &b);
        let p2 = patch_between(&a, &b);
        assert_eq!(p1.canonical_hash_hex().unwrap(), p2.canonical_hash_hex().unwrap());
    }
}
