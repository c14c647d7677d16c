use pretty_assertions::assert_eq;
use specpack::core::archive::{self, FileMap};
use specpack::core::broker::DbBroker;
use specpack::core::canonical;
use specpack::core::diff::diff;
use specpack::core::error::{SchemaError, SpecPackError};
use specpack::core::hash;
use specpack::core::pack::{self, MANIFEST_NAME, PackBuilder, PackManifest, Provenance, SpecPack};
use specpack::core::patch::{ApplyOutcome, apply_patch, build_patch};
use specpack::core::repository::ProjectRepository;
use specpack::core::store::Store;
use std::fs;
use tempfile::tempdir;

fn pack_of(project: &str, files: &[(&str, &str)]) -> SpecPack {
    files
        .iter()
        .fold(PackBuilder::new(project), |b, (p, c)| b.file(*p, *c))
        .build()
        .unwrap()
}

#[test]
fn insertion_order_does_not_change_pack_identity() {
    let forward = pack_of(
        "shop",
        &[("a.json", "{}\n"), ("spel/app.spel", "module app\n"), ("z.md", "# z\n")],
    );
    let backward = pack_of(
        "shop",
        &[("z.md", "# z\n"), ("spel/app.spel", "module app\n"), ("a.json", "{}\n")],
    );
    assert_eq!(forward.pack_sha256(), backward.pack_sha256());
    assert_eq!(
        forward.to_archive_bytes().unwrap(),
        backward.to_archive_bytes().unwrap()
    );
}

#[test]
fn serialized_pack_reparses_to_same_identity() {
    let original = pack_of("shop", &[("a.json", "{}\n"), ("b.bin", "\u{0}\u{1}")]);
    let bytes = pack::serialize(&original).unwrap();
    let reparsed = pack::parse(&bytes).unwrap();
    assert_eq!(reparsed.pack_sha256(), original.pack_sha256());
    assert_eq!(reparsed.pack_sha256(), hash::sha256_hex(&bytes));
    assert!(!reparsed.file("b.bin").unwrap().is_text);
}

#[test]
fn archive_decode_returns_encoded_files() {
    let mut files = FileMap::new();
    files.insert("docs/readme.md".to_string(), b"hello\n".to_vec());
    files.insert("a.json".to_string(), b"{}".to_vec());
    files.insert("empty.txt".to_string(), Vec::new());
    let bytes = archive::encode_map(&files).unwrap();
    assert_eq!(archive::decode(&bytes).unwrap(), files);
}

#[test]
fn garbage_bytes_are_corrupt_archives() {
    assert!(matches!(
        archive::decode(b"definitely not a zip"),
        Err(SpecPackError::Archive(_))
    ));
}

#[test]
fn diff_of_pack_with_itself_is_empty() {
    let p = pack_of("shop", &[("a.json", "{}\n"), ("b.md", "text\n")]);
    let report = diff(&p, &p);
    assert!(report.is_empty());
    assert_eq!(report.full_patch, "");
}

#[test]
fn patch_replay_reaches_proposal_hash() {
    let base = pack_of(
        "shop",
        &[("a.json", "{\n  \"x\": 1\n}\n"), ("gone.md", "bye\n")],
    );
    let proposal = PackBuilder::new("shop")
        .pack_version("2")
        .file("a.json", "{\n  \"x\": 2\n}\n")
        .file("new.spel", "module shop\n")
        .file("logo.png", vec![0x89, b'P', b'N', b'G', 0, 1, 2])
        .build()
        .unwrap();
    let report = diff(&base, &proposal);
    assert_eq!(report.added, vec!["logo.png", "new.spel"]);
    assert_eq!(report.removed, vec!["gone.md"]);
    assert_eq!(report.modified_paths().collect::<Vec<_>>(), vec!["a.json"]);

    let patch = build_patch(&base, &proposal, &report, "rework", "shop").unwrap();
    let merged = apply_patch(&base, &patch).unwrap().into_result().unwrap();
    assert_eq!(merged.pack_sha256(), proposal.pack_sha256());
    assert_eq!(merged.manifest().pack_version, "2");
}

#[test]
fn text_with_bare_carriage_returns_replays_exactly() {
    let base = pack_of("shop", &[("notes.md", "one\rtwo\nthree\n")]);
    let proposal = pack_of("shop", &[("notes.md", "one\rTWO\nthree\n")]);
    let report = diff(&base, &proposal);
    let patch = build_patch(&base, &proposal, &report, "caps", "shop").unwrap();
    let merged = apply_patch(&base, &patch).unwrap().into_result().unwrap();
    assert_eq!(merged.pack_sha256(), proposal.pack_sha256());
}

#[test]
fn applying_twice_to_unchanged_base_is_idempotent() {
    let base = pack_of("shop", &[("a.json", "1\n")]);
    let proposal = pack_of("shop", &[("a.json", "2\n")]);
    let patch = build_patch(&base, &proposal, &diff(&base, &proposal), "bump", "shop").unwrap();
    let first = apply_patch(&base, &patch).unwrap();
    let second = apply_patch(&base, &patch).unwrap();
    assert_eq!(first, second);
    assert!(first.is_merged());
}

#[test]
fn diverged_base_reports_conflicting_files() {
    let base = pack_of("shop", &[("a.json", "1\n"), ("b.json", "1\n")]);
    let proposal = pack_of("shop", &[("a.json", "2\n"), ("b.json", "1\n")]);
    let patch = build_patch(&base, &proposal, &diff(&base, &proposal), "bump", "shop").unwrap();

    let moved = pack_of("shop", &[("a.json", "9\n"), ("b.json", "1\n")]);
    match apply_patch(&moved, &patch).unwrap() {
        ApplyOutcome::Conflict(info) => {
            assert_eq!(info.expected_base_pack_sha256, base.pack_sha256());
            assert_eq!(info.actual_base_pack_sha256, moved.pack_sha256());
            assert_eq!(info.files.len(), 1);
            assert_eq!(info.files[0].path, "a.json");
            assert_eq!(
                info.files[0].actual_sha256.as_deref(),
                Some(hash::hash_text("9\n").as_str())
            );
        }
        ApplyOutcome::Merged(_) => panic!("expected a conflict"),
    }
    assert!(matches!(
        apply_patch(&moved, &patch).unwrap().into_result(),
        Err(SpecPackError::PatchConflict(_))
    ));
}

#[test]
fn adding_spel_file_to_base() {
    let base = pack_of("shop", &[("a.json", "{}")]);
    let proposal = pack_of("shop", &[("a.json", "{}"), ("b.spel", "module b\n")]);
    let report = diff(&base, &proposal);
    assert_eq!(report.added, vec!["b.spel"]);
    assert!(report.removed.is_empty());
    assert!(report.modified.is_empty());
    assert!(report.full_patch.starts_with("diff --git a/b.spel b/b.spel\n"));
    assert!(report.full_patch.contains("--- /dev/null\n+++ b/b.spel\n"));

    let patch = build_patch(&base, &proposal, &report, "add b", "shop").unwrap();
    let merged = apply_patch(&base, &patch).unwrap().into_result().unwrap();
    assert_eq!(merged.pack_sha256(), proposal.pack_sha256());
}

#[test]
fn manifest_listing_missing_file_is_rejected() {
    let manifest = PackManifest {
        created_at_utc: pack::PACK_EPOCH_UTC.to_string(),
        project_id: "shop".to_string(),
        pack_version: "1".to_string(),
        provenance: Provenance::default(),
        contents: vec!["a.json".to_string(), "b.json".to_string()],
    };
    let mut files = FileMap::new();
    files.insert(MANIFEST_NAME.to_string(), pack::manifest_bytes(&manifest).unwrap());
    files.insert("a.json".to_string(), b"{}".to_vec());
    let bytes = archive::encode_map(&files).unwrap();

    match pack::parse(&bytes) {
        Err(SpecPackError::Schema(SchemaError::ManifestMismatch { missing, extra })) => {
            assert_eq!(missing, vec!["b.json"]);
            assert!(extra.is_empty());
        }
        other => panic!("expected ManifestMismatch, got {other:?}"),
    }
}

#[test]
fn archive_without_manifest_is_rejected() {
    let mut files = FileMap::new();
    files.insert("a.json".to_string(), b"{}".to_vec());
    let bytes = archive::encode_map(&files).unwrap();
    assert!(matches!(
        pack::parse(&bytes),
        Err(SpecPackError::Schema(SchemaError::MissingManifest(_)))
    ));
}

#[test]
fn verify_pack_rejects_wrong_identity() {
    let p = pack_of("shop", &[("a.json", "{}")]);
    let bytes = p.to_archive_bytes().unwrap();
    assert!(pack::verify_pack(&bytes, p.pack_sha256()).is_ok());
    assert!(matches!(
        pack::verify_pack(&bytes, hash::EMPTY_SHA256),
        Err(SpecPackError::HashMismatch { .. })
    ));
}

#[test]
fn canonical_json_is_insertion_order_independent() {
    let a = canonical::canonicalize_json(r#"{"b":1,"a":{"d":[1,2],"c":null}}"#).unwrap();
    let b = canonical::canonicalize_json(r#"{"a":{"c":null,"d":[1,2]},"b":1}"#).unwrap();
    assert_eq!(a, b);
    assert!(a.ends_with("}\n"));
    assert!(a.starts_with("{\n  \"a\": {"));
}

#[test]
fn builder_reads_directory_tree() {
    let tmp = tempdir().unwrap();
    fs::create_dir_all(tmp.path().join("spel")).unwrap();
    fs::write(tmp.path().join("a.json"), "{}").unwrap();
    fs::write(tmp.path().join("spel/app.spel"), "module app\n").unwrap();
    fs::write(tmp.path().join(MANIFEST_NAME), "ignored").unwrap();

    let from_dir = PackBuilder::new("shop").dir(tmp.path()).unwrap().build().unwrap();
    let from_files = pack_of("shop", &[("spel/app.spel", "module app\n"), ("a.json", "{}")]);
    assert_eq!(from_dir.pack_sha256(), from_files.pack_sha256());
    assert_eq!(
        from_dir.paths().collect::<Vec<_>>(),
        vec!["a.json", "spel/app.spel"]
    );
}

#[test]
fn store_base_swap_is_compare_and_swap() {
    let tmp = tempdir().unwrap();
    let store = Store::open(tmp.path()).unwrap();
    let first = pack_of("shop", &[("a.json", "1\n")]);
    let second = pack_of("shop", &[("a.json", "2\n")]);

    assert!(store.get_base("shop").unwrap().is_none());
    store.try_set_base("shop", None, &first).unwrap();
    assert!(matches!(
        store.try_set_base("shop", None, &second),
        Err(SpecPackError::BaseMoved { .. })
    ));
    store
        .try_set_base("shop", Some(first.pack_sha256()), &second)
        .unwrap();

    let loaded = store.get_base("shop").unwrap().unwrap();
    assert_eq!(loaded.pack_sha256(), second.pack_sha256());
    assert_eq!(
        store.base_sha256("shop").unwrap().as_deref(),
        Some(second.pack_sha256())
    );
}

#[test]
fn brokered_operations_are_audited() {
    let tmp = tempdir().unwrap();
    let store = Store::open(tmp.path()).unwrap().with_actor("tester");
    let p = pack_of("shop", &[("a.json", "{}")]);
    store.try_set_base("shop", None, &p).unwrap();

    let events = DbBroker::new(tmp.path()).read_events().unwrap();
    let swap = events
        .iter()
        .find(|e| e.op == "base.swap")
        .expect("swap event");
    assert_eq!(swap.actor, "tester");
    assert_eq!(swap.project_id.as_deref(), Some("shop"));
    assert_eq!(swap.status, "success");
}
