use rusqlite::params;
use specpack::core::canonical;
use specpack::core::diff::diff;
use specpack::core::error::SpecPackError;
use specpack::core::pack::{PackBuilder, SpecPack};
use specpack::core::patch::build_patch;
use specpack::core::store::Store;
use specpack::plugins::proposal::{
    self, Evidence, ProposalMeta, ProposalRecord, ProposalStore, ProposalV1,
};
use tempfile::tempdir;

fn test_store() -> (tempfile::TempDir, Store) {
    let tmp = tempdir().unwrap();
    let store = Store::open(tmp.path()).unwrap();
    (tmp, store)
}

fn pack_of(project: &str, files: &[(&str, &str)]) -> SpecPack {
    files
        .iter()
        .fold(PackBuilder::new(project), |b, (p, c)| b.file(*p, *c))
        .build()
        .unwrap()
}

fn record(
    store: &Store,
    base: &SpecPack,
    next: &SpecPack,
    created_at: &str,
) -> proposal::Proposal {
    let project = base.project_id();
    let patch = build_patch(base, next, &diff(base, next), "change", project).unwrap();
    let evidence = Evidence::between(base, next).unwrap();
    proposal::create(store, patch, evidence, ProposalMeta::new(created_at)).unwrap()
}

#[test]
fn same_content_dedupes_to_one_record() {
    let (_tmp, store) = test_store();
    let base = pack_of("shop", &[("a.json", "1\n")]);
    let next = pack_of("shop", &[("a.json", "2\n")]);

    let first = record(&store, &base, &next, "2026-03-01T10:00:00Z");
    let again = record(&store, &base, &next, "2026-03-02T10:00:00Z");
    assert_eq!(first.id, again.id);
    assert_eq!(again.created_at_utc, "2026-03-01T10:00:00Z");
    assert_eq!(store.list("shop").unwrap(), vec![first.clone()]);
    assert_eq!(store.get(&first.id).unwrap(), Some(first));
}

#[test]
fn regenerating_against_new_base_replaces_stored_record() {
    let (_tmp, store) = test_store();
    let old_base = pack_of("shop", &[("a.json", "1\n")]);
    let new_base = pack_of("shop", &[("a.json", "1\n"), ("b.json", "1\n")]);
    let next = pack_of("shop", &[("a.json", "2\n")]);

    let stale = record(&store, &old_base, &next, "2026-03-01T10:00:00Z");
    let fresh = record(&store, &new_base, &next, "2026-03-04T10:00:00Z");
    assert_eq!(stale.id, fresh.id);
    assert_eq!(fresh.evidence.base_pack_sha256, new_base.pack_sha256());
    assert_eq!(fresh.created_at_utc, "2026-03-04T10:00:00Z");
    assert_eq!(store.get(&fresh.id).unwrap(), Some(fresh.clone()));
    assert_eq!(store.list("shop").unwrap(), vec![fresh.clone()]);
    assert!(proposal::is_applyable(&fresh, "shop", new_base.pack_sha256()));
}

#[test]
fn list_is_ordered_and_scoped_by_project() {
    let (_tmp, store) = test_store();
    let base = pack_of("shop", &[("a.json", "1\n")]);
    let later = record(
        &store,
        &base,
        &pack_of("shop", &[("a.json", "3\n")]),
        "2026-03-05T00:00:00Z",
    );
    let earlier = record(
        &store,
        &base,
        &pack_of("shop", &[("a.json", "2\n")]),
        "2026-03-01T00:00:00Z",
    );
    let other_base = pack_of("blog", &[("a.json", "1\n")]);
    record(
        &store,
        &other_base,
        &pack_of("blog", &[("a.json", "2\n")]),
        "2026-03-02T00:00:00Z",
    );

    let ids: Vec<String> = store
        .list("shop")
        .unwrap()
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(ids, vec![earlier.id, later.id]);
    assert_eq!(store.list("blog").unwrap().len(), 1);
    assert!(store.list("none").unwrap().is_empty());
}

#[test]
fn applyable_only_against_recorded_base() {
    let (_tmp, store) = test_store();
    let base = pack_of("shop", &[("a.json", "1\n")]);
    let next = pack_of("shop", &[("a.json", "2\n")]);
    let p = record(&store, &base, &next, "2026-03-01T00:00:00Z");

    assert!(proposal::is_applyable(&p, "shop", base.pack_sha256()));
    assert!(!proposal::is_applyable(&p, "shop", next.pack_sha256()));
    assert!(!proposal::is_applyable(&p, "blog", base.pack_sha256()));
    assert!(matches!(
        proposal::ensure_applyable(&p, "shop", next.pack_sha256()),
        Err(SpecPackError::StaleProposal { .. })
    ));
}

#[test]
fn stored_v1_records_load_as_current() {
    let (_tmp, store) = test_store();
    let base = pack_of("shop", &[("a.json", "1\n")]);
    let next = pack_of("shop", &[("a.json", "2\n"), ("app.spel", "module app\n")]);
    let patch = build_patch(&base, &next, &diff(&base, &next), "legacy", "shop").unwrap();
    let evidence = Evidence::between(&base, &next).unwrap();
    let id = proposal::proposal_id(&evidence.proposal_pack_sha256).unwrap();
    let legacy = ProposalRecord::V1(ProposalV1 {
        id: id.clone(),
        kind: proposal::DEFAULT_KIND.to_string(),
        created_at_utc: "2025-12-31T23:59:59Z".to_string(),
        summary: "legacy".to_string(),
        rationale: vec!["imported".to_string()],
        patch,
        evidence,
    });
    let raw = canonical::to_canonical_string(&legacy).unwrap();
    store
        .with_conn(Some("shop"), "test.seed", |conn| {
            conn.execute(
                "INSERT INTO proposals(id, project_id, created_at_utc, record) VALUES(?1, ?2, ?3, ?4)",
                params![id, "shop", "2025-12-31T23:59:59Z", raw],
            )?;
            Ok(())
        })
        .unwrap();

    let loaded = store.get(&id).unwrap().unwrap();
    assert_eq!(loaded.rationale, vec!["imported"]);
    assert_eq!(
        loaded.apply.next_step_href,
        format!("/projects/shop/proposals/{id}/apply")
    );
    assert_eq!(loaded.apply.next_step_label, proposal::DEFAULT_NEXT_STEP_LABEL);
}

#[test]
fn unknown_record_schema_is_rejected() {
    let raw = r#"{"schema": "specpack.proposal.v9", "id": "x"}"#;
    assert!(matches!(
        proposal::parse_record(raw),
        Err(SpecPackError::ValidationError(_))
    ));
}
