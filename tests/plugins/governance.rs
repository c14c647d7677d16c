use specpack::core::error::SpecPackError;
use specpack::core::hash;
use specpack::core::store::Store;
use specpack::plugins::governance::{self, GovernanceState, GovernanceStore};
use tempfile::tempdir;

fn test_store() -> (tempfile::TempDir, Store) {
    let tmp = tempdir().unwrap();
    let store = Store::open(tmp.path()).unwrap();
    (tmp, store)
}

fn sha(text: &str) -> String {
    hash::hash_text(text)
}

#[test]
fn fresh_project_reads_unlocked() {
    let (_tmp, store) = test_store();
    assert_eq!(
        governance::state(&store, "shop").unwrap(),
        GovernanceState::unlocked("shop")
    );
    assert!(store.load_state("shop").unwrap().is_none());
}

#[test]
fn lock_persists_across_store_handles() {
    let (tmp, store) = test_store();
    let pinned = sha("v1");
    governance::lock(&store, "shop", &pinned).unwrap();

    let reopened = Store::open(tmp.path()).unwrap();
    let state = governance::state(&reopened, "shop").unwrap();
    assert!(state.locked);
    assert_eq!(state.locked_pack_sha256.as_deref(), Some(pinned.as_str()));
    assert!(state.locked_at_utc.is_some());
    assert!(!governance::is_locked(&reopened, "other").unwrap());
}

#[test]
fn locked_project_refuses_mutation_until_unlocked() {
    let (_tmp, store) = test_store();
    let pinned = sha("v1");
    governance::lock(&store, "shop", &pinned).unwrap();

    match governance::ensure_unlocked(&store, "shop") {
        Err(SpecPackError::LockedPack {
            project_id,
            locked_pack_sha256,
        }) => {
            assert_eq!(project_id, "shop");
            assert_eq!(locked_pack_sha256, pinned);
        }
        other => panic!("expected LockedPack, got {other:?}"),
    }

    let state = governance::unlock(&store, "shop").unwrap();
    assert!(!state.locked);
    assert!(state.locked_pack_sha256.is_none());
    governance::ensure_unlocked(&store, "shop").unwrap();
}

#[test]
fn relock_after_unlock_pins_new_hash() {
    let (_tmp, store) = test_store();
    governance::lock(&store, "shop", &sha("v1")).unwrap();
    assert!(governance::lock(&store, "shop", &sha("v2")).is_err());
    governance::unlock(&store, "shop").unwrap();
    governance::unlock(&store, "shop").unwrap();

    let state = governance::lock(&store, "shop", &sha("v2")).unwrap();
    assert_eq!(state.locked_pack_sha256, Some(sha("v2")));
}

#[test]
fn lock_rejects_non_hash_values() {
    let (_tmp, store) = test_store();
    let upper = sha("v1").to_uppercase();
    for bad in ["", "abc", upper.as_str()] {
        assert!(matches!(
            governance::lock(&store, "shop", bad),
            Err(SpecPackError::ValidationError(_))
        ));
    }
    assert!(!governance::is_locked(&store, "shop").unwrap());
}
