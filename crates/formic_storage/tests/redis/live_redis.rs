#![forbid(unsafe_code)]

//! Runs against a real Redis. `FORMIC_TEST_REDIS_HOST` picks the host (default 127.0.0.1):
//! `cargo test -p formic_storage --test live_redis -- --ignored`

use std::collections::BTreeMap;
use std::sync::Arc;

use formic_kernel_contracts::form::{FormDraft, Identity, OwnerId};
use formic_kernel_contracts::DeploymentVariant;
use formic_storage::clock::ManualClock;
use formic_storage::ids::new_id;
use formic_storage::redis_backend::RedisBackend;
use formic_storage::{FormStore, StoreLayout};

fn live_store(clock: Arc<ManualClock>) -> FormStore<RedisBackend> {
    let host =
        std::env::var("FORMIC_TEST_REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let backend = RedisBackend::connect(&host, 2).unwrap();
    FormStore::with_clock(
        backend,
        StoreLayout::for_variant(DeploymentVariant::MultiTenant),
        clock,
    )
}

/// Fresh owner per run so repeated runs against one server never see each other's forms.
fn fresh_owner() -> Identity {
    Identity::Owner(OwnerId::new(format!("live_{}", new_id(8))).unwrap())
}

#[test]
#[ignore = "needs a running redis"]
fn at_redis_01_entries_come_back_most_recent_first() {
    let clock = Arc::new(ManualClock::at(1_700_000_000));
    let store = live_store(clock.clone());
    store.ping().unwrap();
    let form = store
        .create_form(&fresh_owner(), &FormDraft::v1("Live", "https://example.com/"))
        .unwrap();

    let mut stored = Vec::new();
    for n in 0..3 {
        let fields = BTreeMap::from([("n".to_string(), n.to_string())]);
        stored.push(store.submit_entry(&form.id, fields).unwrap().id);
        clock.advance(7);
    }

    let listed = store.list_entries(&form.id).unwrap();
    let ids: Vec<_> = listed.iter().map(|e| e.id.clone()).collect();
    stored.reverse();
    assert_eq!(ids, stored);
    assert_eq!(listed[0].submitted, 1_700_000_014);
    assert_eq!(listed[2].fields.get("n").map(String::as_str), Some("0"));
}

#[test]
#[ignore = "needs a running redis"]
fn at_redis_02_batched_writes_land_together() {
    let store = live_store(Arc::new(ManualClock::at(1_700_000_000)));
    let owner = fresh_owner();
    let form = store
        .create_form(&owner, &FormDraft::v1("Live", "https://example.com/"))
        .unwrap();

    assert_eq!(store.get_form(&form.id).unwrap(), Some(form.clone()));
    assert!(store.owns_form(&owner, &form.id).unwrap());

    store.delete_form(&owner, &form.id).unwrap();
    assert!(!store.owns_form(&owner, &form.id).unwrap());
    assert!(store.list_forms(&owner).unwrap().is_empty());
    assert!(store.get_form(&form.id).unwrap().is_some());
}
