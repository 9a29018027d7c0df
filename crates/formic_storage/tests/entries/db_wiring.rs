#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use formic_kernel_contracts::form::{Form, FormDraft, Identity, OwnerId};
use formic_kernel_contracts::DeploymentVariant;
use formic_storage::clock::ManualClock;
use formic_storage::memory::MemoryBackend;
use formic_storage::{FormStore, StoreLayout};

fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn store_with_form(clock: Arc<ManualClock>) -> (FormStore<MemoryBackend>, Form) {
    let store = FormStore::with_clock(
        MemoryBackend::new(),
        StoreLayout::for_variant(DeploymentVariant::MultiTenant),
        clock,
    );
    let form = store
        .create_form(
            &Identity::Owner(OwnerId::new("owner_1").unwrap()),
            &FormDraft::v1("Contact", "https://example.com/thanks"),
        )
        .unwrap();
    (store, form)
}

#[test]
fn at_entries_db_01_field_registry_is_a_union_across_submissions() {
    let (store, form) = store_with_form(Arc::new(ManualClock::at(1_700_000_000)));

    store
        .submit_entry(&form.id, fields(&[("a", "1"), ("b", "2")]))
        .unwrap();
    let registry = store.list_fields(&form.id).unwrap();
    assert_eq!(
        registry,
        BTreeSet::from(["a".to_string(), "b".to_string()])
    );

    store
        .submit_entry(&form.id, fields(&[("b", "3"), ("c", "4")]))
        .unwrap();
    let registry = store.list_fields(&form.id).unwrap();
    assert_eq!(
        registry,
        BTreeSet::from(["a".to_string(), "b".to_string(), "c".to_string()])
    );
}

#[test]
fn at_entries_db_02_later_entries_are_listed_first() {
    let clock = Arc::new(ManualClock::at(1_700_000_000));
    let (store, form) = store_with_form(clock.clone());

    let first = store
        .submit_entry(&form.id, fields(&[("email", "first@example.com")]))
        .unwrap();
    clock.advance(5);
    let second = store
        .submit_entry(&form.id, fields(&[("email", "second@example.com")]))
        .unwrap();

    let listed = store.list_entries(&form.id).unwrap();
    let ids: Vec<_> = listed.iter().map(|e| e.id.clone()).collect();
    assert_eq!(ids, vec![second.id, first.id]);
    assert_eq!(listed[0].submitted, 1_700_000_005);
    assert_eq!(listed[0].submitted_display, "Nov 14 22:13:25");
    assert_eq!(
        listed[1].fields.get("email").map(String::as_str),
        Some("first@example.com")
    );
}

#[test]
fn at_entries_db_03_arbitrary_shapes_are_accepted() {
    let (store, form) = store_with_form(Arc::new(ManualClock::at(10)));

    let empty = store.submit_entry(&form.id, BTreeMap::new()).unwrap();
    let odd = store
        .submit_entry(
            &form.id,
            fields(&[("weird:key", "x"), ("", "blank name"), ("ünïcode", "✓")]),
        )
        .unwrap();

    let listed = store.list_entries(&form.id).unwrap();
    assert_eq!(listed.len(), 2);
    let empty_view = listed.iter().find(|e| e.id == empty.id).unwrap();
    assert!(empty_view.fields.is_empty());
    let odd_view = listed.iter().find(|e| e.id == odd.id).unwrap();
    assert_eq!(odd_view.fields, odd.fields);
    assert!(store.list_fields(&form.id).unwrap().contains("weird:key"));
}

#[test]
fn at_entries_db_04_register_field_is_idempotent() {
    let (store, form) = store_with_form(Arc::new(ManualClock::at(10)));
    store.register_field(&form.id, "name").unwrap();
    store.register_field(&form.id, "name").unwrap();
    assert_eq!(
        store.list_fields(&form.id).unwrap(),
        BTreeSet::from(["name".to_string()])
    );
}

#[test]
fn at_entries_db_05_submission_lands_as_one_batch() {
    let (store, form) = store_with_form(Arc::new(ManualClock::at(10)));
    let before = store.backend().applied_writes();
    store
        .submit_entry(&form.id, fields(&[("a", "1"), ("b", "2")]))
        .unwrap();
    // entry hash + two registry adds + one index add
    assert_eq!(store.backend().applied_writes() - before, 4);
}
