use super::*;
use crate::testonly::random_entry;
use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use rand::Rng as _;

#[test]
fn insert_and_find() {
    let rng = &mut rand::thread_rng();
    let cache = ViewSequenceCache::new();
    let entry = random_entry(rng, 2, Height(3));

    let mut delta = cache.create_delta();
    delta.insert(entry.clone()).unwrap();
    assert!(delta.contains(entry.hash()));
    assert!(delta.insert(entry.clone()).is_err());
    delta.commit();

    let view = cache.view();
    assert_eq!(Some(&entry), view.find(entry.hash()));
    assert!(!view.contains(&rng.gen()));
    assert_eq!(vec![&entry], view.iter().collect::<Vec<_>>());
}

#[test]
fn snapshots_are_isolated() {
    let rng = &mut rand::thread_rng();
    let cache = ViewSequenceCache::new();
    let before = cache.view();

    let mut delta = cache.create_delta();
    delta.insert(random_entry(rng, 1, Height(1))).unwrap();
    // Uncommitted changes are invisible.
    assert!(cache.view().is_empty());
    delta.commit();

    assert!(before.is_empty());
    assert_eq!(cache.view().len(), 1);

    // Dropped deltas are discarded.
    let mut delta = cache.create_delta();
    delta.insert(random_entry(rng, 1, Height(1))).unwrap();
    drop(delta);
    assert_eq!(cache.view().len(), 1);
}

#[test]
fn single_writer() {
    let cache = ViewSequenceCache::new();
    let delta = cache.create_delta();
    assert!(cache.try_create_delta().is_none());
    drop(delta);
    assert!(cache.try_create_delta().is_some());
}

#[test]
fn modify_entry() {
    let rng = &mut rand::thread_rng();
    let cache = ViewSequenceCache::new();
    let entry = random_entry(rng, 2, Height(3));
    let hash = *entry.hash();
    let mut delta = cache.create_delta();
    delta.insert(entry).unwrap();
    assert_eq!(Some(()), delta.modify(&hash, |e| e.set_end(Height(10))));
    assert_eq!(None, delta.modify(&rng.gen(), |e| e.set_end(Height(10))));
    delta.commit();
    assert_eq!(Height(10), cache.view().find(&hash).unwrap().end());
}

#[test]
fn billing_markers() {
    let rng = &mut rand::thread_rng();
    let cache = ViewSequenceCache::new();
    let a = random_entry(rng, 1, Height(3));
    let b = random_entry(rng, 1, Height(3));
    let mut delta = cache.create_delta();
    delta.insert(a.clone()).unwrap();
    delta.insert(b.clone()).unwrap();
    delta.add_billing(Height(5), *a.hash());
    delta.add_billing(Height(5), *b.hash());
    delta.add_billing(Height(6), *b.hash());
    delta.commit();

    let view = cache.view();
    let mut billed = vec![];
    view.for_each_billing(Height(5), |e| billed.push(*e.hash()));
    billed.sort();
    let mut want = vec![*a.hash(), *b.hash()];
    want.sort();
    assert_eq!(want, billed);

    let mut billed = vec![];
    view.for_each_billing(Height(7), |e| billed.push(*e.hash()));
    assert!(billed.is_empty());
}

#[test]
fn billing_clears_the_markers_of_the_height() {
    let rng = &mut rand::thread_rng();
    let cache = ViewSequenceCache::new();
    let a = random_entry(rng, 1, Height(3));
    let b = random_entry(rng, 1, Height(3));
    let mut delta = cache.create_delta();
    delta.insert(a.clone()).unwrap();
    delta.insert(b.clone()).unwrap();
    delta.add_billing(Height(5), *a.hash());
    delta.add_billing(Height(5), *b.hash());
    delta.add_billing(Height(6), *b.hash());
    // Marks of removed entries are cleared without billing.
    delta.add_billing(Height(5), rng.gen());
    delta.commit();

    let mut delta = cache.create_delta();
    let mut billed = vec![];
    assert_eq!(2, delta.bill(Height(5), |e| billed.push(*e.hash())));
    assert_eq!(0, delta.bill(Height(5), |_| panic!("billed twice")));
    delta.commit();
    billed.sort();
    let mut want = vec![*a.hash(), *b.hash()];
    want.sort();
    assert_eq!(want, billed);

    let view = cache.view();
    assert!(!view.billing.contains_key(&Height(5)));
    let mut billed = vec![];
    view.for_each_billing(Height(6), |e| billed.push(*e.hash()));
    assert_eq!(vec![*b.hash()], billed);
}

#[test]
fn prune_respects_end_and_version() {
    let rng = &mut rand::thread_rng();
    let cache = ViewSequenceCache::new();
    let legacy = random_entry(rng, 1, Height(8));
    let current = random_entry(rng, 1, Height(8)).with_version(3);
    let later_end = random_entry(rng, 1, Height(9));

    let mut delta = cache.create_delta();
    for entry in [&legacy, &current, &later_end] {
        delta.insert(entry.clone()).unwrap();
        delta.add_removal(Height(8), *entry.hash());
    }
    assert_eq!(vec![*legacy.hash()], delta.prune(Height(8)));
    assert_eq!(0, delta.removals_at(Height(8)).count());
    // Nothing else is marked.
    assert!(delta.prune(Height(9)).is_empty());
    delta.commit();

    let view = cache.view();
    assert!(!view.contains(legacy.hash()));
    assert!(view.contains(current.hash()));
    assert!(view.contains(later_end.hash()));
}

#[test]
fn latest_view() {
    let rng = &mut rand::thread_rng();
    let cache = ViewSequenceCache::new();
    assert!(cache.view().get_latest_view().is_empty());

    let entry = random_entry(rng, 3, Height(4));
    let mut delta = cache.create_delta();
    assert!(delta.set_latest(*entry.hash()).is_err());
    delta.insert(entry.clone()).unwrap();
    delta.set_latest(*entry.hash()).unwrap();
    delta.commit();
    assert_eq!(
        entry.sequence().maybe_most_recent(),
        Some(&cache.view().get_latest_view())
    );

    // A dangling pointer yields an empty view.
    let mut delta = cache.create_delta();
    delta.add_removal(Height(4), *entry.hash());
    delta.prune(Height(4));
    delta.commit();
    assert_matches!(cache.view().latest(), Some(latest) if latest.hash == *entry.hash());
    assert!(cache.view().get_latest_view().is_empty());
}
