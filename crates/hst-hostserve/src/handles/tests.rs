//! Unit tests for per-client handle ownership.

use rstest::{fixture, rstest};

use super::*;

#[fixture]
fn table() -> HandleTable<&'static str> {
    HandleTable::new()
}

#[rstest]
fn handles_are_scoped_to_their_owner(table: HandleTable<&'static str>) {
    let alice = ClientId::generate();
    let bob = ClientId::generate();
    let handle = table.insert(alice, "alice.txt");
    assert!(table.get(alice, handle).is_some());
    assert!(table.get(bob, handle).is_none());
    assert!(!table.remove(bob, handle));
    assert!(table.remove(alice, handle));
    assert!(table.is_empty());
}

#[rstest]
fn releasing_a_client_leaves_others_open(table: HandleTable<&'static str>) {
    let alice = ClientId::generate();
    let bob = ClientId::generate();
    table.insert(alice, "one");
    table.insert(alice, "two");
    let kept = table.insert(bob, "three");

    assert_eq!(table.release_client(alice), 2);
    assert_eq!(table.release_client(alice), 0);
    assert_eq!(table.len(), 1);
    assert!(table.get(bob, kept).is_some());
}

#[rstest]
fn handles_are_never_reused(table: HandleTable<&'static str>) {
    let owner = ClientId::generate();
    let first = table.insert(owner, "a");
    table.remove(owner, first);
    let second = table.insert(owner, "b");
    assert_ne!(first, second);
}
