//! Behaviour-driven tests for the sandboxed filesystem service.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;

use hst_broker::CallContext;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;

use super::{ReverseSession, reverse_session};
use crate::{HostCallError, HostCapabilities, RemoteDirEntry, Sandbox};

// ---------------------------------------------------------------------------
// Test world
// ---------------------------------------------------------------------------

#[derive(Default)]
struct TestWorld {
    root: Option<TempDir>,
    reverse: Option<ReverseSession>,
    listing: Option<Result<Vec<RemoteDirEntry>, HostCallError>>,
    outcome: Option<Result<(), HostCallError>>,
}

impl TestWorld {
    fn root(&self) -> &TempDir {
        self.root.as_ref().expect("sandbox not created")
    }

    fn reverse(&self) -> &ReverseSession {
        self.reverse.as_ref().expect("worker not connected")
    }
}

#[fixture]
fn world() -> TestWorld {
    TestWorld::default()
}

// ---------------------------------------------------------------------------
// Given steps
// ---------------------------------------------------------------------------

#[given("a sandbox containing file {file} and directory {dir}")]
fn given_sandbox(world: &mut TestWorld, file: String, dir: String) {
    let root = TempDir::new().expect("temp dir");
    fs::write(root.path().join(file.trim_matches('"')), b"contents").expect("seed file");
    fs::create_dir(root.path().join(dir.trim_matches('"'))).expect("seed dir");
    world.root = Some(root);
}

#[given("a worker connected to host services")]
fn given_worker(world: &mut TestWorld) {
    let sandbox = Sandbox::open(world.root().path()).expect("sandbox");
    world.reverse = Some(reverse_session(Arc::new(HostCapabilities::new(sandbox))));
}

// ---------------------------------------------------------------------------
// When steps
// ---------------------------------------------------------------------------

#[when("the worker lists {path}")]
fn when_list(world: &mut TestWorld, path: String) {
    let listing = world
        .reverse()
        .client
        .read_dir(&CallContext::background(), path.trim_matches('"'));
    world.listing = Some(listing);
}

#[when("the worker reads {path}")]
fn when_read(world: &mut TestWorld, path: String) {
    let outcome = world
        .reverse()
        .client
        .read_file(&CallContext::background(), path.trim_matches('"'))
        .map(drop);
    world.outcome = Some(outcome);
}

#[when("the worker writes {path} with mode {mode}")]
fn when_write(world: &mut TestWorld, path: String, mode: u32) {
    let outcome = world.reverse().client.write_file(
        &CallContext::background(),
        path.trim_matches('"'),
        b"written",
        mode,
    );
    world.outcome = Some(outcome);
}

// ---------------------------------------------------------------------------
// Then steps
// ---------------------------------------------------------------------------

#[then("the listing is {file} file and {dir} directory")]
fn then_listing(world: &mut TestWorld, file: String, dir: String) {
    let mut entries = world
        .listing
        .clone()
        .expect("no listing")
        .expect("listing failed");
    entries.sort();
    let summary: Vec<_> = entries
        .iter()
        .map(|entry| (entry.name().to_owned(), entry.is_dir()))
        .collect();
    assert_eq!(
        summary,
        vec![
            (file.trim_matches('"').to_owned(), false),
            (dir.trim_matches('"').to_owned(), true),
        ]
    );
}

#[then("the call fails with a service error")]
fn then_service_error(world: &mut TestWorld) {
    let outcome = world.outcome.as_ref().expect("no call made");
    assert!(
        matches!(outcome, Err(HostCallError::Service { .. })),
        "expected a service error, got: {outcome:?}"
    );
    assert!(!world.reverse().client.is_closed());
}

#[then("{path} has mode {mode}")]
fn then_mode(world: &mut TestWorld, path: String, mode: String) {
    world
        .outcome
        .as_ref()
        .expect("no call made")
        .as_ref()
        .expect("write failed");
    let expected = u32::from_str_radix(mode.trim_matches('"'), 8).expect("octal mode");
    let actual = fs::metadata(world.root().path().join(path.trim_matches('"')))
        .expect("metadata")
        .permissions()
        .mode()
        & 0o777;
    assert_eq!(actual, expected, "mode {actual:o} != {expected:o}");
}

// ---------------------------------------------------------------------------
// Scenario registration
// ---------------------------------------------------------------------------

#[scenario(path = "tests/features/sandboxed_filesystem.feature", index = 0)]
fn listing_behaviour(world: TestWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/sandboxed_filesystem.feature", index = 1)]
fn escape_behaviour(world: TestWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/sandboxed_filesystem.feature", index = 2)]
fn default_mode_behaviour(world: TestWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/sandboxed_filesystem.feature", index = 3)]
fn explicit_mode_behaviour(world: TestWorld) {
    let _ = world;
}
