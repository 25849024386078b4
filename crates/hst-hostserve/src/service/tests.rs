//! Unit tests for the stock capability implementation.

use std::fs;

use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;

struct Host {
    dir: TempDir,
    services: HostCapabilities,
}

#[fixture]
fn host() -> Host {
    let dir = TempDir::new().expect("temp dir");
    fs::write(dir.path().join("notes.txt"), b"0123456789").expect("seed");
    let sandbox = Sandbox::open(dir.path()).expect("sandbox");
    let env = |key: &str| (key == "HOME").then(|| "/home/tester".to_owned());
    Host {
        dir,
        services: HostCapabilities::with_env(sandbox, env),
    }
}

#[rstest]
#[case::set("HOME", "/home/tester")]
#[case::unset("HST_DEFINITELY_UNSET", "")]
fn get_env_never_fails(host: Host, #[case] key: &str, #[case] expected: &str) {
    assert_eq!(host.services.get_env(key), expected);
}

#[rstest]
fn handle_reads_advance_through_the_file(host: Host) {
    let client = ClientId::generate();
    let handle = host
        .services
        .open_file(client, "notes.txt", OpenMode::ReadOnly)
        .expect("open");
    assert_eq!(host.services.read_handle(client, handle, 4).expect("read"), b"0123");
    assert_eq!(host.services.read_handle(client, handle, 100).expect("read"), b"456789");
    assert!(host.services.read_handle(client, handle, 4).expect("eof").is_empty());
    host.services.close_handle(client, handle).expect("close");
    assert!(matches!(
        host.services.close_handle(client, handle),
        Err(HostServiceError::UnknownHandle { .. })
    ));
}

#[rstest]
fn handles_of_one_client_are_invisible_to_another(host: Host) {
    let owner = ClientId::generate();
    let handle = host
        .services
        .open_file(owner, "notes.txt", OpenMode::ReadOnly)
        .expect("open");
    let stranger = ClientId::generate();
    assert!(matches!(
        host.services.read_handle(stranger, handle, 4),
        Err(HostServiceError::UnknownHandle { .. })
    ));
}

#[rstest]
fn appending_handles_extend_files(host: Host) {
    let client = ClientId::generate();
    let handle = host
        .services
        .open_file(client, "notes.txt", OpenMode::WriteAppend)
        .expect("open");
    assert_eq!(host.services.write_handle(client, handle, b"ab").expect("write"), 2);
    assert_eq!(host.services.release_client(client), 1);
    assert_eq!(
        fs::read(host.dir.path().join("notes.txt")).expect("read back"),
        b"0123456789ab"
    );
    assert!(host.services.open_files().is_empty());
}
