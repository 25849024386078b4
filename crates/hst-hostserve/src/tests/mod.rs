//! Crate-level end-to-end tests over an in-process session.

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use hst_broker::test_support::{LinkedBrokers, linked_brokers};
use hst_broker::CallContext;
use tempfile::TempDir;

use crate::protocol::DirEntry;
use crate::{
    ActiveClients, ClientBinding, ClientId, FileHandle, HostCallError, HostCapabilities, HostServiceClient,
    HostServiceError, HostServices, OpenMode, Sandbox, serve_host_services,
};

mod behaviour;

const WAIT: Duration = Duration::from_secs(5);

/// A session whose host serves `services` on one reverse channel.
pub(crate) struct ReverseSession {
    pub(crate) session: LinkedBrokers,
    pub(crate) clients: Arc<ActiveClients>,
    pub(crate) client: HostServiceClient,
}

pub(crate) fn reverse_session(services: Arc<dyn HostServices>) -> ReverseSession {
    let session = linked_brokers().expect("linked session");
    let clients = Arc::new(ActiveClients::new());
    let client_id = ClientId::generate();
    clients.add(client_id, "test-worker").expect("register");
    let client = bound_client(&session, services, &clients, client_id);
    ReverseSession {
        session,
        clients,
        client,
    }
}

/// Serves `services` on a fresh channel bound to `client_id` and dials it.
fn bound_client(
    session: &LinkedBrokers,
    services: Arc<dyn HostServices>,
    clients: &Arc<ActiveClients>,
    client_id: ClientId,
) -> HostServiceClient {
    let id = session.host().allocate().expect("allocate");
    let registry = Arc::clone(clients);
    session
        .host()
        .listen(id, move |connection| {
            serve_host_services(
                connection,
                services,
                ClientBinding::bound(client_id),
                &registry,
            );
        })
        .expect("listen");
    let connection = session.worker().dial(id).expect("dial back");
    HostServiceClient::new(connection, client_id, WAIT).expect("client")
}

pub(crate) fn seeded_root() -> TempDir {
    let dir = TempDir::new().expect("temp dir");
    fs::write(dir.path().join("a.txt"), b"alpha").expect("seed file");
    fs::create_dir(dir.path().join("b")).expect("seed dir");
    dir
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let started = Instant::now();
    while started.elapsed() < WAIT {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn read_dir_over_the_reverse_channel() {
    let root = seeded_root();
    let caps = Arc::new(HostCapabilities::new(Sandbox::open(root.path()).expect("sandbox")));
    let reverse = reverse_session(caps);
    let mut entries = reverse
        .client
        .read_dir(&CallContext::background(), ".")
        .expect("listing");
    entries.sort();
    let summary: Vec<_> = entries.iter().map(|e| (e.name(), e.is_dir())).collect();
    assert_eq!(summary, vec![("a.txt", false), ("b", true)]);
}

#[test]
fn capability_failures_do_not_harm_the_channel() {
    let root = seeded_root();
    let caps = Arc::new(HostCapabilities::new(Sandbox::open(root.path()).expect("sandbox")));
    let reverse = reverse_session(caps);
    let ctx = CallContext::background();

    let err = reverse
        .client
        .read_file(&ctx, "../../etc/passwd")
        .expect_err("escape");
    assert!(matches!(err, HostCallError::Service { .. }), "got: {err}");
    assert!(!err.is_transport());

    assert_eq!(reverse.client.read_file(&ctx, "a.txt").expect("read"), b"alpha");
}

#[test]
fn unset_environment_variables_are_empty() {
    let root = seeded_root();
    let env = |key: &str| (key == "HOME").then(|| "/home/tester".to_owned());
    let caps = Arc::new(HostCapabilities::with_env(
        Sandbox::open(root.path()).expect("sandbox"),
        env,
    ));
    let reverse = reverse_session(caps);
    let ctx = CallContext::background();
    assert_eq!(reverse.client.get_env(&ctx, "HOME").expect("home"), "/home/tester");
    assert_eq!(reverse.client.get_env(&ctx, "NOPE").expect("unset"), "");
}

#[test]
fn handles_are_released_when_the_connection_ends() {
    let root = seeded_root();
    let caps = Arc::new(HostCapabilities::new(Sandbox::open(root.path()).expect("sandbox")));
    let services: Arc<dyn HostServices> = caps.clone();
    let reverse = reverse_session(services);
    let ctx = CallContext::background();

    let handle = reverse
        .client
        .open_file(&ctx, "log.txt", OpenMode::WriteAppend)
        .expect("open");
    assert_eq!(
        reverse
            .client
            .write_handle(&ctx, handle, b"line\n")
            .expect("write"),
        5
    );
    let reader = reverse
        .client
        .open_file(&ctx, "a.txt", OpenMode::ReadOnly)
        .expect("open reader");
    let chunk = reverse.client.read_handle(&ctx, reader, 64).expect("read");
    assert_eq!(chunk.contents, b"alpha");
    assert_eq!(caps.open_files().len(), 2);

    reverse.client.close();
    reverse.client.close();
    assert!(wait_until(|| caps.open_files().is_empty()));
    assert!(wait_until(|| reverse.clients.is_empty()));
    assert_eq!(fs::read(root.path().join("log.txt")).expect("log"), b"line\n");
}

/// Blocks every file read until the caller goes away.
struct Stalling;

impl HostServices for Stalling {
    fn get_env(&self, _key: &str) -> String {
        String::new()
    }

    fn read_dir(&self, _path: &str) -> Result<Vec<DirEntry>, HostServiceError> {
        Ok(Vec::new())
    }

    fn read_file(&self, _path: &str) -> Result<Vec<u8>, HostServiceError> {
        thread::sleep(WAIT);
        Ok(Vec::new())
    }

    fn write_file(&self, _: &str, _: &[u8], _: u32) -> Result<(), HostServiceError> {
        Ok(())
    }

    fn open_file(&self, _: ClientId, _: &str, _: OpenMode) -> Result<FileHandle, HostServiceError> {
        Err(HostServiceError::AnonymousClient)
    }

    fn read_handle(
        &self,
        _: ClientId,
        handle: FileHandle,
        _: usize,
    ) -> Result<Vec<u8>, HostServiceError> {
        Err(HostServiceError::UnknownHandle { handle })
    }

    fn write_handle(
        &self,
        _: ClientId,
        handle: FileHandle,
        _: &[u8],
    ) -> Result<usize, HostServiceError> {
        Err(HostServiceError::UnknownHandle { handle })
    }

    fn close_handle(&self, _: ClientId, handle: FileHandle) -> Result<(), HostServiceError> {
        Err(HostServiceError::UnknownHandle { handle })
    }

    fn release_client(&self, _: ClientId) -> usize {
        0
    }
}

#[test]
fn losing_the_transport_fails_in_flight_calls_promptly() {
    let reverse = reverse_session(Arc::new(Stalling));
    let client = reverse.client.clone();
    let caller = thread::spawn(move || client.read_file(&CallContext::background(), "slow"));
    thread::sleep(Duration::from_millis(100));

    let started = Instant::now();
    reverse.session.sever().expect("sever");
    let err = caller
        .join()
        .expect("caller thread")
        .expect_err("transport lost");
    assert!(err.is_transport(), "got: {err}");
    assert!(started.elapsed() < WAIT);
}

#[test]
fn a_connection_cannot_reach_another_clients_handles() {
    let root = seeded_root();
    let caps = Arc::new(HostCapabilities::new(Sandbox::open(root.path()).expect("sandbox")));
    let reverse = reverse_session(caps.clone());
    let ctx = CallContext::background();
    let handle = reverse
        .client
        .open_file(&ctx, "a.txt", OpenMode::ReadOnly)
        .expect("open");

    let other = ClientId::generate();
    reverse.clients.add(other, "other-worker").expect("register");
    let intruder_connection = {
        let id = reverse.session.host().allocate().expect("allocate");
        let services: Arc<dyn HostServices> = caps.clone();
        let registry = Arc::clone(&reverse.clients);
        reverse
            .session
            .host()
            .listen(id, move |connection| {
                serve_host_services(connection, services, ClientBinding::bound(other), &registry);
            })
            .expect("listen");
        reverse.session.worker().dial(id).expect("dial back")
    };
    let intruder = HostServiceClient::new(intruder_connection, reverse.client.client_id(), WAIT)
        .expect("client");

    let err = intruder
        .read_handle(&ctx, handle, 64)
        .expect_err("foreign handle");
    assert!(matches!(err, HostCallError::Service { .. }), "got: {err}");
    assert!(err.to_string().contains("does not own this connection"), "got: {err}");

    intruder.close();
    assert!(wait_until(|| !reverse.clients.contains(other)));
    assert!(reverse.clients.contains(reverse.client.client_id()));
    assert_eq!(caps.open_files().len(), 1);
    let chunk = reverse.client.read_handle(&ctx, handle, 64).expect("owner reads");
    assert_eq!(chunk.contents, b"alpha");
}
