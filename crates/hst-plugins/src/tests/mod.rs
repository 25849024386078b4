//! Crate-level end-to-end tests over an in-process session.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use hst_broker::rpc::{RpcHandler, serve};
use hst_broker::test_support::{LinkedBrokers, linked_brokers};
use hst_broker::{
    Broker, CallContext, Capabilities, Capability, ChannelId, Connection, RpcError,
};
use hst_hostserve::protocol::DirEntry;
use hst_hostserve::{
    ClientId, FileHandle, HostCallError, HostCapabilities, HostServiceClient, HostServiceError,
    HostServices, OpenMode, Sandbox,
};
use tempfile::TempDir;

use crate::{
    EstablishError, FileLister, FileListerClient, FileListerServer, ForwardCallError,
    HostServiceRegistry, ListingError, PluginPeer, ReverseConnection,
};


pub(crate) const WAIT: Duration = Duration::from_secs(5);

/// A linked session posing as a launched plugin.
pub(crate) struct TestPeer {
    name: String,
    capabilities: Capabilities,
    session: LinkedBrokers,
}

impl TestPeer {
    pub(crate) fn sever(&self) {
        self.session.sever().expect("sever transport");
    }
}

impl PluginPeer for TestPeer {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn broker(&self) -> &Broker {
        self.session.host()
    }
}

/// Both ends of a session whose worker serves the forward surface.
pub(crate) struct Harness {
    pub(crate) peer: TestPeer,
    pub(crate) reverse: Arc<ReverseConnection>,
    pub(crate) lister: FileListerClient,
}

pub(crate) fn host_services() -> Capabilities {
    Capabilities::none().with(Capability::HostServices)
}

pub(crate) fn harness(capabilities: Capabilities, lister: Arc<dyn FileLister>) -> Harness {
    harness_serving(capabilities, lister, |server| -> Arc<dyn RpcHandler> {
        Arc::new(server)
    })
}

/// Like [`harness`], with the worker's forward server wrapped by `wrap`.
pub(crate) fn harness_serving(
    capabilities: Capabilities,
    lister: Arc<dyn FileLister>,
    wrap: impl FnOnce(FileListerServer) -> Arc<dyn RpcHandler>,
) -> Harness {
    let session = linked_brokers().expect("linked session");
    let reverse = Arc::new(ReverseConnection::new(session.worker().clone(), WAIT));
    let handler = wrap(FileListerServer::new(lister, Arc::clone(&reverse)));
    session
        .worker()
        .listen(ChannelId::CONTROL, move |connection| serve(connection, &handler))
        .expect("listen on control");
    let connection = session
        .host()
        .dial(ChannelId::CONTROL)
        .expect("dial control");
    let lister_client = FileListerClient::new(connection, WAIT).expect("lister client");
    Harness {
        peer: TestPeer {
            name: "test-plugin".to_owned(),
            capabilities,
            session,
        },
        reverse,
        lister: lister_client,
    }
}

/// Lists through host services, marking directories with a trailing `/`.
pub(crate) struct SandboxLister;

impl FileLister for SandboxLister {
    fn list(
        &self,
        ctx: &CallContext,
        host: Option<&HostServiceClient>,
        directory: &str,
    ) -> Result<Vec<String>, ListingError> {
        let client = host.ok_or(ListingError::HostUnavailable)?;
        let mut entries: Vec<String> = client
            .read_dir(ctx, directory)?
            .into_iter()
            .map(|entry| {
                if entry.is_dir() {
                    format!("{}/", entry.name())
                } else {
                    entry.name().to_owned()
                }
            })
            .collect();
        entries.sort();
        Ok(entries)
    }
}

pub(crate) fn seeded_root() -> TempDir {
    let dir = TempDir::new().expect("temp dir");
    fs::write(dir.path().join("a.txt"), b"alpha").expect("seed file");
    fs::create_dir(dir.path().join("b")).expect("seed dir");
    dir
}

pub(crate) fn sandbox_registry(root: &Path) -> HostServiceRegistry {
    let sandbox = Sandbox::open(root).expect("sandbox");
    HostServiceRegistry::new(Arc::new(HostCapabilities::new(sandbox)))
}

pub(crate) fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
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
fn listing_goes_through_host_services() {
    let root = seeded_root();
    let registry = sandbox_registry(root.path());
    let h = harness(host_services(), Arc::new(SandboxLister));
    let ctx = CallContext::background();

    let client_id = registry
        .establish(&ctx, &h.peer, &h.lister)
        .expect("establish")
        .expect("host services in use");
    assert_eq!(registry.clients().owner(client_id).as_deref(), Some("test-plugin"));
    assert_eq!(h.reverse.client().map(|c| c.client_id()), Some(client_id));

    let entries = h.lister.list(&ctx, ".").expect("listing");
    assert_eq!(entries, ["a.txt", "b/"]);
}

#[test]
fn listing_without_host_services_is_reported_as_data() {
    let h = harness(host_services(), Arc::new(SandboxLister));
    let err = h
        .lister
        .list(&CallContext::background(), ".")
        .expect_err("no host services yet");
    assert!(matches!(err, ForwardCallError::Plugin { .. }), "got: {err}");
    assert!(err.to_string().contains("not connected"));
    assert!(!h.lister.is_closed());
}

#[test]
fn peers_without_the_capability_are_skipped() {
    let root = seeded_root();
    let registry = sandbox_registry(root.path());
    let h = harness(Capabilities::none(), Arc::new(SandboxLister));
    let ctx = CallContext::background();

    assert!(registry.establish(&ctx, &h.peer, &h.lister).expect("establish").is_none());
    assert!(!h.reverse.is_connected());
    registry.disconnect(&ctx, &h.peer, &h.lister, None);
    assert!(registry.clients().is_empty());
}

#[test]
fn a_second_establish_is_refused_by_the_worker() {
    let root = seeded_root();
    let registry = sandbox_registry(root.path());
    let h = harness(host_services(), Arc::new(SandboxLister));
    let ctx = CallContext::background();

    let first = registry
        .establish(&ctx, &h.peer, &h.lister)
        .expect("first establish")
        .expect("client");
    let err = registry
        .establish(&ctx, &h.peer, &h.lister)
        .expect_err("second establish");
    assert!(matches!(err, EstablishError::PeerDial { .. }), "got: {err}");
    assert!(err.to_string().contains("already connected"));
    assert_eq!(h.reverse.client().map(|c| c.client_id()), Some(first));
    assert_eq!(registry.clients().len(), 1);
}

#[test]
fn disconnecting_twice_is_a_no_op() {
    let root = seeded_root();
    let registry = sandbox_registry(root.path());
    let h = harness(host_services(), Arc::new(SandboxLister));
    let ctx = CallContext::background();
    let client = registry.establish(&ctx, &h.peer, &h.lister).expect("establish");

    registry.disconnect(&ctx, &h.peer, &h.lister, client);
    registry.disconnect(&ctx, &h.peer, &h.lister, client);

    assert!(!h.reverse.is_connected());
    assert!(registry.clients().is_empty());
    assert!(!h.lister.teardown(&ctx).expect("teardown after disconnect"));
}

#[test]
fn reconnecting_after_disconnect_mints_a_new_identity() {
    let root = seeded_root();
    let registry = sandbox_registry(root.path());
    let h = harness(host_services(), Arc::new(SandboxLister));
    let ctx = CallContext::background();

    let first = registry.establish(&ctx, &h.peer, &h.lister).expect("establish");
    registry.disconnect(&ctx, &h.peer, &h.lister, first);
    let second = registry.establish(&ctx, &h.peer, &h.lister).expect("re-establish");

    assert!(second.is_some());
    assert_ne!(first, second);
    assert_eq!(h.lister.list(&ctx, ".").expect("listing"), ["a.txt", "b/"]);
}

#[test]
fn peer_dial_failures_leave_the_session_usable() {
    let root = seeded_root();
    let registry = sandbox_registry(root.path());
    let h = harness(host_services(), Arc::new(SandboxLister));
    let ctx = CallContext::background();
    // The worker already holds a connection it did not get through the registry.
    let channel = h.peer.broker().allocate().expect("allocate");
    h.peer
        .broker()
        .listen(channel, |connection: Connection| while connection.recv().is_ok() {})
        .expect("listen");
    h.reverse.connect(channel).expect("direct connect");

    let err = registry
        .establish(&ctx, &h.peer, &h.lister)
        .expect_err("worker is already connected");
    assert!(matches!(err, EstablishError::PeerDial { .. }));
    assert!(h.lister.teardown(&ctx).expect("teardown"));
    assert!(registry.establish(&ctx, &h.peer, &h.lister).expect("establish").is_some());
}

#[test]
fn losing_the_worker_fails_forward_calls_promptly() {
    let h = harness(host_services(), Arc::new(Blocking));
    let lister = h.lister.clone();
    let call = thread::spawn(move || lister.list(&CallContext::background(), "."));
    thread::sleep(Duration::from_millis(100));

    let severed = Instant::now();
    h.peer.sever();
    let err = call
        .join()
        .expect("call thread")
        .expect_err("call must fail");
    assert!(err.is_transport(), "expected a transport error, got: {err}");
    assert!(severed.elapsed() < WAIT);
}

#[test]
fn forward_deadlines_bound_nested_host_calls() {
    let registry = HostServiceRegistry::new(Arc::new(Stalling));
    let (sender, receiver) = mpsc::channel();
    let h = harness(host_services(), Arc::new(Recording(sender)));
    let background = CallContext::background();
    registry
        .establish(&background, &h.peer, &h.lister)
        .expect("establish");

    let started = Instant::now();
    let err = h
        .lister
        .list(&CallContext::with_timeout(Duration::from_millis(200)), ".")
        .expect_err("forward call times out");
    assert!(matches!(err, ForwardCallError::Rpc(RpcError::Timeout { .. })), "got: {err}");

    let nested = receiver.recv_timeout(WAIT).expect("nested call finished");
    assert!(
        matches!(nested, HostCallError::Rpc(RpcError::Timeout { .. } | RpcError::Cancelled { .. })),
        "got: {nested}"
    );
    assert!(started.elapsed() < WAIT);
}

/// Blocks every listing until the call is abandoned.
struct Blocking;

impl FileLister for Blocking {
    fn list(
        &self,
        ctx: &CallContext,
        _host: Option<&HostServiceClient>,
        _directory: &str,
    ) -> Result<Vec<String>, ListingError> {
        let started = Instant::now();
        while !ctx.is_done() && started.elapsed() < WAIT {
            thread::sleep(Duration::from_millis(10));
        }
        Ok(Vec::new())
    }
}

/// Reports how its nested host call ended.
struct Recording(mpsc::Sender<HostCallError>);

impl FileLister for Recording {
    fn list(
        &self,
        ctx: &CallContext,
        host: Option<&HostServiceClient>,
        directory: &str,
    ) -> Result<Vec<String>, ListingError> {
        let client = host.ok_or(ListingError::HostUnavailable)?;
        match client.read_file(ctx, directory) {
            Ok(_) => Ok(Vec::new()),
            Err(err) => {
                self.0.send(err.clone()).expect("report nested failure");
                Err(err.into())
            }
        }
    }
}

/// Host services whose file reads outlast any reasonable deadline.
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
