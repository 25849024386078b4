//! Unit tests for bootstrap stages and plugin run failures.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use mockall::mock;
use ortho_config::{OrthoConfig, OrthoError};
use rstest::{fixture, rstest};

use hst_broker::HandshakeError;
use hst_config::Config;
use hst_plugins::{ForwardCallError, PluginError};

use super::support::{GOOD_HELLO, HealthEvent, RecordingHealthReporter, Scratch};
use crate::bootstrap::{BootstrapError, ConfigLoader, StaticConfigLoader, bootstrap_with};
use crate::host::{Host, RunError};

mock! {
    Loader {}
    impl ConfigLoader for Loader {
        fn load(&self) -> Result<Config, Arc<OrthoError>>;
    }
}

#[fixture]
fn scratch() -> Scratch {
    Scratch::new()
}

fn boot(config: Config) -> (Result<Host, BootstrapError>, Arc<RecordingHealthReporter>) {
    let reporter = Arc::new(RecordingHealthReporter::default());
    let result = bootstrap_with(&StaticConfigLoader::new(config), reporter.clone());
    (result, reporter)
}

#[rstest]
fn bootstrap_succeeds_without_plugins(scratch: Scratch) {
    let (result, reporter) = boot(scratch.config(Vec::new()));
    let host = result.expect("bootstrap");
    assert!(host.plugins().is_empty());
    assert_eq!(
        reporter.events(),
        [HealthEvent::BootstrapStarting, HealthEvent::BootstrapSucceeded]
    );
}

#[rstest]
fn bootstrap_loads_configuration_once(scratch: Scratch) {
    let config = scratch.config(Vec::new());
    let mut loader = MockLoader::new();
    loader.expect_load().times(1).return_once(move || Ok(config));

    let reporter = Arc::new(RecordingHealthReporter::default());
    let host = bootstrap_with(&loader, reporter).expect("bootstrap");
    assert_eq!(host.config().list_dir(), ".");
}

#[rstest]
fn bootstrap_registers_one_manifest_per_executable(scratch: Scratch) {
    let config = scratch.config(vec![
        PathBuf::from("/opt/hst/alpha"),
        PathBuf::from("/opt/hst/beta"),
    ]);
    let (result, _) = boot(config);
    let host = result.expect("bootstrap");
    let names: Vec<_> = host.plugins().iter().map(|m| m.name().to_owned()).collect();
    assert_eq!(names, ["alpha", "beta"]);
}

#[rstest]
fn duplicate_plugin_names_fail_bootstrap(scratch: Scratch) {
    let config = scratch.config(vec![
        PathBuf::from("/opt/a/lister"),
        PathBuf::from("/opt/b/lister"),
    ]);
    let (result, reporter) = boot(config);
    let error = result.expect_err("duplicate names");
    assert!(matches!(error, BootstrapError::Plugin { .. }), "got: {error}");
    assert!(matches!(
        reporter.events().last(),
        Some(HealthEvent::BootstrapFailed(_))
    ));
}

#[rstest]
fn missing_sandbox_root_fails_bootstrap(scratch: Scratch) {
    let config = Config {
        sandbox_root: scratch.path().join("absent"),
        ..scratch.config(Vec::new())
    };
    let (result, _) = boot(config);
    assert!(matches!(result, Err(BootstrapError::Sandbox { .. })));
}

#[rstest]
#[case::zero_timeout(Config { call_timeout_ms: 0, ..Config::default() })]
#[case::relative_plugin(Config { plugins: vec![PathBuf::from("lister")], ..Config::default() })]
fn invalid_configuration_fails_bootstrap(#[case] config: Config) {
    let (result, _) = boot(config);
    assert!(matches!(
        result,
        Err(BootstrapError::InvalidConfiguration { .. })
    ));
}

#[test]
fn unparsable_arguments_fail_bootstrap() {
    struct BadArgs;
    impl ConfigLoader for BadArgs {
        fn load(&self) -> Result<Config, Arc<OrthoError>> {
            Config::load_from_iter(
                ["hstd", "--call-timeout-ms", "soon"].map(OsString::from),
            )
        }
    }
    let reporter = Arc::new(RecordingHealthReporter::default());
    let error = bootstrap_with(&BadArgs, reporter).expect_err("bad args");
    assert!(matches!(error, BootstrapError::Configuration { .. }));
}

#[rstest]
fn run_without_plugins_writes_nothing(scratch: Scratch) {
    let (result, _) = boot(scratch.config(Vec::new()));
    let host = result.expect("bootstrap");
    let mut out = Vec::<u8>::new();
    host.run(&mut out).expect("run");
    assert!(out.is_empty());
}

#[rstest]
fn missing_executable_fails_at_launch(scratch: Scratch) {
    let missing = scratch.path().join("ghost");
    let (result, reporter) = boot(scratch.config(vec![missing]));
    let host = result.expect("bootstrap");

    let error = host.run(&mut Vec::<u8>::new()).expect_err("no such worker");

    assert_eq!(error.stage(), "launch");
    assert_eq!(error.plugin(), "ghost");
    assert!(reporter.events().contains(&HealthEvent::PluginFailed {
        plugin: "ghost".to_owned(),
        stage: "launch",
    }));
}

#[rstest]
fn garbage_hello_fails_at_handshake(scratch: Scratch) {
    let worker = scratch.script("chatty", "echo 'hello there'");
    let (result, reporter) = boot(scratch.config(vec![worker]));
    let host = result.expect("bootstrap");

    let error = host.run(&mut Vec::<u8>::new()).expect_err("bad hello");

    assert_eq!(error.stage(), "handshake");
    assert!(!reporter
        .events()
        .contains(&HealthEvent::PluginReady("chatty".to_owned())));
}

#[rstest]
fn silent_worker_fails_at_dispense_and_is_stopped(scratch: Scratch) {
    let worker = scratch.script("mute", &format!("{GOOD_HELLO}\ncat > /dev/null"));
    let (result, reporter) = boot(scratch.config(vec![worker]));
    let host = result.expect("bootstrap");

    let error = host.run(&mut Vec::<u8>::new()).expect_err("nobody serves the control channel");

    assert_eq!(error.stage(), "dispense");
    let events = reporter.events();
    assert!(events.contains(&HealthEvent::PluginReady("mute".to_owned())));
    assert!(events.contains(&HealthEvent::PluginStopped("mute".to_owned())));
}

#[rstest]
#[case::launch(
    RunError::Launch {
        plugin: "p".into(),
        source: PluginError::ExecutableNotFound { name: "p".into(), path: "/missing/p".into() },
    },
    "launch"
)]
#[case::handshake(
    RunError::Launch {
        plugin: "p".into(),
        source: PluginError::Handshake { name: "p".into(), source: HandshakeError::Eof },
    },
    "handshake"
)]
#[case::list(
    RunError::List {
        plugin: "p".into(),
        source: ForwardCallError::Plugin { message: "denied".into() },
    },
    "list"
)]
#[case::output(
    RunError::Output {
        plugin: "p".into(),
        source: Arc::new(std::io::Error::other("pipe closed")),
    },
    "output"
)]
fn run_errors_name_their_stage(#[case] error: RunError, #[case] stage: &str) {
    assert_eq!(error.stage(), stage);
    assert_eq!(error.plugin(), "p");
}
