//! Unit tests for plugin manifests.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rstest::rstest;

use super::*;
use crate::error::PluginError;

fn manifest() -> PluginManifest {
    PluginManifest::new("filelister", PathBuf::from("/usr/bin/hst-filelister"))
}

#[test]
fn defaults_are_applied() {
    let m = manifest();
    assert_eq!(m.timeout_secs(), 30);
    assert_eq!(m.timeout(), Duration::from_secs(30));
    assert!(m.args().is_empty());
}

#[test]
fn builders_override_defaults() {
    let m = manifest()
        .with_args(vec!["--verbose".into()])
        .with_timeout_secs(5);
    assert_eq!(m.args(), ["--verbose".to_owned()]);
    assert_eq!(m.timeout_secs(), 5);
}

#[test]
fn name_is_derived_from_the_executable() {
    let m = PluginManifest::for_executable(PathBuf::from("/opt/plugins/hst-plugin-filelister"));
    assert_eq!(m.name(), "hst-plugin-filelister");
    assert_eq!(m.executable(), Path::new("/opt/plugins/hst-plugin-filelister"));
}

#[rstest]
#[case::empty_name(PluginManifest::new("  ", PathBuf::from("/bin/x")), "must not be empty")]
#[case::relative(PluginManifest::new("x", PathBuf::from("bin/x")), "absolute path")]
#[case::zero_timeout(
    PluginManifest::new("x", PathBuf::from("/bin/x")).with_timeout_secs(0),
    "non-zero timeout"
)]
#[case::root_path(PluginManifest::for_executable(PathBuf::from("/")), "must not be empty")]
fn invalid_manifests_are_rejected(#[case] manifest: PluginManifest, #[case] expected: &str) {
    let err = manifest.validate().expect_err("manifest should be invalid");
    assert!(matches!(err, PluginError::Manifest { .. }));
    assert!(err.to_string().contains(expected), "{err}");
}

#[test]
fn manifest_deserialises_with_defaults() {
    let m: PluginManifest =
        serde_json::from_str(r#"{"name":"filelister","executable":"/usr/bin/hst-filelister"}"#)
            .expect("parse manifest");
    assert_eq!(m, manifest());
}
