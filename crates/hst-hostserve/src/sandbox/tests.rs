//! Unit tests for root confinement and file permissions.

use std::fs;
use std::collections::HashSet;
use std::io::Read;
use std::thread;
use std::os::unix::fs::{PermissionsExt, symlink};

use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;

struct Scratch {
    // Keeps the directory alive for the sandbox's lifetime.
    dir: TempDir,
    sandbox: Sandbox,
}

#[fixture]
fn scratch() -> Scratch {
    let dir = TempDir::new().expect("temp dir");
    fs::write(dir.path().join("a.txt"), b"alpha").expect("seed file");
    fs::create_dir(dir.path().join("b")).expect("seed dir");
    fs::write(dir.path().join("b").join("inner.txt"), b"inner").expect("seed nested");
    let sandbox = Sandbox::open(dir.path()).expect("open sandbox");
    Scratch { dir, sandbox }
}

fn mode_of(path: &Path) -> u32 {
    fs::metadata(path).expect("metadata").permissions().mode() & 0o777
}

#[rstest]
fn read_dir_lists_immediate_entries(scratch: Scratch) {
    let mut entries = scratch.sandbox.read_dir(".").expect("list");
    entries.sort();
    assert_eq!(
        entries,
        vec![
            DirEntry {
                name: "a.txt".into(),
                is_dir: false
            },
            DirEntry {
                name: "b".into(),
                is_dir: true
            },
        ]
    );
}

#[rstest]
fn absolute_paths_inside_the_root_are_accepted(scratch: Scratch) {
    let nested = scratch.sandbox.root_path().join("b");
    let entries = scratch
        .sandbox
        .read_dir(nested.to_str().expect("utf8 path"))
        .expect("list nested");
    assert_eq!(entries.len(), 1);
    let contents = scratch
        .sandbox
        .read_file(nested.join("inner.txt").to_str().expect("utf8 path"))
        .expect("read nested");
    assert_eq!(contents, b"inner");
}

#[rstest]
#[case::parent("../outside.txt")]
#[case::nested_parent("b/../../outside.txt")]
#[case::absolute_outside("/etc/passwd")]
fn escaping_reads_fail(scratch: Scratch, #[case] path: &str) {
    let err = scratch.sandbox.read_file(path).expect_err("escape");
    assert!(matches!(err, HostServiceError::Escape { .. }), "got: {err}");
}

#[rstest]
fn escaping_writes_leave_the_outside_untouched(scratch: Scratch) {
    let outside = scratch
        .dir
        .path()
        .parent()
        .expect("temp parent")
        .join(format!("hst-escape-{}", std::process::id()));
    let relative = format!(
        "../{}",
        outside.file_name().expect("name").to_string_lossy()
    );
    assert!(scratch.sandbox.write_file(&relative, b"x", 0).is_err());
    assert!(!outside.exists());
}

#[rstest]
fn symlinks_out_of_the_root_are_refused(scratch: Scratch) {
    let target = TempDir::new().expect("second temp dir");
    fs::write(target.path().join("secret.txt"), b"secret").expect("seed secret");
    symlink(target.path(), scratch.dir.path().join("link")).expect("symlink");
    assert!(scratch.sandbox.read_file("link/secret.txt").is_err());
}

#[rstest]
fn internal_parent_segments_are_fine(scratch: Scratch) {
    let contents = scratch.sandbox.read_file("b/../a.txt").expect("read");
    assert_eq!(contents, b"alpha");
}

#[rstest]
#[case::default(0, 0o644)]
#[case::owner_only(0o600, 0o600)]
#[case::executable(0o755, 0o755)]
#[case::extra_bits_ignored(0o4600, 0o600)]
fn write_file_applies_exact_mode(scratch: Scratch, #[case] perm: u32, #[case] expected: u32) {
    scratch
        .sandbox
        .write_file("out.txt", b"data", perm)
        .expect("write");
    let path = scratch.dir.path().join("out.txt");
    assert_eq!(mode_of(&path), expected);
    assert_eq!(fs::read(&path).expect("read back"), b"data");
}

#[rstest]
fn rewriting_narrows_an_existing_mode(scratch: Scratch) {
    let path = scratch.dir.path().join("a.txt");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o666)).expect("widen");
    scratch
        .sandbox
        .write_file("a.txt", b"beta", 0o600)
        .expect("rewrite");
    assert_eq!(mode_of(&path), 0o600);
}

#[rstest]
#[case::new_file(false)]
#[case::existing_file(true)]
fn owner_only_contents_are_never_visible_to_others(scratch: Scratch, #[case] pre_existing: bool) {
    let name = "private.bin";
    let path = scratch.dir.path().join(name);
    if pre_existing {
        fs::write(&path, b"").expect("seed empty file");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).expect("open up");
    }
    let contents = vec![0x5a_u8; 32 * 1024 * 1024];
    let observed = thread::scope(|scope| {
        let writer = scope.spawn(|| scratch.sandbox.write_file(name, &contents, 0o600));
        let mut observed = HashSet::new();
        while !writer.is_finished() {
            if let Some(metadata) = fs::metadata(&path).ok().filter(|m| m.len() > 0) {
                observed.insert(metadata.permissions().mode() & 0o777);
            }
        }
        writer.join().expect("writer thread").expect("write");
        observed
    });
    assert!(
        observed.iter().all(|mode| mode & 0o077 == 0),
        "contents visible under modes {observed:?}"
    );
    assert_eq!(mode_of(&path), 0o600);
}

#[rstest]
#[case::missing("missing")]
#[case::file("a.txt")]
fn read_dir_rejects_missing_or_non_directories(scratch: Scratch, #[case] path: &str) {
    let err = scratch.sandbox.read_dir(path).expect_err("not a directory");
    assert!(matches!(err, HostServiceError::Io { .. }), "got: {err}");
}

#[rstest]
#[case::root(".")]
#[case::parent_of_child("b/..")]
fn paths_without_file_names_are_rejected(scratch: Scratch, #[case] path: &str) {
    assert!(matches!(
        scratch.sandbox.read_file(path),
        Err(HostServiceError::NoFileName { .. })
    ));
}

#[rstest]
fn opened_files_support_streaming_reads(scratch: Scratch) {
    let mut file = scratch
        .sandbox
        .open_file("a.txt", OpenMode::ReadOnly)
        .expect("open");
    let mut text = String::new();
    file.read_to_string(&mut text).expect("read");
    assert_eq!(text, "alpha");
}

#[rstest]
fn exclusive_open_refuses_existing_files(scratch: Scratch) {
    assert!(
        scratch
            .sandbox
            .open_file("a.txt", OpenMode::WriteExclusive)
            .is_err()
    );
}

#[test]
fn missing_roots_are_reported() {
    let dir = TempDir::new().expect("temp dir");
    let err = Sandbox::open(dir.path().join("nope")).expect_err("missing root");
    assert!(matches!(err, HostServiceError::RootUnavailable { .. }));
}
