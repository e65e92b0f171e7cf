use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn cubby() -> Command {
    Command::new(env!("CARGO_BIN_EXE_cubby"))
}

fn write_bundle(config: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("config.json"), config).unwrap();
    fs::create_dir_all(dir.path().join("rootfs")).unwrap();
    dir
}

fn valid_config(args: &str) -> String {
    format!(
        r#"{{
            "ociVersion": "1.1.0",
            "process": {{"args": {args}, "env": ["PATH=/bin"], "cwd": "/"}},
            "hostname": "testbox",
            "mounts": [],
            "linux": {{"namespaces": [{{"type": "mount"}}, {{"type": "uts"}}, {{"type": "pid"}}, {{"type": "user"}}]}}
        }}"#
    )
}

#[test]
fn run_fails_when_config_is_missing() {
    let dir = TempDir::new().unwrap();

    let output = cubby()
        .args(["run", "c1"])
        .arg(dir.path())
        .output()
        .expect("failed to execute cubby");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("config"), "stderr: {stderr}");
}

#[test]
fn run_fails_on_malformed_config() {
    let dir = write_bundle("{ this is not json");

    let output = cubby()
        .args(["run", "c1"])
        .arg(dir.path())
        .output()
        .expect("failed to execute cubby");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("parse"), "stderr: {stderr}");
}

#[test]
fn run_fails_fast_when_no_process_is_declared() {
    let dir = write_bundle(&valid_config("[]"));

    let output = cubby()
        .args(["run", "c1"])
        .arg(dir.path())
        .output()
        .expect("failed to execute cubby");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no process"), "stderr: {stderr}");
}

#[test]
fn run_fails_when_no_namespaces_are_declared() {
    let dir = write_bundle(
        r#"{"process": {"args": ["/bin/true"]}, "linux": {"namespaces": []}}"#,
    );

    let output = cubby()
        .args(["run", "c1"])
        .arg(dir.path())
        .output()
        .expect("failed to execute cubby");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no namespaces"), "stderr: {stderr}");
}

#[test]
fn create_accepts_a_valid_bundle() {
    let dir = write_bundle(&valid_config(r#"["/bin/true"]"#));

    let output = cubby()
        .args(["create", "c1"])
        .arg(dir.path())
        .output()
        .expect("failed to execute cubby");

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn create_rejects_a_bundle_without_a_process() {
    let dir = write_bundle(&valid_config("[]"));

    let output = cubby()
        .args(["create", "c1"])
        .arg(dir.path())
        .output()
        .expect("failed to execute cubby");

    assert!(!output.status.success());
}

#[test]
fn child_subcommand_is_hidden_from_help() {
    let output = cubby().arg("--help").output().expect("failed to run help");
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.contains("run"));
    assert!(stdout.contains("pull"));
    assert!(!stdout.contains("child"), "help: {stdout}");
}

#[test]
fn child_fails_cleanly_on_a_missing_bundle() {
    // the hidden entry point must still behave when handed a bad path;
    // load fails before any mount work
    let output = cubby()
        .args(["child", "/nonexistent/bundle"])
        .output()
        .expect("failed to execute cubby");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("config"), "stderr: {stderr}");
}

#[test]
fn pull_rejects_invalid_image_references() {
    let dir = TempDir::new().unwrap();

    let output = cubby()
        .args(["pull", "name with spaces"])
        .arg(dir.path())
        .output()
        .expect("failed to execute cubby");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid image reference"), "stderr: {stderr}");
}

fn create_test_rootfs(dir: &TempDir) {
    let rootfs = dir.path().join("rootfs");
    for sub in ["bin", "proc", "dev", "sys"] {
        fs::create_dir_all(rootfs.join(sub)).unwrap();
    }
    // busybox is statically linked on most distros, so it runs inside a
    // rootfs with no dynamic linker
    fs::copy("/bin/busybox", rootfs.join("bin/busybox")).unwrap();
}

// Needs a kernel with unprivileged user namespaces and a statically linked
// /bin/busybox on the host; use `cargo test -- --ignored`.
#[test]
#[ignore]
fn run_launches_an_isolated_process() {
    if !Path::new("/bin/busybox").exists() {
        eprintln!("skipping: /bin/busybox not present");
        return;
    }

    let dir = write_bundle(&valid_config(r#"["/bin/busybox", "true"]"#));
    create_test_rootfs(&dir);

    let output = cubby()
        .args(["run", "c1"])
        .arg(dir.path())
        .output()
        .expect("failed to execute cubby");

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}
