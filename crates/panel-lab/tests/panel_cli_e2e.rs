use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tempfile::TempDir;

fn binary_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_panel-lab"))
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Prints the display number it was asked for, then lingers.
fn stub_display_server(dir: &Path) -> PathBuf {
    write_script(
        dir,
        "fake-display",
        "#!/bin/sh\nnum=${1#:}\necho \"$num\"\nexec sleep 60\n",
    )
}

/// Prints a unique bus address, then lingers.
fn stub_bus_daemon(dir: &Path) -> PathBuf {
    write_script(
        dir,
        "fake-daemon",
        "#!/bin/sh\necho \"unix:abstract=/tmp/fake-bus-$$\"\nexec sleep 60\n",
    )
}

/// Three named cases; `/panel/two` hangs until killed.
fn stub_test_binary(dir: &Path) -> PathBuf {
    write_script(
        dir,
        "panel-tests",
        concat!(
            "#!/bin/sh\n",
            "if [ \"$1\" = \"-l\" ]; then\n",
            "  printf '/panel/one\\n/panel/two\\n/panel/three\\n'\n",
            "  exit 0\n",
            "fi\n",
            "if [ \"$2\" = \"/panel/two\" ]; then\n",
            "  echo hanging\n",
            "  exec sleep 30\n",
            "fi\n",
            "exit 0\n",
        ),
    )
}

fn run_cli(dir: &Path, args: &[&str], stdin: Option<&str>) -> Output {
    let display_server = stub_display_server(dir);
    let bus_daemon = stub_bus_daemon(dir);
    let mut cmd = Command::new(binary_path());
    cmd.arg("--display-server")
        .arg(&display_server)
        .arg("--bus-daemon")
        .arg(&bus_daemon)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    }
    let mut child = cmd.spawn().expect("failed to spawn panel-lab");
    if let Some(input) = stdin {
        child
            .stdin
            .take()
            .expect("stdin piped")
            .write_all(input.as_bytes())
            .expect("failed writing stdin");
    }
    child.wait_with_output().expect("panel-lab did not exit")
}

#[test]
fn run_reports_timeout_without_aborting_siblings() {
    let dir = TempDir::new().unwrap();
    let test_binary = stub_test_binary(dir.path());
    let output = run_cli(
        dir.path(),
        &["run", test_binary.to_str().unwrap(), "--timeout-secs", "1"],
        None,
    );

    assert!(
        !output.status.success(),
        "aggregate verdict must be failure: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ok      /panel/one"), "stdout: {stdout}");
    assert!(stdout.contains("TIMEOUT /panel/two"), "stdout: {stdout}");
    assert!(stdout.contains("ok      /panel/three"), "stdout: {stdout}");
    assert!(stdout.contains("hanging"));
    assert!(stdout.contains("aborted: case exceeded"));
    assert!(stdout.contains("3 cases, 1 failed"));
}

#[test]
fn run_json_report_carries_per_case_status() {
    let dir = TempDir::new().unwrap();
    let test_binary = stub_test_binary(dir.path());
    let output = run_cli(
        dir.path(),
        &[
            "run",
            test_binary.to_str().unwrap(),
            "--timeout-secs",
            "1",
            "--json",
        ],
        None,
    );

    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("valid JSON report");
    assert_eq!(report["passed"], serde_json::json!(false));
    let cases = report["cases"].as_array().expect("cases array");
    assert_eq!(cases.len(), 3);
    assert_eq!(cases[0]["status"], "passed");
    assert_eq!(cases[1]["status"], "timed-out");
    assert_eq!(cases[2]["status"], "passed");
}

#[test]
fn passing_binary_yields_success_exit() {
    let dir = TempDir::new().unwrap();
    let test_binary = write_script(
        dir.path(),
        "all-green",
        "#!/bin/sh\nif [ \"$1\" = \"-l\" ]; then printf '/a/one\\n'; exit 0; fi\nexit 0\n",
    );
    let output = run_cli(
        dir.path(),
        &["run", test_binary.to_str().unwrap()],
        None,
    );
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("1 cases, 0 failed"));
}

#[test]
fn scenario_menu_exits_cleanly_on_zero() {
    let dir = TempDir::new().unwrap();
    let output = run_cli(
        dir.path(),
        &["scenario", "--no-panel", "bluetooth"],
        Some("0\n"),
    );
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Bluetooth Panel"));
    assert!(stdout.contains("Toggle airplane mode"));
    assert!(stdout.contains("0) launch panel and exit menu"));
}

#[test]
fn scenario_actions_survive_round_trip() {
    let dir = TempDir::new().unwrap();
    // Engage and release the hardware kill switch, then leave.
    let output = run_cli(
        dir.path(),
        &["scenario", "--no-panel", "bluetooth"],
        Some("1\n1\n0\n"),
    );
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn scenario_launches_panel_command_after_menu() {
    let dir = TempDir::new().unwrap();
    let panel = write_script(dir.path(), "fake-panel", "#!/bin/sh\nexit 0\n");
    let output = run_cli(
        dir.path(),
        &["scenario", "bluetooth", panel.to_str().unwrap()],
        Some("0\n"),
    );
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn failing_panel_surfaces_as_failure_exit() {
    let dir = TempDir::new().unwrap();
    let panel = write_script(dir.path(), "broken-panel", "#!/bin/sh\nexit 3\n");
    let output = run_cli(
        dir.path(),
        &["scenario", "bluetooth", panel.to_str().unwrap()],
        Some("0\n"),
    );
    assert!(!output.status.success());
}

#[test]
fn doctor_reports_stub_programs_found() {
    let dir = TempDir::new().unwrap();
    let output = run_cli(dir.path(), &["doctor"], None);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ok       display server"));
    assert!(stdout.contains("ok       bus daemon"));
}

#[test]
fn doctor_flags_missing_program() {
    let dir = TempDir::new().unwrap();
    let bus_daemon = stub_bus_daemon(dir.path());
    let output = Command::new(binary_path())
        .arg("--display-server")
        .arg("/nonexistent/display-server")
        .arg("--bus-daemon")
        .arg(&bus_daemon)
        .arg("doctor")
        .output()
        .expect("failed to spawn panel-lab");
    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("MISSING  display server"));
}
