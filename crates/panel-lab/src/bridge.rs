//! Test-case bridge: enumerate named cases from a compiled panel test
//! binary and run each as an isolated, timed invocation.
//!
//! Output is captured per case and surfaced only on failure or timeout; a
//! timed-out case is killed and its captured output annotated as aborted.
//! Per-case failures never abort sibling cases; the aggregate verdict is
//! carried in the report and the process exit code, while stdout stays the
//! single reporting channel.

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SandboxEnv;

/// Flag a panel test binary answers with its case listing.
pub const LIST_FLAG: &str = "-l";
/// Flag selecting a single named case.
pub const RUN_PATH_FLAG: &str = "-p";

/// Errors spawning the test binary itself.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("failed to spawn test executable `{executable}`")]
    Spawn {
        executable: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O failure while driving test executable")]
    Io(#[from] std::io::Error),
}

/// Result of asking the binary for its case list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enumeration {
    /// Named cases, in listing order.
    Cases(Vec<String>),
    /// Listing failed; the whole executable runs as one opaque case.
    Opaque,
}

/// Verdict for one case invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum CaseStatus {
    Passed,
    Failed { exit_code: Option<i32> },
    TimedOut,
}

/// One executed case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseOutcome {
    pub name: String,
    #[serde(flatten)]
    pub status: CaseStatus,
    /// Captured output; `None` for passed cases.
    pub output: Option<String>,
    pub duration_ms: u64,
}

impl CaseOutcome {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.status == CaseStatus::Passed
    }
}

/// Aggregate report for one bridge run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub executable: String,
    pub cases: Vec<CaseOutcome>,
    pub passed: bool,
}

impl RunReport {
    /// One line per case plus a summary, for operator consoles.
    #[must_use]
    pub fn render_human(&self) -> String {
        let mut out = String::new();
        for case in &self.cases {
            let verdict = match case.status {
                CaseStatus::Passed => "ok     ",
                CaseStatus::Failed { .. } => "FAIL   ",
                CaseStatus::TimedOut => "TIMEOUT",
            };
            out.push_str(&format!("{verdict} {} ({}ms)\n", case.name, case.duration_ms));
            if let Some(output) = &case.output {
                for line in output.lines() {
                    out.push_str(&format!("        {line}\n"));
                }
            }
        }
        let failed = self.cases.iter().filter(|c| !c.passed()).count();
        out.push_str(&format!(
            "run {}: {} cases, {} failed\n",
            self.run_id,
            self.cases.len(),
            failed
        ));
        out
    }

    pub fn to_canonical_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Runs panel test binaries case-by-case inside a sandbox environment.
pub struct TestCaseBridge {
    env: SandboxEnv,
    timeout: Duration,
}

impl TestCaseBridge {
    #[must_use]
    pub fn new(env: SandboxEnv, timeout: Duration) -> Self {
        Self { env, timeout }
    }

    /// Query the executable for its named cases. Any failure — spawn
    /// error, non-zero exit, or nothing parseable — falls back to opaque
    /// whole-binary mode.
    #[must_use]
    pub fn enumerate(&self, executable: &Path) -> Enumeration {
        let mut cmd = Command::new(executable);
        cmd.arg(LIST_FLAG)
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        self.env.apply(&mut cmd);
        let output = match cmd.output() {
            Ok(output) if output.status.success() => output,
            Ok(_) | Err(_) => {
                debug!(executable = %executable.display(), "case listing failed, running opaque");
                return Enumeration::Opaque;
            }
        };
        let cases = parse_case_list(&String::from_utf8_lossy(&output.stdout));
        if cases.is_empty() {
            Enumeration::Opaque
        } else {
            Enumeration::Cases(cases)
        }
    }

    /// Run one case (or the whole binary when `case` is `None`) in its own
    /// process with output captured.
    pub fn run_case(
        &self,
        executable: &Path,
        case: Option<&str>,
    ) -> Result<CaseOutcome, BridgeError> {
        let name = case
            .map(ToString::to_string)
            .unwrap_or_else(|| display_name(executable));
        let mut cmd = Command::new(executable);
        if let Some(case) = case {
            cmd.arg(RUN_PATH_FLAG).arg(case);
        }
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        self.env.apply(&mut cmd);

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|source| BridgeError::Spawn {
            executable: executable.display().to_string(),
            source,
        })?;

        // Drain both pipes on threads so a chatty case can never fill a
        // pipe and deadlock against our poll loop.
        let stdout = child.stdout.take().unwrap_or_else(|| unreachable!("piped"));
        let stderr = child.stderr.take().unwrap_or_else(|| unreachable!("piped"));
        let out_reader = thread::spawn(move || read_all(stdout));
        let err_reader = thread::spawn(move || read_all(stderr));

        let deadline = started + self.timeout;
        let mut timed_out = false;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break Some(status);
            }
            if Instant::now() >= deadline {
                timed_out = true;
                let _ = child.kill();
                let _ = child.wait();
                break None;
            }
            thread::sleep(Duration::from_millis(10));
        };

        let mut captured = out_reader.join().unwrap_or_default();
        let stderr_text = err_reader.join().unwrap_or_default();
        if !stderr_text.is_empty() {
            if !captured.is_empty() {
                captured.push('\n');
            }
            captured.push_str(&stderr_text);
        }
        let duration_ms = started.elapsed().as_millis() as u64;

        let outcome = if timed_out {
            captured.push_str(&format!(
                "\n*** aborted: case exceeded {}s timeout\n",
                self.timeout.as_secs_f64()
            ));
            warn!(case = %name, duration_ms, "case timed out");
            CaseOutcome {
                name,
                status: CaseStatus::TimedOut,
                output: Some(captured),
                duration_ms,
            }
        } else {
            let status = status.unwrap_or_else(|| unreachable!("non-timeout exit has status"));
            if status.success() {
                CaseOutcome {
                    name,
                    status: CaseStatus::Passed,
                    output: None,
                    duration_ms,
                }
            } else {
                CaseOutcome {
                    name,
                    status: CaseStatus::Failed {
                        exit_code: status.code(),
                    },
                    output: Some(captured),
                    duration_ms,
                }
            }
        };
        Ok(outcome)
    }

    /// Enumerate and run every case; per-case failures never abort the
    /// remaining cases. A case that cannot even be spawned or driven is
    /// recorded as failed with the error as its output.
    pub fn run_all(&self, executable: &Path) -> RunReport {
        let run_id = Uuid::now_v7();
        let started_at = Utc::now();
        let cases = match self.enumerate(executable) {
            Enumeration::Cases(cases) => {
                info!(count = cases.len(), "enumerated test cases");
                cases.into_iter().map(Some).collect::<Vec<_>>()
            }
            Enumeration::Opaque => vec![None],
        };

        let mut outcomes = Vec::with_capacity(cases.len());
        for case in &cases {
            match self.run_case(executable, case.as_deref()) {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => {
                    let name = case
                        .clone()
                        .unwrap_or_else(|| display_name(executable));
                    warn!(case = %name, error = %err, "case could not be driven");
                    outcomes.push(CaseOutcome {
                        name,
                        status: CaseStatus::Failed { exit_code: None },
                        output: Some(format!("failed to run case: {err}")),
                        duration_ms: 0,
                    });
                }
            }
        }
        let passed = outcomes.iter().all(CaseOutcome::passed);
        RunReport {
            run_id,
            started_at,
            executable: executable.display().to_string(),
            cases: outcomes,
            passed,
        }
    }
}

/// Parse a case listing: one case path per line, paths start with `/`.
#[must_use]
pub fn parse_case_list(listing: &str) -> Vec<String> {
    listing
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('/'))
        .map(ToString::to_string)
        .collect()
}

fn display_name(executable: &Path) -> String {
    executable
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| executable.display().to_string())
}

fn read_all(mut source: impl Read) -> String {
    let mut buf = Vec::new();
    let _ = source.read_to_end(&mut buf);
    String::from_utf8_lossy(&buf).into_owned()
}
