//! Interactive scenario driving: a fixed menu of named actions, each
//! mapping 1:1 to a component operation, observed against the real panel
//! process.
//!
//! Action errors print to the operator console and the menu keeps going;
//! sandbox-fatal errors end the session.

pub mod bluetooth;
pub mod power;

use std::io::{BufRead, Write};
use std::process::{Command, ExitStatus};

use anyhow::{Context, Result};
use tracing::info;

use crate::config::SandboxEnv;
use crate::mock::OrchestratorError;
use crate::sandbox::SandboxError;

/// A menu-driven scenario over a live sandbox.
pub trait Scenario {
    fn title(&self) -> &str;

    /// Operator-facing action labels, in menu order.
    fn actions(&self) -> Vec<String>;

    /// Run the action at `index` (into [`Scenario::actions`]).
    fn invoke(&mut self, index: usize) -> Result<()>;
}

/// Errors that end the interactive session rather than the single action.
fn is_fatal(err: &anyhow::Error) -> bool {
    err.downcast_ref::<SandboxError>().is_some()
        || matches!(
            err.downcast_ref::<OrchestratorError>(),
            Some(OrchestratorError::ServiceUnreachable { .. })
        )
}

/// Drive the scenario menu until the operator picks `0` (launch panel and
/// leave the menu) or input ends.
pub fn run_menu(
    scenario: &mut dyn Scenario,
    input: &mut dyn BufRead,
    output: &mut dyn Write,
) -> Result<()> {
    loop {
        writeln!(output, "\n{} — scenario tester", scenario.title())?;
        for (i, action) in scenario.actions().iter().enumerate() {
            writeln!(output, "  {}) {action}", i + 1)?;
        }
        writeln!(output, "  0) launch panel and exit menu")?;
        write!(output, "> ")?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(());
        }
        let choice = line.trim();
        if choice == "0" || choice.eq_ignore_ascii_case("q") {
            return Ok(());
        }
        let Ok(index) = choice.parse::<usize>() else {
            writeln!(output, "unrecognized choice `{choice}`")?;
            continue;
        };
        if index == 0 || index > scenario.actions().len() {
            writeln!(output, "unrecognized choice `{choice}`")?;
            continue;
        }
        match scenario.invoke(index - 1) {
            Ok(()) => {}
            Err(err) if is_fatal(&err) => return Err(err),
            Err(err) => writeln!(output, "error: {err:#}")?,
        }
    }
}

/// Launch the panel under test with the sandbox environment and block
/// until it exits. The operator wrapper, if any, prefixes the argv.
pub fn launch_panel(env: &SandboxEnv, argv: &[String]) -> Result<ExitStatus> {
    let wrapped = env.wrap_argv(argv);
    let (program, args) = wrapped
        .split_first()
        .context("empty panel command")?;
    info!(command = ?wrapped, "launching panel under test");
    let mut cmd = Command::new(program);
    cmd.args(args);
    env.apply(&mut cmd);
    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to launch panel `{program}`"))?;
    let status = child.wait().context("waiting for panel process")?;
    Ok(status)
}
